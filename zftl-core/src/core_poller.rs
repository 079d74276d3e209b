// vim: tw=80
//! Registration of the device's recurring core-processing callback

use std::time::Duration;
use tokio::{
    runtime::Handle,
    time::{self, Interval, MissedTickBehavior},
};

use crate::types::*;

/// Paces the device's core processing loop on the runtime that registered it.
#[derive(Debug)]
pub struct CorePoller {
    interval: Interval,
    iterations: u64,
}

impl CorePoller {
    /// Number of iterations run so far
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Register a poller on the current tokio runtime.
    ///
    /// Fails with `ENXIO` if there is no runtime to register on.
    pub fn register(period: Duration) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| Error::ENXIO)?;
        let _guard = handle.enter();
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(CorePoller{interval, iterations: 0})
    }

    /// Wait until the next iteration is due.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    pub(crate) fn count_iteration(&mut self) {
        self.iterations += 1;
    }
}

// LCOV_EXCL_STOP
