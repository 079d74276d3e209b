// vim: tw=80
//! Startup and shutdown pipelines

use crate::{
    conf::{Conf, Mode},
    device::{Dev, DevState},
    types::*,
};
use super::{Process, Step, steps::*};

/// Build the startup pipeline for a device configured with `conf`.
pub fn startup_process(conf: &Conf) -> Process<Dev> {
    let mut p = Process::new("startup");
    p.push(Step::new("check_conf", check_conf))
        .push(Step::new("open_base_dev", open_base_dev)
              .with_cleanup(close_base_dev))
        .push(Step::new("init_mem_pools", init_mem_pools)
              .with_cleanup(deinit_mem_pools))
        .push(Step::new("init_bands", init_bands)
              .with_cleanup(deinit_bands))
        .push(Step::new("init_l2p", init_l2p)
              .with_cleanup(deinit_l2p))
        .push(Step::new("init_nv_cache", init_nv_cache)
              .with_cleanup(deinit_nv_cache));
    if conf.mode == Mode::Create {
        p.push(Step::new("scrub_nv_cache", scrub_nv_cache));
    }
    p.push(Step::new("finalize_startup", finalize_startup)
              .with_cleanup(unfinalize_startup))
        .push(Step::new("start_core_poller", start_core_poller)
              .with_cleanup(unregister_core_poller));
    p
}

/// Build the shutdown pipeline.
pub fn shutdown_process() -> Process<Dev> {
    let mut p = Process::new("shutdown");
    p.push(Step::new("stop_core_poller", stop_core_poller))
        .push(Step::new("dump_stats", dump_stats))
        .push(Step::new("deinit_nv_cache", deinit_nv_cache_step))
        .push(Step::new("deinit_l2p", deinit_l2p_step))
        .push(Step::new("deinit_bands", deinit_bands_step))
        .push(Step::new("deinit_mem_pools", deinit_mem_pools_step))
        .push(Step::new("close_base_dev", close_base_dev_step));
    p
}

/// Bring `dev` from `Uninitialized` to `Running`.
///
/// On failure everything done so far is rolled back, and the device is left
/// uninitialized.  Fails with `EALREADY` if the device has already been
/// started.
#[tracing::instrument(skip(dev), fields(dev = %dev.name()))]
pub async fn run_startup(dev: &mut Dev) -> Result<()> {
    if dev.state() != DevState::Uninitialized {
        return Err(Error::EALREADY);
    }
    let mut p = startup_process(dev.conf());
    p.run(dev).await
}

/// Quiesce and tear down a running device.  Fails with `EINVAL` unless the
/// device is running.
#[tracing::instrument(skip(dev), fields(dev = %dev.name()))]
pub async fn run_shutdown(dev: &mut Dev) -> Result<()> {
    if dev.state() != DevState::Running {
        return Err(Error::EINVAL);
    }
    shutdown_process().run(dev).await
}

// LCOV_EXCL_STOP
