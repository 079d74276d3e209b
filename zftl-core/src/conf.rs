// vim: tw=80
//! Device configuration

use serde_derive::{Deserialize, Serialize};

use crate::{base_dev::Geometry, types::*};

/// Smallest usable number of elements in each memory pool: one band open for
/// user writes, one open for relocation, and the band being relocated.
pub const MIN_P2L_POOL_SIZE: usize = 3;

/// How the device is being brought up
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// First-ever startup.  Persistent cache contents are garbage and must be
    /// scrubbed.
    #[default]
    Create,
    /// Reopen a previously created device
    Load,
}

fn default_overprovisioning() -> u8 {
    20
}

fn default_p2l_pool_size() -> usize {
    4
}

fn default_core_poll_period_us() -> u64 {
    1000
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Conf {
    /// Device name, used in log messages
    pub name: String,
    #[serde(default)]
    pub mode: Mode,
    /// Percentage of raw capacity withheld from the user LBA space
    #[serde(default = "default_overprovisioning")]
    pub overprovisioning: u8,
    /// Number of elements in each of the P2L and band metadata pools
    #[serde(default = "default_p2l_pool_size")]
    pub p2l_pool_size: usize,
    /// Period of the core poller
    #[serde(default = "default_core_poll_period_us")]
    pub core_poll_period_us: u64,
    /// Blocks buffered by the user writer before it issues a transfer.
    /// Defaults to the device's transfer size.
    #[serde(default)]
    pub user_batch: Option<u32>,
}

impl Conf {
    /// Parse a configuration from YAML.
    pub fn from_yaml(s: &str) -> Result<Self> {
        serde_yaml_ng::from_str(s).map_err(|e| {
            tracing::error!("Invalid configuration: {e}");
            Error::EINVAL
        })
    }

    /// Would this configuration produce a working device?
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() &&
            (1..=99).contains(&self.overprovisioning) &&
            self.p2l_pool_size >= MIN_P2L_POOL_SIZE &&
            self.core_poll_period_us > 0 &&
            self.user_batch != Some(0)
    }

    /// A configuration with default settings for the named device
    pub fn new<S: Into<String>>(name: S) -> Self {
        Conf {
            name: name.into(),
            mode: Mode::default(),
            overprovisioning: default_overprovisioning(),
            p2l_pool_size: default_p2l_pool_size(),
            core_poll_period_us: default_core_poll_period_us(),
            user_batch: None,
        }
    }

    /// Number of blocks in each user writer transfer
    pub fn user_batch(&self, geo: &Geometry) -> u64 {
        self.user_batch.map(u64::from).unwrap_or_else(|| geo.xfer_size())
    }

    /// Size of the user-visible LBA space on a device of geometry `geo`
    pub fn user_lbas(&self, geo: &Geometry) -> u64 {
        geo.usable_blocks() * u64::from(100 - self.overprovisioning) / 100
    }
}

// LCOV_EXCL_STOP
