// vim: tw=80
//! Flash translation layer for zoned block devices
//!
//! Presents a conventional, randomly writable LBA space on top of a device
//! whose zones may only be written sequentially.

// I don't find this lint very helpful
#![allow(clippy::type_complexity)]

// I use a common pattern to substitute mock objects for real ones in test
// builds.  Silence clippy's complaints.
#![allow(clippy::module_inception)]

// I just don't like the look of e.g. "Lba" as opposed to "LBA".
#![allow(clippy::upper_case_acronyms)]

pub mod band;
pub mod base_dev;
pub mod conf;
pub mod core_poller;
pub mod device;
pub mod mempool;
pub mod mngt;
pub mod nv_cache;
pub mod p2l;
pub mod types;
pub mod util;
pub mod writer;

pub use crate::types::*;
pub use crate::util::*;
