// vim: tw=80
//! Interface to the zoned block device underneath the FTL

#[cfg(test)] use mockall::automock;
use serde_derive::{Deserialize, Serialize};
use std::mem;

use crate::types::*;

/// Zone geometry reported by the base device.
///
/// Consumed once at device-open to parameterize all address arithmetic.  It
/// may not change for the lifetime of an open device.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Geometry {
    /// Number of blocks in each zone
    pub zone_size: u64,
    /// Number of zones on the device
    pub zones: ZoneT,
    /// How many zones the device can efficiently keep open at once.  This is
    /// the striping width of a band.
    pub optimal_open_zones: u32,
    /// Write unit, in blocks.  This is the transfer size that sequential band
    /// writes are striped in.
    pub write_unit_size: u32,
    /// Block size in bytes
    pub block_size: u32,
}

impl Geometry {
    /// Address of the first block of band `band`
    pub fn band_start(&self, band: BandT) -> Addr {
        Addr(u64::from(band) * self.blocks_per_band())
    }

    /// Return the band that owns `addr`.
    pub fn band_from_addr(&self, addr: Addr) -> BandT {
        assert!(addr.0 < self.usable_blocks(),
            "Address {addr} lies beyond the last band");
        (addr.0 / self.blocks_per_band()) as BandT
    }

    /// Number of blocks in each band
    pub fn blocks_per_band(&self) -> u64 {
        self.zone_size * u64::from(self.optimal_open_zones)
    }

    /// Does the geometry describe a device that the FTL can run on?
    ///
    /// Every parameter must be nonzero, zones must hold a whole number of
    /// transfers, and there must be room for at least one band.  The device
    /// must also be small enough that every address, and the P2L map of every
    /// band, can be computed without overflow.
    pub fn is_valid(&self) -> bool {
        self.zone_size > 0 &&
            self.optimal_open_zones > 0 &&
            self.write_unit_size > 0 &&
            self.block_size > 0 &&
            self.zone_size % u64::from(self.write_unit_size) == 0 &&
            self.zones >= self.optimal_open_zones &&
            self.fits()
    }

    /// Can the device's sizes be computed without overflow?
    fn fits(&self) -> bool {
        let entry = mem::size_of::<LbaT>() as u64;
        let raw = self.zone_size.checked_mul(u64::from(self.zones));
        let usable = self.zone_size
            .checked_mul(u64::from(self.optimal_open_zones))
            .and_then(|bpb| bpb.checked_mul(u64::from(self.num_bands())));
        match (raw, usable) {
            // Addr::INVALID is reserved, so the end address must stay below it
            (Some(raw), Some(usable)) => raw < u64::MAX &&
                usable.checked_mul(entry).is_some(),
            _ => false
        }
    }

    /// Number of bands the device can hold.  Trailing zones that can't fill a
    /// whole band go unused.
    pub fn num_bands(&self) -> BandT {
        self.zones / self.optimal_open_zones
    }

    /// Total number of blocks on the device, including unused trailing zones
    pub fn num_blocks(&self) -> u64 {
        u64::from(self.zones) * self.zone_size
    }

    /// Number of blocks covered by bands
    pub fn usable_blocks(&self) -> u64 {
        u64::from(self.num_bands()) * self.blocks_per_band()
    }

    /// Transfer size in blocks
    pub fn xfer_size(&self) -> u64 {
        u64::from(self.write_unit_size)
    }

    /// Return the zone that contains `addr`
    pub fn zone_from_addr(&self, addr: Addr) -> ZoneT {
        (addr.0 / self.zone_size) as ZoneT
    }
}

/// The block device underneath the FTL.
///
/// Only the parts that the address-translation layer needs are modelled
/// here.  I/O submission belongs to the layers above.
#[cfg_attr(test, automock)]
pub trait BaseDev: Send {
    /// Zone geometry.  Must not change while the FTL has the device open.
    fn geometry(&self) -> Geometry;

    /// Does the device actually enforce zone semantics?
    fn is_zoned(&self) -> bool;

    /// Name of the device, for log messages
    fn name(&self) -> String;
}

/// An in-memory zoned device.  It only reports geometry.
#[derive(Clone, Debug)]
pub struct SimDev {
    geometry: Geometry,
    name: String,
}

impl SimDev {
    pub fn new<S: Into<String>>(name: S, geometry: Geometry) -> Self {
        SimDev{geometry, name: name.into()}
    }
}

impl BaseDev for SimDev {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn is_zoned(&self) -> bool {
        true
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

// LCOV_EXCL_STOP
