// vim: tw=80
use zftl_core::{
    band::Band,
    base_dev::{Geometry, SimDev},
    conf::Conf,
    device::Dev,
    nv_cache::MemMdRegion,
};

macro_rules! t {
    ($e:expr) => (match $e {
        Ok(e) => e,
        Err(e) => panic!("{} failed with {:?}", stringify!($e), e),
    })
}

/// Helper to generate the runtime used by most tests
fn basic_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

/// Helper to create a fresh, unstarted device
#[derive(Debug)]
struct DevBuilder {
    /// Blocks per zone
    zone_size: u64,
    /// Zones on the device
    zones: u32,
    /// Zones per band
    width: u32,
    /// Transfer size, in blocks
    xfer: u32,
    /// Persistent cache size, in blocks
    cache_blocks: u64,
    conf: Conf,
}

impl DevBuilder {
    fn build(&self) -> (Dev, MemMdRegion) {
        let geo = Geometry {
            zone_size: self.zone_size,
            zones: self.zones,
            optimal_open_zones: self.width,
            write_unit_size: self.xfer,
            block_size: 4096,
        };
        let md = MemMdRegion::new(self.cache_blocks, 1);
        let sd = SimDev::new("zns0", geo);
        let dev = Dev::new(self.conf.clone(), Box::new(sd), Box::new(md.clone()));
        (dev, md)
    }

    fn new() -> Self {
        Self {
            zone_size: 128,
            zones: 16,
            width: 2,
            xfer: 8,
            cache_blocks: 64,
            conf: Conf::new("functional_test_ftl"),
        }
    }

    fn overprovisioning(&mut self, op: u8) -> &mut Self {
        self.conf.overprovisioning = op;
        self
    }

    fn width(&mut self, width: u32) -> &mut Self {
        self.width = width;
        self
    }

    fn zones(&mut self, zones: u32) -> &mut Self {
        self.zones = zones;
        self
    }
}

/// Check that the L2P table and every band's validity agree.
fn check_consistency(dev: &Dev) {
    let mut mapped = 0;
    for lba in 0..dev.num_lbas() {
        let addr = t!(dev.lookup(lba));
        if addr.is_valid() {
            mapped += 1;
            let band = dev.band_from_addr(addr);
            assert!(band.is_valid(band.offset_from_addr(addr)),
                "LBA {lba} maps to dead block {addr}");
        }
    }
    let valid: u64 = dev.bands().iter().map(Band::num_valid).sum();
    assert_eq!(valid, mapped);
}

mod lifecycle;
mod torture;
