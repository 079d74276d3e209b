// vim: tw=80
use pretty_assertions::assert_eq;
use zftl_core::{
    LBA_INVALID,
    band::BandState,
    device::DevState,
    mngt::{run_shutdown, run_startup},
    nv_cache::MdRegion,
};
use super::*;

/// Startup, write, overwrite, relocate and shutdown a device
#[test_log::test]
fn full_cycle() {
    let rt = basic_runtime();
    let (mut dev, md) = DevBuilder::new().build();
    rt.block_on(async {
        t!(run_startup(&mut dev).await);
        assert_eq!(dev.state(), DevState::Running);
        let bpb = dev.geometry().unwrap().blocks_per_band();

        // Fill the first band exactly
        for lba in 0..bpb {
            t!(dev.write(lba));
        }
        t!(dev.poll().await);
        assert_eq!(dev.bands()[0].state(), BandState::Closed);
        assert_eq!(dev.bands()[0].num_valid(), bpb);
        let md0 = dev.bands()[0].md().unwrap().clone();
        assert_eq!(md0.num_valid, bpb);

        // Overwrite three quarters of it
        for lba in 0..(3 * bpb / 4) {
            t!(dev.write(lba));
        }
        t!(dev.poll().await);
        assert_eq!(dev.bands()[0].num_valid(), bpb / 4);
        check_consistency(&dev);

        // Reclaim it
        t!(dev.relocate(0));
        assert_eq!(dev.bands()[0].state(), BandState::Free);
        assert_eq!(dev.stats().gc_writes, bpb / 4);
        check_consistency(&dev);
        for lba in 0..bpb {
            let addr = t!(dev.lookup(lba));
            assert!(addr.is_valid());
            assert_ne!(dev.band_from_addr(addr).id(), 0);
        }

        // A partial transfer is padded during shutdown
        t!(dev.write(5));
        t!(run_shutdown(&mut dev).await);
    });
    assert_eq!(dev.state(), DevState::Halted);
    let stats = *dev.stats();
    assert_eq!(stats.user_writes, 64 * 7 + 1);
    assert_eq!(stats.pad_writes, 7);
    assert!(stats.write_amplification() > 1.0);
    // The cache journal wrapped, so every slot holds a live tag
    assert!((0..md.blocks()).all(|b| t!(md.read_vss(b)).lba != LBA_INVALID));
}

/// Every LBA of the user address space can be written, and rewritten with
/// relocation making room.
#[test]
fn fill_then_rewrite() {
    let rt = basic_runtime();
    let (mut dev, _md) = DevBuilder::new()
        .zones(8)
        .overprovisioning(50)
        .build();
    rt.block_on(async {
        t!(run_startup(&mut dev).await);
        let n = dev.num_lbas();
        for round in 0..3 {
            for lba in 0..n {
                t!(dev.write(lba));
                if lba % 64 == 63 {
                    let r = dev.core_poll();
                    if r.is_err() {
                        // Out of bands.  Reclaim the emptiest closed one.
                        let victim = dev.bands().iter()
                            .filter(|b| b.state() == BandState::Closed)
                            .min_by_key(|b| b.num_valid())
                            .unwrap()
                            .id();
                        t!(dev.relocate(victim));
                        t!(dev.core_poll());
                    }
                }
            }
            t!(dev.flush());
            check_consistency(&dev);
            assert!(t!(dev.lookup(n - 1)).is_valid(), "round {round}");
        }
        t!(run_shutdown(&mut dev).await);
    });
}
