// vim: tw=80
//! Random overwrite workloads with relocation
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use rstest::rstest;
use zftl_core::{
    band::BandState,
    mngt::{run_shutdown, run_startup},
};
use super::*;

fn free_bands(dev: &Dev) -> usize {
    dev.bands().iter().filter(|b| b.state() == BandState::Free).count()
}

/// Reclaim the closed band with the least valid data until there is some
/// headroom again.
fn make_room(dev: &mut Dev) {
    while free_bands(dev) <= 2 {
        let victim = dev.bands().iter()
            .filter(|b| b.state() == BandState::Closed)
            .min_by_key(|b| b.num_valid())
            .expect("no closed band to reclaim")
            .id();
        t!(dev.relocate(victim));
    }
}

#[rstest]
#[case(1, 0x1234)]
#[case(2, 0xdead_beef)]
#[case(4, 42)]
fn random_overwrites(#[case] width: u32, #[case] seed: u64) {
    let rt = basic_runtime();
    let (mut dev, _md) = DevBuilder::new()
        .width(width)
        .zones(8 * width)
        .overprovisioning(50)
        .build();
    let mut rng = XorShiftRng::seed_from_u64(seed);
    rt.block_on(async {
        t!(run_startup(&mut dev).await);
        let n = dev.num_lbas();
        for round in 0..8 {
            for _ in 0..500 {
                for _ in 0..64 {
                    t!(dev.write(rng.gen_range(0..n)));
                }
                t!(dev.core_poll());
                make_room(&mut dev);
            }
            check_consistency(&dev);
            let stats = dev.stats();
            assert!(stats.gc_writes > 0 || round == 0,
                "round {round} never relocated anything");
        }
        t!(run_shutdown(&mut dev).await);
    });
    assert!(dev.stats().write_amplification() >= 1.0);
}
