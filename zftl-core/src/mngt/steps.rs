// vim: tw=80
//! Individual startup and shutdown steps, and their rollbacks

use std::time::Duration;

use crate::{
    band::Band,
    core_poller::CorePoller,
    device::{Dev, DevState},
    mempool::MemPool,
    p2l::p2l_map_pool_elem_size,
    types::*,
    util::FTL_BLOCK_SIZE,
    writer::{Writer, WriterKind},
};
use super::{StepFut, StepStatus, ready};

fn status(r: Result<()>) -> StepStatus {
    match r {
        Ok(()) => StepStatus::Next,
        Err(e) => StepStatus::Fail(e)
    }
}

pub(super) fn check_conf(dev: &mut Dev) -> StepFut<'_> {
    if dev.conf.is_valid() {
        ready(StepStatus::Next)
    } else {
        tracing::error!(dev = %dev.conf.name, conf = ?dev.conf,
            "Invalid configuration");
        ready(StepStatus::Fail(Error::EINVAL))
    }
}

pub(super) fn open_base_dev(dev: &mut Dev) -> StepFut<'_> {
    let name = dev.base_dev.name();
    if !dev.base_dev.is_zoned() {
        tracing::error!(dev = %dev.conf.name, base_dev = %name,
            "Base device is not zoned");
        return ready(StepStatus::Fail(Error::ENODEV));
    }
    let geo = dev.base_dev.geometry();
    if !geo.is_valid() {
        tracing::error!(dev = %dev.conf.name, base_dev = %name, ?geo,
            "Unusable zone geometry");
        return ready(StepStatus::Fail(Error::EINVAL));
    }
    tracing::info!(dev = %dev.conf.name, base_dev = %name,
        zones = geo.zones, zone_size = geo.zone_size,
        bands = geo.num_bands(), "opened base device");
    dev.geometry = Some(geo);
    ready(StepStatus::Next)
}

pub(super) fn close_base_dev(dev: &mut Dev) -> Result<()> {
    dev.geometry = None;
    Ok(())
}

/// Create the P2L and band metadata pools for bands of `blocks` blocks.
/// Both are attempted even if the first fails, so every cause of failure
/// gets logged.
pub(super) fn create_pools(name: &str, count: usize, blocks: u64)
    -> (Result<MemPool>, Result<MemPool>)
{
    let p2l = match p2l_map_pool_elem_size(blocks) {
        Some(elem_size) => MemPool::create(count, elem_size, FTL_BLOCK_SIZE)
            .inspect_err(|e| tracing::error!(dev = %name, count, elem_size,
                error = ?e, "Unable to create P2L pool")),
        None => {
            tracing::error!(dev = %name, blocks,
                "P2L map is too large to allocate");
            Err(Error::ENOMEM)
        }
    };
    let band_md = MemPool::create(count, FTL_BLOCK_SIZE, FTL_BLOCK_SIZE)
        .inspect_err(|e| tracing::error!(dev = %name, count, error = ?e,
            "Unable to create band metadata pool"));
    (p2l, band_md)
}

pub(super) fn init_mem_pools(dev: &mut Dev) -> StepFut<'_> {
    let Some(geo) = dev.geometry else {
        return ready(StepStatus::Fail(Error::ENODEV));
    };
    let pools = create_pools(&dev.conf.name, dev.conf.p2l_pool_size,
        geo.blocks_per_band());
    match pools {
        (Ok(p2l), Ok(band_md)) => {
            dev.p2l_pool = Some(p2l);
            dev.band_md_pool = Some(band_md);
            ready(StepStatus::Next)
        }
        (p2l, band_md) => {
            if let Ok(pool) = p2l {
                pool.destroy();
            }
            if let Ok(pool) = band_md {
                pool.destroy();
            }
            ready(StepStatus::Fail(Error::ENOMEM))
        }
    }
}

pub(super) fn deinit_mem_pools(dev: &mut Dev) -> Result<()> {
    if let Some(pool) = dev.p2l_pool.take() {
        pool.destroy();
    }
    if let Some(pool) = dev.band_md_pool.take() {
        pool.destroy();
    }
    Ok(())
}

pub(super) fn init_bands(dev: &mut Dev) -> StepFut<'_> {
    let Some(geo) = dev.geometry else {
        return ready(StepStatus::Fail(Error::ENODEV));
    };
    dev.bands = (0..geo.num_bands()).map(|id| Band::new(id, geo)).collect();
    dev.writer_user.set_batch(dev.conf.user_batch(&geo));
    dev.writer_gc.set_batch(geo.xfer_size());
    ready(StepStatus::Next)
}

/// Return every band's buffers to the pools and forget the bands.
pub(super) fn deinit_bands(dev: &mut Dev) -> Result<()> {
    if dev.p2l_pool.is_some() && dev.band_md_pool.is_some() {
        let (bands, p2l_pool, band_md_pool) = dev.band_resources();
        for band in bands.iter_mut() {
            band.release_p2l_map(p2l_pool, band_md_pool);
        }
    }
    dev.bands.clear();
    dev.writer_user = Writer::new(WriterKind::User);
    dev.writer_gc = Writer::new(WriterKind::Gc);
    Ok(())
}

pub(super) fn init_l2p(dev: &mut Dev) -> StepFut<'_> {
    let Some(geo) = dev.geometry else {
        return ready(StepStatus::Fail(Error::ENODEV));
    };
    let n = dev.conf.user_lbas(&geo) as usize;
    if n == 0 {
        tracing::error!(dev = %dev.conf.name, "Device has no user capacity");
        return ready(StepStatus::Fail(Error::EINVAL));
    }
    let mut l2p = Vec::new();
    if l2p.try_reserve_exact(n).is_err() {
        return ready(StepStatus::Fail(Error::ENOMEM));
    }
    l2p.resize(n, Addr::INVALID);
    dev.l2p = Some(l2p);
    ready(StepStatus::Next)
}

pub(super) fn deinit_l2p(dev: &mut Dev) -> Result<()> {
    dev.l2p = None;
    Ok(())
}

pub(super) fn init_nv_cache(dev: &mut Dev) -> StepFut<'_> {
    ready(status(dev.nv_cache.init()))
}

pub(super) fn deinit_nv_cache(dev: &mut Dev) -> Result<()> {
    dev.nv_cache.deinit();
    Ok(())
}

/// Reset every persistent cache tag to `LBA_INVALID`.  Completes when the
/// asynchronous clear does.
pub(super) fn scrub_nv_cache(dev: &mut Dev) -> StepFut<'_> {
    let clear = dev.nv_cache.scrub();
    Box::pin(async move {
        match clear.await {
            Ok(()) => StepStatus::Next,
            Err(e) => {
                tracing::error!(dev = %dev.conf.name, error = ?e,
                    "Scrubbing persistent cache failed");
                StepStatus::Fail(e)
            }
        }
    })
}

/// Mark the device initialized and put the writers and cache to work.
pub(super) fn finalize_startup(dev: &mut Dev) -> StepFut<'_> {
    dev.state = DevState::Running;
    dev.writer_user.resume();
    dev.writer_gc.resume();
    dev.nv_cache.resume();
    ready(StepStatus::Next)
}

pub(super) fn unfinalize_startup(dev: &mut Dev) -> Result<()> {
    dev.state = DevState::Uninitialized;
    dev.writer_user.halt();
    dev.writer_gc.halt();
    dev.nv_cache.halt();
    Ok(())
}

pub(super) fn start_core_poller(dev: &mut Dev) -> StepFut<'_> {
    let period = Duration::from_micros(dev.conf.core_poll_period_us);
    match CorePoller::register(period) {
        Ok(poller) => {
            dev.core_poller = Some(poller);
            ready(StepStatus::Next)
        }
        Err(e) => {
            tracing::error!(dev = %dev.conf.name, "Unable to register core poller");
            ready(StepStatus::Fail(e))
        }
    }
}

pub(super) fn unregister_core_poller(dev: &mut Dev) -> Result<()> {
    dev.core_poller = None;
    Ok(())
}

/// Request halt, then keep the core poller running until it unregisters
/// itself.
pub(super) fn stop_core_poller(dev: &mut Dev) -> StepFut<'_> {
    if dev.state == DevState::Running {
        dev.state = DevState::Halting;
    }
    if dev.core_poller.is_none() {
        return ready(StepStatus::Next);
    }
    if let Err(e) = dev.core_poll() {
        tracing::error!(dev = %dev.conf.name, error = ?e,
            "core poller iteration failed during shutdown");
    }
    ready(StepStatus::Continue)
}

pub(super) fn dump_stats(dev: &mut Dev) -> StepFut<'_> {
    dev.dump_bands();
    dev.dump_stats();
    ready(StepStatus::Next)
}

pub(super) fn deinit_nv_cache_step(dev: &mut Dev) -> StepFut<'_> {
    ready(status(deinit_nv_cache(dev)))
}

pub(super) fn deinit_l2p_step(dev: &mut Dev) -> StepFut<'_> {
    ready(status(deinit_l2p(dev)))
}

pub(super) fn deinit_bands_step(dev: &mut Dev) -> StepFut<'_> {
    ready(status(deinit_bands(dev)))
}

pub(super) fn deinit_mem_pools_step(dev: &mut Dev) -> StepFut<'_> {
    ready(status(deinit_mem_pools(dev)))
}

pub(super) fn close_base_dev_step(dev: &mut Dev) -> StepFut<'_> {
    ready(status(close_base_dev(dev)))
}
