// vim: tw=80
//! The FTL device context
//!
//! Everything that belongs to one open device lives here: the base device's
//! geometry, the bands, the memory pools backing their P2L maps, the L2P
//! table, the persistent cache, both writers and the core poller.  All of it
//! is owned by a single processing context, so there is no internal locking.

use std::fmt;

use crate::{
    band::{Band, BandState},
    base_dev::{BaseDev, Geometry},
    conf::Conf,
    core_poller::CorePoller,
    mempool::MemPool,
    nv_cache::{MdRegion, NvCache},
    types::*,
    writer::{Writer, WriterKind},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DevState {
    /// Startup hasn't completed
    Uninitialized,
    Running,
    /// Shutdown requested; waiting for the core poller to quiesce
    Halting,
    Halted,
}

/// Write counters, in blocks
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub user_writes: u64,
    pub gc_writes: u64,
    /// Blocks written only to complete a transfer
    pub pad_writes: u64,
}

impl Stats {
    pub fn total_writes(&self) -> u64 {
        self.user_writes + self.gc_writes + self.pad_writes
    }

    /// Blocks written to media per block written by users.  Infinite if
    /// users haven't written anything.
    pub fn write_amplification(&self) -> f64 {
        if self.user_writes == 0 {
            f64::INFINITY
        } else {
            self.total_writes() as f64 / self.user_writes as f64
        }
    }
}

pub struct Dev {
    pub(crate) conf: Conf,
    pub(crate) base_dev: Box<dyn BaseDev>,
    pub(crate) geometry: Option<Geometry>,
    // NB: bands must be declared before the pools that their maps came from.
    pub(crate) bands: Vec<Band>,
    pub(crate) p2l_pool: Option<MemPool>,
    pub(crate) band_md_pool: Option<MemPool>,
    pub(crate) l2p: Option<Vec<Addr>>,
    pub(crate) nv_cache: NvCache,
    pub(crate) writer_user: Writer,
    pub(crate) writer_gc: Writer,
    pub(crate) core_poller: Option<CorePoller>,
    pub(crate) state: DevState,
    /// Sequence id handed to the next band that opens
    pub(crate) seq_id: u64,
    pub(crate) stats: Stats,
}

impl Dev {
    /// Return the band that owns `addr`.
    pub fn band_from_addr(&self, addr: Addr) -> &Band {
        let b = self.geo().band_from_addr(addr);
        &self.bands[b as usize]
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands[..]
    }

    pub fn conf(&self) -> &Conf {
        &self.conf
    }

    /// Run one iteration of the core processing loop.
    ///
    /// Places every complete transfer queued by the writers.  Once halt has
    /// been requested it also drains and halts the writers and the cache, and
    /// when everything is quiescent it unregisters the poller.
    pub fn core_poll(&mut self) -> Result<()> {
        if let Some(poller) = self.core_poller.as_mut() {
            poller.count_iteration();
        }
        if self.state != DevState::Halting {
            return self.run_writer(WriterKind::User);
        }

        for kind in [WriterKind::User, WriterKind::Gc] {
            if !self.writer(kind).is_halted() || self.writer(kind).pending() > 0
            {
                self.halt_writer(kind);
            }
        }
        if self.writer_user.is_halted() && self.writer_gc.is_halted() {
            self.nv_cache.halt();
        }
        if self.writer_user.is_halted() && self.writer_gc.is_halted() &&
            self.writer_user.pending() == 0 && self.writer_gc.pending() == 0 &&
            self.nv_cache.is_halted()
        {
            if let Some(poller) = self.core_poller.take() {
                tracing::info!(dev = %self.conf.name,
                    iterations = poller.iterations(),
                    "core poller unregistered");
            }
            self.state = DevState::Halted;
        }
        Ok(())
    }

    /// Log the state of every band that isn't free.
    pub fn dump_bands(&self) {
        for band in self.bands.iter().filter(|b| b.state() != BandState::Free) {
            tracing::info!(dev = %self.conf.name, band = band.id(),
                state = %band.state(), valid = band.num_valid(),
                capacity = band.capacity(), wr_cnt = band.wr_cnt());
        }
    }

    /// Log aggregate statistics.
    pub fn dump_stats(&self) {
        let total_valid: u64 = self.bands.iter().map(Band::num_valid).sum();
        tracing::info!(dev = %self.conf.name, total_valid,
            user_writes = self.stats.user_writes,
            total_writes = self.stats.total_writes(),
            waf = %format!("{:.4}", self.stats.write_amplification()),
            "device statistics");
    }

    /// Place any partial user transfer, padding it out to a whole one.
    pub fn flush(&mut self) -> Result<()> {
        if self.state != DevState::Running {
            return Err(Error::EAGAIN);
        }
        self.writer_user.pad();
        self.run_writer(WriterKind::User)
    }

    /// Geometry of an open device
    fn geo(&self) -> &Geometry {
        self.geometry.as_ref().expect("base device is not open")
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    /// Pad, place and halt a writer as part of shutdown.  Anything that
    /// can't be placed is dropped, so halting always completes.
    fn halt_writer(&mut self, kind: WriterKind) {
        self.writer_mut(kind).halt();
        self.writer_mut(kind).pad();
        if let Err(e) = self.run_writer(kind) {
            let lost = self.writer_mut(kind).discard();
            tracing::error!(dev = %self.conf.name, ?kind, error = ?e, lost,
                "could not drain writer");
        }
    }

    /// Mark the block at `addr` dead in whichever band owns it.
    pub fn invalidate_addr(&mut self, addr: Addr) {
        let b = self.geo().band_from_addr(addr);
        self.bands[b as usize].invalidate_addr(addr);
    }

    /// Return the current location of `lba`, or `Addr::INVALID` if it has
    /// never been written.
    pub fn lookup(&self, lba: LbaT) -> Result<Addr> {
        let l2p = self.l2p.as_ref().ok_or(Error::EAGAIN)?;
        l2p.get(lba as usize).copied().ok_or(Error::EINVAL)
    }

    pub fn name(&self) -> &str {
        &self.conf.name
    }

    pub fn new(conf: Conf, base_dev: Box<dyn BaseDev>, md: Box<dyn MdRegion>)
        -> Self
    {
        Dev {
            conf,
            base_dev,
            geometry: None,
            bands: Vec::new(),
            p2l_pool: None,
            band_md_pool: None,
            l2p: None,
            nv_cache: NvCache::new(md),
            writer_user: Writer::new(WriterKind::User),
            writer_gc: Writer::new(WriterKind::Gc),
            core_poller: None,
            state: DevState::Uninitialized,
            seq_id: 0,
            stats: Stats::default(),
        }
    }

    pub fn num_lbas(&self) -> u64 {
        self.l2p.as_ref().map(|l2p| l2p.len() as u64).unwrap_or(0)
    }

    pub fn nv_cache(&self) -> &NvCache {
        &self.nv_cache
    }

    /// Place `batch` on behalf of writer `kind`, at its band's write pointer.
    ///
    /// Anything that can't be placed goes back to the head of the writer's
    /// queue.
    fn place(&mut self, kind: WriterKind, batch: Vec<LbaT>) -> Result<()> {
        let mut placed = 0;
        while placed < batch.len() {
            let b = match self.writer_band(kind) {
                Ok(b) => b as usize,
                Err(e) => {
                    self.writer_mut(kind).requeue(batch[placed..].to_vec());
                    return Err(e);
                }
            };
            let base = self.bands[b].iter_addr();
            let n = (self.bands[b].iter_remaining() as usize)
                .min(batch.len() - placed);
            for (i, &lba) in batch[placed..placed + n].iter().enumerate() {
                if lba == LBA_INVALID {
                    self.stats.pad_writes += 1;
                    continue;
                }
                let addr = self.bands[b].next_xfer_addr(base, i as u64)
                    .expect("transfer fits in the band");
                self.set_l2p(lba, addr);
                if kind == WriterKind::User {
                    self.stats.user_writes += 1;
                    if let Err(e) = self.nv_cache.record(lba) {
                        tracing::warn!(dev = %self.conf.name, lba,
                            error = ?e, "could not journal write");
                    }
                } else {
                    self.stats.gc_writes += 1;
                }
            }
            self.bands[b].iter_advance(n as u64);
            placed += n;
            if self.bands[b].state() == BandState::Full {
                let (bands, p2l_pool, band_md_pool) = self.band_resources();
                bands[b].close(p2l_pool, band_md_pool)?;
                self.writer_mut(kind).set_band(None);
            }
        }
        Ok(())
    }

    /// Wait for the core poller's next tick, then run one iteration.
    ///
    /// Fails with `ENXIO` if no poller is registered.
    pub async fn poll(&mut self) -> Result<()> {
        self.core_poller.as_mut()
            .ok_or(Error::ENXIO)?
            .tick()
            .await;
        self.core_poll()
    }

    /// Move every still-valid block out of closed band `victim`, then free
    /// it.
    ///
    /// Choosing the victim is up to the caller.
    #[tracing::instrument(skip(self), fields(dev = %self.conf.name))]
    pub fn relocate(&mut self, victim: BandT) -> Result<()> {
        if self.state != DevState::Running {
            return Err(Error::EAGAIN);
        }
        let v = victim as usize;
        if self.bands.get(v).map(Band::state) != Some(BandState::Closed) {
            return Err(Error::EINVAL);
        }
        {
            let (bands, p2l_pool, band_md_pool) = self.band_resources();
            bands[v].load_p2l_map(p2l_pool, band_md_pool)?;
        }
        let band = &self.bands[v];
        let live = (0..band.capacity())
            .filter_map(|offset| band.lba_at(offset))
            .collect::<Vec<_>>();
        let moved = live.len();
        for lba in live {
            self.writer_gc.enqueue(lba)?;
        }
        self.writer_gc.pad();
        self.run_writer(WriterKind::Gc)?;

        let (bands, p2l_pool, band_md_pool) = self.band_resources();
        bands[v].free(p2l_pool, band_md_pool);
        tracing::info!(band = victim, moved, "relocated band");
        Ok(())
    }

    /// Place every complete transfer queued by writer `kind`.
    fn run_writer(&mut self, kind: WriterKind) -> Result<()> {
        while let Some(batch) = self.writer_mut(kind).take_batch() {
            self.place(kind, batch)?;
        }
        Ok(())
    }

    /// Point `lba` at `addr`, invalidating its previous location.
    fn set_l2p(&mut self, lba: LbaT, addr: Addr) {
        let l2p = self.l2p.as_mut().expect("L2P is initialized");
        let old = std::mem::replace(&mut l2p[lba as usize], addr);
        if old.is_valid() {
            self.invalidate_addr(old);
        }
        let b = self.geo().band_from_addr(addr);
        self.bands[b as usize].set_addr(lba, addr);
    }

    pub fn state(&self) -> DevState {
        self.state
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Queue a user write of `lba`.  The data is placed by the core poller.
    ///
    /// Fails with `EAGAIN` unless the device is running, and with `EINVAL`
    /// if `lba` is beyond the end of the user address space.
    pub fn write(&mut self, lba: LbaT) -> Result<()> {
        if let Some(l2p) = self.l2p.as_ref() {
            if lba >= l2p.len() as u64 {
                return Err(Error::EINVAL);
            }
        }
        self.writer_user.enqueue(lba)
    }

    /// Return the band open for writer `kind`, opening a free one if needed.
    ///
    /// The user writer may not take the last free band; that one is reserved
    /// for relocation.
    fn writer_band(&mut self, kind: WriterKind) -> Result<BandT> {
        if let Some(b) = self.writer(kind).band() {
            return Ok(b);
        }
        let reserve = if kind == WriterKind::User { 1 } else { 0 };
        let mut free = self.bands.iter()
            .filter(|b| b.state() == BandState::Free)
            .map(Band::id);
        let b = free.next().ok_or(Error::ENOSPC)?;
        if free.count() < reserve {
            return Err(Error::ENOSPC);
        }
        self.seq_id += 1;
        let seq_id = self.seq_id;
        let (bands, p2l_pool, band_md_pool) = self.band_resources();
        bands[b as usize].open(seq_id, p2l_pool, band_md_pool)?;
        self.writer_mut(kind).set_band(Some(b));
        Ok(b)
    }

    fn writer(&self, kind: WriterKind) -> &Writer {
        match kind {
            WriterKind::User => &self.writer_user,
            WriterKind::Gc => &self.writer_gc,
        }
    }

    fn writer_mut(&mut self, kind: WriterKind) -> &mut Writer {
        match kind {
            WriterKind::User => &mut self.writer_user,
            WriterKind::Gc => &mut self.writer_gc,
        }
    }

    /// Borrow the bands together with the pools their maps come from.
    pub(crate) fn band_resources(&mut self)
        -> (&mut Vec<Band>, &mut MemPool, &mut MemPool)
    {
        let p2l_pool = self.p2l_pool.as_mut()
            .expect("memory pools are initialized");
        let band_md_pool = self.band_md_pool.as_mut()
            .expect("memory pools are initialized");
        (&mut self.bands, p2l_pool, band_md_pool)
    }
}

impl fmt::Debug for Dev {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dev")
            .field("name", &self.conf.name)
            .field("state", &self.state)
            .field("geometry", &self.geometry)
            .field("bands", &self.bands.len())
            .field("stats", &self.stats)
            .finish()
    }
}

// LCOV_EXCL_STOP
