// vim: tw=80
//! Persistent write cache
//!
//! Each cache block carries a small piece of metadata, the [`CacheVss`],
//! naming the LBA whose data it holds.  Crash recovery trusts those tags, so a
//! newly created cache must be scrubbed before first use: every tag is reset
//! to `LBA_INVALID`.  While running, the cache is used as a circular journal
//! of user writes.

#[cfg(test)] use mockall::automock;
use serde_derive::{Deserialize, Serialize};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
};

use crate::types::*;

pub type ClearFut = Pin<Box<dyn Future<Output=Result<()>> + Send>>;

/// Metadata stored alongside every cache block
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CacheVss {
    /// Layout version of the region that wrote this tag
    pub md_version: u32,
    /// LBA whose data lives in the block, or `LBA_INVALID`
    pub lba: LbaT,
}

/// The metadata region of the persistent cache device
#[cfg_attr(test, automock)]
pub trait MdRegion: Send {
    /// Number of blocks in the region
    fn blocks(&self) -> u64;

    /// Current metadata layout version
    fn version(&self) -> u32;

    /// Asynchronously overwrite every block's metadata with `vss`
    fn clear(&self, vss: CacheVss) -> ClearFut;

    fn read_vss(&self, block: u64) -> Result<CacheVss>;

    fn write_vss(&mut self, block: u64, vss: CacheVss) -> Result<()>;
}

/// An in-memory metadata region.
///
/// A new region is filled with stale tags, as a previously used device would
/// be.
#[derive(Clone)]
pub struct MemMdRegion {
    vss: Arc<Mutex<Vec<CacheVss>>>,
    version: u32,
}

impl MemMdRegion {
    pub fn new(blocks: u64, version: u32) -> Self {
        let stale = (0..blocks)
            .map(|lba| CacheVss{md_version: version.wrapping_sub(1), lba})
            .collect::<Vec<_>>();
        MemMdRegion {
            vss: Arc::new(Mutex::new(stale)),
            version
        }
    }
}

impl MdRegion for MemMdRegion {
    fn blocks(&self) -> u64 {
        self.vss.lock().unwrap().len() as u64
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn clear(&self, vss: CacheVss) -> ClearFut {
        let region = self.vss.clone();
        Box::pin(async move {
            region.lock().unwrap().fill(vss);
            Ok(())
        })
    }

    fn read_vss(&self, block: u64) -> Result<CacheVss> {
        self.vss.lock().unwrap()
            .get(block as usize)
            .copied()
            .ok_or(Error::EINVAL)
    }

    fn write_vss(&mut self, block: u64, vss: CacheVss) -> Result<()> {
        let mut guard = self.vss.lock().unwrap();
        let slot = guard.get_mut(block as usize).ok_or(Error::EINVAL)?;
        *slot = vss;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheState {
    Uninitialized,
    /// Initialized, but not accepting writes
    Paused,
    Running,
    Halted,
}

pub struct NvCache {
    md: Box<dyn MdRegion>,
    state: CacheState,
    /// Next journal slot to write
    head: u64,
}

impl NvCache {
    /// Tear down the cache.  Its contents stay on media.
    pub fn deinit(&mut self) {
        self.state = CacheState::Uninitialized;
        self.head = 0;
    }

    /// Stop accepting writes.
    pub fn halt(&mut self) {
        if self.state == CacheState::Running || self.state == CacheState::Paused
        {
            self.state = CacheState::Halted;
        }
    }

    /// Attach to the metadata region.  Fails with `EIO` if the region is
    /// unusable.
    pub fn init(&mut self) -> Result<()> {
        assert_eq!(self.state, CacheState::Uninitialized);
        if self.md.blocks() == 0 {
            tracing::error!("persistent cache has no blocks");
            return Err(Error::EIO);
        }
        self.head = 0;
        self.state = CacheState::Paused;
        Ok(())
    }

    pub fn is_halted(&self) -> bool {
        self.state == CacheState::Halted
    }

    /// Return every block whose tag names a live LBA from the current layout
    /// version, as `(block, lba)` pairs.
    pub fn live_tags(&self) -> Result<Vec<(u64, LbaT)>> {
        let version = self.md.version();
        let mut tags = Vec::new();
        for block in 0..self.md.blocks() {
            let vss = self.md.read_vss(block)?;
            if vss.md_version == version && vss.lba != LBA_INVALID {
                tags.push((block, vss.lba));
            }
        }
        Ok(tags)
    }

    pub fn new(md: Box<dyn MdRegion>) -> Self {
        NvCache {
            md,
            state: CacheState::Uninitialized,
            head: 0,
        }
    }

    /// Journal a user write of `lba`.
    pub fn record(&mut self, lba: LbaT) -> Result<()> {
        if self.state != CacheState::Running {
            return Err(Error::EAGAIN);
        }
        let vss = CacheVss{md_version: self.md.version(), lba};
        self.md.write_vss(self.head, vss)?;
        self.head = (self.head + 1) % self.md.blocks();
        Ok(())
    }

    /// Start accepting writes.
    pub fn resume(&mut self) {
        assert_eq!(self.state, CacheState::Paused,
            "Only a paused cache may resume");
        self.state = CacheState::Running;
    }

    /// Reset every block's tag to `LBA_INVALID`.
    ///
    /// The returned future does not borrow the cache.
    pub fn scrub(&self) -> ClearFut {
        let blocks = self.md.blocks();
        tracing::info!(blocks, "scrubbing persistent cache");
        let vss = CacheVss{md_version: self.md.version(), lba: LBA_INVALID};
        self.md.clear(vss)
    }

    pub fn state(&self) -> CacheState {
        self.state
    }
}

impl fmt::Debug for NvCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NvCache")
            .field("state", &self.state)
            .field("head", &self.head)
            .finish()
    }
}

// LCOV_EXCL_STOP
