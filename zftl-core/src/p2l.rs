// vim: tw=80
//! Physical-to-logical ("P2L") reverse map
//!
//! Each open band owns one of these.  It records, for every band-relative
//! block offset, which LBA currently lives there.  The map itself lives in a
//! [`MemPool`] element, encoded as one little-endian `u64` per block.

use byteorder::{ByteOrder, LittleEndian};
use metrohash::MetroHash64;
use std::{
    fmt,
    hash::Hasher,
    mem,
};

use crate::{
    mempool::{MemPool, PoolElem},
    types::*,
    util::*,
};

const ENTRY_SIZE: usize = mem::size_of::<LbaT>();

/// Size of each P2L pool element, for a band of `blocks` blocks.  Returns
/// `None` if that can't be represented in memory.
pub fn p2l_map_pool_elem_size(blocks: u64) -> Option<usize> {
    usize::try_from(blocks).ok()?
        .checked_mul(ENTRY_SIZE)?
        .checked_next_multiple_of(FTL_BLOCK_SIZE)
}

/// In-memory reverse map of one band.
pub struct P2lMap {
    /// One LBA per band-relative block offset
    band_map: PoolElem,
    /// Staging buffer for the band's metadata, written when the band closes
    band_dma_md: PoolElem,
    /// Number of entries
    blocks: u64,
}

impl P2lMap {
    /// Check out a map for a band of `blocks` blocks.  All entries start out
    /// invalid.
    ///
    /// Fails with `ENOMEM` if either pool is exhausted, in which case nothing
    /// stays checked out.
    pub fn alloc(p2l_pool: &mut MemPool, band_md_pool: &mut MemPool,
                 blocks: u64) -> Result<Self>
    {
        assert!(p2l_pool.element_size() >= blocks as usize * ENTRY_SIZE,
            "P2L pool elements are too small for this band");
        let band_map = p2l_pool.get().ok_or(Error::ENOMEM)?;
        let band_dma_md = match band_md_pool.get() {
            Some(md) => md,
            None => {
                p2l_pool.put(band_map);
                return Err(Error::ENOMEM);
            }
        };
        let mut map = P2lMap{band_map, band_dma_md, blocks};
        map.clear();
        Ok(map)
    }

    /// The raw encoded map, as it would be written to media
    pub fn as_bytes(&self) -> &[u8] {
        &self.band_map[..self.blocks as usize * ENTRY_SIZE]
    }

    /// Checksum of the encoded map
    pub fn checksum(&self) -> u64 {
        let mut hasher = MetroHash64::new();
        hasher.write(self.as_bytes());
        hasher.finish()
    }

    fn clear(&mut self) {
        let len = self.blocks as usize * ENTRY_SIZE;
        for entry in self.band_map[..len].chunks_exact_mut(ENTRY_SIZE) {
            LittleEndian::write_u64(entry, LBA_INVALID);
        }
    }

    /// Return the LBA recorded at `offset`, or `LBA_INVALID`.
    pub fn get(&self, offset: u64) -> LbaT {
        assert!(offset < self.blocks, "P2L offset {offset} out of range");
        let i = offset as usize * ENTRY_SIZE;
        LittleEndian::read_u64(&self.band_map[i..i + ENTRY_SIZE])
    }

    /// Replace the whole map with a previously persisted copy.
    pub fn load(&mut self, bytes: &[u8]) {
        let len = self.blocks as usize * ENTRY_SIZE;
        assert_eq!(bytes.len(), len);
        self.band_map[..len].copy_from_slice(bytes);
    }

    /// Staging buffer for the owning band's metadata
    pub fn md_buf(&mut self) -> &mut [u8] {
        &mut self.band_dma_md
    }

    /// Give the buffers back to their pools
    pub fn release(self, p2l_pool: &mut MemPool, band_md_pool: &mut MemPool) {
        p2l_pool.put(self.band_map);
        band_md_pool.put(self.band_dma_md);
    }

    /// Record `lba` at `offset`.  Returns the LBA previously stored there.
    pub fn set(&mut self, offset: u64, lba: LbaT) -> LbaT {
        let old = self.get(offset);
        let i = offset as usize * ENTRY_SIZE;
        LittleEndian::write_u64(&mut self.band_map[i..i + ENTRY_SIZE], lba);
        old
    }
}

impl fmt::Debug for P2lMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("P2lMap")
            .field("blocks", &self.blocks)
            .finish()
    }
}

// LCOV_EXCL_STOP
