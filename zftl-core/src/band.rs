// vim: tw=80
//! Bands: the FTL's write and reclaim unit
//!
//! A band spans `optimal_open_zones` adjacent zones.  Sequential writes are
//! striped across those zones in transfer-size granules: the write pointer
//! fills one granule in zone 0, then the matching granule in zone 1, and so
//! on, wrapping back to zone 0 for the next round.  All address translation
//! is plain arithmetic on the device geometry.
//!
//! Band life cycle
//!
//! +------+  open()   +------+  last transfer  +------+  close()  +--------+
//! | Free | --------> | Open | --------------> | Full | --------> | Closed |
//! +------+           +------+                 +------+           +--------+
//!    ^                                                                |
//!    +---------------------------- free() ----------------------------+

use fixedbitset::FixedBitSet;
use serde_derive::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::{
    base_dev::Geometry,
    mempool::MemPool,
    p2l::P2lMap,
    types::*,
};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum BandState {
    /// Holds no valid data and has no resources attached
    Free,
    /// Accepting writes
    Open,
    /// Every block has been written, but metadata isn't persisted yet
    Full,
    /// Read-only until it gets relocated and freed
    Closed,
}

impl Display for BandState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            BandState::Free => "free".fmt(f),
            BandState::Open => "open".fmt(f),
            BandState::Full => "full".fmt(f),
            BandState::Closed => "closed".fmt(f),
        }
    }
}

/// Band metadata, persisted when the band closes
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BandMd {
    pub id: BandT,
    pub state: BandState,
    pub seq_id: u64,
    pub wr_cnt: u64,
    pub num_valid: u64,
    /// Checksum of the persisted P2L map
    pub p2l_checksum: u64,
}

/// What a closed band leaves behind on media
#[derive(Debug)]
struct Persisted {
    md: BandMd,
    p2l: Vec<u8>,
}

/// Sequential write position within a band
#[derive(Clone, Copy, Debug)]
struct BandIter {
    /// Address of the next block to write
    addr: Addr,
    /// Number of blocks written so far
    offset: u64,
}

pub struct Band {
    id: BandT,
    geo: Geometry,
    /// Address of block offset 0
    start: Addr,
    state: BandState,
    /// Sequence id of the most recent open
    seq_id: u64,
    /// Number of times this band has been opened
    wr_cnt: u64,
    /// One bit per block offset; set if that block holds live data
    valid: FixedBitSet,
    num_valid: u64,
    p2l_map: Option<P2lMap>,
    persisted: Option<Persisted>,
    iter: BandIter,
}

impl Band {
    /// Record that the block at `addr` is dead.
    ///
    /// # Panics
    ///
    /// If the block is already invalid.
    pub fn invalidate_addr(&mut self, addr: Addr) {
        let offset = self.offset_from_addr(addr);
        assert!(self.valid.contains(offset as usize),
            "Double invalidate of {addr} in band {}", self.id);
        assert!(self.num_valid > 0);
        self.valid.set(offset as usize, false);
        self.num_valid -= 1;
        if let Some(map) = self.p2l_map.as_mut() {
            map.set(offset, LBA_INVALID);
        }
    }

    /// Return the address of the band-relative block `offset`.
    pub fn addr_from_offset(&self, offset: u64) -> Addr {
        assert!(offset < self.capacity(),
            "Block offset {offset} is outside of band {}", self.id);
        self.start + offset
    }

    /// Translate a band write sequence number into an address.
    ///
    /// `seq == capacity` is allowed, and yields the band's end address.
    fn addr_from_seq(&self, seq: u64) -> Addr {
        if seq == self.capacity() {
            return self.start + self.capacity();
        }
        let xfer = self.geo.xfer_size();
        let stripe = xfer * u64::from(self.geo.optimal_open_zones);
        let round = seq / stripe;
        let zone = (seq % stripe) / xfer;
        let zone_offset = round * xfer + seq % xfer;
        self.start + zone * self.geo.zone_size + zone_offset
    }

    /// Check out a P2L map and metadata buffer for this band.
    fn alloc_p2l_map(&mut self, p2l_pool: &mut MemPool,
                         band_md_pool: &mut MemPool) -> Result<()>
    {
        assert!(self.p2l_map.is_none(), "Band {} already has a P2L map",
            self.id);
        self.p2l_map = Some(P2lMap::alloc(p2l_pool, band_md_pool,
            self.capacity())?);
        Ok(())
    }

    /// Total number of blocks in the band
    pub fn capacity(&self) -> u64 {
        self.geo.blocks_per_band()
    }

    /// Persist the band's metadata and P2L map and release its buffers.
    pub fn close(&mut self, p2l_pool: &mut MemPool, band_md_pool: &mut MemPool)
        -> Result<()>
    {
        assert_eq!(self.state, BandState::Full, "Only full bands may close");
        let mut map = self.p2l_map.take()
            .expect("A full band must have a P2L map");
        let md = BandMd {
            id: self.id,
            state: BandState::Closed,
            seq_id: self.seq_id,
            wr_cnt: self.wr_cnt,
            num_valid: self.num_valid,
            p2l_checksum: map.checksum(),
        };
        let r = bincode::serialize_into(map.md_buf(), &md);
        let p2l = map.as_bytes().to_vec();
        map.release(p2l_pool, band_md_pool);
        r?;
        self.persisted = Some(Persisted{md, p2l});
        self.state = BandState::Closed;
        tracing::debug!(band = self.id, num_valid = self.num_valid,
            "closed band");
        Ok(())
    }

    /// Does `addr` belong to this band?
    pub fn contains(&self, addr: Addr) -> bool {
        addr.is_valid() && addr >= self.start &&
            addr - self.start < self.capacity()
    }

    /// Return a closed band to the free list.  Every block must already have
    /// been invalidated or relocated.
    pub fn free(&mut self, p2l_pool: &mut MemPool, band_md_pool: &mut MemPool)
    {
        assert_eq!(self.state, BandState::Closed, "Only closed bands may free");
        assert_eq!(self.num_valid, 0,
            "Band {} still has valid blocks", self.id);
        if let Some(map) = self.p2l_map.take() {
            map.release(p2l_pool, band_md_pool);
        }
        self.persisted = None;
        self.state = BandState::Free;
    }

    pub fn id(&self) -> BandT {
        self.id
    }

    /// Is the block at `offset` live?
    pub fn is_valid(&self, offset: u64) -> bool {
        self.valid.contains(offset as usize)
    }

    /// Address of the next block that the band's write pointer will fill.
    pub fn iter_addr(&self) -> Addr {
        self.iter.addr
    }

    /// Advance the write pointer by `num_blocks`.  The band becomes `Full`
    /// once every block has been written.
    pub fn iter_advance(&mut self, num_blocks: u64) {
        assert_eq!(self.state, BandState::Open);
        self.iter.addr = self.next_xfer_addr(self.iter.addr, num_blocks)
            .expect("Band write pointer overran the band");
        self.iter.offset += num_blocks;
        if self.iter.offset == self.capacity() {
            self.state = BandState::Full;
        }
    }

    /// Number of blocks that can still be written before the band is full
    pub fn iter_remaining(&self) -> u64 {
        self.capacity() - self.iter.offset
    }

    /// Re-attach the persisted P2L map of a closed band, e.g. for relocation.
    ///
    /// Fails with `EBADMSG` if the persisted map is corrupt.
    pub fn load_p2l_map(&mut self, p2l_pool: &mut MemPool,
                        band_md_pool: &mut MemPool) -> Result<()>
    {
        assert_eq!(self.state, BandState::Closed);
        if self.p2l_map.is_some() {
            return Ok(());
        }
        let persisted = self.persisted.as_ref()
            .expect("Closed bands must have persisted metadata");
        let mut map = P2lMap::alloc(p2l_pool, band_md_pool, self.capacity())?;
        map.load(&persisted.p2l);
        if map.checksum() != persisted.md.p2l_checksum {
            tracing::error!(band = self.id, "P2L map checksum mismatch");
            map.release(p2l_pool, band_md_pool);
            return Err(Error::EBADMSG);
        }
        self.p2l_map = Some(map);
        Ok(())
    }

    /// Return the LBA stored at `offset`, if the block is valid and the P2L
    /// map is resident.
    pub fn lba_at(&self, offset: u64) -> Option<LbaT> {
        if !self.is_valid(offset) {
            return None;
        }
        self.p2l_map.as_ref().map(|map| map.get(offset))
    }

    /// Metadata as it was persisted when the band last closed.
    pub fn md(&self) -> Option<&BandMd> {
        self.persisted.as_ref().map(|p| &p.md)
    }

    pub fn new(id: BandT, geo: Geometry) -> Self {
        assert!(id < geo.num_bands());
        let start = geo.band_start(id);
        let blocks = geo.blocks_per_band() as usize;
        Band {
            id,
            geo,
            start,
            state: BandState::Free,
            seq_id: 0,
            wr_cnt: 0,
            valid: FixedBitSet::with_capacity(blocks),
            num_valid: 0,
            p2l_map: None,
            persisted: None,
            iter: BandIter{addr: start, offset: 0},
        }
    }

    /// Return the address reached by advancing the band's sequential write
    /// pointer from `addr` by `num_blocks`.
    ///
    /// The walk may wrap around the band's zones any number of times.
    /// Advancing to exactly the end of the band returns the band's end
    /// address; advancing beyond it returns `None`.
    pub fn next_xfer_addr(&self, addr: Addr, num_blocks: u64) -> Option<Addr> {
        self.seq_from_addr(addr)
            .checked_add(num_blocks)
            .filter(|&seq| seq <= self.capacity())
            .map(|seq| self.addr_from_seq(seq))
    }

    /// Number of blocks in the band that currently hold live data
    pub fn num_valid(&self) -> u64 {
        self.num_valid
    }

    /// Return the band-relative block offset of `addr`.
    ///
    /// # Panics
    ///
    /// If `addr` does not belong to this band.
    pub fn offset_from_addr(&self, addr: Addr) -> u64 {
        assert!(self.contains(addr),
            "Address {addr} does not belong to band {}", self.id);
        addr - self.start
    }

    /// Prepare a free band for writing, with a fresh P2L map.
    pub fn open(&mut self, seq_id: u64, p2l_pool: &mut MemPool,
                band_md_pool: &mut MemPool) -> Result<()>
    {
        assert_eq!(self.state, BandState::Free, "Only free bands may open");
        self.alloc_p2l_map(p2l_pool, band_md_pool)?;
        self.valid.clear();
        self.num_valid = 0;
        self.seq_id = seq_id;
        self.wr_cnt += 1;
        self.iter = BandIter{addr: self.start, offset: 0};
        self.state = BandState::Open;
        tracing::debug!(band = self.id, seq_id, "opened band");
        Ok(())
    }

    /// Give the P2L map back to its pools without persisting it.  Used when
    /// tearing the device down.
    pub fn release_p2l_map(&mut self, p2l_pool: &mut MemPool,
                           band_md_pool: &mut MemPool)
    {
        if let Some(map) = self.p2l_map.take() {
            map.release(p2l_pool, band_md_pool);
        }
    }

    /// Map a band address to its position in the band's write order
    fn seq_from_addr(&self, addr: Addr) -> u64 {
        let offset = self.offset_from_addr(addr);
        let xfer = self.geo.xfer_size();
        let stripe = xfer * u64::from(self.geo.optimal_open_zones);
        let zone = offset / self.geo.zone_size;
        let zone_offset = offset % self.geo.zone_size;
        (zone_offset / xfer) * stripe + zone * xfer + zone_offset % xfer
    }

    pub fn seq_id(&self) -> u64 {
        self.seq_id
    }

    /// Record `lba` as the owner of the block at `addr`.
    ///
    /// Only a previously invalid block increases the valid count; writing
    /// over a valid block supersedes its old owner.
    pub fn set_addr(&mut self, lba: LbaT, addr: Addr) {
        let offset = self.offset_from_addr(addr);
        let map = self.p2l_map.as_mut()
            .expect("set_addr requires a resident P2L map");
        map.set(offset, lba);
        if !self.valid.put(offset as usize) {
            self.num_valid += 1;
        }
    }

    /// Address of the band's first block
    pub fn start_addr(&self) -> Addr {
        self.start
    }

    pub fn state(&self) -> BandState {
        self.state
    }

    pub fn wr_cnt(&self) -> u64 {
        self.wr_cnt
    }

    #[cfg(test)]
    pub(crate) fn corrupt_persisted_p2l(&mut self) {
        let p = self.persisted.as_mut().unwrap();
        p.p2l[0] ^= 0xff;
    }
}

impl fmt::Debug for Band {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Band")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("start", &self.start)
            .field("num_valid", &self.num_valid)
            .field("wr_cnt", &self.wr_cnt)
            .finish()
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use rstest::{fixture, rstest};
use std::collections::BTreeSet;
use super::*;
use crate::{p2l::p2l_map_pool_elem_size, util::FTL_BLOCK_SIZE};

const TEST_BAND_IDX: BandT = 42;
const TEST_LBA: LbaT = 0x6867_6564;
const ZONE_SIZE: u64 = 10_000;
const XFER_SIZE: u32 = 16;

struct Harness {
    band: Band,
    p2l_pool: MemPool,
    band_md_pool: MemPool,
}

impl Harness {
    fn new(geo: Geometry, band: BandT) -> Self {
        let blocks = geo.blocks_per_band();
        let mut p2l_pool = MemPool::create(2,
            p2l_map_pool_elem_size(blocks).unwrap(), FTL_BLOCK_SIZE).unwrap();
        let mut band_md_pool = MemPool::create(2, FTL_BLOCK_SIZE,
            FTL_BLOCK_SIZE).unwrap();
        let mut band = Band::new(band, geo);
        band.open(1, &mut p2l_pool, &mut band_md_pool).unwrap();
        Harness{band, p2l_pool, band_md_pool}
    }
}

fn geometry(optimal_open_zones: u32) -> Geometry {
    Geometry {
        zone_size: ZONE_SIZE,
        zones: (TEST_BAND_IDX + 1) * optimal_open_zones,
        optimal_open_zones,
        write_unit_size: XFER_SIZE,
        block_size: 4096,
    }
}

/// Address of the first block of zone `zone_id`
fn addr_from_zone_id(zone_id: u64) -> Addr {
    Addr(zone_id * ZONE_SIZE)
}

#[fixture]
fn harness() -> Harness {
    Harness::new(geometry(1), TEST_BAND_IDX)
}

fn band_base(h: &Harness) -> Addr {
    addr_from_zone_id(0) +
        u64::from(TEST_BAND_IDX) * h.band.geo.blocks_per_band()
}

#[rstest]
fn offset_from_addr_base(harness: Harness) {
    let addr = band_base(&harness);
    assert_eq!(harness.band.offset_from_addr(addr), 0);
}

#[rstest]
fn offset_from_addr_offset(harness: Harness) {
    let base = band_base(&harness);
    for j in 0..ZONE_SIZE {
        assert_eq!(harness.band.offset_from_addr(base + j), j);
    }
}

#[rstest]
#[should_panic(expected = "does not belong to band")]
fn offset_from_addr_foreign(harness: Harness) {
    let addr = band_base(&harness) + harness.band.capacity();
    harness.band.offset_from_addr(addr);
}

#[rstest]
fn addr_from_offset(harness: Harness) {
    let base = band_base(&harness);
    for j in 0..ZONE_SIZE {
        let expect = base + j;
        let offset = harness.band.offset_from_addr(expect);
        assert_eq!(harness.band.addr_from_offset(offset), expect);
    }
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[case(8)]
fn offset_round_trip(#[case] width: u32) {
    let geo = geometry(width);
    for b in [0, 17, TEST_BAND_IDX] {
        let band = Band::new(b, geo);
        assert_eq!(band.addr_from_offset(0), addr_from_zone_id(0) +
            u64::from(b) * geo.blocks_per_band());
        for o in (0..band.capacity()).step_by(7) {
            assert_eq!(band.offset_from_addr(band.addr_from_offset(o)), o);
        }
        let last = band.capacity() - 1;
        assert_eq!(band.offset_from_addr(band.addr_from_offset(last)), last);
    }
}

#[rstest]
fn set_addr(mut harness: Harness) {
    let mut addr = band_base(&harness);
    assert_eq!(harness.band.num_valid(), 0);

    let offset = harness.band.offset_from_addr(addr);
    harness.band.set_addr(TEST_LBA, addr);
    assert_eq!(harness.band.num_valid(), 1);
    assert_eq!(harness.band.lba_at(offset), Some(TEST_LBA));

    addr += ZONE_SIZE / 2;
    let offset = harness.band.offset_from_addr(addr);
    harness.band.set_addr(TEST_LBA + 1, addr);
    assert_eq!(harness.band.num_valid(), 2);
    assert_eq!(harness.band.lba_at(offset), Some(TEST_LBA + 1));
}

/// Assigning over an already-valid slot supersedes its owner without
/// changing the valid count.
#[rstest]
fn set_addr_supersede(mut harness: Harness) {
    let addr = band_base(&harness) + 9;
    harness.band.set_addr(TEST_LBA, addr);
    harness.band.set_addr(TEST_LBA + 5, addr);
    assert_eq!(harness.band.num_valid(), 1);
    assert_eq!(harness.band.lba_at(9), Some(TEST_LBA + 5));
}

#[rstest]
fn invalidate_addr(mut harness: Harness) {
    let mut addr = band_base(&harness);
    harness.band.set_addr(TEST_LBA, addr);
    assert_eq!(harness.band.num_valid(), 1);
    harness.band.invalidate_addr(addr);
    assert_eq!(harness.band.num_valid(), 0);
    assert_eq!(harness.band.lba_at(0), None);

    harness.band.set_addr(TEST_LBA, addr);
    addr += ZONE_SIZE / 2;
    harness.band.set_addr(TEST_LBA + 1, addr);
    assert_eq!(harness.band.num_valid(), 2);
    harness.band.invalidate_addr(addr);
    assert_eq!(harness.band.num_valid(), 1);
}

#[rstest]
#[should_panic(expected = "Double invalidate")]
fn invalidate_addr_twice(mut harness: Harness) {
    let addr = band_base(&harness);
    harness.band.set_addr(TEST_LBA, addr);
    harness.band.invalidate_addr(addr);
    harness.band.invalidate_addr(addr);
}

/// After any sequence of sets and invalidates, the valid count must equal
/// the number of non-sentinel P2L entries.
#[rstest]
fn valid_count_invariant(mut harness: Harness) {
    let mut rng = XorShiftRng::seed_from_u64(0xdead_beef);
    let base = band_base(&harness);
    let cap = harness.band.capacity();
    for _ in 0..5000 {
        let offset = rng.gen_range(0..cap);
        if harness.band.is_valid(offset) && rng.gen_bool(0.5) {
            harness.band.invalidate_addr(base + offset);
        } else {
            harness.band.set_addr(rng.gen(), base + offset);
        }
    }
    let map = harness.band.p2l_map.as_ref().unwrap();
    let live = (0..cap).filter(|o| map.get(*o) != LBA_INVALID).count();
    assert_eq!(harness.band.num_valid(), live as u64);
}

#[rstest]
fn next_xfer_addr(harness: Harness) {
    let xfer = u64::from(XFER_SIZE);
    // Simple one block increment
    let addr = band_base(&harness);
    let result = harness.band.next_xfer_addr(addr, 1);
    assert_eq!(result, Some(addr + 1));

    // Jumping from the last zone to the first one
    let result = harness.band.next_xfer_addr(addr, xfer);
    assert_eq!(result, Some(band_base(&harness) + xfer));

    // Jumping from the last zone to the first one with an unaligned offset
    let result = harness.band.next_xfer_addr(addr, xfer + 2);
    assert_eq!(result, Some(band_base(&harness) + xfer + 2));
}

#[test]
fn next_xfer_addr_striped() {
    let geo = geometry(4);
    let band = Band::new(3, geo);
    let base = band.start_addr();
    let xfer = u64::from(XFER_SIZE);
    // Within a granule, addresses are contiguous
    assert_eq!(band.next_xfer_addr(base, 1), Some(base + 1));
    // One whole transfer moves to the matching granule of the next zone
    assert_eq!(band.next_xfer_addr(base, xfer), Some(base + ZONE_SIZE));
    assert_eq!(band.next_xfer_addr(base, 2 * xfer + 3),
        Some(base + 2 * ZONE_SIZE + 3));
    // From the last zone, wrap to zone 0's next granule
    let last = base + 3 * ZONE_SIZE;
    assert_eq!(band.next_xfer_addr(last, xfer), Some(base + xfer));
    // One whole stripe stays in the same zone, one granule further
    assert_eq!(band.next_xfer_addr(base + ZONE_SIZE, 4 * xfer),
        Some(base + ZONE_SIZE + xfer));
}

#[test]
fn next_xfer_addr_end_of_band() {
    let geo = geometry(2);
    let band = Band::new(0, geo);
    let base = band.start_addr();
    let cap = band.capacity();
    assert_eq!(band.next_xfer_addr(base, cap), Some(base + cap));
    assert_eq!(band.next_xfer_addr(base, cap + 1), None);
    // Huge increments must not wrap around
    assert_eq!(band.next_xfer_addr(base + 5, u64::MAX), None);
    assert_eq!(band.next_xfer_addr(base + cap - 1, u64::MAX - 1), None);
    // The last block in write order is the end of the last zone
    let last = base + cap - 1;
    assert_eq!(band.next_xfer_addr(base, cap - 1), Some(last));
    assert_eq!(band.next_xfer_addr(last, 1), Some(base + cap));
    // Landing exactly on a zone boundary in write order
    let xfer = u64::from(XFER_SIZE);
    let zone0_tail = base + ZONE_SIZE - xfer;
    assert_eq!(band.next_xfer_addr(zone0_tail, xfer),
        Some(base + 2 * ZONE_SIZE - xfer));
}

/// Property checks across stripe widths: advancing is additive, and a full
/// sweep of the band visits every block exactly once.
#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[case(5)]
#[case(8)]
fn next_xfer_addr_properties(#[case] width: u32) {
    let geo = Geometry {
        zone_size: 64,
        zones: width * 2,
        optimal_open_zones: width,
        write_unit_size: 4,
        block_size: 4096,
    };
    let band = Band::new(1, geo);
    let base = band.start_addr();
    let cap = band.capacity();

    let mut seen = BTreeSet::new();
    let mut addr = base;
    for _ in 0..cap {
        assert!(band.contains(addr));
        assert!(seen.insert(addr), "{addr} visited twice");
        addr = band.next_xfer_addr(addr, 1).unwrap();
    }
    assert_eq!(addr, base + cap);
    assert_eq!(seen.len() as u64, cap);

    let mut rng = XorShiftRng::seed_from_u64(u64::from(width));
    for _ in 0..1000 {
        let start = base + rng.gen_range(0..cap);
        let i = rng.gen_range(0..cap);
        let j = rng.gen_range(0..cap);
        let direct = band.next_xfer_addr(start, i + j);
        let stepped = band.next_xfer_addr(start, i)
            .and_then(|a| if a == base + cap {
                if j == 0 { Some(a) } else { None }
            } else {
                band.next_xfer_addr(a, j)
            });
        assert_eq!(direct, stepped);
    }
}

#[rstest]
fn iter_fills_band(mut harness: Harness) {
    let xfer = u64::from(XFER_SIZE);
    let mut n = 0;
    while harness.band.state() == BandState::Open {
        assert_eq!(harness.band.iter_remaining(), harness.band.capacity() - n);
        harness.band.iter_advance(xfer);
        n += xfer;
    }
    assert_eq!(n, harness.band.capacity());
    assert_eq!(harness.band.state(), BandState::Full);
}

#[rstest]
fn close_and_reload(mut harness: Harness) {
    let base = band_base(&harness);
    harness.band.set_addr(TEST_LBA, base + 3);
    harness.band.set_addr(TEST_LBA + 1, base + 4);
    harness.band.iter_advance(harness.band.capacity());
    harness.band.close(&mut harness.p2l_pool, &mut harness.band_md_pool)
        .unwrap();
    assert_eq!(harness.band.state(), BandState::Closed);
    assert_eq!(harness.p2l_pool.available(), 2);
    assert_eq!(harness.band_md_pool.available(), 2);
    let md = harness.band.md().unwrap().clone();
    assert_eq!(md.num_valid, 2);
    assert_eq!(md.wr_cnt, 1);
    assert_eq!(md.state, BandState::Closed);

    // Invalidation works without a resident map
    harness.band.invalidate_addr(base + 4);
    assert_eq!(harness.band.num_valid(), 1);
    assert_eq!(harness.band.lba_at(3), None);

    harness.band.load_p2l_map(&mut harness.p2l_pool,
        &mut harness.band_md_pool).unwrap();
    assert_eq!(harness.band.lba_at(3), Some(TEST_LBA));
    assert_eq!(harness.band.lba_at(4), None);

    harness.band.invalidate_addr(base + 3);
    harness.band.free(&mut harness.p2l_pool, &mut harness.band_md_pool);
    assert_eq!(harness.band.state(), BandState::Free);
    assert_eq!(harness.p2l_pool.available(), 2);
    assert!(harness.band.md().is_none());
}

#[rstest]
fn load_corrupt_p2l_map(mut harness: Harness) {
    harness.band.iter_advance(harness.band.capacity());
    harness.band.close(&mut harness.p2l_pool, &mut harness.band_md_pool)
        .unwrap();
    harness.band.corrupt_persisted_p2l();
    let e = harness.band.load_p2l_map(&mut harness.p2l_pool,
        &mut harness.band_md_pool).unwrap_err();
    assert_eq!(e, Error::EBADMSG);
    assert_eq!(harness.p2l_pool.available(), 2);
}

#[rstest]
fn open_exhausted(mut harness: Harness) {
    let geo = geometry(1);
    let mut b1 = Band::new(1, geo);
    let mut b2 = Band::new(2, geo);
    b1.open(2, &mut harness.p2l_pool, &mut harness.band_md_pool).unwrap();
    let e = b2.open(3, &mut harness.p2l_pool, &mut harness.band_md_pool)
        .unwrap_err();
    assert_eq!(e, Error::ENOMEM);
    assert_eq!(b2.state(), BandState::Free);
    b1.release_p2l_map(&mut harness.p2l_pool, &mut harness.band_md_pool);
}

#[test]
fn state_display() {
    assert_eq!(BandState::Closed.to_string(), "closed");
}
}
// LCOV_EXCL_STOP
