// vim: tw=80
//! Fixed-size, fixed-alignment element pools
//!
//! Per-band metadata and P2L buffers are carved out of pools that are
//! reserved during startup, so the write path never has to touch the general
//! purpose allocator.

use divbuf::{DivBufMut, DivBufShared};
use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use crate::types::*;

/// Largest alignment a pool will honor.  Anything bigger is treated as
/// unsatisfiable.
pub const MAX_ALIGNMENT: usize = 1 << 21;

/// One element checked out of a [`MemPool`].
///
/// Its initial contents are unspecified; callers that need zeroes must write
/// them.
pub struct PoolElem(DivBufMut);

impl Deref for PoolElem {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for PoolElem {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl fmt::Debug for PoolElem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PoolElem")
            .field("ptr", &self.0.as_ptr())
            .field("len", &self.0.len())
            .finish()
    }
}

/// An arena of `count` equally sized, equally aligned elements.
///
/// All storage is reserved at creation time.  `get` and `put` are O(1) and
/// never allocate.
pub struct MemPool {
    /// Elements not currently checked out.  Its capacity is fixed at `count`.
    // NB: must be declared before `storage` so the elements drop first.
    free: Vec<DivBufMut>,
    storage: DivBufShared,
    /// Address of the first element, for ownership checks
    base: usize,
    count: usize,
    element_size: usize,
    stride: usize,
}

impl MemPool {
    /// How many elements are currently available?
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Total number of elements, whether checked out or not
    pub fn count(&self) -> usize {
        self.count
    }

    /// Reserve a pool of `count` elements of `element_size` bytes each.
    ///
    /// Each element's address is a multiple of `alignment`, which must be a
    /// power of two no greater than [`MAX_ALIGNMENT`].  Fails with `ENOMEM`
    /// if the pool would be empty or the request can't be satisfied, in which
    /// case nothing remains allocated.
    pub fn create(count: usize, element_size: usize, alignment: usize)
        -> Result<Self>
    {
        if count == 0 || element_size == 0 || !alignment.is_power_of_two() ||
            alignment > MAX_ALIGNMENT
        {
            return Err(Error::ENOMEM);
        }
        let stride = element_size.checked_next_multiple_of(alignment)
            .ok_or(Error::ENOMEM)?;
        let total = count.checked_mul(stride)
            .and_then(|t| t.checked_add(alignment - 1))
            .ok_or(Error::ENOMEM)?;
        let mut v = Vec::<u8>::new();
        v.try_reserve_exact(total).map_err(|_| Error::ENOMEM)?;
        v.resize(total, 0);

        let storage = DivBufShared::from(v);
        let mut dbm = storage.try_mut()
            .expect("Newly created DivBufShared can't be shared");
        let misalignment = dbm.as_ptr() as usize % alignment;
        if misalignment != 0 {
            let _pad = dbm.split_to(alignment - misalignment);
        }
        let base = dbm.as_ptr() as usize;
        let mut free = Vec::with_capacity(count);
        for _ in 0..count {
            let elem = dbm.split_to(element_size);
            if stride > element_size {
                let _pad = dbm.split_to(stride - element_size);
            }
            free.push(elem);
        }
        tracing::debug!(count, element_size, alignment, "created memory pool");
        Ok(MemPool{free, storage, base, count, element_size, stride})
    }

    /// Tear down the pool.
    ///
    /// # Panics
    ///
    /// If any element is still checked out.
    pub fn destroy(self) {
        let outstanding = self.count - self.free.len();
        if outstanding > 0 {
            // Leak the storage rather than free memory that is still in use
            std::mem::forget(self);
            panic!("Destroying a memory pool with {outstanding} outstanding elements");
        }
        drop(self.free);
        drop(self.storage);
    }

    /// Size in bytes of each element
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Check out an element.  Returns `None` if the pool is exhausted.
    pub fn get(&mut self) -> Option<PoolElem> {
        self.free.pop().map(PoolElem)
    }

    /// Return an element to the pool.
    ///
    /// # Panics
    ///
    /// If `elem` was not checked out from this pool.
    pub fn put(&mut self, elem: PoolElem) {
        let addr = elem.0.as_ptr() as usize;
        let end = self.base + self.count * self.stride;
        assert!(addr >= self.base && addr < end &&
                (addr - self.base) % self.stride == 0 &&
                elem.0.len() == self.element_size,
            "Element does not belong to this pool");
        assert!(self.free.len() < self.count, "Memory pool double free");
        self.free.push(elem.0);
    }
}

impl fmt::Debug for MemPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemPool")
            .field("count", &self.count)
            .field("available", &self.free.len())
            .field("element_size", &self.element_size)
            .field("stride", &self.stride)
            .finish()
    }
}

// LCOV_EXCL_STOP
