//! # Mapped Region Access
//!
//! `Region` is a raw-pointer view of a byte range inside the memory-mapped
//! file. The engine cannot hand out `&mut` slices through the usual borrow
//! paths because every segment mutates its own slice of the mapping
//! concurrently through `&self`, serialized not by the borrow checker but by
//! the process-shared spin-lock embedded in each segment header.
//!
//! ## Safety Model
//!
//! A `Region` is only ever carved out of a live mapping owned by the engine,
//! and the engine (which owns the `memmap2::MmapMut`) strictly outlives every
//! `Region` derived from it. The mapping is fixed-size for the lifetime of
//! the map (on-line resize is not supported), so the base pointer never
//! moves. That leaves exactly one hazard: concurrent access. The rules are:
//!
//! - The segment lock word and the entry counter are accessed only through
//!   the atomic accessors, which is always safe.
//! - The hash-index presence bitmap is read outside the lock by iterators;
//!   all bitmap words are therefore accessed atomically (relaxed).
//! - Every other byte of a segment is read or written only while holding
//!   that segment's lock. `bytes` / `bytes_mut` are `unsafe` with exactly
//!   that contract.
//!
//! This mirrors the usual shared-memory discipline: raw base pointer plus
//! "may only be touched while holding the lock" accessors.

use std::sync::atomic::{AtomicI32, AtomicU64};

/// A fixed byte range inside the engine's memory mapping.
///
/// Cheap to copy; carries no ownership. See the module docs for the access
/// rules.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    base: *mut u8,
    len: usize,
}

// SAFETY: Region is a pointer range into a mapping that outlives it; all
// concurrent access is serialized by the owning segment's lock or performed
// through atomic accessors, per the module-level access rules.
unsafe impl Send for Region {}
// SAFETY: as above; shared references to a Region expose no unsynchronized
// mutable access.
unsafe impl Sync for Region {}

impl Region {
    pub(crate) fn new(base: *mut u8, len: usize) -> Self {
        Self { base, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Carves a sub-range out of this region. Panics on out-of-bounds, which
    /// would indicate a layout computation bug, not a runtime condition.
    pub fn subregion(&self, offset: usize, len: usize) -> Region {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "subregion [{}, {}+{}) out of bounds (len={})",
            offset,
            offset,
            len,
            self.len
        );
        // SAFETY: offset is within the allocation, checked above.
        let base = unsafe { self.base.add(offset) };
        Region { base, len }
    }

    /// Shared view of `len` bytes at `offset`.
    ///
    /// # Safety
    /// The caller must hold the owning segment's lock (or otherwise guarantee
    /// no concurrent writer) for the duration of the returned borrow, and the
    /// range must not overlap a live `&mut` obtained from `bytes_mut`.
    pub unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts(self.base.add(offset), len)
    }

    /// Exclusive view of `len` bytes at `offset`.
    ///
    /// # Safety
    /// The caller must hold the owning segment's lock for the duration of the
    /// returned borrow, and must not create any other view overlapping the
    /// range while it lives.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts_mut(self.base.add(offset), len)
    }

    /// Atomic view of the 8-byte word at `offset`. The word must be 8-byte
    /// aligned and must only ever be accessed atomically (lock words, the
    /// relaxed bitmap words).
    pub fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        assert!(offset + 8 <= self.len, "atomic u64 at {} out of bounds", offset);
        let ptr = unsafe { self.base.add(offset) } as *mut u64;
        assert!(ptr as usize % 8 == 0, "atomic u64 at {} misaligned", offset);
        // SAFETY: in-bounds, aligned, and the mapping outlives the borrow;
        // the access rules restrict these words to atomic operations.
        unsafe { AtomicU64::from_ptr(ptr) }
    }

    /// Atomic view of the 4-byte word at `offset` (the segment entry
    /// counter).
    pub fn atomic_i32(&self, offset: usize) -> &AtomicI32 {
        assert!(offset + 4 <= self.len, "atomic i32 at {} out of bounds", offset);
        let ptr = unsafe { self.base.add(offset) } as *mut i32;
        assert!(ptr as usize % 4 == 0, "atomic i32 at {} misaligned", offset);
        // SAFETY: in-bounds, aligned, and the mapping outlives the borrow;
        // the access rules restrict this word to atomic operations.
        unsafe { AtomicI32::from_ptr(ptr) }
    }
}
