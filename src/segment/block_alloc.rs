//! # Block Allocator
//!
//! Each segment's entries grid is a fixed array of equally-sized blocks; an
//! entry occupies a run of 1..=64 contiguous blocks. `BlockAlloc` tracks
//! ownership with one bit per block in the mapped free-list bitset and keeps
//! a rolling search cursor.
//!
//! ## Cursor Discipline
//!
//! The cursor is a pure hint (never a correctness condition):
//!
//! - After a successful single-block allocation it advances past the run,
//!   giving O(1) expected allocation for the dominant single-block case.
//! - A multi-block request may skip clear bits at the cursor; the cursor
//!   stays put then, so the skipped holes are not orphaned.
//! - `free` pulls the cursor back to the freed run, so holes are refilled
//!   before the grid's tail is consumed.
//! - `shrink` leaves the cursor alone: an entry whose value shrank has grown
//!   before and tends to grow again, and reclaiming its tail blocks eagerly
//!   would force a relocation when it does.
//!
//! The cursor lives in process memory (reset on reopen), mutated only under
//! the segment lock.

use std::sync::atomic::{AtomicU32, Ordering};

use eyre::{bail, ensure, Result};

use crate::config::MAX_OVERSIZE_BLOCKS;
use crate::storage::Region;

use super::bits::DirectBits;

pub(crate) struct BlockAlloc {
    free: DirectBits,
    cursor: AtomicU32,
}

impl BlockAlloc {
    pub fn new(region: Region, blocks: usize) -> Self {
        Self {
            free: DirectBits::new(region, blocks),
            cursor: AtomicU32::new(0),
        }
    }

    /// Allocates a run of `blocks` contiguous blocks, searching from the
    /// cursor first and wrapping to 0 once. Errors when no run exists
    /// (`SegmentFull`) or the request exceeds the oversize cap.
    pub fn alloc(&self, blocks: usize) -> Result<u32> {
        ensure!(
            blocks <= MAX_OVERSIZE_BLOCKS,
            "entry is too large: requires {} blocks, {} is the maximum",
            blocks,
            MAX_OVERSIZE_BLOCKS
        );

        let cursor = self.cursor.load(Ordering::Relaxed) as usize;
        if let Some(pos) = self.free.find_and_set_clear_run(cursor, blocks) {
            // A multi-block request that skipped clear bits at the cursor
            // leaves the cursor in place so those holes stay reachable.
            if blocks == 1 || self.free.is_set(cursor) {
                self.advance_cursor(pos, blocks);
            }
            return Ok(pos as u32);
        }

        if let Some(pos) = self.free.find_and_set_clear_run(0, blocks) {
            self.advance_cursor(pos, blocks);
            return Ok(pos as u32);
        }

        if blocks == 1 {
            bail!("segment is full, no free blocks");
        } else {
            bail!(
                "segment is full or has no run of {} contiguous free blocks",
                blocks
            );
        }
    }

    fn advance_cursor(&self, pos: usize, blocks: usize) {
        let mut next = pos + blocks;
        if next >= self.free.len() {
            next = 0;
        }
        self.cursor.store(next as u32, Ordering::Relaxed);
    }

    /// Grows an allocation in place: succeeds only when the blocks directly
    /// after the current run are all free.
    pub fn realloc_extend(&self, pos: usize, old_blocks: usize, new_blocks: usize) -> bool {
        debug_assert!(old_blocks < new_blocks);
        if self.free.all_clear(pos + old_blocks, pos + new_blocks) {
            self.free.set_range(pos + old_blocks, pos + new_blocks);
            true
        } else {
            false
        }
    }

    /// Releases a run and pulls the cursor back so the hole is refilled
    /// first.
    pub fn free(&self, pos: usize, blocks: usize) {
        self.free.clear_range(pos, pos + blocks);
        if pos < self.cursor.load(Ordering::Relaxed) as usize {
            self.cursor.store(pos as u32, Ordering::Relaxed);
        }
    }

    /// Re-marks a run as allocated; undoes a `free` when a relocation fails
    /// after releasing the old run, keeping the entry intact.
    pub fn restore(&self, pos: usize, blocks: usize) {
        self.free.set_range(pos, pos + blocks);
    }

    /// Releases the tail of a run after a value shrank; the cursor stays
    /// untouched (see the module docs).
    pub fn shrink(&self, pos: usize, old_blocks: usize, new_blocks: usize) {
        debug_assert!(new_blocks < old_blocks);
        self.free.clear_range(pos + new_blocks, pos + old_blocks);
    }

    pub fn clear(&self) {
        self.free.clear_all();
        self.cursor.store(0, Ordering::Relaxed);
    }

    pub fn is_set(&self, pos: usize) -> bool {
        self.free.is_set(pos)
    }

    pub fn all_set(&self, from: usize, to: usize) -> bool {
        self.free.all_set(from, to)
    }

    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        self.free.next_set_bit(from)
    }

    #[cfg(test)]
    fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed) as usize
    }
}
