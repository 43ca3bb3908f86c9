//! # Map Configuration and Layout
//!
//! `MapConfig` holds the immutable geometry of a map and derives every byte
//! offset in the file from it. All interdependent constants live here so a
//! change to one formula cannot drift from its dependents.
//!
//! ## Geometry Parameters
//!
//! | Parameter             | Constraint               | Meaning                              |
//! |-----------------------|--------------------------|--------------------------------------|
//! | `segments`            | power of two             | independently locked partitions      |
//! | `entries_per_segment` | rounded up to 8          | block-grid capacity per segment      |
//! | `entry_size`          | > 0                      | block size in bytes                  |
//! | `alignment`           | 1, 4, or 8               | value-start alignment within entries |
//! | `meta_data_bytes`     | any                      | user metadata prefix per entry       |
//!
//! ## Derived Layout
//!
//! ```text
//! segment_bytes = 64                                    header
//!               + align64(index_slots + presence_bits)  hash index area
//!               + align64(entries_per_segment / 8)      free-list bitset
//!               + align64(entries_per_segment * entry_size)
//! ```
//!
//! The sum is always 64-byte aligned; it is then padded so that
//! `segment_bytes % 4096 >= 64`. Without that pad, a segment size that is a
//! multiple (or near-multiple) of 4096 puts every N-th segment header into
//! the same L1 cache set under common 4-8 way associativities, and the
//! headers are the hottest words in the map.
//!
//! ## Narrow vs Wide Hash Index
//!
//! When `entries_per_segment <= 65536`, hash-index slots are 4 bytes (16-bit
//! fingerprint, 16-bit position); otherwise 8 bytes (32+32). The choice is a
//! construction-time constant baked into the layout, never a per-operation
//! branch. Narrow mode halves the index's cache footprint.

use std::time::Duration;

use eyre::{ensure, Result};

use crate::storage::FILE_HEADER_SIZE;

/// Largest number of contiguous blocks a single entry may occupy. Bounded
/// because the free-list run search degrades on longer runs and the size
/// prefix of a relocation must stay renewable in place.
pub const MAX_OVERSIZE_BLOCKS: usize = 64;

/// Bytes reserved at the head of every segment: lock word, entry counter,
/// replication generation, padding out to a cache line.
pub const SEGMENT_HEADER_BYTES: usize = 64;

/// Cache-line alignment, assuming 64-byte lines.
pub const fn align64(n: usize) -> usize {
    (n + 63) & !63
}

const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Value-start alignment within an entry. `None` packs values directly after
/// the size prefix; `Four`/`Eight` pad so the value bytes begin on a 4- or
/// 8-byte boundary, which lets word-oriented value codecs read in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    None,
    Four,
    Eight,
}

impl Alignment {
    pub fn align(self, offset: u64) -> u64 {
        match self {
            Alignment::None => offset,
            Alignment::Four => (offset + 3) & !3,
            Alignment::Eight => (offset + 7) & !7,
        }
    }

    /// Stable code persisted in the file header.
    pub(crate) fn code(self) -> u32 {
        match self {
            Alignment::None => 1,
            Alignment::Four => 4,
            Alignment::Eight => 8,
        }
    }
}

/// Immutable map geometry plus the operational knobs that do not affect the
/// file layout (lock timeout, return-value policies).
#[derive(Debug, Clone)]
pub struct MapConfig {
    segments: usize,
    entries_per_segment: usize,
    entry_size: usize,
    alignment: Alignment,
    meta_data_bytes: usize,
    lock_timeout: Duration,
    put_returns_value: bool,
    remove_returns_value: bool,
}

impl MapConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn validated(
        segments: usize,
        entries_per_segment: usize,
        entry_size: usize,
        alignment: Alignment,
        meta_data_bytes: usize,
        lock_timeout: Duration,
        put_returns_value: bool,
        remove_returns_value: bool,
    ) -> Result<Self> {
        ensure!(segments >= 1, "segment count must be at least 1");
        ensure!(
            segments.is_power_of_two(),
            "segment count must be a power of two, got {}",
            segments
        );
        ensure!(
            entries_per_segment >= 1,
            "entries per segment must be at least 1"
        );
        // Positions are stored as 32-bit values in the wide hash index.
        ensure!(
            entries_per_segment <= 1 << 30,
            "entries per segment too large: {}",
            entries_per_segment
        );
        ensure!(entry_size > 0, "entry size must be non-zero");
        ensure!(
            entry_size as u64 >= alignment.code() as u64,
            "entry size {} smaller than value alignment {}",
            entry_size,
            alignment.code()
        );
        ensure!(
            meta_data_bytes < entry_size * MAX_OVERSIZE_BLOCKS,
            "metadata bytes {} leave no room for entries",
            meta_data_bytes
        );
        ensure!(!lock_timeout.is_zero(), "lock timeout must be non-zero");

        Ok(Self {
            segments,
            // The free-list bitset addresses blocks in 8-bit groups; round
            // up so the bitset never addresses fewer blocks than configured.
            entries_per_segment: align8(entries_per_segment),
            // Block starts must satisfy the value alignment, or an entry's
            // padding would depend on which block it lands in and relocation
            // could change its footprint.
            entry_size: alignment.align(entry_size as u64) as usize,
            alignment,
            meta_data_bytes,
            lock_timeout,
            put_returns_value,
            remove_returns_value,
        })
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    pub fn entries_per_segment(&self) -> usize {
        self.entries_per_segment
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn meta_data_bytes(&self) -> usize {
        self.meta_data_bytes
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn put_returns_value(&self) -> bool {
        self.put_returns_value
    }

    pub fn remove_returns_value(&self) -> bool {
        self.remove_returns_value
    }

    // ---- hash routing ------------------------------------------------------

    /// log2 of the segment count; the low `bits` of a hash route to a
    /// segment, the rest feed the in-segment fingerprint.
    pub fn bits(&self) -> u32 {
        self.segments.trailing_zeros()
    }

    pub fn segment_mask(&self) -> u64 {
        (self.segments - 1) as u64
    }

    /// Narrow mode stores 16-bit fingerprints and positions.
    pub fn narrow_index(&self) -> bool {
        self.entries_per_segment <= 1 << 16
    }

    pub fn fingerprint_mask(&self) -> u64 {
        if self.narrow_index() {
            0xFFFF
        } else {
            0xFFFF_FFFF
        }
    }

    pub fn segment_of(&self, hash: u64) -> usize {
        (hash & self.segment_mask()) as usize
    }

    pub fn fingerprint_of(&self, hash: u64) -> u32 {
        ((hash >> self.bits()) & self.fingerprint_mask()) as u32
    }

    // ---- block footprint ---------------------------------------------------

    /// Number of blocks an entry of `bytes` total size occupies.
    pub fn block_footprint(&self, bytes: u64) -> usize {
        if bytes <= self.entry_size as u64 {
            1
        } else {
            ((bytes - 1) / self.entry_size as u64) as usize + 1
        }
    }

    // ---- per-segment layout ------------------------------------------------

    /// Hash-index slot count: the next power of two above twice the entry
    /// capacity, keeping the open-addressing load at or below 50% so an
    /// insert after a failed search always finds an empty slot.
    pub fn index_capacity(&self) -> usize {
        (self.entries_per_segment * 2).next_power_of_two().max(16)
    }

    pub fn index_slot_bytes(&self) -> usize {
        if self.narrow_index() {
            4
        } else {
            8
        }
    }

    pub fn index_slots_bytes(&self) -> usize {
        self.index_capacity() * self.index_slot_bytes()
    }

    /// Presence bitmap over block positions, in whole 64-bit words.
    pub fn presence_bytes(&self) -> usize {
        self.entries_per_segment.div_ceil(64) * 8
    }

    pub fn index_area_bytes(&self) -> usize {
        align64(self.index_slots_bytes() + self.presence_bytes())
    }

    pub fn free_list_bytes(&self) -> usize {
        align64(self.entries_per_segment / 8)
    }

    pub fn entries_area_bytes(&self) -> usize {
        align64(self.entries_per_segment * self.entry_size)
    }

    pub fn entries_offset(&self) -> usize {
        SEGMENT_HEADER_BYTES + self.index_area_bytes() + self.free_list_bytes()
    }

    pub fn segment_bytes(&self) -> usize {
        let mut bytes = SEGMENT_HEADER_BYTES
            + self.index_area_bytes()
            + self.free_list_bytes()
            + self.entries_area_bytes();
        debug_assert!(bytes % 64 == 0);

        // Anti-aliasing pad: keep every segment header at least 64 bytes
        // away from a 4096 multiple so headers of different segments do not
        // collide in the same L1 set.
        if bytes % 4096 < 64 {
            bytes += 64;
        }
        bytes
    }

    pub fn file_size(&self) -> u64 {
        FILE_HEADER_SIZE as u64 + (self.segments as u64) * (self.segment_bytes() as u64)
    }
}
