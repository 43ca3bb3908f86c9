//! # Segment
//!
//! One independently locked partition of the map, owning a contiguous slice
//! of the mapped file:
//!
//! ```text
//! Offset                          Contents
//! ------------------------------  --------------------------------------
//! [0, 64)                         header: lock word (8), entry count (4),
//!                                 pad (4), replication generation (8),
//!                                 reserved (40)
//! [64, 64 + index_area)           hash-index slots + presence bitmap
//! [.., .. + free_list)            block allocator bitset
//! [.., .. + entries)              entries grid (blocks of entry_size)
//! ```
//!
//! ## Entry Format
//!
//! An entry at block position `pos` starts at byte `pos * entry_size` of the
//! entries grid:
//!
//! ```text
//! [meta_data_bytes]  user metadata, zeroed on allocation
//! [key size]         size-codec encoding
//! [key bytes]
//! [value size]       size-codec encoding
//! [pad]              so the value bytes satisfy the configured alignment
//! [value bytes]
//! ```
//!
//! An entry whose total exceeds one block occupies a run of contiguous
//! blocks (at most [`MAX_OVERSIZE_BLOCKS`]).
//!
//! ## Joint Invariant
//!
//! Every state machine here preserves, at every exit:
//! - each set first-block bit belongs to exactly one live entry, whose
//!   position is bound exactly once in the hash index;
//! - the entry's whole block run is set in the allocator bitset;
//! - the header counter equals the number of live entries.
//!
//! Mutations are ordered so a failed allocation surfaces before any index
//! or byte write; the one path that releases blocks before allocating
//! (relocation, so the old run can merge with free neighbors) rolls the
//! release back on failure.
//!
//! ## Value Updates
//!
//! A value rewrite keeps the entry in place when the block footprint is
//! unchanged, shrinks the run in place when it shrank, extends in place
//! when the following blocks are free, and otherwise relocates: old run
//! freed, new run allocated, metadata+key prefix copied, index rebound via
//! `replace_prev_pos`.

mod bits;
mod block_alloc;
mod hash_index;
mod lock;

use std::sync::atomic::Ordering;

use eyre::{bail, ensure, Result};

use crate::codec::{
    DefaultValueProvider, ErrorSink, KeyCodec, MapListener, SizeCodec, ValueCodec, ValueFactory,
};
use crate::config::{MapConfig, MAX_OVERSIZE_BLOCKS, SEGMENT_HEADER_BYTES};
use crate::storage::Region;

use block_alloc::BlockAlloc;
use hash_index::{HashIndex, MultiMap, SearchCursor};
use lock::{lock_segment, SegmentGuard};

const LOCK_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 8;

/// Everything a segment operation needs besides the segment itself: the
/// geometry and the collaborator interfaces held by the engine. Built per
/// call from engine references; segments themselves stay codec-agnostic.
pub(crate) struct SegmentCtx<'a, KC: KeyCodec, VC: ValueCodec> {
    pub cfg: &'a MapConfig,
    pub keys: &'a KC,
    pub values: &'a VC,
    pub key_sizes: &'a dyn SizeCodec,
    pub value_sizes: &'a dyn SizeCodec,
    pub listener: &'a dyn MapListener<KC::Key, VC::Value>,
    pub errors: &'a dyn ErrorSink,
    pub default_value: &'a dyn DefaultValueProvider<KC::Key, VC::Value>,
    pub factory: &'a dyn ValueFactory<VC::Value>,
}

pub(crate) struct Segment {
    region: Region,
    entries: Region,
    index: usize,
    hash_index: HashIndex,
    alloc: BlockAlloc,
}

impl Segment {
    pub fn new(region: Region, index: usize, cfg: &MapConfig) -> Self {
        let slots = region.subregion(SEGMENT_HEADER_BYTES, cfg.index_slots_bytes());
        let presence = region.subregion(
            SEGMENT_HEADER_BYTES + cfg.index_slots_bytes(),
            cfg.presence_bytes(),
        );
        let free = region.subregion(
            SEGMENT_HEADER_BYTES + cfg.index_area_bytes(),
            cfg.free_list_bytes(),
        );
        let entries = region.subregion(
            cfg.entries_offset(),
            cfg.entries_per_segment() * cfg.entry_size(),
        );

        let hash_index = if cfg.narrow_index() {
            HashIndex::Narrow(MultiMap::new(
                slots,
                presence,
                cfg.index_capacity(),
                cfg.entries_per_segment(),
            ))
        } else {
            HashIndex::Wide(MultiMap::new(
                slots,
                presence,
                cfg.index_capacity(),
                cfg.entries_per_segment(),
            ))
        };

        Self {
            region,
            entries,
            index,
            hash_index,
            alloc: BlockAlloc::new(free, cfg.entries_per_segment()),
        }
    }

    // ---- header fields -----------------------------------------------------

    /// Live entry count; acquire load so sums over segments are monotonic
    /// per segment. Transient negatives (counter torn between a concurrent
    /// decrement and our read of a fresh mapping) clamp to 0.
    pub fn size(&self) -> u32 {
        self.region
            .atomic_i32(SIZE_OFFSET)
            .load(Ordering::Acquire)
            .max(0) as u32
    }

    fn increment_size(&self) {
        self.region.atomic_i32(SIZE_OFFSET).fetch_add(1, Ordering::AcqRel);
    }

    fn decrement_size(&self) {
        self.region.atomic_i32(SIZE_OFFSET).fetch_sub(1, Ordering::AcqRel);
    }

    fn reset_size(&self) {
        self.region.atomic_i32(SIZE_OFFSET).store(0, Ordering::Release);
    }

    fn lock<'a, KC: KeyCodec, VC: ValueCodec>(
        &'a self,
        ctx: &SegmentCtx<'a, KC, VC>,
    ) -> SegmentGuard<'a> {
        lock_segment(
            self.region.atomic_u64(LOCK_OFFSET),
            ctx.cfg.lock_timeout(),
            ctx.errors,
        )
    }

    /// The entries grid as a mutable slice.
    ///
    /// # Safety
    /// Caller must hold this segment's lock and must not create a second
    /// overlapping view while the slice lives.
    #[allow(clippy::mut_from_ref)]
    unsafe fn entries(&self) -> &mut [u8] {
        self.entries.bytes_mut(0, self.entries.len())
    }

    fn entry_offset<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        pos: u32,
    ) -> usize {
        pos as usize * ctx.cfg.entry_size()
    }

    // ---- entry parsing -----------------------------------------------------

    /// Total stored bytes of an entry with the given key and value sizes.
    fn entry_bytes<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        key_size: u64,
        value_size: u64,
    ) -> u64 {
        ctx.cfg.alignment().align(
            ctx.cfg.meta_data_bytes() as u64
                + ctx.key_sizes.encoded_len(key_size) as u64
                + key_size
                + ctx.value_sizes.encoded_len(value_size) as u64,
        ) + value_size
    }

    /// Compares the key stored at `entry_off` against `key` without
    /// deserializing it. Returns the offset of the value-size encoding on a
    /// match.
    fn match_key<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        entries: &[u8],
        entry_off: usize,
        key: &KC::Key,
        key_size: u64,
    ) -> Result<Option<usize>> {
        let mut p = entry_off + ctx.cfg.meta_data_bytes();
        let (stored_size, n) = ctx.key_sizes.read(&entries[p..])?;
        p += n;
        if stored_size != key_size {
            return Ok(None);
        }
        if !ctx.keys.matches(&entries[p..p + stored_size as usize], key) {
            return Ok(None);
        }
        Ok(Some(p + stored_size as usize))
    }

    /// Bounds of the value bytes given the offset of the value-size
    /// encoding: `(value_start, entry_end)`.
    fn value_bounds<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        entries: &[u8],
        value_size_pos: usize,
    ) -> Result<(usize, usize)> {
        let (value_size, n) = ctx.value_sizes.read(&entries[value_size_pos..])?;
        let start = ctx.cfg.alignment().align((value_size_pos + n) as u64) as usize;
        Ok((start, start + value_size as usize))
    }

    fn read_value_at<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        entries: &[u8],
        value_size_pos: usize,
        reuse: Option<VC::Value>,
    ) -> Result<(VC::Value, usize)> {
        let (start, end) = self.value_bounds(ctx, entries, value_size_pos)?;
        let value = ctx.values.read(&entries[start..end], reuse)?;
        Ok((value, end))
    }

    // ---- mutation state machines -------------------------------------------

    pub fn put<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        key: &KC::Key,
        value: &VC::Value,
        fingerprint: u32,
        replace_if_present: bool,
    ) -> Result<Option<VC::Value>> {
        let _guard = self.lock(ctx);
        // SAFETY: lock held for the rest of the scope; the entries grid is
        // disjoint from the index and allocator regions.
        let entries = unsafe { self.entries() };
        let key_size = ctx.keys.encoded_size(key);

        let mut cursor = self.hash_index.start_search(fingerprint);
        while let Some(pos) = self.hash_index.next_pos(&mut cursor) {
            let entry_off = self.entry_offset(ctx, pos);
            let Some(value_size_pos) = self.match_key(ctx, entries, entry_off, key, key_size)?
            else {
                continue;
            };
            if !replace_if_present {
                return if ctx.cfg.put_returns_value() {
                    let (previous, _) = self.read_value_at(ctx, entries, value_size_pos, None)?;
                    Ok(Some(previous))
                } else {
                    Ok(None)
                };
            }
            let (previous, old_end) = if ctx.cfg.put_returns_value() {
                let (v, end) = self.read_value_at(ctx, entries, value_size_pos, None)?;
                (Some(v), end)
            } else {
                let (_, end) = self.value_bounds(ctx, entries, value_size_pos)?;
                (None, end)
            };
            let (_, new_pos) = self.put_value(
                ctx,
                entries,
                &cursor,
                pos,
                entry_off,
                value_size_pos,
                old_end,
                value,
            )?;
            ctx.listener.on_put(key, value, self.index, new_pos, false);
            return Ok(previous);
        }

        let value_size = ctx.values.encoded_size(value);
        let (_, pos) =
            self.put_entry_with(ctx, entries, &cursor, key, key_size, value_size, |buf| {
                ctx.values.write(value, buf)
            })?;
        self.increment_size();
        ctx.listener.on_put(key, value, self.index, pos, true);
        Ok(None)
    }

    pub fn acquire<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        key: &KC::Key,
        using: Option<VC::Value>,
        fingerprint: u32,
        create: bool,
    ) -> Result<Option<VC::Value>> {
        let _guard = self.lock(ctx);
        // SAFETY: lock held for the rest of the scope; regions disjoint.
        let entries = unsafe { self.entries() };
        let key_size = ctx.keys.encoded_size(key);

        let mut cursor = self.hash_index.start_search(fingerprint);
        let mut found = None;
        while let Some(pos) = self.hash_index.next_pos(&mut cursor) {
            let entry_off = self.entry_offset(ctx, pos);
            if let Some(value_size_pos) =
                self.match_key(ctx, entries, entry_off, key, key_size)?
            {
                found = Some(value_size_pos);
                break;
            }
        }

        if let Some(value_size_pos) = found {
            let (value, _) = self.read_value_at(ctx, entries, value_size_pos, using)?;
            ctx.listener.on_get(key, &value);
            return Ok(Some(value));
        }

        // Key absent: in create mode build a value (caller-supplied first,
        // then factory); otherwise consult the default-value provider. A
        // produced value is inserted before returning.
        let using_passed = using.is_some();
        let value = if create {
            match using {
                Some(v) => Some(v),
                None => match ctx.factory.create() {
                    Some(v) => Some(v),
                    None => {
                        bail!("acquire in create mode requires the value factory to produce a value")
                    }
                },
            }
        } else {
            ctx.default_value.get(key, using)
        };
        let Some(mut value) = value else {
            return Ok(None);
        };

        let value_size = ctx.values.encoded_size(&value);
        let (_, pos) = if create {
            // Create mode may bind the value's storage to the entry bytes.
            let value_ref = &mut value;
            self.put_entry_with(ctx, entries, &cursor, key, key_size, value_size, |buf| {
                buf.fill(0);
                if !ctx.values.bind(value_ref, buf.as_mut_ptr(), buf.len()) {
                    ctx.values.write(value_ref, buf);
                }
            })?
        } else {
            self.put_entry_with(ctx, entries, &cursor, key, key_size, value_size, |buf| {
                ctx.values.write(&value, buf)
            })?
        };
        self.increment_size();
        // A factory-created value in create mode is already known to the
        // caller; suppress the notification then.
        if using_passed || !create {
            ctx.listener.on_put(key, &value, self.index, pos, true);
        }
        Ok(Some(value))
    }

    pub fn remove<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        key: &KC::Key,
        expected: Option<&VC::Value>,
        fingerprint: u32,
    ) -> Result<Option<VC::Value>>
    where
        VC::Value: PartialEq,
    {
        let _guard = self.lock(ctx);
        // SAFETY: lock held for the rest of the scope; regions disjoint.
        let entries = unsafe { self.entries() };
        let key_size = ctx.keys.encoded_size(key);

        let mut cursor = self.hash_index.start_search(fingerprint);
        while let Some(pos) = self.hash_index.next_pos(&mut cursor) {
            let entry_off = self.entry_offset(ctx, pos);
            let Some(value_size_pos) = self.match_key(ctx, entries, entry_off, key, key_size)?
            else {
                continue;
            };
            let (value_start, entry_end) = self.value_bounds(ctx, entries, value_size_pos)?;
            let removed = if expected.is_some() || ctx.cfg.remove_returns_value() {
                Some(ctx.values.read(&entries[value_start..entry_end], None)?)
            } else {
                None
            };
            if let Some(expected) = expected {
                if removed.as_ref() != Some(expected) {
                    return Ok(None);
                }
            }
            self.hash_index.remove_prev_pos(&cursor);
            self.decrement_size();
            self.alloc.free(
                pos as usize,
                ctx.cfg.block_footprint((entry_end - entry_off) as u64),
            );
            ctx.listener.on_remove(key, removed.as_ref(), self.index, pos);
            return Ok(removed);
        }
        Ok(None)
    }

    pub fn replace<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        key: &KC::Key,
        expected: Option<&VC::Value>,
        new_value: &VC::Value,
        fingerprint: u32,
    ) -> Result<Option<VC::Value>>
    where
        VC::Value: PartialEq,
    {
        let _guard = self.lock(ctx);
        // SAFETY: lock held for the rest of the scope; regions disjoint.
        let entries = unsafe { self.entries() };
        let key_size = ctx.keys.encoded_size(key);

        let mut cursor = self.hash_index.start_search(fingerprint);
        while let Some(pos) = self.hash_index.next_pos(&mut cursor) {
            let entry_off = self.entry_offset(ctx, pos);
            let Some(value_size_pos) = self.match_key(ctx, entries, entry_off, key, key_size)?
            else {
                continue;
            };
            let (current, old_end) = self.read_value_at(ctx, entries, value_size_pos, None)?;
            if let Some(expected) = expected {
                if *expected != current {
                    return Ok(None);
                }
            }
            let (_, new_pos) = self.put_value(
                ctx,
                entries,
                &cursor,
                pos,
                entry_off,
                value_size_pos,
                old_end,
                new_value,
            )?;
            ctx.listener.on_put(key, new_value, self.index, new_pos, false);
            return Ok(Some(current));
        }
        Ok(None)
    }

    pub fn contains_key<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        key: &KC::Key,
        fingerprint: u32,
    ) -> Result<bool> {
        let _guard = self.lock(ctx);
        // SAFETY: lock held for the rest of the scope; regions disjoint.
        let entries = unsafe { self.entries() };
        let key_size = ctx.keys.encoded_size(key);

        let mut cursor = self.hash_index.start_search(fingerprint);
        while let Some(pos) = self.hash_index.next_pos(&mut cursor) {
            let entry_off = self.entry_offset(ctx, pos);
            if self
                .match_key(ctx, entries, entry_off, key, key_size)?
                .is_some()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn clear<KC: KeyCodec, VC: ValueCodec>(&self, ctx: &SegmentCtx<'_, KC, VC>) {
        let _guard = self.lock(ctx);
        self.hash_index.clear();
        self.alloc.clear();
        self.reset_size();
    }

    /// Writes a fresh entry: allocate, zero metadata, write sizes and key,
    /// let `write_value` fill the value bytes, bind the position into the
    /// hash index. Allocation failure surfaces before anything is written.
    fn put_entry_with<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        entries: &mut [u8],
        cursor: &SearchCursor,
        key: &KC::Key,
        key_size: u64,
        value_size: u64,
        write_value: impl FnOnce(&mut [u8]),
    ) -> Result<(usize, u32)> {
        let total = self.entry_bytes(ctx, key_size, value_size);
        let blocks = ctx.cfg.block_footprint(total);
        let pos = self.alloc.alloc(blocks)?;
        let entry_off = self.entry_offset(ctx, pos);

        let meta = ctx.cfg.meta_data_bytes();
        entries[entry_off..entry_off + meta].fill(0);
        let mut p = entry_off + meta;
        p += ctx.key_sizes.write(key_size, &mut entries[p..]);
        ctx.keys.write(key, &mut entries[p..p + key_size as usize]);
        p += key_size as usize;
        p += ctx.value_sizes.write(value_size, &mut entries[p..]);
        let value_start = ctx.cfg.alignment().align(p as u64) as usize;
        write_value(&mut entries[value_start..value_start + value_size as usize]);

        self.hash_index.put_after_failed_search(cursor, pos);
        Ok((entry_off, pos))
    }

    /// Rewrites the value of the entry most recently yielded by `cursor`:
    /// in place, extended in place, or relocated. Returns the (possibly
    /// moved) entry offset and position.
    #[allow(clippy::too_many_arguments)]
    fn put_value<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        entries: &mut [u8],
        cursor: &SearchCursor,
        pos: u32,
        entry_off: usize,
        value_size_pos: usize,
        old_end: usize,
        value: &VC::Value,
    ) -> Result<(usize, u32)> {
        let new_value_size = ctx.values.encoded_size(value);
        let new_end = ctx
            .cfg
            .alignment()
            .align((value_size_pos + ctx.value_sizes.encoded_len(new_value_size)) as u64)
            as usize
            + new_value_size as usize;

        let mut pos = pos as usize;
        let mut entry_off = entry_off;
        let mut size_pos = value_size_pos;

        if new_end != old_end {
            let old_blocks = ctx.cfg.block_footprint((old_end - entry_off) as u64);
            let new_blocks = ctx.cfg.block_footprint((new_end - entry_off) as u64);
            if new_blocks > old_blocks {
                ensure!(
                    new_blocks <= MAX_OVERSIZE_BLOCKS,
                    "value too large: entry would span {} blocks, {} is the maximum",
                    new_blocks,
                    MAX_OVERSIZE_BLOCKS
                );
                if !self.alloc.realloc_extend(pos, old_blocks, new_blocks) {
                    // Relocate. The old run is released first so it can
                    // merge with free neighbors into the run we claim next.
                    self.alloc.free(pos, old_blocks);
                    let new_pos = match self.alloc.alloc(new_blocks) {
                        Ok(p) => p as usize,
                        Err(e) => {
                            // Keep the entry intact rather than leaking it.
                            self.alloc.restore(pos, old_blocks);
                            return Err(e);
                        }
                    };
                    // Notified only once the new run is secured.
                    ctx.listener.on_relocation(self.index, pos as u32);
                    self.hash_index.replace_prev_pos(cursor, new_pos as u32);
                    let new_off = new_pos * ctx.cfg.entry_size();
                    let prefix = size_pos - entry_off;
                    // Runs may overlap when the freed run re-merged.
                    entries.copy_within(entry_off..entry_off + prefix, new_off);
                    pos = new_pos;
                    entry_off = new_off;
                    size_pos = new_off + prefix;
                }
            } else if new_blocks < old_blocks {
                self.alloc.shrink(pos, old_blocks, new_blocks);
            }
        }

        let p = size_pos + ctx.value_sizes.write(new_value_size, &mut entries[size_pos..]);
        let value_start = ctx.cfg.alignment().align(p as u64) as usize;
        ctx.values
            .write(value, &mut entries[value_start..value_start + new_value_size as usize]);
        Ok((entry_off, pos as u32))
    }

    // ---- iteration support -------------------------------------------------

    /// Next position with a presence bit at or after `from`. Lock-free; the
    /// caller re-checks under the lock before touching the entry.
    pub fn next_present(&self, from: u32) -> Option<u32> {
        self.hash_index.next_present(from)
    }

    /// Snapshot of the entry at `pos`, or `None` if the position is no
    /// longer present. Returns the key twice (one copy for the caller, one
    /// for the iterator's removal fallback) plus the value.
    pub fn entry_at<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        pos: u32,
    ) -> Result<Option<(KC::Key, KC::Key, VC::Value)>> {
        let _guard = self.lock(ctx);
        if !self.hash_index.is_present(pos) {
            return Ok(None);
        }
        // SAFETY: lock held for the rest of the scope; shared view only.
        let entries = unsafe { self.entries.bytes(0, self.entries.len()) };
        let entry_off = self.entry_offset(ctx, pos);

        let mut p = entry_off + ctx.cfg.meta_data_bytes();
        let (key_size, n) = ctx.key_sizes.read(&entries[p..])?;
        p += n;
        let key_bytes = &entries[p..p + key_size as usize];
        let key = ctx.keys.read(key_bytes)?;
        let key_again = ctx.keys.read(key_bytes)?;
        p += key_size as usize;
        let (value, _) = self.read_value_at(ctx, entries, p, None)?;
        Ok(Some((key, key_again, value)))
    }

    /// Removes whatever entry currently occupies `pos`, recomputing its
    /// fingerprint from the stored key bytes. Returns `false` if the
    /// position is empty (the caller falls back to removal by key).
    pub fn remove_at<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
        pos: u32,
    ) -> Result<bool> {
        let _guard = self.lock(ctx);
        if !self.hash_index.is_present(pos) {
            return Ok(false);
        }
        // SAFETY: lock held for the rest of the scope; regions disjoint.
        let entries = unsafe { self.entries() };
        let entry_off = self.entry_offset(ctx, pos);

        let mut p = entry_off + ctx.cfg.meta_data_bytes();
        let (key_size, n) = ctx.key_sizes.read(&entries[p..])?;
        p += n;
        let key = ctx.keys.read(&entries[p..p + key_size as usize])?;
        p += key_size as usize;
        let fingerprint = ctx.cfg.fingerprint_of(ctx.keys.hash(&key));
        let (value_start, entry_end) = self.value_bounds(ctx, entries, p)?;
        let removed = ctx.values.read(&entries[value_start..entry_end], None)?;

        ensure!(
            self.hash_index.remove(fingerprint, pos),
            "corruption: position {} of segment {} is present but unbound in the hash index",
            pos,
            self.index
        );
        self.decrement_size();
        self.alloc.free(
            pos as usize,
            ctx.cfg.block_footprint((entry_end - entry_off) as u64),
        );
        ctx.listener.on_remove(&key, Some(&removed), self.index, pos);
        Ok(true)
    }

    // ---- diagnostics -------------------------------------------------------

    /// Verifies the joint freelist/index/bytes invariant for every live
    /// entry; any violation surfaces as a corruption error.
    pub fn check_consistency<KC: KeyCodec, VC: ValueCodec>(
        &self,
        ctx: &SegmentCtx<'_, KC, VC>,
    ) -> Result<()> {
        let _guard = self.lock(ctx);
        // SAFETY: lock held for the rest of the scope; shared view only.
        let entries = unsafe { self.entries.bytes(0, self.entries.len()) };

        let mut runs = 0u32;
        let mut scan = 0usize;
        while let Some(pos) = self.alloc.next_set_bit(scan) {
            runs += 1;

            let mut bindings = 0;
            self.hash_index.for_each(|_, bound_pos| {
                if bound_pos as usize == pos {
                    bindings += 1;
                }
            });
            ensure!(
                bindings == 1,
                "corruption: block {} of segment {} bound {} times in the hash index",
                pos,
                self.index,
                bindings
            );
            ensure!(
                self.hash_index.is_present(pos as u32),
                "corruption: block {} of segment {} missing its presence bit",
                pos,
                self.index
            );

            let entry_off = pos * ctx.cfg.entry_size();
            let mut p = entry_off + ctx.cfg.meta_data_bytes();
            let (key_size, n) = ctx.key_sizes.read(&entries[p..])?;
            p += n + key_size as usize;
            let (value_size, _) = ctx.value_sizes.read(&entries[p..])?;
            let blocks = ctx
                .cfg
                .block_footprint(self.entry_bytes(ctx, key_size, value_size));
            ensure!(
                self.alloc.all_set(pos, pos + blocks),
                "corruption: entry at block {} of segment {} spans {} blocks but its run is not fully allocated",
                pos,
                self.index,
                blocks
            );
            scan = pos + blocks;
        }

        ensure!(
            runs == self.size(),
            "corruption: segment {} counter reads {} but {} live entries exist",
            self.index,
            self.size(),
            runs
        );
        Ok(())
    }
}
