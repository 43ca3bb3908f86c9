//! # Map Engine
//!
//! `ShardMap` owns the file mapping, computes the layout, constructs one
//! [`Segment`] per partition over contiguous slices of the mapping, and
//! routes every operation by hash:
//!
//! ```text
//! hash = keys.hash(key)                       64-bit, process-stable
//! segment     = hash & (segments - 1)         low bits pick the partition
//! fingerprint = (hash >> log2(segments))      the rest keys the segment's
//!               & fingerprint_mask            hash index (16 or 32 bits)
//! ```
//!
//! Different segments never share state, so operations on different
//! segments proceed fully in parallel; within a segment the in-file
//! spin-lock totally orders operations (threads of this process and any
//! other process mapping the same file alike).
//!
//! ## Iteration
//!
//! [`Entries`] walks segments from the highest index to the lowest and,
//! within a segment, positions in ascending presence-bitmap order. The
//! bitmap scan runs without the lock; each candidate is re-locked and
//! re-checked before its bytes are read, so a concurrently removed entry is
//! skipped rather than misread. `remove_returned` removes the entry the
//! iterator last yielded: if its position is still present the entry is
//! removed there (fingerprint recomputed from the stored key bytes), and if
//! not — the entry was removed or relocated meanwhile — removal falls back
//! to `remove(key)`. The narrow race where a third party re-fills the same
//! position with a different entry between `next` and `remove_returned` is
//! accepted: the occupying entry is the one removed.
//!
//! ## Lifecycle
//!
//! `close()` consumes the map, flushing the mapping; dropping without
//! `close` flushes best-effort. Both are safe with other processes still
//! mapping the file — the kernel keeps shared pages coherent.

mod builder;

pub use builder::MapBuilder;

use std::path::Path;

use eyre::{ensure, Result, WrapErr};

use crate::codec::{KeyCodec, ValueCodec};
use crate::config::MapConfig;
use crate::segment::{Segment, SegmentCtx};
use crate::storage::{FileHeader, MapFile, FILE_HEADER_SIZE};

pub struct ShardMap<KC: KeyCodec, VC: ValueCodec> {
    cfg: MapConfig,
    file: MapFile,
    segments: Vec<Segment>,
    keys: KC,
    values: VC,
    key_sizes: Box<dyn crate::codec::SizeCodec>,
    value_sizes: Box<dyn crate::codec::SizeCodec>,
    listener: Box<dyn crate::codec::MapListener<KC::Key, VC::Value>>,
    errors: Box<dyn crate::codec::ErrorSink>,
    default_value: Box<dyn crate::codec::DefaultValueProvider<KC::Key, VC::Value>>,
    factory: Box<dyn crate::codec::ValueFactory<VC::Value>>,
}

impl<KC: KeyCodec, VC: ValueCodec> std::fmt::Debug for ShardMap<KC, VC> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardMap")
            .field("cfg", &self.cfg)
            .field("segments", &self.segments.len())
            .finish_non_exhaustive()
    }
}

impl<KC: KeyCodec, VC: ValueCodec> ShardMap<KC, VC> {
    pub fn builder(keys: KC, values: VC) -> MapBuilder<KC, VC> {
        MapBuilder::new(keys, values)
    }

    pub(crate) fn create(builder: MapBuilder<KC, VC>, path: &Path) -> Result<Self> {
        let cfg = builder.config()?;
        let mut file = MapFile::create(path, cfg.file_size())
            .wrap_err_with(|| format!("failed to create map at '{}'", path.display()))?;
        let region = file.region();

        let header = FileHeader::for_config(&cfg);
        // SAFETY: the file was just created; no other thread or process has
        // a view of it yet. The header is never written again.
        unsafe {
            use zerocopy::IntoBytes;
            region
                .bytes_mut(0, FILE_HEADER_SIZE)
                .copy_from_slice(header.as_bytes());
        }

        Ok(Self::assemble(builder, cfg, file))
    }

    pub(crate) fn open(builder: MapBuilder<KC, VC>, path: &Path) -> Result<Self> {
        let cfg = builder.config()?;
        let mut file = MapFile::open(path)
            .wrap_err_with(|| format!("failed to open map at '{}'", path.display()))?;

        ensure!(
            file.len() as u64 >= FILE_HEADER_SIZE as u64,
            "map file '{}' is too small to hold a header",
            path.display()
        );
        let region = file.region();
        // SAFETY: the header region is written once at creation and then
        // only read, so a shared view is safe with other processes active.
        let header_bytes = unsafe { region.bytes(0, FILE_HEADER_SIZE) };
        let header = FileHeader::from_bytes(header_bytes)
            .wrap_err_with(|| format!("invalid header in '{}'", path.display()))?;
        header.check_geometry(&cfg)?;
        ensure!(
            file.len() as u64 == cfg.file_size(),
            "map file '{}' is {} bytes, geometry requires exactly {}",
            path.display(),
            file.len(),
            cfg.file_size()
        );

        Ok(Self::assemble(builder, cfg, file))
    }

    fn assemble(builder: MapBuilder<KC, VC>, cfg: MapConfig, mut file: MapFile) -> Self {
        let region = file.region();
        let segment_bytes = cfg.segment_bytes();
        let segments = (0..cfg.segments())
            .map(|index| {
                let slice = region.subregion(FILE_HEADER_SIZE + index * segment_bytes, segment_bytes);
                Segment::new(slice, index, &cfg)
            })
            .collect();

        Self {
            cfg,
            file,
            segments,
            keys: builder.keys,
            values: builder.values,
            key_sizes: builder.key_sizes,
            value_sizes: builder.value_sizes,
            listener: builder.listener,
            errors: builder.errors,
            default_value: builder.default_value,
            factory: builder.factory,
        }
    }

    fn ctx(&self) -> SegmentCtx<'_, KC, VC> {
        SegmentCtx {
            cfg: &self.cfg,
            keys: &self.keys,
            values: &self.values,
            key_sizes: self.key_sizes.as_ref(),
            value_sizes: self.value_sizes.as_ref(),
            listener: self.listener.as_ref(),
            errors: self.errors.as_ref(),
            default_value: self.default_value.as_ref(),
            factory: self.factory.as_ref(),
        }
    }

    fn route(&self, key: &KC::Key) -> (usize, u32) {
        let hash = self.keys.hash(key);
        (self.cfg.segment_of(hash), self.cfg.fingerprint_of(hash))
    }

    // ---- mutations ---------------------------------------------------------

    /// Associates `value` with `key`, returning the previous value (if the
    /// map is configured to read it).
    pub fn put(&self, key: &KC::Key, value: &VC::Value) -> Result<Option<VC::Value>> {
        let (segment, fingerprint) = self.route(key);
        self.segments[segment].put(&self.ctx(), key, value, fingerprint, true)
    }

    /// Inserts only if `key` is absent; returns the existing value
    /// otherwise.
    pub fn put_if_absent(&self, key: &KC::Key, value: &VC::Value) -> Result<Option<VC::Value>> {
        let (segment, fingerprint) = self.route(key);
        self.segments[segment].put(&self.ctx(), key, value, fingerprint, false)
    }

    /// Removes `key`, returning the removed value (if the map is configured
    /// to read it).
    pub fn remove(&self, key: &KC::Key) -> Result<Option<VC::Value>>
    where
        VC::Value: PartialEq,
    {
        let (segment, fingerprint) = self.route(key);
        self.segments[segment].remove(&self.ctx(), key, None, fingerprint)
    }

    /// Removes `key` only if it currently maps to `expected`.
    pub fn remove_if(&self, key: &KC::Key, expected: &VC::Value) -> Result<bool>
    where
        VC::Value: PartialEq,
    {
        let (segment, fingerprint) = self.route(key);
        Ok(self.segments[segment]
            .remove(&self.ctx(), key, Some(expected), fingerprint)?
            .is_some())
    }

    /// Replaces the value of an existing `key`; absent keys stay absent.
    pub fn replace(&self, key: &KC::Key, value: &VC::Value) -> Result<Option<VC::Value>>
    where
        VC::Value: PartialEq,
    {
        let (segment, fingerprint) = self.route(key);
        self.segments[segment].replace(&self.ctx(), key, None, value, fingerprint)
    }

    /// Replaces only if `key` currently maps to `expected`.
    pub fn replace_if(
        &self,
        key: &KC::Key,
        expected: &VC::Value,
        value: &VC::Value,
    ) -> Result<bool>
    where
        VC::Value: PartialEq,
    {
        let (segment, fingerprint) = self.route(key);
        Ok(self.segments[segment]
            .replace(&self.ctx(), key, Some(expected), value, fingerprint)?
            .is_some())
    }

    // ---- lookups -----------------------------------------------------------

    pub fn get(&self, key: &KC::Key) -> Result<Option<VC::Value>> {
        let (segment, fingerprint) = self.route(key);
        self.segments[segment].acquire(&self.ctx(), key, None, fingerprint, false)
    }

    /// Like `get`, reusing `reuse` for deserialization when the key is
    /// present.
    pub fn get_using(&self, key: &KC::Key, reuse: VC::Value) -> Result<Option<VC::Value>> {
        let (segment, fingerprint) = self.route(key);
        self.segments[segment].acquire(&self.ctx(), key, Some(reuse), fingerprint, false)
    }

    /// Returns the value for `key`, inserting one first if absent: the
    /// `using` value when supplied, otherwise a factory-created one.
    pub fn acquire_using(&self, key: &KC::Key, using: Option<VC::Value>) -> Result<VC::Value> {
        let (segment, fingerprint) = self.route(key);
        self.segments[segment]
            .acquire(&self.ctx(), key, using, fingerprint, true)?
            .ok_or_else(|| eyre::eyre!("acquire produced no value for an inserted key"))
    }

    pub fn contains_key(&self, key: &KC::Key) -> Result<bool> {
        let (segment, fingerprint) = self.route(key);
        self.segments[segment].contains_key(&self.ctx(), key, fingerprint)
    }

    // ---- whole-map operations ----------------------------------------------

    /// Entry count, clamped to 32 bits; `long_size` for the full count.
    pub fn size(&self) -> u32 {
        self.long_size().min(u32::MAX as u64) as u32
    }

    /// Point-in-time sum of the per-segment counters; exact only when no
    /// writer is concurrent.
    pub fn long_size(&self) -> u64 {
        self.segments.iter().map(|s| s.size() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.long_size() == 0
    }

    pub fn clear(&self) {
        let ctx = self.ctx();
        for segment in &self.segments {
            segment.clear(&ctx);
        }
    }

    /// Verifies the freelist/index/bytes invariant in every segment;
    /// returns a corruption diagnostic on the first violation.
    pub fn check_consistency(&self) -> Result<()> {
        let ctx = self.ctx();
        for segment in &self.segments {
            segment.check_consistency(&ctx)?;
        }
        Ok(())
    }

    pub fn entries(&self) -> Entries<'_, KC, VC> {
        let mut iter = Entries {
            map: self,
            next: None,
            returned: None,
        };
        iter.advance_from(self.segments.len() - 1, 0);
        iter
    }

    /// Flushes the mapping to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Flushes and releases the map. Operations after close are
    /// unrepresentable (the map is consumed); other processes mapping the
    /// file are unaffected.
    pub fn close(self) -> Result<()> {
        self.file.sync()
    }
}

impl<KC: KeyCodec, VC: ValueCodec> Drop for ShardMap<KC, VC> {
    fn drop(&mut self) {
        let _ = self.file.sync();
    }
}

struct Returned<K> {
    segment: usize,
    pos: u32,
    key: K,
}

/// Snapshot iterator over all entries; see the module docs for the
/// concurrency contract.
pub struct Entries<'a, KC: KeyCodec, VC: ValueCodec> {
    map: &'a ShardMap<KC, VC>,
    next: Option<(usize, u32)>,
    returned: Option<Returned<KC::Key>>,
}

impl<KC: KeyCodec, VC: ValueCodec> Entries<'_, KC, VC> {
    fn advance_from(&mut self, mut segment: usize, mut from: u32) {
        loop {
            if let Some(pos) = self.map.segments[segment].next_present(from) {
                self.next = Some((segment, pos));
                return;
            }
            if segment == 0 {
                self.next = None;
                return;
            }
            segment -= 1;
            from = 0;
        }
    }

    /// Yields the next entry, or `None` when the walk is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<(KC::Key, VC::Value)>> {
        loop {
            let Some((segment_index, pos)) = self.next else {
                return Ok(None);
            };
            let segment = &self.map.segments[segment_index];
            if let Some((key, key_kept, value)) = segment.entry_at(&self.map.ctx(), pos)? {
                self.advance_from(segment_index, pos + 1);
                self.returned = Some(Returned {
                    segment: segment_index,
                    pos,
                    key: key_kept,
                });
                return Ok(Some((key, value)));
            }
            // The position emptied between the bitmap scan and the lock;
            // rescan from the following position.
            self.advance_from(segment_index, pos + 1);
        }
    }

    /// Removes the entry most recently yielded by `next_entry`. If its
    /// position emptied meanwhile (concurrent removal or relocation), falls
    /// back to removing by the yielded key. A different entry that re-filled
    /// the exact position in the window is removed in its place — the
    /// documented anomaly of concurrent iteration.
    pub fn remove_returned(&mut self) -> Result<()>
    where
        VC::Value: PartialEq,
    {
        let returned = self
            .returned
            .take()
            .ok_or_else(|| eyre::eyre!("remove_returned called before next_entry yielded"))?;
        let segment = &self.map.segments[returned.segment];
        if !segment.remove_at(&self.map.ctx(), returned.pos)? {
            self.map.remove(&returned.key)?;
        }
        Ok(())
    }
}

impl<KC: KeyCodec, VC: ValueCodec> Iterator for Entries<'_, KC, VC> {
    type Item = Result<(KC::Key, VC::Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
