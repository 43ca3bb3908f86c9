//! # Map Builder
//!
//! Fluent configuration for opening or creating a map. The builder owns the
//! two codecs (keys and values) and every optional collaborator; terminal
//! methods validate the geometry, size the file, and hand back a running
//! [`ShardMap`].
//!
//! ## Options
//!
//! | Option                | Default      | Description                                |
//! |-----------------------|--------------|--------------------------------------------|
//! | `segments`            | 16           | lock partitions (power of two)             |
//! | `entries_per_segment` | 4096         | block-grid capacity per segment            |
//! | `entry_size`          | 256          | block size in bytes                        |
//! | `alignment`           | None         | value-start alignment within entries       |
//! | `meta_data_bytes`     | 0            | user metadata prefix per entry             |
//! | `lock_timeout`        | 2 s          | per-attempt segment lock budget            |
//! | `put_returns_value`   | true         | `put`/`put_if_absent` read the prior value |
//! | `remove_returns_value`| true         | `remove` reads the removed value           |
//!
//! Setting the return-value options to `false` skips the value
//! deserialization on the corresponding paths; the operations then return
//! `None` regardless of the prior state.
//!
//! ## Geometry Is Sticky
//!
//! `create` persists the geometry in the file header; `open` validates that
//! the configured geometry matches the persisted one field by field and
//! refuses the file otherwise. `open_or_create` picks by file existence.

use std::path::Path;
use std::time::Duration;

use eyre::Result;

use crate::codec::{
    DefaultValueProvider, ErrorSink, KeyCodec, MapListener, NoDefaultValue, NoValueFactory,
    NopErrorSink, NopListener, SizeCodec, ValueCodec, ValueFactory, VarIntSizes,
};
use crate::config::{Alignment, MapConfig};

use super::ShardMap;

pub struct MapBuilder<KC: KeyCodec, VC: ValueCodec> {
    pub(super) keys: KC,
    pub(super) values: VC,
    pub(super) segments: usize,
    pub(super) entries_per_segment: usize,
    pub(super) entry_size: usize,
    pub(super) alignment: Alignment,
    pub(super) meta_data_bytes: usize,
    pub(super) lock_timeout: Duration,
    pub(super) put_returns_value: bool,
    pub(super) remove_returns_value: bool,
    pub(super) key_sizes: Box<dyn SizeCodec>,
    pub(super) value_sizes: Box<dyn SizeCodec>,
    pub(super) listener: Box<dyn MapListener<KC::Key, VC::Value>>,
    pub(super) errors: Box<dyn ErrorSink>,
    pub(super) default_value: Box<dyn DefaultValueProvider<KC::Key, VC::Value>>,
    pub(super) factory: Box<dyn ValueFactory<VC::Value>>,
}

impl<KC: KeyCodec, VC: ValueCodec> MapBuilder<KC, VC> {
    pub fn new(keys: KC, values: VC) -> Self {
        Self {
            keys,
            values,
            segments: 16,
            entries_per_segment: 4096,
            entry_size: 256,
            alignment: Alignment::None,
            meta_data_bytes: 0,
            lock_timeout: Duration::from_secs(2),
            put_returns_value: true,
            remove_returns_value: true,
            key_sizes: Box::new(VarIntSizes),
            value_sizes: Box::new(VarIntSizes),
            listener: Box::new(NopListener),
            errors: Box::new(NopErrorSink),
            default_value: Box::new(NoDefaultValue),
            factory: Box::new(NoValueFactory),
        }
    }

    pub fn segments(mut self, segments: usize) -> Self {
        self.segments = segments;
        self
    }

    pub fn entries_per_segment(mut self, entries: usize) -> Self {
        self.entries_per_segment = entries;
        self
    }

    pub fn entry_size(mut self, bytes: usize) -> Self {
        self.entry_size = bytes;
        self
    }

    pub fn alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn meta_data_bytes(mut self, bytes: usize) -> Self {
        self.meta_data_bytes = bytes;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn put_returns_value(mut self, yes: bool) -> Self {
        self.put_returns_value = yes;
        self
    }

    pub fn remove_returns_value(mut self, yes: bool) -> Self {
        self.remove_returns_value = yes;
        self
    }

    pub fn key_size_codec(mut self, sizes: impl SizeCodec + 'static) -> Self {
        self.key_sizes = Box::new(sizes);
        self
    }

    pub fn value_size_codec(mut self, sizes: impl SizeCodec + 'static) -> Self {
        self.value_sizes = Box::new(sizes);
        self
    }

    pub fn listener(mut self, listener: impl MapListener<KC::Key, VC::Value> + 'static) -> Self {
        self.listener = Box::new(listener);
        self
    }

    pub fn error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.errors = Box::new(sink);
        self
    }

    pub fn default_value_provider(
        mut self,
        provider: impl DefaultValueProvider<KC::Key, VC::Value> + 'static,
    ) -> Self {
        self.default_value = Box::new(provider);
        self
    }

    pub fn value_factory(mut self, factory: impl ValueFactory<VC::Value> + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub(super) fn config(&self) -> Result<MapConfig> {
        MapConfig::validated(
            self.segments,
            self.entries_per_segment,
            self.entry_size,
            self.alignment,
            self.meta_data_bytes,
            self.lock_timeout,
            self.put_returns_value,
            self.remove_returns_value,
        )
    }

    /// Creates a fresh map file at `path` (truncating any existing file) and
    /// opens it.
    pub fn create<P: AsRef<Path>>(self, path: P) -> Result<ShardMap<KC, VC>> {
        ShardMap::create(self, path.as_ref())
    }

    /// Opens an existing map file, validating its header and exact size
    /// against this configuration.
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<ShardMap<KC, VC>> {
        ShardMap::open(self, path.as_ref())
    }

    pub fn open_or_create<P: AsRef<Path>>(self, path: P) -> Result<ShardMap<KC, VC>> {
        if path.as_ref().exists() {
            self.open(path)
        } else {
            self.create(path)
        }
    }
}
