//! # shardmap - Persistent Concurrent Hash Map
//!
//! An embedded key-value map whose entire representation lives in a
//! memory-mapped file: threads of one process and separate processes mapping
//! the same file observe the same state. The map exposes the familiar
//! associative contract — insert, lookup, conditional replace, remove,
//! iterate — over raw bytes at fixed offsets, with zero heap traffic per
//! operation.
//!
//! ## Quick Start
//!
//! ```ignore
//! use shardmap::{ShardMap, StringCodec};
//!
//! let map = ShardMap::builder(StringCodec, StringCodec)
//!     .segments(16)
//!     .entries_per_segment(4096)
//!     .entry_size(128)
//!     .create("./app.map")?;
//!
//! map.put(&"alpha".into(), &"one".into())?;
//! assert_eq!(map.get(&"alpha".into())?, Some("one".into()));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │        Public API (ShardMap)         │
//! ├──────────────────────────────────────┤
//! │  Hash routing │ Entry iteration      │
//! ├──────────────────────────────────────┤
//! │  Segment state machines              │
//! │  (put / acquire / replace / remove)  │
//! ├──────────────┬───────────┬───────────┤
//! │  Hash index  │ Block     │ In-file   │
//! │  (multi-map) │ allocator │ spin-lock │
//! ├──────────────┴───────────┴───────────┤
//! │  Codec interfaces (keys, values,     │
//! │  size prefixes, listeners)           │
//! ├──────────────────────────────────────┤
//! │  Memory-mapped file (one mapping)    │
//! └──────────────────────────────────────┘
//! ```
//!
//! The address space is partitioned into a power-of-two number of segments,
//! each protected by a process-shared spin-lock embedded in the file. All
//! per-segment structures — the fingerprint hash index, the block-grid
//! free-list, and the entries themselves — are hand-laid bytes inside the
//! mapping; nothing is cached on the heap, so a second process mapping the
//! file is immediately consistent.
//!
//! ## Fixed Geometry
//!
//! Segment count, per-segment capacity, and block size are fixed at
//! construction and persisted in the file header; reopening validates them.
//! There is no on-line resize, no ordered iteration, and no cross-segment
//! transaction.
//!
//! ## Module Overview
//!
//! - [`map`]: the engine — builder, routing, public API, iteration
//! - `segment`: per-partition state machines over raw bytes
//! - [`codec`]: key/value/size codec interfaces and bundled codecs
//! - [`config`]: geometry, derived layout, hash routing constants
//! - [`storage`]: the mapping, raw regions, the persisted file header
//! - [`encoding`]: the default stop-bit size-prefix scheme

pub mod codec;
pub mod config;
pub mod encoding;
pub mod map;
pub(crate) mod segment;
pub mod storage;

pub use codec::{
    BytesCodec, DefaultValueProvider, ErrorSink, KeyCodec, MapListener, SizeCodec, StringCodec,
    ValueCodec, ValueFactory, VarIntSizes,
};
pub use config::{Alignment, MapConfig, MAX_OVERSIZE_BLOCKS};
pub use map::{Entries, MapBuilder, ShardMap};
