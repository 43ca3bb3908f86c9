//! # Storage Module
//!
//! The foundational layer under the map engine: one memory-mapped file
//! holding the entire map state, raw region views into that mapping, and the
//! on-disk file header.
//!
//! ## Architecture
//!
//! The engine maps the whole file once at construction and never remaps it
//! (the geometry is fixed, so the size is known up front). Construction
//! carves the mapping into a 128-byte [`FileHeader`] followed by `S`
//! equally-sized segment regions; each segment then carves its region into a
//! 64-byte header, the hash-index area, the free-list bitset, and the
//! entries grid.
//!
//! ```text
//! [0, 128)                      FileHeader (magic, version, geometry)
//! [128, 128 + segment_bytes)    segment 0
//! [.., ..)                      segment 1
//! ...                           (EOF matches the computed size exactly)
//! ```
//!
//! ## Concurrency
//!
//! Unlike a single-writer pager, every byte past the file header is shared
//! between threads and processes, serialized by the per-segment spin-lock
//! that itself lives inside the mapping. [`Region`] encodes the resulting
//! access rules; see its module docs.
//!
//! ## Module Organization
//!
//! - `mmap`: file creation/open and the mapping itself (`MapFile`)
//! - `region`: raw views with lock-discipline accessors (`Region`)
//! - `headers`: the persisted `FileHeader` and geometry validation

mod headers;
mod mmap;
mod region;

pub use headers::{FileHeader, CURRENT_VERSION, FILE_HEADER_SIZE, MAP_MAGIC};
pub use mmap::MapFile;
pub use region::Region;
