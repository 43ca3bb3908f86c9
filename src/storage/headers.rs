//! # File Header
//!
//! The first 128 bytes of a map file hold the `FileHeader`: magic bytes, a
//! format version, and the map geometry the file was created with. Segments
//! follow immediately after the header, so the header size is part of the
//! persisted layout and never changes within a format version.
//!
//! ## Geometry Validation
//!
//! Every field of the geometry (segment count, entries per segment, entry
//! size, value alignment, metadata bytes) determines byte offsets inside the
//! file. Opening a file with a different geometry than it was created with
//! would silently misinterpret every segment, so `FileHeader::check_geometry`
//! rejects any mismatch up front with the offending field in the error.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  --------------------------------
//! 0       16    magic  ("shardmap file v1")
//! 16      4     version
//! 20      4     segments
//! 24      4     entries_per_segment
//! 28      4     entry_size
//! 32      4     alignment code (1, 4, or 8)
//! 36      4     meta_data_bytes
//! 40      8     flags (reserved)
//! 48      80    reserved
//! ```
//!
//! All multi-byte fields are little-endian via the zerocopy wrapper types,
//! so the struct can be read in place from the mapping without copies.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::MapConfig;

pub const MAP_MAGIC: &[u8; 16] = b"shardmap file v1";
pub const CURRENT_VERSION: u32 = 1;
pub const FILE_HEADER_SIZE: usize = 128;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    magic: [u8; 16],
    version: U32,
    segments: U32,
    entries_per_segment: U32,
    entry_size: U32,
    alignment: U32,
    meta_data_bytes: U32,
    flags: U64,
    reserved: [u8; 80],
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    pub fn for_config(config: &MapConfig) -> Self {
        Self {
            magic: *MAP_MAGIC,
            version: U32::new(CURRENT_VERSION),
            segments: U32::new(config.segments() as u32),
            entries_per_segment: U32::new(config.entries_per_segment() as u32),
            entry_size: U32::new(config.entry_size() as u32),
            alignment: U32::new(config.alignment().code()),
            meta_data_bytes: U32::new(config.meta_data_bytes() as u32),
            flags: U64::new(0),
            reserved: [0u8; 80],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for FileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse FileHeader: {:?}", e))?;

        ensure!(
            &header.magic == MAP_MAGIC,
            "not a shardmap file (bad magic bytes)"
        );

        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported map file version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );

        Ok(header)
    }

    /// Rejects opening a file whose persisted geometry differs from the
    /// configured geometry in any field.
    pub fn check_geometry(&self, config: &MapConfig) -> Result<()> {
        ensure!(
            self.segments.get() as usize == config.segments(),
            "segment count mismatch: file has {}, configured {}",
            self.segments.get(),
            config.segments()
        );
        ensure!(
            self.entries_per_segment.get() as usize == config.entries_per_segment(),
            "entries-per-segment mismatch: file has {}, configured {}",
            self.entries_per_segment.get(),
            config.entries_per_segment()
        );
        ensure!(
            self.entry_size.get() as usize == config.entry_size(),
            "entry size mismatch: file has {}, configured {}",
            self.entry_size.get(),
            config.entry_size()
        );
        ensure!(
            self.alignment.get() == config.alignment().code(),
            "value alignment mismatch: file has {}, configured {}",
            self.alignment.get(),
            config.alignment().code()
        );
        ensure!(
            self.meta_data_bytes.get() as usize == config.meta_data_bytes(),
            "metadata bytes mismatch: file has {}, configured {}",
            self.meta_data_bytes.get(),
            config.meta_data_bytes()
        );
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn segments(&self) -> u32 {
        self.segments.get()
    }

    pub fn entries_per_segment(&self) -> u32 {
        self.entries_per_segment.get()
    }

    pub fn entry_size(&self) -> u32 {
        self.entry_size.get()
    }
}
