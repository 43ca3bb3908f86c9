//! # Memory-Mapped Map File
//!
//! `MapFile` owns the backing file and its read-write mapping. The whole map
//! — file header, every segment header, hash index, free-list bitset, and
//! entries grid — lives inside this one mapping, so processes that map the
//! same file observe the same state.
//!
//! ## Fixed Size
//!
//! The map's geometry (segment count, entries per segment, entry size) is
//! immutable after construction, so the file size is computed once and the
//! mapping is never grown or remapped. That makes the base pointer stable
//! for the lifetime of the map, which is what lets [`Region`] hand out raw
//! views that segments use concurrently under their own in-file locks.
//!
//! ## Durability
//!
//! The OS writes dirty pages back on its own schedule; `sync()` forces an
//! `msync` when the caller needs a durability point. Dropping the engine
//! flushes best-effort.
//!
//! ## Error Handling
//!
//! All fallible operations return `eyre::Result` with the file path and the
//! operation being performed in the error context.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use super::Region;

#[derive(Debug)]
pub struct MapFile {
    mmap: MmapMut,
    path: PathBuf,
}

impl MapFile {
    /// Creates (or truncates) the file at `path` with exactly `size` bytes,
    /// all zero, and maps it read-write. A zeroed file is a valid empty map:
    /// every free-list bit clear, every hash-index slot empty, every counter
    /// zero.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let path = path.as_ref();

        ensure!(size > 0, "map file size must be non-zero");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create map file '{}'", path.display()))?;

        file.set_len(size)
            .wrap_err_with(|| format!("failed to size map file to {} bytes", size))?;

        // SAFETY: MmapMut::map_mut is unsafe because externally truncating or
        // rewriting the file would invalidate the mapping. This is safe
        // because:
        // 1. The file was just created with read+write access and sized to
        //    exactly the bytes the mapping covers.
        // 2. Cooperating processes open the same file through this type,
        //    which never changes the file length after creation.
        // 3. The mapping's lifetime is tied to MapFile, preventing
        //    use-after-unmap; Regions are only reachable through the engine
        //    that owns the MapFile.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
        })
    }

    /// Opens an existing map file and maps it read-write. The caller
    /// validates the header and exact length against its configured
    /// geometry.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open map file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?;

        ensure!(
            metadata.len() > 0,
            "cannot open empty map file '{}'",
            path.display()
        );

        // SAFETY: as in `create`; the file is opened read+write, the length
        // is fixed for the lifetime of the map, and the mapping cannot
        // outlive MapFile.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
        })
    }

    /// Raw view of the whole mapping. Called once during engine construction
    /// to carve the file header and segment regions.
    pub fn region(&mut self) -> Region {
        Region::new(self.mmap.as_mut_ptr(), self.mmap.len())
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync map file to disk")
    }
}
