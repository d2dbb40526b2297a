//! # Firkin Storage
//!
//! Positional I/O backends for the firkin key-value engine.
//!
//! This crate provides the lowest-level storage abstraction for firkin.
//! Backends are **opaque byte stores** addressed by offset - they do not
//! interpret record formats, segment layouts, or anything else the engine
//! writes through them.
//!
//! ## Design Principles
//!
//! - Backends expose positional reads and writes (`read_at` / `write_at`)
//! - No knowledge of firkin record or segment formats
//! - Must be `Send + Sync` for concurrent access
//! - The engine owns all file format interpretation
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - Buffered file I/O through OS file APIs
//! - [`MmapBackend`] - Memory-mapped I/O over a fixed-capacity file
//!
//! ## Example
//!
//! ```no_run
//! use firkin_storage::{IoMode, open_backend};
//! use std::path::Path;
//!
//! let mut backend = open_backend(Path::new("000000.data"), IoMode::File, 16384).unwrap();
//! backend.write_at(0, b"hello world").unwrap();
//! let data = backend.read_at(0, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod mmap;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use mmap::MmapBackend;

use std::path::Path;

/// How a backend performs reads and writes.
///
/// The mode is fixed per engine instance at open time; file-backed and
/// memory-mapped segments are never mixed within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    /// Buffered file I/O (`seek` + `read`/`write` through the OS).
    #[default]
    File,
    /// Memory-mapped I/O over a file pre-sized to a fixed capacity.
    MemoryMapped,
}

/// Opens a backend of the requested mode at `path`.
///
/// `capacity` is only consulted in [`IoMode::MemoryMapped`], where the file
/// is truncated to `capacity` bytes before mapping. File-backed storage
/// grows on demand and ignores it.
///
/// # Errors
///
/// Returns an error if the file cannot be created, sized, or mapped.
pub fn open_backend(
    path: &Path,
    mode: IoMode,
    capacity: u64,
) -> StorageResult<Box<dyn StorageBackend>> {
    match mode {
        IoMode::File => Ok(Box::new(FileBackend::open(path)?)),
        IoMode::MemoryMapped => Ok(Box::new(MmapBackend::open(path, capacity)?)),
    }
}
