//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for firkin segment files.
///
/// Storage backends are **opaque byte stores** addressed by offset. They
/// provide positional reads and writes plus durability control. The engine
/// owns all file format interpretation - backends do not understand records,
/// headers, or checksums.
///
/// # Invariants
///
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` at the current size extends the storage; writes never
///   shrink it
/// - `sync` ensures all written data is durable
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::FileBackend`] - Buffered file I/O
/// - [`super::MmapBackend`] - Memory-mapped I/O with fixed capacity
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the current size (or mapped capacity)
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be performed, or (for mapped
    /// backends) would extend beyond the fixed capacity.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes all pending writes toward the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs all written data to durable storage.
    ///
    /// This is a stronger guarantee than `flush`: after this returns
    /// successfully, written data survives process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// For file-backed storage this is the file length; for mapped storage
    /// it is the fixed mapped capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;
}
