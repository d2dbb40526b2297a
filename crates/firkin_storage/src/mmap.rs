//! Memory-mapped storage backend over a fixed-capacity file.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// A memory-mapped storage backend.
///
/// The file is truncated to `capacity` bytes before mapping, so the mapped
/// length never changes for the lifetime of the backend. Reads and writes
/// are bounds-checked slice copies against the mapping.
///
/// Bytes past the last write read back as zeroes; callers that scan a
/// mapped file sequentially must detect their own logical end of data.
///
/// # Durability
///
/// - `flush()` and `sync()` both `msync` the mapping; the mapping stays
///   valid and writable afterwards
/// - dropping the backend flushes dirty pages through the OS
#[derive(Debug)]
pub struct MmapBackend {
    path: PathBuf,
    map: MmapMut,
    file: File,
    capacity: u64,
}

impl MmapBackend {
    /// Opens or creates a memory-mapped backend at the given path.
    ///
    /// The file is sized to exactly `capacity` bytes before mapping;
    /// existing content within that range is preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, resized, or mapped.
    pub fn open(path: &Path, capacity: u64) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.set_len(capacity)?;

        // SAFETY: the engine holds the only handle to this file for the
        // lifetime of the backend (the data directory is exclusively
        // locked), and the mapping length is fixed by the set_len above.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            path: path.to_path_buf(),
            map,
            file,
            capacity,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the fixed mapped capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl StorageBackend for MmapBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);

        if offset > self.capacity || end > self.capacity {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.capacity,
            });
        }

        let start = offset as usize;
        Ok(self.map[start..start + len].to_vec())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let end = offset.saturating_add(data.len() as u64);

        if end > self.capacity {
            return Err(StorageError::WriteBeyondCapacity {
                offset,
                len: data.len(),
                capacity: self.capacity,
            });
        }

        let start = offset as usize;
        self.map[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.map.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.map.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mmap_create_sized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = MmapBackend::open(&path, 4096).unwrap();
        assert_eq!(backend.size().unwrap(), 4096);
        assert_eq!(backend.capacity(), 4096);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn mmap_write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = MmapBackend::open(&path, 4096).unwrap();
        backend.write_at(0, b"hello").unwrap();
        backend.write_at(5, b" world").unwrap();

        let data = backend.read_at(0, 11).unwrap();
        assert_eq!(&data, b"hello world");
    }

    #[test]
    fn mmap_unwritten_bytes_are_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = MmapBackend::open(&path, 64).unwrap();
        backend.write_at(0, b"x").unwrap();

        let tail = backend.read_at(1, 63).unwrap();
        assert!(tail.iter().all(|&b| b == 0));
    }

    #[test]
    fn mmap_read_past_capacity_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = MmapBackend::open(&path, 64).unwrap();
        let result = backend.read_at(60, 8);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn mmap_write_past_capacity_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = MmapBackend::open(&path, 64).unwrap();
        let result = backend.write_at(60, b"too long");
        assert!(matches!(
            result,
            Err(StorageError::WriteBeyondCapacity { .. })
        ));
    }

    #[test]
    fn mmap_persistence_after_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        {
            let mut backend = MmapBackend::open(&path, 64).unwrap();
            backend.write_at(0, b"durable").unwrap();
            backend.sync().unwrap();
        }

        {
            let backend = MmapBackend::open(&path, 64).unwrap();
            assert_eq!(backend.read_at(0, 7).unwrap(), b"durable");
        }
    }

    #[test]
    fn mmap_reopen_preserves_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        {
            let mut backend = MmapBackend::open(&path, 64).unwrap();
            backend.write_at(0, b"abc").unwrap();
            backend.sync().unwrap();
        }

        // Reopening with the same capacity must not clobber the content.
        let backend = MmapBackend::open(&path, 64).unwrap();
        assert_eq!(backend.read_at(0, 3).unwrap(), b"abc");
    }
}
