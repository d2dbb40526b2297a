//! Expiry bookkeeping.
//!
//! Maps keys to absolute expiration deadlines (unix seconds). Absence
//! means the key is permanent. The table is persisted as a flat file of
//! records:
//!
//! ```text
//! | key len (4, BE) | deadline (8, BE) | key |
//! ```
//!
//! Saves rewrite the whole file; they happen only at orderly engine
//! shutdown, so the non-incremental format is acceptable. Expiration is
//! enforced lazily on read - there is no background sweeper.

use crate::error::CoreResult;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Size of the fixed per-record header: key length plus deadline.
const RECORD_HEADER_SIZE: usize = 12;

/// In-memory table of key expiration deadlines.
#[derive(Debug, Default)]
pub struct ExpiryTable {
    map: HashMap<Vec<u8>, u64>,
}

impl ExpiryTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the deadline for `key`, if one is set.
    #[must_use]
    pub fn deadline(&self, key: &[u8]) -> Option<u64> {
        self.map.get(key).copied()
    }

    /// Returns whether `key` is expired at time `now`.
    ///
    /// A key with no deadline is never expired.
    #[must_use]
    pub fn is_expired(&self, key: &[u8], now: u64) -> bool {
        self.deadline(key).is_some_and(|deadline| now >= deadline)
    }

    /// Sets the deadline for `key`.
    pub fn set(&mut self, key: Vec<u8>, deadline: u64) {
        self.map.insert(key, deadline);
    }

    /// Clears the deadline for `key`, returning it if one was set.
    pub fn remove(&mut self, key: &[u8]) -> Option<u64> {
        self.map.remove(key)
    }

    /// Returns the number of keys with a deadline.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no key has a deadline.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Loads a table from the flat file at `path`.
    ///
    /// A missing file yields an empty table. Reading stops at a clean
    /// end-of-file; a record cut short mid-way is an error.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error on anything other than clean
    /// end-of-file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut map = HashMap::new();
        let mut offset = 0usize;

        while offset < data.len() {
            if data.len() - offset < RECORD_HEADER_SIZE {
                return Err(truncated_record(path, offset).into());
            }

            let key_size = u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]) as usize;
            let deadline = u64::from_be_bytes([
                data[offset + 4],
                data[offset + 5],
                data[offset + 6],
                data[offset + 7],
                data[offset + 8],
                data[offset + 9],
                data[offset + 10],
                data[offset + 11],
            ]);

            let key_start = offset + RECORD_HEADER_SIZE;
            let key_end = key_start + key_size;
            if key_end > data.len() {
                return Err(truncated_record(path, offset).into());
            }

            map.insert(data[key_start..key_end].to_vec(), deadline);
            offset = key_end;
        }

        Ok(Self { map })
    }

    /// Truncates and rewrites the flat file at `path` with all current
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or synced.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let mut file = File::create(path)?;

        for (key, deadline) in &self.map {
            let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + key.len());
            buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
            buf.extend_from_slice(&deadline.to_be_bytes());
            buf.extend_from_slice(key);
            file.write_all(&buf)?;
        }

        file.sync_all()?;
        Ok(())
    }
}

fn truncated_record(path: &Path, offset: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "truncated expiry record at offset {offset} in {}",
            path.display()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_empty_table() {
        let dir = tempdir().unwrap();
        let table = ExpiryTable::load(&dir.path().join("expires.data")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("expires.data");

        let mut table = ExpiryTable::new();
        table.set(b"short".to_vec(), 100);
        table.set(b"a-much-longer-key".to_vec(), u64::MAX);
        table.save(&path).unwrap();

        let loaded = ExpiryTable::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.deadline(b"short"), Some(100));
        assert_eq!(loaded.deadline(b"a-much-longer-key"), Some(u64::MAX));
    }

    #[test]
    fn save_truncates_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("expires.data");

        let mut table = ExpiryTable::new();
        table.set(b"old-entry-with-long-key".to_vec(), 1);
        table.save(&path).unwrap();

        let mut table = ExpiryTable::new();
        table.set(b"new".to_vec(), 2);
        table.save(&path).unwrap();

        let loaded = ExpiryTable::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.deadline(b"new"), Some(2));
    }

    #[test]
    fn truncated_record_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("expires.data");

        let mut table = ExpiryTable::new();
        table.set(b"key".to_vec(), 42);
        table.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        assert!(ExpiryTable::load(&path).is_err());
    }

    #[test]
    fn expiry_check() {
        let mut table = ExpiryTable::new();
        table.set(b"k".to_vec(), 100);

        assert!(!table.is_expired(b"k", 99));
        assert!(table.is_expired(b"k", 100));
        assert!(table.is_expired(b"k", 101));
        assert!(!table.is_expired(b"permanent", u64::MAX));
    }

    #[test]
    fn remove_clears_deadline() {
        let mut table = ExpiryTable::new();
        table.set(b"k".to_vec(), 7);

        assert_eq!(table.remove(b"k"), Some(7));
        assert_eq!(table.remove(b"k"), None);
        assert!(table.is_empty());
    }
}
