//! A single on-disk segment file.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::{Operation, Record, RecordHeader, RecordType, HEADER_SIZE};
use firkin_storage::{open_backend, IoMode, StorageBackend, StorageError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Returns the file name for a segment id, e.g. `000007.data`.
#[must_use]
pub fn segment_file_name(id: u32) -> String {
    format!("{id:06}.data")
}

/// One append-only segment file.
///
/// The segment tracks its own logical write position (`write_pos`), which
/// is the offset of the next append. In memory-mapped mode the underlying
/// file is pre-sized to the block capacity, so the physical length says
/// nothing about how much data has actually been written; replay
/// re-derives the logical end after startup.
pub struct SegmentFile {
    id: u32,
    path: PathBuf,
    backend: Box<dyn StorageBackend>,
    write_pos: u64,
}

impl SegmentFile {
    /// Creates or opens segment `id` under `dir`.
    ///
    /// In memory-mapped mode the file is truncated to `capacity` bytes
    /// before mapping; in buffered mode no pre-allocation occurs.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, sized, or mapped.
    pub fn open(dir: &Path, id: u32, mode: IoMode, capacity: u64) -> CoreResult<Self> {
        let path = dir.join(segment_file_name(id));
        let backend = open_backend(&path, mode, capacity)?;

        Ok(Self {
            id,
            path,
            backend,
            write_pos: 0,
        })
    }

    /// Returns the segment id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the offset of the next append.
    #[must_use]
    pub fn write_pos(&self) -> u64 {
        self.write_pos
    }

    /// Sets the logical write position.
    ///
    /// Used by the replay loop once it has walked the segment's records.
    pub(crate) fn set_write_pos(&mut self, pos: u64) {
        self.write_pos = pos;
    }

    /// Reads the record starting at `offset`.
    ///
    /// Reads the 20-byte header first, then the key, value, and extra
    /// bytes at their derived offsets, and re-validates the checksum.
    ///
    /// # Errors
    ///
    /// - `EndOfSegment` if `offset` is at or past the logical data end
    /// - `ChecksumMismatch` if the stored checksum disagrees with the
    ///   recomputed one
    /// - `InvalidRecord` for unknown type or operation tags
    pub fn read(&self, offset: u64) -> CoreResult<Record> {
        let header_buf = self.read_chunk(offset, HEADER_SIZE as usize)?;
        let header = RecordHeader::decode(&header_buf)?;

        // A valid record never has an empty key. In memory-mapped mode the
        // bytes past the logical end are zeroes, so a zero key length marks
        // the end of written records.
        if header.key_size == 0 {
            return Err(CoreError::EndOfSegment);
        }

        let mut pos = offset + HEADER_SIZE;
        let key = self.read_chunk(pos, header.key_size as usize)?;
        pos += u64::from(header.key_size);
        let value = self.read_chunk(pos, header.value_size as usize)?;
        pos += u64::from(header.value_size);
        let extra = self.read_chunk(pos, header.extra_size as usize)?;

        let record = Record {
            key,
            value,
            extra,
            record_type: RecordType::from_u16(header.record_type)?,
            operation: Operation::from_u16(header.operation)?,
        };
        record.verify_checksum(header.crc32)?;

        Ok(record)
    }

    /// Appends a record at the current write position.
    ///
    /// Returns the offset the record was written at and advances the write
    /// position by the encoded size.
    ///
    /// # Errors
    ///
    /// Returns `EmptyRecord` if the record has no key, or a storage error
    /// if the write fails.
    pub fn write(&mut self, record: &Record) -> CoreResult<u64> {
        if record.key.is_empty() {
            return Err(CoreError::EmptyRecord);
        }

        let buf = record.encode()?;
        let offset = self.write_pos;
        self.backend.write_at(offset, &buf)?;
        self.write_pos += buf.len() as u64;

        Ok(offset)
    }

    /// Flushes written records to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Optionally syncs, then releases the file handle or mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    pub fn close(mut self, sync: bool) -> CoreResult<()> {
        if sync {
            self.sync()?;
        }
        Ok(())
    }

    /// Mode-dispatched positional read that maps reads past the data end
    /// to `EndOfSegment`.
    fn read_chunk(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        match self.backend.read_at(offset, len) {
            Ok(buf) => Ok(buf),
            Err(StorageError::ReadPastEnd { .. }) => Err(CoreError::EndOfSegment),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("write_pos", &self.write_pos)
            .finish_non_exhaustive()
    }
}

/// Scans `dir` for segment files and opens all but the highest id.
///
/// Returns the archived segments keyed by id, plus the id that should
/// become active (the highest existing id, or 0 for an empty directory).
/// File names must be a six-digit decimal id with a `.data` extension;
/// anything else in the directory is ignored.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or a segment cannot
/// be opened.
pub fn load_segments(
    dir: &Path,
    mode: IoMode,
    capacity: u64,
) -> CoreResult<(BTreeMap<u32, SegmentFile>, u32)> {
    let mut ids = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(".data") else {
            continue;
        };
        if stem.len() != 6 {
            continue;
        }
        if let Ok(id) = stem.parse::<u32>() {
            ids.push(id);
        }
    }

    ids.sort_unstable();

    let mut archived = BTreeMap::new();
    let Some(&active_id) = ids.last() else {
        return Ok((archived, 0));
    };

    for &id in &ids[..ids.len() - 1] {
        let segment = SegmentFile::open(dir, id, mode, capacity)?;
        archived.insert(id, segment);
    }

    Ok((archived, active_id))
}
