//! The engine orchestrator.
//!
//! Owns the active segment, the archived segment set, the skip-list
//! index, and the expiry table. All operations are synchronous: they
//! complete or fail, with no internal retries or timeouts.
//!
//! ## Locking
//!
//! Two locks coordinate concurrent callers:
//!
//! - `segments` (mutex) guards every segment-set mutation: appends,
//!   rotation, compaction, and close hold it for their full duration.
//! - `index` (reader/writer) guards the skip list; `expires` likewise.
//!
//! Lock order is segments, then index, then expires. The index lock is
//! never held while acquiring the segments lock: readers clone the entry
//! they need and release the index before touching a segment.

use crate::config::{Config, IndexMode};
use crate::error::{CoreError, CoreResult};
use crate::expiry::ExpiryTable;
use crate::index::{DomainValue, IndexEntry, SkipList};
use crate::segment::{load_segments, Operation, Record, RecordType, SegmentFile};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// File holding the persisted expiry table, inside the data directory.
const EXPIRES_FILE: &str = "expires.data";

/// Advisory lock file guarding the data directory.
const LOCK_FILE: &str = "LOCK";

/// The active segment plus the archived set, guarded by one mutex.
///
/// `active` is `None` once the engine has been closed.
pub(crate) struct SegmentSet {
    pub(crate) active: Option<SegmentFile>,
    pub(crate) active_id: u32,
    pub(crate) archived: BTreeMap<u32, SegmentFile>,
}

/// An embedded log-structured key-value engine.
///
/// Writes append to the active segment and update the in-memory index;
/// reads resolve through the index, touching disk only in key-only mode.
/// On open, the index is rebuilt by replaying every segment in ascending
/// id order.
///
/// # Example
///
/// ```no_run
/// use firkin_core::{Config, Engine};
///
/// let engine = Engine::open(Config::new("/tmp/firkin")).unwrap();
/// engine.set(b"name", b"cask").unwrap();
/// assert_eq!(engine.get(b"name").unwrap(), b"cask");
/// engine.close().unwrap();
/// ```
pub struct Engine {
    pub(crate) config: Config,
    pub(crate) segments: Mutex<SegmentSet>,
    pub(crate) index: RwLock<SkipList<IndexEntry>>,
    pub(crate) expires: RwLock<ExpiryTable>,
    closed: AtomicBool,
    _lock_file: File,
}

impl Engine {
    /// Opens an engine over the configured data directory.
    ///
    /// Creates the directory if missing, acquires the directory lock,
    /// scans for segment files (the highest id becomes active), loads the
    /// expiry table, and replays every segment to rebuild the index.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseLocked` if another process holds the directory,
    /// or any replay error: a corrupt segment refuses to open rather than
    /// serving from a silently incomplete index.
    pub fn open(config: Config) -> CoreResult<Self> {
        fs::create_dir_all(&config.dir_path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(config.dir_path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        let (archived, active_id) =
            load_segments(&config.dir_path, config.io_mode, config.block_size)?;
        let active = SegmentFile::open(
            &config.dir_path,
            active_id,
            config.io_mode,
            config.block_size,
        )?;
        let expires = ExpiryTable::load(&config.dir_path.join(EXPIRES_FILE))?;

        let engine = Self {
            segments: Mutex::new(SegmentSet {
                active: Some(active),
                active_id,
                archived,
            }),
            index: RwLock::new(SkipList::new()),
            expires: RwLock::new(expires),
            closed: AtomicBool::new(false),
            _lock_file: lock_file,
            config,
        };

        engine.replay()?;

        tracing::debug!(
            dir = %engine.config.dir_path.display(),
            active_segment = active_id,
            keys = engine.index.read().len(),
            "engine opened"
        );
        Ok(engine)
    }

    /// Writes `value` under `key`.
    ///
    /// Appends a set record to the active segment (rotating first if it
    /// would overflow the block size), upserts the index entry, and
    /// clears any live expiry for the key.
    ///
    /// # Errors
    ///
    /// `EmptyKey`, `KeyTooLarge`, or `ValueTooLarge` are returned before
    /// any side effect; I/O failures surface immediately.
    pub fn set(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.check_key(key)?;
        self.check_value(value)?;
        self.ensure_open()?;

        let record = Record::set(key.to_vec(), value.to_vec());
        let mut set = self.segments.lock();
        let (segment_id, offset) = self.append_record(&mut set, &record)?;

        let cached = (self.config.index_mode == IndexMode::KeyValue)
            .then(|| DomainValue::Str(value.to_vec()));
        let entry = IndexEntry {
            segment_id,
            size: record.encoded_size(),
            offset,
            value: cached,
        };
        self.index.write().insert(key.to_vec(), entry);
        self.expires.write().remove(key);
        Ok(())
    }

    /// Reads the value stored under `key`.
    ///
    /// An expired key is purged on the spot - expiry entry and index
    /// entry removed, tombstone appended best-effort - and reported as
    /// `KeyNotFound`.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the key is absent or expired; read errors from
    /// the owning segment in key-only mode.
    pub fn get(&self, key: &[u8]) -> CoreResult<Vec<u8>> {
        self.check_key(key)?;

        loop {
            self.ensure_open()?;

            if !self.expires.read().is_expired(key, unix_now()) {
                return self.read_live(key);
            }
            if self.purge_expired(key) {
                return Err(CoreError::KeyNotFound);
            }
            // Lost a race with an overwrite or a fresh deadline; look again.
        }
    }

    /// Removes `key`.
    ///
    /// If the key is indexed, drops its index and expiry entries and
    /// appends a tombstone so the deletion survives restart. Removing an
    /// absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Key validation errors, or an I/O failure appending the tombstone.
    pub fn remove(&self, key: &[u8]) -> CoreResult<()> {
        self.check_key(key)?;
        self.ensure_open()?;

        let mut set = self.segments.lock();
        if self.index.write().remove(key).is_some() {
            self.expires.write().remove(key);
            let tombstone = Record::tombstone(key.to_vec());
            self.append_record(&mut set, &tombstone)?;
        }
        Ok(())
    }

    /// Sets `key` to expire `seconds` from now.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the key is not indexed.
    pub fn expire(&self, key: &[u8], seconds: u64) -> CoreResult<()> {
        self.check_key(key)?;
        self.ensure_open()?;

        let index = self.index.read();
        if index.find(key).is_none() {
            return Err(CoreError::KeyNotFound);
        }
        self.expires
            .write()
            .set(key.to_vec(), unix_now().saturating_add(seconds));
        Ok(())
    }

    /// Returns the seconds remaining until `key` expires.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the key is not indexed, `KeyIsPermanent` if it
    /// has no deadline, `KeyHasExpired` if the deadline already passed.
    pub fn ttl(&self, key: &[u8]) -> CoreResult<u64> {
        self.check_key(key)?;
        self.ensure_open()?;

        let index = self.index.read();
        index.find(key).ok_or(CoreError::KeyNotFound)?;
        let deadline = self
            .expires
            .read()
            .deadline(key)
            .ok_or(CoreError::KeyIsPermanent)?;

        let now = unix_now();
        if now >= deadline {
            return Err(CoreError::KeyHasExpired);
        }
        Ok(deadline - now)
    }

    /// Flushes the active segment to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `EngineClosed` after close, or the underlying I/O error.
    pub fn sync(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let mut set = self.segments.lock();
        match set.active.as_mut() {
            Some(active) => active.sync(),
            None => Err(CoreError::EngineClosed),
        }
    }

    /// Persists the expiry table, closes the active segment with a final
    /// sync, and releases all segment handles.
    ///
    /// Idempotent: calling `close` on a closed engine is a no-op. The
    /// engine also closes itself when dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the expiry table cannot be saved or the final
    /// sync fails; the engine stays open in that case so the call can be
    /// retried.
    pub fn close(&self) -> CoreResult<()> {
        let mut set = self.segments.lock();
        if set.active.is_none() {
            return Ok(());
        }

        self.expires.read().save(&self.expiry_path())?;

        if let Some(active) = set.active.take() {
            active.close(true)?;
        }
        set.archived.clear();
        self.closed.store(true, Ordering::Release);

        tracing::debug!(dir = %self.config.dir_path.display(), "engine closed");
        Ok(())
    }

    /// Returns the engine's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Appends `record` to the active segment, rotating to a fresh
    /// segment first when the active one would overflow the block size.
    ///
    /// Returns the segment id and offset the record was written at.
    /// The caller holds the segment-set lock, which makes the
    /// check-then-rotate sequence atomic across threads.
    pub(crate) fn append_record(
        &self,
        set: &mut SegmentSet,
        record: &Record,
    ) -> CoreResult<(u32, u64)> {
        let size = record.encoded_size();

        let needs_rotation = match &set.active {
            Some(active) => active.write_pos() + size > self.config.block_size,
            None => return Err(CoreError::EngineClosed),
        };

        if needs_rotation {
            if let Some(active) = set.active.as_mut() {
                active.sync()?;
            }
            if let Some(old) = set.active.take() {
                set.archived.insert(old.id(), old);
            }

            let new_id = set.active_id + 1;
            let fresh = SegmentFile::open(
                &self.config.dir_path,
                new_id,
                self.config.io_mode,
                self.config.block_size,
            )?;
            set.active = Some(fresh);
            set.active_id = new_id;
            tracing::debug!(segment = new_id, "rotated active segment");
        }

        let Some(active) = set.active.as_mut() else {
            return Err(CoreError::EngineClosed);
        };
        let offset = active.write(record)?;
        if self.config.sync_on_write {
            active.sync()?;
        }
        Ok((set.active_id, offset))
    }

    /// Reads the record an index entry points at, resolving the owning
    /// segment (active or archived) by id.
    pub(crate) fn read_entry(set: &SegmentSet, entry: &IndexEntry) -> CoreResult<Record> {
        let segment = if entry.segment_id == set.active_id {
            set.active.as_ref().ok_or(CoreError::EngineClosed)?
        } else {
            set.archived
                .get(&entry.segment_id)
                .ok_or(CoreError::KeyNotFound)?
        };
        segment.read(entry.offset)
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::EngineClosed);
        }
        Ok(())
    }

    fn expiry_path(&self) -> PathBuf {
        self.config.dir_path.join(EXPIRES_FILE)
    }

    fn check_key(&self, key: &[u8]) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::EmptyKey);
        }
        if key.len() > self.config.max_key_size as usize {
            return Err(CoreError::KeyTooLarge {
                size: key.len(),
                max: self.config.max_key_size,
            });
        }
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> CoreResult<()> {
        if value.len() > self.config.max_value_size as usize {
            return Err(CoreError::ValueTooLarge {
                size: value.len(),
                max: self.config.max_value_size,
            });
        }
        Ok(())
    }

    /// Resolves a non-expired key through the index.
    fn read_live(&self, key: &[u8]) -> CoreResult<Vec<u8>> {
        let entry = self
            .index
            .read()
            .find(key)
            .cloned()
            .ok_or(CoreError::KeyNotFound)?;

        match entry.value {
            Some(DomainValue::Str(value)) => Ok(value),
            None => {
                let set = self.segments.lock();
                let record = Self::read_entry(&set, &entry)?;
                Ok(record.value)
            }
        }
    }

    /// Removes an expired key's expiry and index entries and appends a
    /// tombstone so the deletion survives restart.
    ///
    /// Returns false if the deadline vanished or moved in the meantime
    /// (the caller should re-resolve the key).
    fn purge_expired(&self, key: &[u8]) -> bool {
        let mut set = self.segments.lock();
        let mut index = self.index.write();
        let mut expires = self.expires.write();

        if !expires.is_expired(key, unix_now()) {
            return false;
        }
        expires.remove(key);

        if index.remove(key).is_some() {
            drop(expires);
            drop(index);

            // Best effort: the read already has its definitive answer, so
            // a failed tombstone append is logged and swallowed.
            let tombstone = Record::tombstone(key.to_vec());
            if let Err(error) = self.append_record(&mut set, &tombstone) {
                tracing::warn!(%error, "expiry tombstone append failed");
            }
        }
        true
    }

    /// Rebuilds the index by replaying every segment in ascending id
    /// order. Later records for a key overwrite earlier ones, which the
    /// ascending-id, ascending-offset walk guarantees.
    fn replay(&self) -> CoreResult<()> {
        let mut set = self.segments.lock();
        let mut index = self.index.write();
        let set = &mut *set;

        for segment in set.archived.values_mut() {
            self.replay_segment(&mut index, segment)?;
        }
        if let Some(active) = set.active.as_mut() {
            self.replay_segment(&mut index, active)?;
        }
        Ok(())
    }

    /// Walks one segment from offset 0, feeding each record into the
    /// index, and records the logical end as the segment's write position.
    fn replay_segment(
        &self,
        index: &mut SkipList<IndexEntry>,
        segment: &mut SegmentFile,
    ) -> CoreResult<()> {
        let mut offset = 0u64;

        while offset <= self.config.block_size {
            match segment.read(offset) {
                Ok(record) => {
                    let size = record.encoded_size();
                    self.apply_record(index, segment.id(), offset, record);
                    offset += size;
                }
                Err(CoreError::EndOfSegment) => break,
                Err(e) => return Err(e),
            }
        }

        segment.set_write_pos(offset);
        Ok(())
    }

    /// The index-rebuild switch: set records insert, tombstones remove.
    fn apply_record(
        &self,
        index: &mut SkipList<IndexEntry>,
        segment_id: u32,
        offset: u64,
        record: Record,
    ) {
        match record.record_type {
            RecordType::Str => match record.operation {
                Operation::Set => {
                    let size = record.encoded_size();
                    let cached = (self.config.index_mode == IndexMode::KeyValue)
                        .then(|| DomainValue::Str(record.value));
                    index.insert(
                        record.key,
                        IndexEntry {
                            segment_id,
                            size,
                            offset,
                            value: cached,
                        },
                    );
                }
                Operation::Remove => {
                    index.remove(&record.key);
                }
            },
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(%error, "close on drop failed");
        }
    }
}

/// Current unix time in seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_engine(dir: &std::path::Path) -> Engine {
        Engine::open(Config::new(dir)).unwrap()
    }

    #[test]
    fn set_then_get() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        engine.set(b"k", b"v").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn get_missing_key() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        assert!(matches!(engine.get(b"nope"), Err(CoreError::KeyNotFound)));
    }

    #[test]
    fn overwrite_is_idempotent() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        engine.set(b"k", b"v1").unwrap();
        engine.set(b"k", b"v2").unwrap();

        assert_eq!(engine.get(b"k").unwrap(), b"v2");
        assert_eq!(engine.index.read().len(), 1);
    }

    #[test]
    fn remove_hides_key() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        engine.set(b"k", b"v").unwrap();
        engine.remove(b"k").unwrap();

        assert!(matches!(engine.get(b"k"), Err(CoreError::KeyNotFound)));
    }

    #[test]
    fn remove_absent_key_is_noop() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        engine.remove(b"ghost").unwrap();
    }

    #[test]
    fn key_validation() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        assert!(matches!(engine.get(b""), Err(CoreError::EmptyKey)));
        assert!(matches!(
            engine.set(&[0u8; 200], b"v"),
            Err(CoreError::KeyTooLarge { .. })
        ));
        assert!(matches!(
            engine.set(b"k", &vec![0u8; 2048]),
            Err(CoreError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn expire_unknown_key() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        assert!(matches!(
            engine.expire(b"nope", 10),
            Err(CoreError::KeyNotFound)
        ));
    }

    #[test]
    fn ttl_variants() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        assert!(matches!(engine.ttl(b"nope"), Err(CoreError::KeyNotFound)));

        engine.set(b"forever", b"v").unwrap();
        assert!(matches!(
            engine.ttl(b"forever"),
            Err(CoreError::KeyIsPermanent)
        ));

        engine.set(b"soon", b"v").unwrap();
        engine.expire(b"soon", 60).unwrap();
        let remaining = engine.ttl(b"soon").unwrap();
        assert!(remaining > 0 && remaining <= 60);
    }

    #[test]
    fn overwrite_clears_expiry() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        engine.set(b"k", b"v1").unwrap();
        engine.expire(b"k", 60).unwrap();
        engine.set(b"k", b"v2").unwrap();

        assert!(matches!(engine.ttl(b"k"), Err(CoreError::KeyIsPermanent)));
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        engine.set(b"k", b"v").unwrap();
        engine.close().unwrap();
        engine.close().unwrap();

        assert!(matches!(engine.get(b"k"), Err(CoreError::EngineClosed)));
        assert!(matches!(engine.set(b"k", b"v"), Err(CoreError::EngineClosed)));
        assert!(matches!(engine.sync(), Err(CoreError::EngineClosed)));
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let _engine = open_engine(dir.path());

        let result = Engine::open(Config::new(dir.path()));
        assert!(matches!(result, Err(CoreError::DatabaseLocked)));
    }

    #[test]
    fn sync_flushes() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        engine.set(b"k", b"v").unwrap();
        engine.sync().unwrap();
    }
}
