//! Compaction: rewriting the segment set to contain only live records.
//!
//! `rewrite` walks every segment (the active one folded into the set
//! last, by id), keeps each record only if the index still vouches for
//! it, and packs the survivors into fresh segments under a temporary
//! directory. Only once everything is packed are the old files deleted,
//! the new files renamed into place, and the index repointed - a failure
//! while packing leaves the pre-compaction segment set untouched.

use crate::engine::{Engine, SegmentSet};
use crate::error::{CoreError, CoreResult};
use crate::index::{DomainValue, IndexEntry, SkipList};
use crate::segment::{segment_file_name, Record, SegmentFile};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Working directory for segment rewrites, inside the data directory.
const REWRITE_DIR: &str = "rewrite.tmp";

/// Removes the rewrite working directory when dropped, so the temp space
/// is reclaimed on success and failure alike.
struct RewriteDir {
    path: PathBuf,
}

impl RewriteDir {
    fn create(dir: &Path) -> CoreResult<Self> {
        let path = dir.join(REWRITE_DIR);
        // A crashed rewrite may have left stale files behind; packing must
        // start from an empty directory.
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }
}

impl Drop for RewriteDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// A freshly packed segment: its id and logical length.
struct PackedSegment {
    id: u32,
    len: u64,
}

/// A key whose record moved to a new segment during the rewrite.
struct Relocation {
    key: Vec<u8>,
    segment_id: u32,
    offset: u64,
    size: u64,
}

impl Engine {
    /// Rebuilds the segment set, dropping tombstones and superseded
    /// records.
    ///
    /// Compaction is only ever triggered explicitly. It holds the
    /// segment-set lock for its full duration, so writes, `close`, and
    /// other rewrites are excluded while it runs, and readers observe
    /// either the old or the new segment layout - never a mix.
    ///
    /// # Errors
    ///
    /// Returns `BelowRewriteThreshold` if the archived segment count is
    /// under the configured threshold, or any I/O error. Failures while
    /// packing leave the old segment set in place; a failure between
    /// deleting old files and renaming new ones in is unrecoverable.
    pub fn rewrite(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let mut set = self.segments.lock();

        let threshold = self.config.rewrite_threshold;
        if set.archived.len() < threshold {
            return Err(CoreError::BelowRewriteThreshold {
                count: set.archived.len(),
                threshold,
            });
        }

        let tmp = RewriteDir::create(&self.config.dir_path)?;

        let (packed, relocations) = self.pack_live_records(&set, &tmp.path)?;
        let packed_count = packed.len();

        self.swap_segments(&mut set, packed)?;

        let mut index = self.index.write();
        for r in relocations {
            if let Some(entry) = index.find_mut(&r.key) {
                entry.segment_id = r.segment_id;
                entry.offset = r.offset;
                entry.size = r.size;
            }
        }

        tracing::debug!(segments = packed_count, "rewrite complete");
        Ok(())
    }

    /// Walks every source segment in ascending id order and packs live
    /// records into fresh segments under `tmp`, in encounter order.
    ///
    /// Non-destructive: sources are only read, and the packed files live
    /// in the temp directory until the swap.
    fn pack_live_records(
        &self,
        set: &SegmentSet,
        tmp: &Path,
    ) -> CoreResult<(Vec<PackedSegment>, Vec<Relocation>)> {
        let index = self.index.read();

        let mut packed = Vec::new();
        let mut current: Option<SegmentFile> = None;
        let mut next_id = 0u32;
        let mut relocations = Vec::new();

        // The active segment carries the highest id, so chaining it after
        // the archived set preserves ascending id order.
        let sources = set.archived.values().chain(set.active.as_ref());

        for source in sources {
            let mut offset = 0u64;
            while offset <= self.config.block_size {
                let record = match source.read(offset) {
                    Ok(record) => record,
                    Err(CoreError::EndOfSegment) => break,
                    Err(e) => return Err(e),
                };
                let size = record.encoded_size();

                if self.record_is_live(&index, set, &record)? {
                    let needs_fresh = current
                        .as_ref()
                        .is_none_or(|s| s.write_pos() + size > self.config.block_size);
                    if needs_fresh {
                        if let Some(full) = current.take() {
                            packed.push(PackedSegment {
                                id: full.id(),
                                len: full.write_pos(),
                            });
                            full.close(true)?;
                        }
                        current = Some(SegmentFile::open(
                            tmp,
                            next_id,
                            self.config.io_mode,
                            self.config.block_size,
                        )?);
                        next_id += 1;
                    }

                    if let Some(dest) = current.as_mut() {
                        let new_offset = dest.write(&record)?;
                        relocations.push(Relocation {
                            key: record.key,
                            segment_id: dest.id(),
                            offset: new_offset,
                            size,
                        });
                    }
                }

                offset += size;
            }
        }

        if let Some(full) = current.take() {
            packed.push(PackedSegment {
                id: full.id(),
                len: full.write_pos(),
            });
            full.close(true)?;
        }

        Ok((packed, relocations))
    }

    /// The liveness oracle: a set record survives only if the index's
    /// current value for its key still matches the record's value.
    /// Tombstones and unindexed keys are dead.
    fn record_is_live(
        &self,
        index: &SkipList<IndexEntry>,
        set: &SegmentSet,
        record: &Record,
    ) -> CoreResult<bool> {
        if record.is_tombstone() {
            return Ok(false);
        }
        let Some(entry) = index.find(&record.key) else {
            return Ok(false);
        };

        match &entry.value {
            Some(DomainValue::Str(value)) => Ok(value == &record.value),
            None => {
                // Key-only mode: fetch the indexed value from disk.
                let current = Self::read_entry(set, entry)?;
                Ok(current.value == record.value)
            }
        }
    }

    /// Deletes the old segment files, renames the packed ones into the
    /// data directory (same filesystem, so the rename is atomic), and
    /// repoints the active/archived pointers so the highest-numbered new
    /// segment becomes active.
    fn swap_segments(
        &self,
        set: &mut SegmentSet,
        packed: Vec<PackedSegment>,
    ) -> CoreResult<()> {
        let tmp = self.config.dir_path.join(REWRITE_DIR);

        let mut old = std::mem::take(&mut set.archived);
        if let Some(active) = set.active.take() {
            old.insert(active.id(), active);
        }
        let old_paths: Vec<PathBuf> = old.values().map(|s| s.path().to_path_buf()).collect();
        drop(old);
        for path in old_paths {
            fs::remove_file(&path)?;
        }

        for p in &packed {
            let name = segment_file_name(p.id);
            fs::rename(tmp.join(&name), self.config.dir_path.join(&name))?;
        }

        let mut archived = BTreeMap::new();
        match packed.split_last() {
            None => {
                // Everything was dead; start over from a fresh segment 0.
                set.active = Some(SegmentFile::open(
                    &self.config.dir_path,
                    0,
                    self.config.io_mode,
                    self.config.block_size,
                )?);
                set.active_id = 0;
            }
            Some((last, rest)) => {
                for p in rest {
                    let mut segment = SegmentFile::open(
                        &self.config.dir_path,
                        p.id,
                        self.config.io_mode,
                        self.config.block_size,
                    )?;
                    segment.set_write_pos(p.len);
                    archived.insert(p.id, segment);
                }

                let mut active = SegmentFile::open(
                    &self.config.dir_path,
                    last.id,
                    self.config.io_mode,
                    self.config.block_size,
                )?;
                active.set_write_pos(last.len);
                set.active = Some(active);
                set.active_id = last.id;
            }
        }
        set.archived = archived;

        Ok(())
    }
}
