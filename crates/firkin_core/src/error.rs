//! Error types for the firkin engine.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in firkin engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] firkin_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The key is empty.
    #[error("key is empty")]
    EmptyKey,

    /// The key exceeds the configured maximum size.
    #[error("key too large: {size} bytes exceeds maximum {max}")]
    KeyTooLarge {
        /// Size of the rejected key.
        size: usize,
        /// Configured maximum key size.
        max: u32,
    },

    /// The value exceeds the configured maximum size.
    #[error("value too large: {size} bytes exceeds maximum {max}")]
    ValueTooLarge {
        /// Size of the rejected value.
        size: usize,
        /// Configured maximum value size.
        max: u32,
    },

    /// The key is not present in the index.
    #[error("key not found")]
    KeyNotFound,

    /// The key has no expiration set.
    #[error("key is permanent")]
    KeyIsPermanent,

    /// The key's expiration deadline has already passed.
    #[error("key has expired")]
    KeyHasExpired,

    /// A record could not be encoded (empty key or malformed fields).
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the rejected record.
        message: String,
    },

    /// A record with no key was handed to the write path.
    #[error("empty record")]
    EmptyRecord,

    /// Checksum mismatch detected while reading a record.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record header.
        expected: u32,
        /// Checksum recomputed from the value bytes.
        actual: u32,
    },

    /// Reached the logical end of a segment.
    ///
    /// This is a control signal used by the replay and compaction loops to
    /// stop scanning a segment; it is not a user-facing failure.
    #[error("end of segment")]
    EndOfSegment,

    /// The archived segment count is below the compaction threshold.
    #[error("archived segment count {count} below rewrite threshold {threshold}")]
    BelowRewriteThreshold {
        /// Current number of archived segments.
        count: usize,
        /// Configured rewrite threshold.
        threshold: usize,
    },

    /// Another process holds the data directory lock.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// The engine has been closed.
    #[error("engine is closed")]
    EngineClosed,
}

impl CoreError {
    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }
}
