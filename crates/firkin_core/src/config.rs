//! Engine configuration.

use firkin_storage::IoMode;
use std::path::PathBuf;

/// Default segment file size in bytes.
pub const DEFAULT_BLOCK_SIZE: u64 = 16 * 1024;

/// Default maximum key size in bytes.
pub const DEFAULT_MAX_KEY_SIZE: u32 = 128;

/// Default maximum value size in bytes.
pub const DEFAULT_MAX_VALUE_SIZE: u32 = 1024;

/// Default number of archived segments required before a rewrite runs.
pub const DEFAULT_REWRITE_THRESHOLD: usize = 4;

/// What the in-memory index caches per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Keys and values both live in the index; reads never touch disk.
    #[default]
    KeyValue,
    /// Only keys and record locations live in the index; values are read
    /// from their segment on demand.
    KeyOnly,
}

/// Configuration for opening an engine.
///
/// Segment size, key/value limits, and the rewrite threshold are fixed,
/// explicit values; the engine never tunes them at runtime.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding segment files, the expiry file, and the lock file.
    pub dir_path: PathBuf,

    /// How segment files perform reads and writes.
    pub io_mode: IoMode,

    /// What the index caches per key.
    pub index_mode: IndexMode,

    /// Maximum segment file size before rotation, in bytes.
    pub block_size: u64,

    /// Whether to sync the active segment after every write.
    pub sync_on_write: bool,

    /// Maximum key size in bytes.
    pub max_key_size: u32,

    /// Maximum value size in bytes.
    pub max_value_size: u32,

    /// Number of archived segments required before `rewrite` runs.
    pub rewrite_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("./firkin_data"),
            io_mode: IoMode::File,
            index_mode: IndexMode::KeyValue,
            block_size: DEFAULT_BLOCK_SIZE,
            sync_on_write: false,
            max_key_size: DEFAULT_MAX_KEY_SIZE,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            rewrite_threshold: DEFAULT_REWRITE_THRESHOLD,
        }
    }
}

impl Config {
    /// Creates a configuration with default values rooted at `dir_path`.
    #[must_use]
    pub fn new(dir_path: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir_path.into(),
            ..Self::default()
        }
    }

    /// Sets the I/O mode for segment files.
    #[must_use]
    pub const fn io_mode(mut self, mode: IoMode) -> Self {
        self.io_mode = mode;
        self
    }

    /// Sets what the index caches per key.
    #[must_use]
    pub const fn index_mode(mut self, mode: IndexMode) -> Self {
        self.index_mode = mode;
        self
    }

    /// Sets the maximum segment size before rotation.
    #[must_use]
    pub const fn block_size(mut self, size: u64) -> Self {
        self.block_size = size;
        self
    }

    /// Sets whether to sync the active segment after every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the maximum key size.
    #[must_use]
    pub const fn max_key_size(mut self, size: u32) -> Self {
        self.max_key_size = size;
        self
    }

    /// Sets the maximum value size.
    #[must_use]
    pub const fn max_value_size(mut self, size: u32) -> Self {
        self.max_value_size = size;
        self
    }

    /// Sets the archived segment count required before `rewrite` runs.
    #[must_use]
    pub const fn rewrite_threshold(mut self, count: usize) -> Self {
        self.rewrite_threshold = count;
        self
    }
}
