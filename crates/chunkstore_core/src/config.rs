//! Engine configuration.

use std::path::PathBuf;

/// How `get_file` hands out a finished random-access file.
///
/// One strategy is picked per environment and used for every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaterializeStrategy {
    /// Export the backing handle itself.
    #[default]
    Direct,
    /// Copy the finished bytes into a file under the temporary directory.
    CopyThroughTemp,
    /// Read the finished bytes once and cache them under a derived handle name.
    Snapshot,
}

/// Configuration for a storage instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Finished-file materialization strategy.
    pub materialize: MaterializeStrategy,

    /// Directory for copy-through-temp files.
    pub temp_dir: PathBuf,

    /// Whether to sync the backing handle after every persist.
    pub sync_on_persist: bool,

    /// Number of error events buffered for slow subscribers.
    pub error_channel_capacity: usize,

    /// Suffix appended to the storage id to name the backing handle.
    pub file_suffix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            materialize: MaterializeStrategy::Direct,
            temp_dir: std::env::temp_dir(),
            sync_on_persist: true,
            error_channel_capacity: 1024,
            file_suffix: ".part".to_string(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the materialization strategy.
    #[must_use]
    pub const fn materialize(mut self, strategy: MaterializeStrategy) -> Self {
        self.materialize = strategy;
        self
    }

    /// Sets the directory used for copy-through-temp files.
    #[must_use]
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Sets whether to sync after every persist.
    #[must_use]
    pub const fn sync_on_persist(mut self, value: bool) -> Self {
        self.sync_on_persist = value;
        self
    }

    /// Sets the error channel capacity. Zero is raised to one.
    #[must_use]
    pub const fn error_channel_capacity(mut self, capacity: usize) -> Self {
        self.error_channel_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Sets the backing handle name suffix.
    #[must_use]
    pub fn file_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.file_suffix = suffix.into();
        self
    }

    /// Name of the backing handle for `storage_id`.
    pub(crate) fn file_name(&self, storage_id: u64) -> String {
        format!("{storage_id}{}", self.file_suffix)
    }

    /// Name of the cached snapshot handle for `storage_id`.
    pub(crate) fn snapshot_name(&self, storage_id: u64) -> String {
        format!("{}.snapshot", self.file_name(storage_id))
    }
}
