//! Snapshot persistence configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DbError, Result};

/// Where, how often and how deep one database's snapshots are kept.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub database_name: String,
    pub dump_directory: PathBuf,
    /// Dump files are named `{prefix}_{yyyyMMdd_HHmmss}.json.gz`.
    pub dump_file_prefix: String,
    pub enable_automatic_snapshots: bool,
    pub snapshot_interval: Duration,
    pub max_snapshot_history: usize,
    pub auto_restore_latest_dump: bool,
}

impl SnapshotConfig {
    pub fn new(database_name: impl Into<String>, dump_directory: impl Into<PathBuf>) -> Self {
        let database_name = database_name.into();
        Self {
            dump_file_prefix: database_name.clone(),
            database_name,
            dump_directory: dump_directory.into(),
            enable_automatic_snapshots: true,
            snapshot_interval: Duration::from_secs(300),
            max_snapshot_history: 10,
            auto_restore_latest_dump: false,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.dump_file_prefix = prefix.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_snapshot_history = max;
        self
    }

    pub fn with_automatic_snapshots(mut self, enabled: bool) -> Self {
        self.enable_automatic_snapshots = enabled;
        self
    }

    pub fn with_auto_restore(mut self, enabled: bool) -> Self {
        self.auto_restore_latest_dump = enabled;
        self
    }

    /// Checked when the configuration is registered with the manager and
    /// when a snapshot worker is started.
    pub fn validate(&self) -> Result<()> {
        if self.database_name.trim().is_empty() {
            return Err(DbError::InvalidArgument("snapshot config without database name".into()));
        }
        if self.dump_file_prefix.trim().is_empty() {
            return Err(DbError::InvalidArgument("snapshot config without file prefix".into()));
        }
        if self.snapshot_interval.is_zero() {
            return Err(DbError::InvalidArgument("snapshot interval must be greater than zero".into()));
        }
        if self.max_snapshot_history < 1 {
            return Err(DbError::InvalidArgument("snapshot history must keep at least one file".into()));
        }
        Ok(())
    }
}
