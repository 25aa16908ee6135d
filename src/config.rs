//! Configuration for tabletdb
//!
//! This module provides configuration options for opening and creating tables.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default permission bits for table and tablet directories (owner only)
pub const DEFAULT_DIR_MODE: u32 = 0o700;

/// Configuration options for a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct TableConfig {
    /// Permission bits for directories created by the table
    pub dir_mode: u32,

    /// Whether tablets fsync after every append
    pub sync_writes: bool,
    /// Whether open() fails when the shard directories disagree with the
    /// shard count recorded at creation
    pub verify_shard_count: bool,

    /// Whether tablets are opened concurrently
    pub parallel_open: bool,

    /// Enable metrics collection
    pub collect_metrics: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            dir_mode: DEFAULT_DIR_MODE,
            sync_writes: false,
            verify_shard_count: false,
            parallel_open: true,
            collect_metrics: true,
        }
    }
}

impl TableConfig {
    /// Create a new table configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the permission bits for created directories
    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    /// Set whether to sync writes to disk immediately
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Set whether open() verifies the recorded shard count
    pub fn with_verify_shard_count(mut self, verify: bool) -> Self {
        self.verify_shard_count = verify;
        self
    }

    /// Set whether tablets are opened concurrently
    pub fn with_parallel_open(mut self, parallel: bool) -> Self {
        self.parallel_open = parallel;
        self
    }

    /// Set whether to collect metrics
    pub fn with_collect_metrics(mut self, collect: bool) -> Self {
        self.collect_metrics = collect;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.dir_mode & !0o777 != 0 {
            return Err(Error::config(format!(
                "Directory mode {:o} has bits outside 0o777",
                self.dir_mode
            )));
        }

        if self.dir_mode & 0o700 != 0o700 {
            return Err(Error::config(format!(
                "Directory mode {:o} must grant the owner read, write and search access",
                self.dir_mode
            )));
        }

        Ok(())
    }

    /// Render the configuration as aligned `key: value` lines
    pub fn to_string_pretty(&self) -> String {
        let rows = [
            ("dir_mode", format!("{:#o}", self.dir_mode)),
            ("sync_writes", self.sync_writes.to_string()),
            ("verify_shard_count", self.verify_shard_count.to_string()),
            ("parallel_open", self.parallel_open.to_string()),
            ("collect_metrics", self.collect_metrics.to_string()),
        ];

        rows.iter()
            .map(|(key, value)| format!("{:<20}{}\n", format!("{}:", key), value))
            .collect()
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("Failed to parse configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }
}
