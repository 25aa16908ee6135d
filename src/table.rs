//! Tables: a fixed set of tablets behind a hash router
//!
//! A table lives in a root directory holding one numbered subdirectory per
//! tablet (`0`, `1`, … `K-1`) and a `table.json` marker recording the shard
//! count chosen at creation. Every object identifier is routed to exactly one
//! tablet by [`partition_index`](crate::partition::partition_index); the
//! tablet's position in the table is its partition number.

use std::env;
use std::fs;
use std::io;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::identifier::ObjectId;
use crate::metrics::TableMetrics;
use crate::partition;
use crate::shard::{Shard, ShardError, ShardResult, ShardStats, Tablet};

/// Name of the metadata marker in the table root
pub const MARKER_FILE: &str = "table.json";

/// Version of the on-disk table layout
pub const FORMAT_VERSION: u32 = 1;

/// Metadata written to the table root at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMarker {
    /// Layout version
    pub format_version: u32,
    /// Number of tablets created
    pub shard_count: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Statistics about a table
#[derive(Debug, Clone, Default)]
pub struct TableStats {
    /// Number of open tablets
    pub shard_count: usize,
    /// Per-tablet statistics, in partition order
    pub shards: Vec<ShardStats>,
    /// Total number of objects
    pub total_objects: usize,
    /// Total number of events
    pub total_events: usize,
    /// Total size of all event logs in bytes
    pub total_size_bytes: u64,
}

impl TableStats {
    /// Calculate the average number of events per tablet
    pub fn avg_events_per_shard(&self) -> f64 {
        if self.shard_count == 0 {
            return 0.0;
        }

        self.total_events as f64 / self.shard_count as f64
    }
}

/// Shard count to offer callers that have no better choice: the host's
/// available parallelism
pub fn suggested_shard_count() -> NonZeroU32 {
    thread::available_parallelism()
        .ok()
        .and_then(|n| u32::try_from(n.get()).ok())
        .and_then(NonZeroU32::new)
        .unwrap_or(NonZeroU32::MIN)
}

/// A hash-partitioned event table
pub struct Table<S: Shard = Tablet> {
    /// Absolute root directory
    path: PathBuf,
    /// Final path component, for display
    name: String,
    /// Table configuration
    config: TableConfig,
    /// Open tablets in partition order; empty while closed
    shards: Vec<S>,
    /// Metrics collector
    metrics: TableMetrics,
}

impl<S: Shard> Table<S> {
    /// Create a handle for the table at `path` with default configuration
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_config(path, TableConfig::default())
    }

    /// Create a handle for the table at `path` with custom configuration
    pub fn with_config<P: AsRef<Path>>(path: P, config: TableConfig) -> Result<Self> {
        config.validate()?;

        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir()?.join(path)
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            path,
            name,
            config,
            shards: Vec::new(),
            metrics: TableMetrics::new(),
        })
    }

    /// Create the table's directory structure with `shard_count` tablets
    ///
    /// Fails if the root directory already exists. The parent directory must
    /// already exist; only the root and its contents are created. If anything
    /// fails after the root has been created, the whole tree is removed before
    /// the error is returned. The table is not opened.
    pub fn create(&self, shard_count: NonZeroU32) -> Result<()> {
        let mode = self.config.dir_mode;
        self.build_layout(shard_count, |path| make_dir(path, mode))
    }

    fn build_layout<F>(&self, shard_count: NonZeroU32, mut make_shard_dir: F) -> Result<()>
    where
        F: FnMut(&Path) -> io::Result<()>,
    {
        if self.exists() {
            return Err(Error::already_exists(&self.path));
        }

        make_dir(&self.path, self.config.dir_mode).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                Error::already_exists(&self.path)
            } else {
                Error::Io(e)
            }
        })?;

        let guard = RollbackGuard::new(&self.path);

        for index in 0..shard_count.get() {
            make_shard_dir(&self.path.join(index.to_string()))?;
        }
        self.write_marker(shard_count)?;

        guard.disarm();

        info!(table = %self.name, path = ?self.path, shards = shard_count.get(), "Created table");
        Ok(())
    }

    /// Open the table and every tablet found in its root directory
    ///
    /// Tablets are the subdirectories whose names are decimal numbers, taken
    /// in numeric order. Other entries are ignored. If any tablet fails to
    /// open, the others are closed again and the table stays closed.
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            debug!(table = %self.name, "Table already open");
            return Ok(());
        }

        if !self.exists() {
            return Err(Error::not_found(&self.path));
        }

        let start = Instant::now();

        let dirs = discover_shard_dirs(&self.path)?;
        self.check_shard_count(dirs.len())?;

        if dirs.is_empty() {
            warn!(table = %self.name, path = ?self.path, "Table has no shard directories");
            return Ok(());
        }

        let mut shards: Vec<S> = dirs
            .into_iter()
            .map(|dir| S::new(dir, &self.config))
            .collect();

        let results: Vec<ShardResult<()>> = if self.config.parallel_open {
            shards.par_iter_mut().map(|shard| shard.open()).collect()
        } else {
            shards.iter_mut().map(|shard| shard.open()).collect()
        };

        let mut failure = None;
        for (shard, result) in shards.iter().zip(results) {
            if let Err(e) = result {
                warn!(path = ?shard.path(), error = %e, "Failed to open shard");
                failure.get_or_insert(e);
            }
        }

        if let Some(err) = failure {
            close_all(&mut shards);
            return Err(err.into());
        }

        self.shards = shards;

        let duration = start.elapsed();
        if self.config.collect_metrics {
            self.metrics.record_open(duration);
        }

        info!(table = %self.name, shards = self.shards.len(), ?duration, "Opened table");
        Ok(())
    }

    /// Close every tablet and return the table to the closed state
    ///
    /// All tablets are closed even if some fail; the first failure is
    /// returned. Closing a closed table is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }

        let failure = close_all(&mut self.shards);
        self.shards.clear();

        info!(table = %self.name, "Closed table");

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Check if the table's root directory exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Check if the table is open
    pub fn is_open(&self) -> bool {
        !self.shards.is_empty()
    }

    /// Append an event for an object to the tablet that owns it
    pub fn add_event(&self, object_id: &ObjectId, event: &Event) -> Result<()> {
        let start = Instant::now();

        let index = self.route(object_id)?;
        self.shards[index]
            .add_event(object_id, event)
            .map_err(|e| self.note_failure(e.into()))?;

        if self.config.collect_metrics {
            self.metrics.record_write(start.elapsed());
        }
        Ok(())
    }

    /// Retrieve the events recorded for an object
    pub fn get_events(&self, object_id: &ObjectId) -> Result<Vec<Event>> {
        let start = Instant::now();

        let index = self.route(object_id)?;
        let events = self.shards[index]
            .get_events(object_id)
            .map_err(|e| self.note_failure(e.into()))?;

        if self.config.collect_metrics {
            self.metrics.record_read(start.elapsed());
        }
        Ok(events)
    }

    /// Compute the index of the tablet that owns an object
    pub fn partition_index(&self, object_id: &ObjectId) -> Result<u32> {
        self.route(object_id).map(|index| index as u32)
    }

    /// Get statistics about the table
    pub fn stats(&self) -> Result<TableStats> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }

        let mut stats = TableStats {
            shard_count: self.shards.len(),
            ..TableStats::default()
        };

        for shard in &self.shards {
            let shard_stats = shard.stats()?;
            stats.total_objects += shard_stats.object_count;
            stats.total_events += shard_stats.event_count;
            stats.total_size_bytes += shard_stats.size_bytes;
            stats.shards.push(shard_stats);
        }

        Ok(stats)
    }

    /// Read the metadata marker, if the table has one
    pub fn marker(&self) -> Result<Option<TableMarker>> {
        let path = self.path.join(MARKER_FILE);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// Get the table's root directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the table's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the table's configuration
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Get the table's metrics
    pub fn metrics(&self) -> &TableMetrics {
        &self.metrics
    }

    /// Number of open tablets
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Open tablets in partition order
    pub fn shards(&self) -> &[S] {
        &self.shards
    }

    // Internal methods

    /// Resolve the tablet index for an object
    fn route(&self, object_id: &ObjectId) -> Result<usize> {
        let shard_count = u32::try_from(self.shards.len())
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(Error::NotOpen)?;

        let encoded = object_id
            .encode()
            .map_err(|e| self.note_failure(e.into()))?;

        Ok(partition::partition_index(&encoded, shard_count) as usize)
    }

    /// Count a failed routing call
    fn note_failure(&self, err: Error) -> Error {
        if self.config.collect_metrics {
            self.metrics.increment_failures();
        }
        err
    }

    /// Record the shard count in the table root
    fn write_marker(&self, shard_count: NonZeroU32) -> Result<()> {
        let marker = TableMarker {
            format_version: FORMAT_VERSION,
            shard_count: shard_count.get(),
            created_at: Utc::now(),
        };

        let content = serde_json::to_vec_pretty(&marker)?;
        fs::write(self.path.join(MARKER_FILE), content)?;
        Ok(())
    }

    /// Compare the discovered tablet count against the marker
    fn check_shard_count(&self, found: usize) -> Result<()> {
        let verify = self.config.verify_shard_count;

        match self.marker() {
            Ok(Some(marker)) if marker.shard_count as usize != found => {
                if verify {
                    return Err(Error::ShardCountMismatch {
                        expected: marker.shard_count,
                        found,
                    });
                }
                warn!(
                    table = %self.name,
                    expected = marker.shard_count,
                    found,
                    "Shard directories do not match the recorded shard count; routing will differ"
                );
            }
            Ok(Some(_)) => {}
            Ok(None) if verify => {
                return Err(Error::config(format!(
                    "Cannot verify shard count: {} is missing from {:?}",
                    MARKER_FILE, self.path
                )));
            }
            Ok(None) => {}
            Err(e) if verify => {
                return Err(Error::config(format!(
                    "Cannot verify shard count: unreadable {}: {}",
                    MARKER_FILE, e
                )));
            }
            Err(e) => {
                warn!(table = %self.name, error = %e, "Ignoring unreadable table marker");
            }
        }

        Ok(())
    }
}

impl<S: Shard> Drop for Table<S> {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                warn!(table = %self.name, error = %e, "Error closing table");
            }
        }
    }
}

/// Removes a partially built table root unless disarmed
struct RollbackGuard<'a> {
    root: &'a Path,
    armed: bool,
}

impl<'a> RollbackGuard<'a> {
    fn new(root: &'a Path) -> Self {
        Self { root, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        match fs::remove_dir_all(self.root) {
            Ok(()) => warn!(path = ?self.root, "Removed partially created table"),
            Err(e) => warn!(path = ?self.root, error = %e, "Failed to remove partially created table"),
        }
    }
}

/// Create a single directory with the given permission bits
fn make_dir(path: &Path, mode: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    builder.create(path)
}

/// Check if a directory name denotes a tablet
fn is_shard_dir_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// Ordering key comparing digit strings by numeric value without parsing
fn numeric_key(name: &str) -> (usize, &str) {
    let significant = name.trim_start_matches('0');
    (significant.len(), significant)
}

/// List tablet directories under `root` in numeric order
fn discover_shard_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let file_name = entry.file_name();
        match file_name.to_str() {
            Some(name) if is_shard_dir_name(name) => found.push((name.to_string(), entry.path())),
            _ => {}
        }
    }

    found.sort_by(|a, b| {
        numeric_key(&a.0)
            .cmp(&numeric_key(&b.0))
            .then_with(|| a.0.cmp(&b.0))
    });

    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Close every shard, returning the first failure
fn close_all<S: Shard>(shards: &mut [S]) -> Option<ShardError> {
    let mut failure = None;

    for shard in shards.iter_mut() {
        if let Err(e) = shard.close() {
            warn!(path = ?shard.path(), error = %e, "Failed to close shard");
            failure.get_or_insert(e);
        }
    }

    failure
}
