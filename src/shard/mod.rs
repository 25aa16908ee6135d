//! Tablets: the on-disk partitions of a table
//!
//! A table routes every object to exactly one shard. The [`Shard`] trait is the
//! interface the table needs from a partition; [`Tablet`] is the default
//! implementation, an append-only event log with an in-memory index.

mod error;
mod info;
mod tablet;
mod util;

use std::path::{Path, PathBuf};

use crate::config::TableConfig;
use crate::event::Event;
use crate::identifier::ObjectId;

pub use error::{ShardError, ShardResult};
pub use info::ShardStats;
pub use tablet::Tablet;

/// Magic bytes and version for tablet event logs
pub(crate) const LOG_MAGIC: &[u8; 4] = b"SKYT";
pub(crate) const LOG_VERSION: u32 = 1;

/// A single partition of a table
///
/// Handles are constructed closed over their directory and opened by the
/// table. Routing calls take `&self`; implementations decide how much
/// concurrency they allow.
pub trait Shard: Send + Sync {
    /// Construct a closed handle over a shard directory
    fn new(path: PathBuf, config: &TableConfig) -> Self
    where
        Self: Sized;

    /// Directory backing this shard
    fn path(&self) -> &Path;

    /// Open the shard
    fn open(&mut self) -> ShardResult<()>;

    /// Close the shard. Closing a closed shard is a no-op.
    fn close(&mut self) -> ShardResult<()>;

    /// Whether the shard is open
    fn is_open(&self) -> bool;

    /// Append an event for an object
    fn add_event(&self, object_id: &ObjectId, event: &Event) -> ShardResult<()>;

    /// Events recorded for an object, in shard order
    fn get_events(&self, object_id: &ObjectId) -> ShardResult<Vec<Event>>;

    /// Current statistics
    fn stats(&self) -> ShardResult<ShardStats>;
}
