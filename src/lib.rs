//! tabletdb: a hash-partitioned on-disk event store
//!
//! A [`Table`] is a directory holding a fixed number of tablets, each an
//! independent append-only event log in its own numbered subdirectory. Every
//! object identifier is hashed (FNV-1a 64, condensed to its even bits) and
//! routed to exactly one tablet, so all events for an object live together.
//!
//! ```no_run
//! use std::num::NonZeroU32;
//! use tabletdb::{Event, ObjectId, Table};
//!
//! # fn main() -> tabletdb::Result<()> {
//! let mut table: Table = Table::new("/data/events")?;
//! if !table.exists() {
//!     table.create(NonZeroU32::new(4).unwrap())?;
//! }
//! table.open()?;
//!
//! let user = ObjectId::from("user-42");
//! table.add_event(&user, &Event::new().with_value("action", "login"))?;
//! assert_eq!(table.get_events(&user)?.len(), 1);
//!
//! table.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod identifier;
pub mod metrics;
pub mod partition;
pub mod shard;
pub mod table;

pub use config::TableConfig;
pub use error::{Error, Result};
pub use event::Event;
pub use identifier::{EncodeError, ObjectId};
pub use metrics::TableMetrics;
pub use partition::partition_index;
pub use shard::{Shard, ShardError, ShardStats, Tablet};
pub use table::{suggested_shard_count, Table, TableMarker, TableStats};
