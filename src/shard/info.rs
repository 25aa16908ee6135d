//! Shard statistics data structures

use std::path::PathBuf;

/// Statistics about a single shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardStats {
    /// Shard directory
    pub path: PathBuf,
    /// Number of distinct objects with at least one event
    pub object_count: usize,
    /// Total events held by the shard
    pub event_count: usize,
    /// Size of the shard's event log in bytes
    pub size_bytes: u64,
}

impl ShardStats {
    /// Create new empty stats for a shard directory
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Check if the shard holds no events
    pub fn is_empty(&self) -> bool {
        self.event_count == 0
    }

    /// Calculate the average number of events per object
    pub fn avg_events_per_object(&self) -> f64 {
        if self.object_count == 0 {
            return 0.0;
        }

        self.event_count as f64 / self.object_count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_stats() {
        let mut stats = ShardStats::new("/t/0");
        assert!(stats.is_empty());
        assert_eq!(stats.avg_events_per_object(), 0.0);

        stats.object_count = 2;
        stats.event_count = 5;
        assert!(!stats.is_empty());
        assert_eq!(stats.avg_events_per_object(), 2.5);
    }
}
