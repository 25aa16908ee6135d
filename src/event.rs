//! Event records stored in tablets

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A timestamped event attached to an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Event properties
    pub data: BTreeMap<String, Value>,
}

impl Event {
    /// Create an empty event stamped with the current time
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Create an empty event at a given time
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            data: BTreeMap::new(),
        }
    }

    /// Add a property to the event
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Look up a property
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
