use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::block::Block;

/// Tokens used to tell whether the remote resource changed between runs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Progress record persisted after every completed block.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Snapshot {
    pub url: String,
    pub display_name: String,
    pub total_size: u64,
    pub identity: Identity,
    pub completed: Vec<Block>,
}

impl Snapshot {
    pub fn new(url: &str, display_name: &str, total_size: u64, identity: Identity) -> Self {
        Self {
            url: url.to_string(),
            display_name: display_name.to_string(),
            total_size,
            identity,
            completed: vec![],
        }
    }

    /// A stored snapshot is only trusted when it describes the same resource version.
    pub fn matches(&self, total_size: u64, identity: &Identity) -> bool {
        self.total_size == total_size && &self.identity == identity
    }

    /// Every completed block lies inside the resource with `start <= end`.
    pub fn is_well_formed(&self) -> bool {
        self.completed
            .iter()
            .all(|b| b.start <= b.end && b.end < self.total_size)
    }

    pub fn completed_bytes(&self) -> u64 {
        self.completed.iter().map(Block::len).sum()
    }
}
