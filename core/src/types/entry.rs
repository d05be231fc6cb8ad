use std::fmt;

use serde::{Deserialize, Serialize};

/// One record produced by target firmware into a ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceEntry {
    pub id: u32,
    pub timestamp: u64,
}

impl TraceEntry {
    pub fn new(id: u32, timestamp: u64) -> Self {
        TraceEntry { id, timestamp }
    }
}

/// Output line format: `<id> <timestamp>`.
impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.timestamp)
    }
}

impl From<(u32, u64)> for TraceEntry {
    fn from((id, timestamp): (u32, u64)) -> Self {
        TraceEntry { id, timestamp }
    }
}
