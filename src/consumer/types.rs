//! Core data structures for the event consumer

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single event fetched from a remote source
///
/// Immutable once constructed. `id` is local to the source and expected to
/// ascend, but sources do not guarantee it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: i64,
    source_name: String,
    payload: Map<String, Value>,
}

impl Event {
    pub fn new(id: i64, source_name: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id,
            source_name: source_name.into(),
            payload,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Raw entry as returned by the source (including its `id` field)
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }
}

/// One configured remote feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: String,
}

/// Result of one committed fetch for a source
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchSummary {
    /// Events returned by the source (after malformed entries were dropped)
    pub fetched: usize,
    /// Events written to storage (`id > cursor_before`)
    pub stored: usize,
    /// Ids skipped as out-of-order or duplicate, in the order received
    pub dropped_ids: Vec<i64>,
    pub cursor_before: i64,
    pub cursor_after: i64,
}

impl BatchSummary {
    pub fn cursor_advanced(&self) -> bool {
        self.cursor_after > self.cursor_before
    }
}

/// What happened to one source during one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// Last attempt was too recent; nothing was touched
    RateLimited,
    /// Another holder owns `lock_key`
    LockContended { lock_key: String },
    /// The lock backend could not be reached; treated like contention
    LockUnavailable { lock_key: String, reason: String },
    /// Fetch and store finished (possibly with zero events)
    Committed(BatchSummary),
    /// Fetch or store failed; the cursor is unchanged unless storage had already
    /// accepted part of the batch
    Failed { error: String },
    /// Shutdown was requested while this source was in flight
    Cancelled,
}

impl SourceOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, SourceOutcome::Committed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SourceOutcome::Failed { .. })
    }
}

/// Per-source outcomes of a single round, in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub outcomes: Vec<(String, SourceOutcome)>,
    /// True when shutdown stopped the round before every source was visited
    pub cancelled: bool,
}

impl RoundReport {
    pub fn outcome(&self, source_name: &str) -> Option<&SourceOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == source_name)
            .map(|(_, outcome)| outcome)
    }

    pub fn committed_count(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_committed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_failed()).count()
    }
}
