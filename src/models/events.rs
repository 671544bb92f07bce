//! Deduplication event types for observability.

use std::fmt;
use std::sync::Arc;

use super::Fingerprint;
use uuid::Uuid;

/// Shared event metadata required for observability.
#[derive(Debug, Clone)]
pub struct EventMeta {
    /// Unique identifier for this event.
    pub event_id: String,
    /// Event source component.
    pub source: &'static str,
    /// Timestamp (Unix epoch seconds).
    pub timestamp: i64,
}

impl EventMeta {
    /// Creates new event metadata using the current timestamp.
    #[must_use]
    pub fn new(source: &'static str) -> Self {
        Self::with_timestamp(source, chrono::Utc::now().timestamp())
    }

    /// Creates new event metadata with a specified timestamp.
    #[must_use]
    pub fn with_timestamp(source: &'static str, timestamp: i64) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            source,
            timestamp,
        }
    }
}

/// What the filter decided for one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupEventKind {
    /// A request was dropped because its key was already seen.
    Suppressed,
    /// A request was passed through.
    Forwarded,
    /// An item was observed and its originating request recorded.
    Recorded,
}

impl DedupEventKind {
    /// Returns the kind as a lowercase string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Suppressed => "suppressed",
            Self::Forwarded => "forwarded",
            Self::Recorded => "recorded",
        }
    }
}

impl fmt::Display for DedupEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-decision event published by the filter.
#[derive(Debug, Clone)]
pub struct DedupEvent {
    /// Event metadata.
    pub meta: EventMeta,
    /// The decision.
    pub kind: DedupEventKind,
    /// Job the decision was made for.
    pub job: Arc<str>,
    /// Seen-set key the decision was made on.
    pub key: Fingerprint,
}

impl DedupEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(kind: DedupEventKind, job: Arc<str>, key: Fingerprint) -> Self {
        Self {
            meta: EventMeta::new("dedup_filter"),
            kind,
            job,
            key,
        }
    }

    /// Returns the event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}
