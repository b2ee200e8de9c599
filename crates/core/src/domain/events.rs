// Event Fan-out (spec.md 4.7) - the envelope shape published on the
// queue's `events` stream/channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle events recognized by the core (spec.md 4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Added,
    Waiting,
    Active,
    Progress,
    Completed,
    Failed,
    Delayed,
    Stalled,
    Paused,
    Resumed,
    Drained,
    Removed,
    Cleaned,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Waiting => "waiting",
            EventKind::Active => "active",
            EventKind::Progress => "progress",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Delayed => "delayed",
            EventKind::Stalled => "stalled",
            EventKind::Paused => "paused",
            EventKind::Resumed => "resumed",
            EventKind::Drained => "drained",
            EventKind::Removed => "removed",
            EventKind::Cleaned => "cleaned",
        }
    }
}

/// `{event, jobId, ...metadata}` envelope (spec.md 6, Events channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub event: EventKind,
    #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(flatten)]
    pub metadata: Value,
}

impl JobEvent {
    pub fn new(event: EventKind, job_id: impl Into<String>) -> Self {
        Self {
            event,
            job_id: Some(job_id.into()),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn queue_level(event: EventKind) -> Self {
        Self {
            event,
            job_id: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}
