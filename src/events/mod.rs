//! Mission event stream
//!
//! Every state, score and finding mutation is published as a typed
//! [`MissionEvent`] into the mission's append-only log. Consumers (SSE
//! transport, history polling, the CLI printer) each hold their own
//! [`EventSubscription`] with an independent read offset.

pub mod bus;

pub use bus::{EventBus, EventSubscription};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Status,
    Progress,
    Finding,
    Action,
    Complete,
    Error,
    Heartbeat,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Progress => "progress",
            EventKind::Finding => "finding",
            EventKind::Action => "action",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
            EventKind::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionEvent {
    /// Position in the mission log. Heartbeats repeat the last delivered
    /// sequence number instead of advancing it.
    pub seq: u64,
    pub mission_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Scope of an `error` event that ends the mission.
pub const MISSION_SCOPE: &str = "mission";

impl MissionEvent {
    /// `complete` always closes the stream. `error` closes it unless it is
    /// scoped to a single entity or export record.
    pub fn is_terminal(&self) -> bool {
        match self.kind {
            EventKind::Complete => true,
            EventKind::Error => self
                .data
                .get("scope")
                .and_then(|s| s.as_str())
                .map(|scope| scope == MISSION_SCOPE)
                .unwrap_or(true),
            _ => false,
        }
    }
}
