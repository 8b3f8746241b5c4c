//! Audit events
//!
//! Every status transition and routing decision yields exactly one
//! [`AuditEvent`]. Events are handed to an [`AuditDispatcher`], which
//! delivers them to an [`AuditSink`] from a background task so emission
//! never blocks a consultation.

pub mod dispatcher;
pub mod sink;

pub use dispatcher::{AuditDispatcher, AuditStats};
pub use sink::{AuditSink, JsonlAuditSink, MemoryAuditSink, TracingAuditSink};

use crate::types::ConsultationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    StatusTransition,
    RoutingDecision,
    HumanReviewRequested,
    HumanReviewCompleted,
    TaskSuspended,
    TaskResumed,
    TaskCancelled,
    PersistenceFailure,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::StatusTransition => "status_transition",
            AuditEventType::RoutingDecision => "routing_decision",
            AuditEventType::HumanReviewRequested => "human_review_requested",
            AuditEventType::HumanReviewCompleted => "human_review_completed",
            AuditEventType::TaskSuspended => "task_suspended",
            AuditEventType::TaskResumed => "task_resumed",
            AuditEventType::TaskCancelled => "task_cancelled",
            AuditEventType::PersistenceFailure => "persistence_failure",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write-once audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub consultation_id: ConsultationId,
    pub event_type: AuditEventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(consultation_id: &str, event_type: AuditEventType, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            consultation_id: consultation_id.to_string(),
            event_type,
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(
            "c-1",
            AuditEventType::StatusTransition,
            json!({"from": "created", "to": "active"}),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "status_transition");
        assert_eq!(json["payload"]["to"], "active");

        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
