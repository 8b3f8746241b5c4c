//! A2A envelope and payload types

use crate::context::{Findings, RiskLevel};
use crate::types::{AgentKind, ConsultationId, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deduplication key: `(consultation_id, sequence)`
///
/// Sequences are assigned per consultation, starting at 1, in issuance order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub consultation_id: ConsultationId,
    pub sequence: u64,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.consultation_id, self.sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum A2aPayload {
    /// Red flags raised during assessment, read by downstream agents
    RedFlags {
        flags: Vec<String>,
        risk_level: RiskLevel,
    },
    /// Intermediate findings shared with peers
    Findings { findings: Findings },
    TaskStatus { task_id: TaskId, status: TaskStatus },
    /// Ask another agent for input
    Request { to: AgentKind, question: String },
    Notification { text: String },
}

impl A2aPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            A2aPayload::RedFlags { .. } => "red_flags",
            A2aPayload::Findings { .. } => "findings",
            A2aPayload::TaskStatus { .. } => "task_status",
            A2aPayload::Request { .. } => "request",
            A2aPayload::Notification { .. } => "notification",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub key: IdempotencyKey,
    /// Publishing agent; `None` for the orchestrator
    pub from: Option<AgentKind>,
    pub payload: A2aPayload,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn sequence(&self) -> u64 {
        self.key.sequence
    }

    /// Red flags carried by this envelope, if any
    pub fn red_flags(&self) -> &[String] {
        match &self.payload {
            A2aPayload::RedFlags { flags, .. } => flags,
            _ => &[],
        }
    }

    pub fn findings(&self) -> Option<&Findings> {
        match &self.payload {
            A2aPayload::Findings { findings } => Some(findings),
            _ => None,
        }
    }
}
