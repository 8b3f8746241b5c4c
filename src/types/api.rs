//! Request and response shapes of the orchestrator's public operations

use super::messages::{AgentKind, Message, MessageId, MessageType};
use super::patient::PatientContext;
use super::task::TaskId;
use crate::errors::{EngineError, Result};
use crate::workflow::ConsultationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opens a consultation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    pub initial_query: String,
    #[serde(default)]
    pub patient_context: PatientContext,
    /// Routing hint for the first turn
    #[serde(default)]
    pub message_type: MessageType,
}

impl StartRequest {
    pub fn new(initial_query: impl Into<String>, patient_context: PatientContext) -> Self {
        Self {
            initial_query: initial_query.into(),
            patient_context,
            message_type: MessageType::default(),
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_query.trim().is_empty() {
            return Err(EngineError::Validation(
                "initial_query must not be empty".to_string(),
            ));
        }
        self.patient_context.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub consultation_id: String,
    /// Opaque token identifying the caller's session
    pub session_token: String,
    pub initial_response: String,
    pub agent_assigned: Option<AgentKind>,
    pub status: ConsultationStatus,
    pub needs_human_review: bool,
    pub pending_task: Option<TaskId>,
    pub timestamp: DateTime<Utc>,
}

/// Adds a turn to an existing consultation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContinueRequest {
    pub message: String,
    #[serde(default)]
    pub message_type: MessageType,
    /// Repeated calls with the same key return the first response unchanged
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Explicit agent entry point, bypassing rule-based routing
    #[serde(default)]
    pub target_agent: Option<AgentKind>,
}

impl ContinueRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_target(mut self, agent: AgentKind) -> Self {
        self.target_agent = Some(agent);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.message.trim().is_empty() {
            return Err(EngineError::Validation(
                "message must not be empty".to_string(),
            ));
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err(EngineError::Validation(
                    "idempotency_key must not be blank".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinueResponse {
    pub message_id: MessageId,
    pub response: String,
    pub agent_responded: Option<AgentKind>,
    pub next_steps: Vec<String>,
    pub confidence_level: f64,
    pub status: ConsultationStatus,
    pub needs_human_review: bool,
    /// Task parked for a later resume
    pub pending_task: Option<TaskId>,
    pub timestamp: DateTime<Utc>,
}

/// Read-only view of a consultation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryView {
    pub consultation_id: String,
    pub status: ConsultationStatus,
    pub needs_human_review: bool,
    pub messages: Vec<Message>,
    pub summary: String,
    pub recommended_followup: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_validation() {
        let req = StartRequest::new("   ", PatientContext::default());
        assert!(matches!(req.validate(), Err(EngineError::Validation(_))));

        let req = StartRequest::new("I have a cough", PatientContext::default());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_continue_request_builder() {
        let req = ContinueRequest::new("what now?")
            .with_type(MessageType::Treatment)
            .with_idempotency_key("k-1");
        assert_eq!(req.message_type, MessageType::Treatment);
        assert_eq!(req.idempotency_key.as_deref(), Some("k-1"));
        assert!(req.validate().is_ok());
        assert!(ContinueRequest::new("hi")
            .with_idempotency_key(" ")
            .validate()
            .is_err());
    }
}
