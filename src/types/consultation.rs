//! Consultation aggregate: identity, status and ordered transcript

use super::messages::{AgentKind, Message, MessageType, SenderRole};
use super::patient::PatientContext;
use crate::workflow::ConsultationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a consultation
pub type ConsultationId = String;

/// One patient encounter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consultation {
    pub id: ConsultationId,
    pub patient_context: PatientContext,
    pub status: ConsultationStatus,
    /// Set when an agent result could not be trusted and a clinician must
    /// look; stays set until the review is acknowledged
    pub needs_human_review: bool,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    next_sequence: u64,
}

impl Consultation {
    /// Create a consultation in the `Created` status
    pub fn new(id: impl Into<ConsultationId>, patient_context: PatientContext) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            patient_context,
            status: ConsultationStatus::Created,
            needs_human_review: false,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            next_sequence: 1,
        }
    }

    /// Append a transcript entry with the next sequence number
    pub fn append(
        &mut self,
        role: SenderRole,
        content: impl Into<String>,
        agent: Option<AgentKind>,
        message_type: Option<MessageType>,
    ) -> &Message {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            sequence: self.next_sequence,
            role,
            content: content.into(),
            timestamp: Utc::now(),
            agent,
            message_type,
        };
        self.next_sequence += 1;
        self.touch();
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    pub fn set_status(&mut self, status: ConsultationStatus) {
        self.status = status;
        self.touch();
    }

    pub fn flag_for_review(&mut self) {
        self.needs_human_review = true;
        self.touch();
    }

    /// Returns whether a review was outstanding
    pub fn clear_review(&mut self) -> bool {
        let outstanding = std::mem::take(&mut self.needs_human_review);
        if outstanding {
            self.touch();
        }
        outstanding
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Most recent message written by an agent
    pub fn last_agent_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == SenderRole::Agent)
    }

    /// Number of turns taken by the patient
    pub fn patient_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == SenderRole::Patient)
            .count()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_strictly_increasing() {
        let mut c = Consultation::new("c-1", PatientContext::default());
        c.append(SenderRole::Patient, "hello", None, Some(MessageType::Query));
        c.append(SenderRole::Agent, "hi", Some(AgentKind::Triage), None);
        c.append(SenderRole::System, "note", None, None);

        let seqs: Vec<u64> = c.messages.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(c.patient_turns(), 1);
        assert_eq!(c.last_agent_message().unwrap().content, "hi");
    }

    #[test]
    fn test_review_flag_sticks_until_cleared() {
        let mut c = Consultation::new("c-1", PatientContext::new());
        assert!(!c.clear_review());

        c.flag_for_review();
        c.flag_for_review();
        assert!(c.needs_human_review);
        assert!(c.clear_review());
        assert!(!c.needs_human_review);
        assert!(!c.clear_review());
    }

    #[test]
    fn test_new_consultation_is_created() {
        let c = Consultation::new("c-2", PatientContext::default());
        assert_eq!(c.status, ConsultationStatus::Created);
        assert!(!c.needs_human_review);
        assert!(!c.is_terminal());
    }

    #[test]
    fn test_serde_preserves_sequence_counter() {
        let mut c = Consultation::new("c-3", PatientContext::default());
        c.append(SenderRole::Patient, "one", None, None);
        let json = serde_json::to_string(&c).unwrap();
        let mut restored: Consultation = serde_json::from_str(&json).unwrap();
        let next = restored.append(SenderRole::Patient, "two", None, None);
        assert_eq!(next.sequence, 2);
    }
}
