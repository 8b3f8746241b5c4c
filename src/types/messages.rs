//! Message types for consultation transcripts
//!
//! Defines who speaks in a consultation, which specialist agent answered,
//! and how a caller classifies an incoming message for routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a transcript message
pub type MessageId = String;

/// Specialist agent roles known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Triage,
    Diagnosis,
    Treatment,
    Research,
    SpecialistRouter,
}

impl AgentKind {
    /// Every agent kind, in pipeline order
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Triage,
        AgentKind::Diagnosis,
        AgentKind::Treatment,
        AgentKind::Research,
        AgentKind::SpecialistRouter,
    ];

    /// Stable identifier used in config keys, audit payloads and bus names
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Triage => "triage",
            AgentKind::Diagnosis => "diagnosis",
            AgentKind::Treatment => "treatment",
            AgentKind::Research => "research",
            AgentKind::SpecialistRouter => "specialist_router",
        }
    }

    /// Parse an identifier produced by [`AgentKind::as_str`]
    pub fn parse(value: &str) -> Option<Self> {
        AgentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value.trim().to_lowercase())
    }

    /// Human readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentKind::Triage => "Triage",
            AgentKind::Diagnosis => "Diagnosis",
            AgentKind::Treatment => "Treatment",
            AgentKind::Research => "Research",
            AgentKind::SpecialistRouter => "Specialist Router",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Patient,
    Agent,
    System,
}

/// Caller-supplied classification of a message, used as a routing hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Free-form question; routed by context and keywords
    #[default]
    Query,
    /// New or changed symptoms
    Symptom,
    /// Patient reports an emergency
    Emergency,
    Diagnosis,
    Treatment,
    Research,
    Referral,
    /// Several specialists answer independently, then the router reconciles
    SecondOpinion,
    /// Triage, diagnosis, treatment and referral in sequence
    FullAssessment,
    FollowUp,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Query => "query",
            MessageType::Symptom => "symptom",
            MessageType::Emergency => "emergency",
            MessageType::Diagnosis => "diagnosis",
            MessageType::Treatment => "treatment",
            MessageType::Research => "research",
            MessageType::Referral => "referral",
            MessageType::SecondOpinion => "second_opinion",
            MessageType::FullAssessment => "full_assessment",
            MessageType::FollowUp => "follow_up",
        }
    }
}

/// One entry of a consultation transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Position in the transcript, strictly increasing per consultation
    pub sequence: u64,
    pub role: SenderRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Responding agent, for agent messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
}
