//! Persisted consultation record

use crate::context::SessionContext;
use crate::orchestrator::routing::RoutingDecision;
use crate::orchestrator::tasks::TaskBoard;
use crate::types::{Consultation, ContinueResponse, HistoryView, PatientContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const REVIEW_FOLLOWUP: &str = "A clinician will review this consultation";

/// Everything the orchestrator keeps for one consultation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationRecord {
    pub consultation: Consultation,
    pub context: SessionContext,
    #[serde(default)]
    pub tasks: TaskBoard,
    /// First response per idempotency key
    #[serde(default)]
    pub responses: BTreeMap<String, ContinueResponse>,
    #[serde(default)]
    pub routing_log: Vec<RoutingDecision>,
    /// Next steps from the most recent agent answer
    #[serde(default)]
    pub followup: Vec<String>,
    pub session_token: String,
}

impl ConsultationRecord {
    pub fn new(
        id: impl Into<String>,
        patient: PatientContext,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            consultation: Consultation::new(id, patient.clone()),
            context: SessionContext::new(patient),
            tasks: TaskBoard::new(),
            responses: BTreeMap::new(),
            routing_log: Vec::new(),
            followup: Vec::new(),
            session_token: session_token.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.consultation.id
    }

    /// One-paragraph summary of what is known so far
    pub fn summary(&self) -> String {
        let findings = &self.context.findings;
        let mut parts = vec![format!(
            "{} turns, status {}",
            self.consultation.patient_turns(),
            self.consultation.status.display_name()
        )];

        if let Some(risk) = findings.risk_level() {
            parts.push(format!("risk {}", risk));
        }
        if !findings.red_flags.is_empty() {
            parts.push(format!(
                "red flags: {}",
                findings.red_flags.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        if let Some(primary) = findings.primary_diagnosis() {
            parts.push(format!(
                "working diagnosis {} ({}%)",
                primary.condition, primary.likelihood_pct
            ));
        }
        if !findings.treatments.is_empty() {
            parts.push(format!("{} treatment items", findings.treatments.len()));
        }
        if let Some(referral) = findings.referrals.iter().next() {
            parts.push(format!("referral {}", referral));
        }
        if self.consultation.needs_human_review {
            parts.push("flagged for human review".to_string());
        }
        parts.join("; ")
    }

    pub fn recommended_followup(&self) -> Vec<String> {
        let mut followup = self.followup.clone();
        for clarification in &self.context.findings.clarifications {
            if !followup.contains(clarification) {
                followup.push(clarification.clone());
            }
        }
        if self.consultation.needs_human_review && !followup.iter().any(|f| f == REVIEW_FOLLOWUP) {
            followup.push(REVIEW_FOLLOWUP.to_string());
        }
        followup
    }

    pub fn history_view(&self) -> HistoryView {
        HistoryView {
            consultation_id: self.consultation.id.clone(),
            status: self.consultation.status,
            needs_human_review: self.consultation.needs_human_review,
            messages: self.consultation.messages.clone(),
            summary: self.summary(),
            recommended_followup: self.recommended_followup(),
            created_at: self.consultation.created_at,
            updated_at: self.consultation.updated_at,
        }
    }
}
