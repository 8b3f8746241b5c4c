//! Per-consultation session context
//!
//! Agents receive a shared reference and never mutate it. The orchestrator
//! applies deltas after an agent returns, keyed by the task that produced
//! them, so a replayed delta is a no-op.

use super::findings::Findings;
use crate::types::{AgentKind, PatientContext, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Patient profile plus everything the agents have found
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub patient: PatientContext,
    pub findings: Findings,
    /// Keys of deltas already applied
    #[serde(default)]
    applied: BTreeSet<String>,
    /// Agents that have answered at least once
    #[serde(default)]
    pub consulted: BTreeSet<AgentKind>,
}

impl SessionContext {
    /// Seed the context from the patient profile
    pub fn new(patient: PatientContext) -> Self {
        let mut findings = Findings::new();
        findings.symptoms.extend(
            patient
                .symptoms
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
        );
        Self {
            patient,
            findings,
            applied: BTreeSet::new(),
            consulted: BTreeSet::new(),
        }
    }

    /// Merge a delta produced by `task_id`
    ///
    /// Returns false when the delta was already applied.
    pub fn apply(&mut self, task_id: &TaskId, agent: AgentKind, delta: &Findings) -> bool {
        self.apply_keyed(task_id.clone(), delta, Some(agent))
    }

    /// Merge the partial delta a task produced before suspending
    pub fn apply_partial(&mut self, task_id: &TaskId, delta: &Findings) -> bool {
        self.apply_keyed(format!("{}#partial", task_id), delta, None)
    }

    pub fn has_applied(&self, task_id: &TaskId) -> bool {
        self.applied.contains(task_id)
    }

    fn apply_keyed(&mut self, key: String, delta: &Findings, agent: Option<AgentKind>) -> bool {
        if !self.applied.insert(key) {
            return false;
        }
        self.findings.merge(delta);
        if let Some(agent) = agent {
            self.consulted.insert(agent);
        }
        true
    }

    /// All symptoms known so far, patient-reported and extracted
    pub fn symptom_list(&self) -> Vec<String> {
        self.findings.symptoms.iter().cloned().collect()
    }
}
