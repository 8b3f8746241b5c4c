//! Agent inputs and results

use crate::backend::clamp_confidence;
use crate::bus::{A2aPayload, Envelope};
use crate::context::{DiagnosisFinding, Findings, RiskLevel, TriageLevel};
use crate::types::{AgentKind, ConsultationId, MessageType, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an agent sees for one task
#[derive(Debug, Clone)]
pub struct AgentInput {
    pub task_id: TaskId,
    pub consultation_id: ConsultationId,
    pub message: String,
    pub message_type: MessageType,
    /// Bus messages published by peers since this agent last ran
    pub peer_messages: Vec<Envelope>,
    /// Results of the other members of a consensus group
    pub peer_results: Vec<AgentResult>,
}

impl AgentInput {
    pub fn new(
        task_id: impl Into<TaskId>,
        consultation_id: impl Into<ConsultationId>,
        message: impl Into<String>,
        message_type: MessageType,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            consultation_id: consultation_id.into(),
            message: message.into(),
            message_type,
            peer_messages: Vec::new(),
            peer_results: Vec::new(),
        }
    }

    pub fn with_peer_messages(mut self, messages: Vec<Envelope>) -> Self {
        self.peer_messages = messages;
        self
    }

    pub fn with_peer_results(mut self, results: Vec<AgentResult>) -> Self {
        self.peer_results = results;
        self
    }

    /// Red flags announced by peers on the bus
    pub fn peer_red_flags(&self) -> Vec<String> {
        self.peer_messages
            .iter()
            .flat_map(|e| e.red_flags().iter().cloned())
            .collect()
    }

    /// Findings shared by peers, bus messages and consensus results combined
    pub fn peer_findings(&self) -> Findings {
        let mut merged = Findings::new();
        for findings in self.peer_messages.iter().filter_map(Envelope::findings) {
            merged.merge(findings);
        }
        for result in &self.peer_results {
            merged.merge(&result.findings);
        }
        merged
    }
}

/// Agent-specific structured output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "agent", rename_all = "snake_case")]
pub enum AgentOutput {
    Triage {
        triage_level: TriageLevel,
        risk_level: RiskLevel,
        red_flags: Vec<String>,
    },
    Diagnosis {
        primary: Option<DiagnosisFinding>,
        differential: Vec<DiagnosisFinding>,
    },
    Treatment {
        plan: Vec<String>,
        medications: Vec<String>,
        interactions: Vec<String>,
        major_interaction: bool,
    },
    Research {
        results: Vec<String>,
        deep: bool,
    },
    Routing {
        specialty: Option<String>,
        timeline: Option<String>,
        next_agent: Option<AgentKind>,
        clarification: Option<String>,
    },
}

/// Result of a completed agent task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent: AgentKind,
    pub content: String,
    /// Always within [0, 1]
    pub confidence: f64,
    pub output: AgentOutput,
    /// Delta merged into the session context
    pub findings: Findings,
    pub tools_used: Vec<String>,
    pub next_steps: Vec<String>,
    /// Messages to publish on the bus once the result is committed
    #[serde(default)]
    pub publications: Vec<A2aPayload>,
}

impl AgentResult {
    pub fn new(
        agent: AgentKind,
        content: impl Into<String>,
        confidence: f64,
        output: AgentOutput,
    ) -> Self {
        Self {
            agent,
            content: content.into(),
            confidence: clamp_confidence(confidence),
            output,
            findings: Findings::new(),
            tools_used: Vec::new(),
            next_steps: Vec::new(),
            publications: Vec::new(),
        }
    }

    pub fn with_findings(mut self, findings: Findings) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools_used = tools;
        self
    }

    pub fn with_next_steps(mut self, steps: Vec<String>) -> Self {
        self.next_steps = steps;
        self
    }

    pub fn publish(mut self, payload: A2aPayload) -> Self {
        self.publications.push(payload);
        self
    }

    pub fn meets(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

/// Resumable state of a task parked on a long-running lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub reason: String,
    /// Agent-private state needed by `resume`
    pub state: Value,
    /// Context delta produced before suspending
    pub partial: Findings,
    pub tools_used: Vec<String>,
}

/// Outcome of one agent step
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStep {
    Complete(AgentResult),
    Suspend(Suspension),
}
