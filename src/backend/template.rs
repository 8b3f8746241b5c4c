//! Deterministic offline reasoning
//!
//! Produces a fixed-shape narrative per agent and a configurable confidence.
//! Used by the CLI when no model server is configured and by tests that need
//! to steer routing through confidence values.

use super::{clamp_confidence, Reasoning, ReasoningBackend, ReasoningRequest};
use crate::errors::Result;
use crate::types::AgentKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TemplateBackend {
    default_confidence: f64,
    overrides: HashMap<AgentKind, f64>,
    latency: Option<Duration>,
}

impl Default for TemplateBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateBackend {
    pub fn new() -> Self {
        Self {
            default_confidence: 0.8,
            overrides: HashMap::new(),
            latency: None,
        }
    }

    pub fn with_default_confidence(mut self, confidence: f64) -> Self {
        self.default_confidence = clamp_confidence(confidence);
        self
    }

    /// Report `confidence` for every call made on behalf of `agent`
    pub fn with_confidence(mut self, agent: AgentKind, confidence: f64) -> Self {
        self.overrides.insert(agent, clamp_confidence(confidence));
        self
    }

    /// Sleep before answering, simulating a slow model
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn narrative(agent: AgentKind, prompt: &str) -> String {
        let focus = prompt
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim();
        match agent {
            AgentKind::Triage => format!("Urgency reviewed against reported symptoms. {}", focus),
            AgentKind::Diagnosis => {
                format!("Differential ranked by symptom overlap. {}", focus)
            }
            AgentKind::Treatment => format!(
                "Plan checked against current medications; confirm with a prescriber. {}",
                focus
            ),
            AgentKind::Research => format!("Evidence summarised from ranked sources. {}", focus),
            AgentKind::SpecialistRouter => {
                format!("Referral chosen from accumulated findings. {}", focus)
            }
        }
    }
}

#[async_trait]
impl ReasoningBackend for TemplateBackend {
    fn name(&self) -> &str {
        "template"
    }

    async fn reason(&self, request: &ReasoningRequest) -> Result<Reasoning> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let confidence = self
            .overrides
            .get(&request.agent)
            .copied()
            .unwrap_or(self.default_confidence);
        Ok(Reasoning::new(
            Self::narrative(request.agent, &request.prompt),
            confidence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn request(agent: AgentKind) -> ReasoningRequest {
        ReasoningRequest {
            agent,
            prompt: "Assess chest pain".to_string(),
            context: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_default_confidence() {
        let backend = TemplateBackend::new();
        let out = backend.reason(&request(AgentKind::Triage)).await.unwrap();
        assert_eq!(out.confidence, 0.8);
        assert!(out.text.contains("Assess chest pain"));
    }

    #[tokio::test]
    async fn test_per_agent_override() {
        let backend = TemplateBackend::new().with_confidence(AgentKind::Diagnosis, 0.2);
        let diag = backend.reason(&request(AgentKind::Diagnosis)).await.unwrap();
        let tri = backend.reason(&request(AgentKind::Triage)).await.unwrap();
        assert_eq!(diag.confidence, 0.2);
        assert_eq!(tri.confidence, 0.8);
    }
}
