//! SpecialistRouter: meta-agent for escalation, referral and consensus
//!
//! Picks a specialty from the accumulated findings, suggests which agent
//! should be consulted next, or asks the patient for clarification when
//! nothing is known yet. After a consensus fan-out it also synthesises the
//! members' results.

use super::types::{AgentInput, AgentOutput, AgentResult, AgentStep};
use super::{reasoning_context, Agent, ToolTrail};
use crate::context::{Findings, SessionContext};
use crate::errors::Result;
use crate::tools::implementations::specialists::GENERAL_PRACTICE;
use crate::tools::implementations::{REASONING, SPECIALIST_DIRECTORY};
use crate::tools::ToolRuntime;
use crate::types::AgentKind;
use async_trait::async_trait;
use serde_json::{json, Value};

const CLARIFICATION: &str =
    "Please describe your main symptoms, when they started and how severe they are.";
const CLARIFICATION_FACTOR: f64 = 0.7;
const GENERAL_PRACTICE_FACTOR: f64 = 0.75;

#[derive(Debug, Default)]
pub struct SpecialistRouterAgent;

impl SpecialistRouterAgent {
    pub fn new() -> Self {
        Self
    }

    /// Next agent in the assessment progression, given what is known
    pub fn next_agent(findings: &Findings) -> Option<AgentKind> {
        if !findings.assessed_by(AgentKind::Triage) {
            Some(AgentKind::Triage)
        } else if findings.diagnoses.is_empty() {
            Some(AgentKind::Diagnosis)
        } else if findings.treatments.is_empty() {
            Some(AgentKind::Treatment)
        } else {
            None
        }
    }
}

#[async_trait]
impl Agent for SpecialistRouterAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::SpecialistRouter
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &[SPECIALIST_DIRECTORY, REASONING]
    }

    async fn handle(
        &self,
        ctx: &SessionContext,
        input: &AgentInput,
        tools: &ToolRuntime,
    ) -> Result<AgentStep> {
        let mut trail = ToolTrail::new();
        let view = ctx.findings.clone().merged(&input.peer_findings());

        if view.symptoms.is_empty() && view.diagnoses.is_empty() && view.red_flags.is_empty() {
            let reasoning = trail
                .reason(
                    tools,
                    AgentKind::SpecialistRouter,
                    format!("{}\nNothing assessed yet", input.message),
                    reasoning_context(ctx),
                )
                .await?;
            let mut findings = Findings::new();
            findings.clarifications.insert(CLARIFICATION.to_string());
            let result = AgentResult::new(
                AgentKind::SpecialistRouter,
                CLARIFICATION,
                reasoning.confidence * CLARIFICATION_FACTOR,
                AgentOutput::Routing {
                    specialty: None,
                    timeline: None,
                    next_agent: Some(AgentKind::Triage),
                    clarification: Some(CLARIFICATION.to_string()),
                },
            )
            .with_findings(findings)
            .with_next_steps(vec!["Answer the clarifying question".to_string()])
            .with_tools(trail.into_used());
            return Ok(AgentStep::Complete(result));
        }

        let referral = trail
            .invoke(
                tools,
                SPECIALIST_DIRECTORY,
                json!({"conditions": view.conditions(), "red_flags": view.red_flags}),
            )
            .await?;
        let out = referral.output();
        let specialty = out
            .get("specialty")
            .and_then(Value::as_str)
            .unwrap_or(GENERAL_PRACTICE)
            .to_string();
        let timeline = out
            .get("timeline")
            .and_then(Value::as_str)
            .unwrap_or("routine appointment")
            .to_string();

        let reasoning = trail
            .reason(
                tools,
                AgentKind::SpecialistRouter,
                format!("{}\nReferral: {} {}", input.message, specialty, timeline),
                reasoning_context(ctx),
            )
            .await?;

        let mut confidence = if specialty == GENERAL_PRACTICE {
            reasoning.confidence * GENERAL_PRACTICE_FACTOR
        } else {
            reasoning.confidence
        };

        let mut content = format!("Recommended referral: {} ({}).", specialty, timeline);
        if !input.peer_results.is_empty() {
            let mean = input.peer_results.iter().map(|r| r.confidence).sum::<f64>()
                / input.peer_results.len() as f64;
            confidence = (confidence + mean) / 2.0;
            content.push_str(&format!(
                " Consensus of {} specialists: {}.",
                input.peer_results.len(),
                input
                    .peer_results
                    .iter()
                    .map(|r| format!("{} ({:.0}%)", r.agent.display_name(), r.confidence * 100.0))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        content.push(' ');
        content.push_str(&reasoning.text);

        let next_agent = Self::next_agent(&view);
        let mut next_steps = vec![format!("Book a {} appointment {}", specialty, timeline)];
        if let Some(agent) = next_agent {
            next_steps.push(format!("Continue with {}", agent.display_name()));
        }

        let mut findings = Findings::new();
        findings
            .referrals
            .insert(format!("{} ({})", specialty, timeline));

        let result = AgentResult::new(
            AgentKind::SpecialistRouter,
            content,
            confidence,
            AgentOutput::Routing {
                specialty: Some(specialty),
                timeline: Some(timeline),
                next_agent,
                clarification: None,
            },
        )
        .with_findings(findings)
        .with_next_steps(next_steps)
        .with_tools(trail.into_used());

        Ok(AgentStep::Complete(result))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;
    use crate::context::{DiagnosisFinding, RiskIndicator, RiskLevel};
    use crate::types::{MessageType, PatientContext};

    async fn run(ctx: &SessionContext, input: &AgentInput) -> AgentResult {
        match SpecialistRouterAgent::new()
            .handle(ctx, input, &test_support::runtime())
            .await
            .unwrap()
        {
            AgentStep::Complete(result) => result,
            AgentStep::Suspend(_) => panic!("router never suspends"),
        }
    }

    fn input() -> AgentInput {
        AgentInput::new("t", "c", "who should I see?", MessageType::Referral)
    }

    #[tokio::test]
    async fn test_asks_for_clarification_when_empty() {
        let result = run(&SessionContext::new(PatientContext::new()), &input()).await;
        assert!(matches!(
            result.output,
            AgentOutput::Routing {
                clarification: Some(_),
                ..
            }
        ));
        assert!((result.confidence - 0.56).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_refers_to_specialty() {
        let mut ctx = SessionContext::new(PatientContext::new().with_symptom("chest pain"));
        ctx.findings.diagnoses.insert(DiagnosisFinding {
            condition: "angina".to_string(),
            likelihood_pct: 70,
            primary: true,
            source: AgentKind::Diagnosis,
        });
        let result = run(&ctx, &input()).await;
        match &result.output {
            AgentOutput::Routing {
                specialty,
                next_agent,
                ..
            } => {
                assert_eq!(specialty.as_deref(), Some("cardiology"));
                assert_eq!(*next_agent, Some(AgentKind::Triage));
            }
            other => panic!("unexpected output {:?}", other),
        }
        assert!((result.confidence - 0.8).abs() < 1e-9);
        assert_eq!(result.findings.referrals.len(), 1);
    }

    #[tokio::test]
    async fn test_general_practice_scores_lower() {
        let ctx = SessionContext::new(PatientContext::new().with_symptom("fatigue"));
        let result = run(&ctx, &input()).await;
        assert!((result.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_progression() {
        let mut findings = Findings::new();
        assert_eq!(
            SpecialistRouterAgent::next_agent(&findings),
            Some(AgentKind::Triage)
        );
        findings.risk_indicators.insert(RiskIndicator {
            level: RiskLevel::Low,
            source: AgentKind::Triage,
            reason: "x".to_string(),
        });
        assert_eq!(
            SpecialistRouterAgent::next_agent(&findings),
            Some(AgentKind::Diagnosis)
        );
    }
}
