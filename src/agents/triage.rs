//! Triage: urgency, risk level and red flags

use super::types::{AgentInput, AgentOutput, AgentResult, AgentStep};
use super::{reasoning_context, Agent, ToolTrail};
use crate::bus::A2aPayload;
use crate::context::{Findings, RiskIndicator, RiskLevel, SessionContext, TriageLevel};
use crate::errors::Result;
use crate::tools::implementations::{string_list, REASONING, RISK_CALCULATOR, SYMPTOM_ANALYZER};
use crate::tools::ToolRuntime;
use crate::types::{is_acute_marker, AgentKind};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Confidence multiplier when no symptom could be identified
const LOW_COVERAGE: f64 = 0.6;

#[derive(Debug, Default)]
pub struct TriageAgent;

impl TriageAgent {
    pub fn new() -> Self {
        Self
    }

    /// Red flags with an acute marker, or several red flags together, are
    /// critical
    pub fn assess(red_flags: usize, acute: bool, severity: &str, cv_high: bool) -> RiskLevel {
        if red_flags > 0 && (acute || red_flags >= 2) {
            RiskLevel::Critical
        } else if red_flags > 0 || severity == "high" || cv_high {
            RiskLevel::High
        } else if severity == "moderate" || acute {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    fn next_steps(level: TriageLevel) -> Vec<String> {
        let steps: &[&str] = match level {
            TriageLevel::Immediate => &[
                "Call emergency services or go to the nearest emergency department now",
                "Do not drive yourself",
            ],
            TriageLevel::Urgent => &[
                "Arrange a same-day assessment with a clinician",
                "Seek emergency care if symptoms worsen",
            ],
            TriageLevel::Routine => &[
                "Monitor your symptoms",
                "Book a routine appointment if they persist",
            ],
        };
        steps.iter().map(|s| s.to_string()).collect()
    }

    async fn cardiovascular_risk(
        ctx: &SessionContext,
        trail: &mut ToolTrail,
        tools: &ToolRuntime,
    ) -> Result<bool> {
        let Some(age) = ctx.patient.age else {
            return Ok(false);
        };
        let out = trail
            .invoke(
                tools,
                RISK_CALCULATOR,
                json!({
                    "age": age,
                    "sex": ctx.patient.sex,
                    "systolic_bp": ctx.patient.systolic_bp,
                    "smoker": ctx.patient.smoker,
                    "diabetic": ctx.patient.diabetic,
                }),
            )
            .await?;
        Ok(matches!(
            out.output().get("risk_level").and_then(Value::as_str),
            Some("high") | Some("very_high")
        ))
    }
}

#[async_trait]
impl Agent for TriageAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Triage
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &[SYMPTOM_ANALYZER, RISK_CALCULATOR, REASONING]
    }

    async fn handle(
        &self,
        ctx: &SessionContext,
        input: &AgentInput,
        tools: &ToolRuntime,
    ) -> Result<AgentStep> {
        let mut trail = ToolTrail::new();

        let analysis = trail
            .invoke(
                tools,
                SYMPTOM_ANALYZER,
                json!({"text": input.message, "symptoms": ctx.symptom_list()}),
            )
            .await?;
        let out = analysis.output();
        let red_flags = string_list(out, "red_flags");
        let extracted = string_list(out, "extracted_symptoms");
        let severity = out
            .get("severity")
            .and_then(Value::as_str)
            .unwrap_or("low")
            .to_string();

        let cv_high = Self::cardiovascular_risk(ctx, &mut trail, tools).await?;
        let acute = ctx.patient.has_acute_marker() || is_acute_marker(&input.message);
        let risk = Self::assess(red_flags.len(), acute, &severity, cv_high);
        let triage_level = TriageLevel::from_risk(risk);

        let reasoning = trail
            .reason(
                tools,
                AgentKind::Triage,
                format!("{}\nAssessed risk: {}", input.message, risk),
                reasoning_context(ctx),
            )
            .await?;

        let coverage = if extracted.is_empty() && ctx.findings.symptoms.is_empty() {
            LOW_COVERAGE
        } else {
            1.0
        };

        let mut findings = Findings::new();
        findings.symptoms.extend(extracted);
        findings.red_flags.extend(red_flags.iter().cloned());
        findings.risk_indicators.insert(RiskIndicator {
            level: risk,
            source: AgentKind::Triage,
            reason: if red_flags.is_empty() {
                format!("{} severity presentation", severity)
            } else {
                format!("red flags: {}", red_flags.join(", "))
            },
        });

        let mut content = format!(
            "Triage: {} priority, {} risk.",
            triage_level.as_str(),
            risk
        );
        if !red_flags.is_empty() {
            content.push_str(&format!(" Red flags: {}.", red_flags.join(", ")));
        }
        content.push(' ');
        content.push_str(&reasoning.text);

        let mut result = AgentResult::new(
            AgentKind::Triage,
            content,
            reasoning.confidence * coverage,
            AgentOutput::Triage {
                triage_level,
                risk_level: risk,
                red_flags: red_flags.clone(),
            },
        )
        .with_findings(findings)
        .with_next_steps(Self::next_steps(triage_level))
        .with_tools(trail.into_used());

        if !red_flags.is_empty() {
            result = result.publish(A2aPayload::RedFlags {
                flags: red_flags,
                risk_level: risk,
            });
        }
        Ok(AgentStep::Complete(result))
    }
}
