//! Diagnosis: primary and differential diagnoses with likelihoods
//!
//! Candidates come from the symptom analyzer. A condition suggested by
//! several symptoms weighs more, and high-severity conditions are boosted
//! when red flags are known, either from the context or from a peer's bus
//! message.

use super::types::{AgentInput, AgentOutput, AgentResult, AgentStep};
use super::{reasoning_context, Agent, ToolTrail};
use crate::bus::A2aPayload;
use crate::context::{DiagnosisFinding, Findings, SessionContext};
use crate::errors::Result;
use crate::tools::implementations::symptoms::condition_severity;
use crate::tools::implementations::{string_list, REASONING, SYMPTOM_ANALYZER};
use crate::tools::ToolRuntime;
use crate::types::AgentKind;
use async_trait::async_trait;
use serde_json::{json, Value};

const DIFFERENTIAL_SIZE: usize = 4;
const RED_FLAG_BOOST: f64 = 1.0;
const NO_CANDIDATE_FACTOR: f64 = 0.3;

#[derive(Debug, Default)]
pub struct DiagnosisAgent;

impl DiagnosisAgent {
    pub fn new() -> Self {
        Self
    }

    /// Candidate conditions with likelihood percentages, most likely first
    pub fn rank(counts: &[(String, u64)], red_flags: bool) -> Vec<(String, u8)> {
        let weighted: Vec<(String, f64)> = counts
            .iter()
            .map(|(condition, count)| {
                let boost = if red_flags && condition_severity(condition) == "high" {
                    RED_FLAG_BOOST
                } else {
                    0.0
                };
                (condition.clone(), *count as f64 + boost)
            })
            .collect();
        let total: f64 = weighted.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Vec::new();
        }

        let mut ranked: Vec<(String, u8)> = weighted
            .into_iter()
            .map(|(condition, w)| (condition, ((w / total) * 100.0).round() as u8))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    fn confidence(backend: f64, top_pct: Option<u8>) -> f64 {
        match top_pct {
            Some(pct) => backend * (0.6 + pct as f64 / 100.0).min(1.0),
            None => backend * NO_CANDIDATE_FACTOR,
        }
    }
}

#[async_trait]
impl Agent for DiagnosisAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Diagnosis
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &[SYMPTOM_ANALYZER, REASONING]
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
        let counts: Vec<(String, u64)> = out
            .get("condition_counts")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(c, n)| (c.clone(), n.as_u64().unwrap_or(1)))
                    .collect()
            })
            .unwrap_or_default();

        let red_flags = !ctx.findings.red_flags.is_empty()
            || !input.peer_red_flags().is_empty()
            || !string_list(out, "red_flags").is_empty();
        let ranked = Self::rank(&counts, red_flags);

        let candidates: Vec<DiagnosisFinding> = ranked
            .iter()
            .take(DIFFERENTIAL_SIZE + 1)
            .enumerate()
            .map(|(i, (condition, pct))| DiagnosisFinding {
                condition: condition.clone(),
                likelihood_pct: *pct,
                primary: i == 0,
                source: AgentKind::Diagnosis,
            })
            .collect();
        let primary = candidates.first().cloned();
        let differential: Vec<DiagnosisFinding> = candidates.iter().skip(1).cloned().collect();

        let reasoning = trail
            .reason(
                tools,
                AgentKind::Diagnosis,
                format!(
                    "{}\nCandidates: {}",
                    input.message,
                    ranked
                        .iter()
                        .map(|(c, _)| c.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                reasoning_context(ctx),
            )
            .await?;

        let confidence = Self::confidence(reasoning.confidence, primary.as_ref().map(|p| p.likelihood_pct));

        let content = match &primary {
            Some(p) => format!(
                "Most likely: {} ({}%). Also consider: {}. {}",
                p.condition,
                p.likelihood_pct,
                if differential.is_empty() {
                    "nothing else at this stage".to_string()
                } else {
                    differential
                        .iter()
                        .map(|d| format!("{} ({}%)", d.condition, d.likelihood_pct))
                        .collect::<Vec<_>>()
                        .join(", ")
                },
                reasoning.text
            ),
            None => format!(
                "The symptoms described do not point to a specific condition yet. {}",
                reasoning.text
            ),
        };

        let mut findings = Findings::new();
        findings.symptoms.extend(string_list(out, "extracted_symptoms"));
        findings.diagnoses.extend(candidates);
        if primary.is_none() {
            findings
                .clarifications
                .insert("more symptom detail needed for a differential".to_string());
        }

        let mut next_steps = vec!["Confirm the working diagnosis with a clinician".to_string()];
        if let Some(p) = &primary {
            if condition_severity(&p.condition) == "high" {
                next_steps.insert(0, "Seek urgent in-person assessment".to_string());
            }
        }

        let shared = Findings {
            diagnoses: findings.diagnoses.clone(),
            ..Findings::default()
        };
        let result = AgentResult::new(
            AgentKind::Diagnosis,
            content,
            confidence,
            AgentOutput::Diagnosis {
                primary,
                differential,
            },
        )
        .with_findings(findings)
        .with_next_steps(next_steps)
        .with_tools(trail.into_used())
        .publish(A2aPayload::Findings { findings: shared });

        Ok(AgentStep::Complete(result))
    }
}
