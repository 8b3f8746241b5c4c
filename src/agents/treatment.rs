//! Treatment: plan for the working diagnosis plus an interaction check

use super::types::{AgentInput, AgentOutput, AgentResult, AgentStep};
use super::{reasoning_context, Agent, ToolTrail};
use crate::context::{Findings, SessionContext};
use crate::errors::Result;
use crate::tools::implementations::{DRUG_INTERACTIONS, REASONING};
use crate::tools::ToolRuntime;
use crate::types::AgentKind;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Condition, first-line medications, supporting advice
const PLANS: &[(&str, &[&str], &str)] = &[
    (
        "myocardial infarction",
        &["aspirin", "nitroglycerin"],
        "Emergency reperfusion assessment",
    ),
    (
        "angina",
        &["nitroglycerin", "aspirin", "beta blocker"],
        "Exercise tolerance testing and cardiology review",
    ),
    (
        "heart failure",
        &["furosemide", "lisinopril"],
        "Daily weight monitoring and fluid restriction",
    ),
    ("asthma", &["salbutamol", "inhaled corticosteroid"], "Inhaler technique review"),
    ("pneumonia", &["amoxicillin"], "Chest X-ray and review at 48 hours"),
    (
        "migraine",
        &["ibuprofen", "triptan"],
        "Headache diary and trigger avoidance",
    ),
    ("tension headache", &["paracetamol"], "Posture and stress management"),
    (
        "gastroesophageal reflux disease",
        &["omeprazole"],
        "Avoid late meals and raise the head of the bed",
    ),
    (
        "gastroenteritis",
        &["oral rehydration salts"],
        "Maintain fluid intake",
    ),
    (
        "influenza",
        &["paracetamol", "oseltamivir"],
        "Rest and fluids",
    ),
    (
        "upper respiratory infection",
        &["paracetamol"],
        "Rest and fluids",
    ),
    ("osteoarthritis", &["paracetamol", "naproxen"], "Physiotherapy"),
    ("gout", &["naproxen", "colchicine"], "Limit alcohol and purine-rich food"),
    ("contact dermatitis", &["hydrocortisone cream"], "Avoid the trigger"),
];

const MAJOR_INTERACTION_FACTOR: f64 = 0.7;
const NO_PLAN_FACTOR: f64 = 0.7;
const NO_DIAGNOSIS_FACTOR: f64 = 0.3;

#[derive(Debug, Default)]
pub struct TreatmentAgent;

impl TreatmentAgent {
    pub fn new() -> Self {
        Self
    }

    fn plan_for(condition: &str) -> Option<(&'static [&'static str], &'static str)> {
        let lower = condition.to_lowercase();
        PLANS
            .iter()
            .find(|(c, _, _)| lower.contains(c))
            .map(|(_, meds, advice)| (*meds, *advice))
    }
}

#[async_trait]
impl Agent for TreatmentAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Treatment
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &[DRUG_INTERACTIONS, REASONING]
    }

    async fn handle(
        &self,
        ctx: &SessionContext,
        input: &AgentInput,
        tools: &ToolRuntime,
    ) -> Result<AgentStep> {
        let mut trail = ToolTrail::new();
        let view = ctx.findings.clone().merged(&input.peer_findings());

        let Some(primary) = view.primary_diagnosis().cloned() else {
            let reasoning = trail
                .reason(
                    tools,
                    AgentKind::Treatment,
                    format!("{}\nNo working diagnosis", input.message),
                    reasoning_context(ctx),
                )
                .await?;
            let mut findings = Findings::new();
            findings
                .clarifications
                .insert("diagnosis required before treatment planning".to_string());
            let result = AgentResult::new(
                AgentKind::Treatment,
                format!(
                    "A treatment plan needs a working diagnosis first. {}",
                    reasoning.text
                ),
                reasoning.confidence * NO_DIAGNOSIS_FACTOR,
                AgentOutput::Treatment {
                    plan: vec![],
                    medications: vec![],
                    interactions: vec![],
                    major_interaction: false,
                },
            )
            .with_findings(findings)
            .with_next_steps(vec!["Request a diagnostic assessment".to_string()])
            .with_tools(trail.into_used());
            return Ok(AgentStep::Complete(result));
        };

        let (medications, mut plan, factor) = match Self::plan_for(&primary.condition) {
            Some((meds, advice)) => (
                meds.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
                vec![
                    format!("Consider {} for {}", meds.join(" or "), primary.condition),
                    advice.to_string(),
                ],
                1.0,
            ),
            None => (
                Vec::new(),
                vec![format!(
                    "Symptomatic management and clinician review for {}",
                    primary.condition
                )],
                NO_PLAN_FACTOR,
            ),
        };

        let mut interactions = Vec::new();
        let mut major = false;
        if !medications.is_empty() {
            let check = trail
                .invoke(
                    tools,
                    DRUG_INTERACTIONS,
                    json!({
                        "current": ctx.patient.current_medications,
                        "proposed": medications,
                    }),
                )
                .await?;
            let out = check.output();
            major = out["severity_summary"]["high"].as_u64().unwrap_or(0) > 0;
            if let Some(found) = out.get("interactions").and_then(Value::as_array) {
                interactions = found
                    .iter()
                    .map(|i| {
                        format!(
                            "{} + {} ({})",
                            i["medication_1"].as_str().unwrap_or("?"),
                            i["medication_2"].as_str().unwrap_or("?"),
                            i["severity"].as_str().unwrap_or("unknown"),
                        )
                    })
                    .collect();
            }
        }
        if major {
            plan.push("Review the medication list with a pharmacist before starting".to_string());
        }

        let reasoning = trail
            .reason(
                tools,
                AgentKind::Treatment,
                format!("{}\nPlan for {}", input.message, primary.condition),
                reasoning_context(ctx),
            )
            .await?;

        let mut confidence = reasoning.confidence * factor;
        if major {
            confidence *= MAJOR_INTERACTION_FACTOR;
        }

        let mut content = format!("Plan for {}: {}.", primary.condition, plan.join("; "));
        if !interactions.is_empty() {
            content.push_str(&format!(" Interactions: {}.", interactions.join(", ")));
        }
        content.push(' ');
        content.push_str(&reasoning.text);

        let mut findings = Findings::new();
        findings.treatments.extend(plan.iter().cloned());
        findings.interactions.extend(interactions.iter().cloned());

        let result = AgentResult::new(
            AgentKind::Treatment,
            content,
            confidence,
            AgentOutput::Treatment {
                plan,
                medications,
                interactions,
                major_interaction: major,
            },
        )
        .with_findings(findings)
        .with_next_steps(vec![
            "Discuss the plan with your clinician before starting any medication".to_string(),
        ])
        .with_tools(trail.into_used());

        Ok(AgentStep::Complete(result))
    }
}
