//! Rule-based routing of a turn to one or more agents

use crate::agents::SpecialistRouterAgent;
use crate::config::RoutingConfig;
use crate::context::Findings;
use crate::types::{AgentKind, MessageType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const TREATMENT_KEYWORDS: &[&str] = &["treat", "medication", "medicine", "drug", "prescri", "dose"];
const RESEARCH_KEYWORDS: &[&str] = &["study", "studies", "research", "evidence", "literature", "paper"];
const DIAGNOSIS_KEYWORDS: &[&str] = &[
    "diagnos",
    "cause",
    "condition",
    "could it be",
    "what is wrong",
    "what's wrong",
];
const REFERRAL_KEYWORDS: &[&str] = &["specialist", "refer", "who should", "which doctor"];

/// How a turn is executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchPlan {
    Single(AgentKind),
    /// Agents run one after another, each seeing the previous findings
    Pipeline(Vec<AgentKind>),
    /// Members run as a task group, then the synthesiser combines them
    Consensus {
        members: Vec<AgentKind>,
        synthesiser: AgentKind,
    },
}

impl DispatchPlan {
    pub fn mode(&self) -> RoutingMode {
        match self {
            DispatchPlan::Single(_) => RoutingMode::Single,
            DispatchPlan::Pipeline(_) => RoutingMode::Pipeline,
            DispatchPlan::Consensus { .. } => RoutingMode::Consensus,
        }
    }

    /// Every agent the plan may dispatch, in order
    pub fn agents(&self) -> Vec<AgentKind> {
        match self {
            DispatchPlan::Single(kind) => vec![*kind],
            DispatchPlan::Pipeline(kinds) => kinds.clone(),
            DispatchPlan::Consensus {
                members,
                synthesiser,
            } => {
                let mut all = members.clone();
                all.push(*synthesiser);
                all
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Single,
    Pipeline,
    Consensus,
    /// Low-confidence answer handed to the specialist router
    Reroute,
    /// Suspended task picked up again
    Resume,
}

/// One routing choice, kept on the record and audited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub agents: Vec<AgentKind>,
    pub mode: RoutingMode,
    pub rationale: String,
    /// Confidence that triggered a reroute, if any
    #[serde(default)]
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl RoutingDecision {
    pub fn new(agents: Vec<AgentKind>, mode: RoutingMode, rationale: impl Into<String>) -> Self {
        Self {
            agents,
            mode,
            rationale: rationale.into(),
            confidence: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_plan(plan: &DispatchPlan, rationale: impl Into<String>) -> Self {
        Self::new(plan.agents(), plan.mode(), rationale)
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingPolicy {
    config: RoutingConfig,
}

impl RoutingPolicy {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self, agent: AgentKind) -> f64 {
        self.config.threshold_for(agent)
    }

    /// Choose the plan for a turn, with a short rationale
    ///
    /// Precedence: explicit target, then message type, then keywords, then
    /// the assessment progression.
    pub fn plan(
        &self,
        message: &str,
        message_type: MessageType,
        target: Option<AgentKind>,
        findings: &Findings,
    ) -> (DispatchPlan, String) {
        if let Some(agent) = target {
            return (
                DispatchPlan::Single(agent),
                format!("explicit {} request", agent.display_name()),
            );
        }

        match message_type {
            MessageType::Emergency | MessageType::Symptom => (
                DispatchPlan::Single(AgentKind::Triage),
                format!("{} message goes to triage", message_type.as_str()),
            ),
            MessageType::Diagnosis => typed(AgentKind::Diagnosis, message_type),
            MessageType::Treatment => typed(AgentKind::Treatment, message_type),
            MessageType::Research => typed(AgentKind::Research, message_type),
            MessageType::Referral => typed(AgentKind::SpecialistRouter, message_type),
            MessageType::SecondOpinion => (
                DispatchPlan::Consensus {
                    members: vec![AgentKind::Diagnosis, AgentKind::Treatment, AgentKind::Research],
                    synthesiser: AgentKind::SpecialistRouter,
                },
                "second opinion fans out to diagnosis, treatment and research".to_string(),
            ),
            MessageType::FullAssessment => (
                DispatchPlan::Pipeline(vec![
                    AgentKind::Triage,
                    AgentKind::Diagnosis,
                    AgentKind::Treatment,
                    AgentKind::SpecialistRouter,
                ]),
                "full assessment pipeline".to_string(),
            ),
            MessageType::Query | MessageType::FollowUp => self.by_content(message, findings),
        }
    }

    fn by_content(&self, message: &str, findings: &Findings) -> (DispatchPlan, String) {
        if !findings.assessed_by(AgentKind::Triage) {
            return (
                DispatchPlan::Single(AgentKind::Triage),
                "no triage assessment yet".to_string(),
            );
        }

        let lower = message.to_lowercase();
        let rules = [
            (TREATMENT_KEYWORDS, AgentKind::Treatment),
            (RESEARCH_KEYWORDS, AgentKind::Research),
            (DIAGNOSIS_KEYWORDS, AgentKind::Diagnosis),
            (REFERRAL_KEYWORDS, AgentKind::SpecialistRouter),
        ];
        for (keywords, agent) in rules {
            if let Some(hit) = keywords.iter().find(|k| lower.contains(*k)) {
                return (
                    DispatchPlan::Single(agent),
                    format!("keyword '{}' matched {}", hit, agent.display_name()),
                );
            }
        }

        match SpecialistRouterAgent::next_agent(findings) {
            Some(agent) => (
                DispatchPlan::Single(agent),
                format!("next step in assessment is {}", agent.display_name()),
            ),
            None => (
                DispatchPlan::Single(AgentKind::SpecialistRouter),
                "assessment complete, routing to specialist".to_string(),
            ),
        }
    }
}

fn typed(agent: AgentKind, message_type: MessageType) -> (DispatchPlan, String) {
    (
        DispatchPlan::Single(agent),
        format!("{} message goes to {}", message_type.as_str(), agent.display_name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DiagnosisFinding, RiskIndicator, RiskLevel};

    fn triaged() -> Findings {
        let mut findings = Findings::new();
        findings.risk_indicators.insert(RiskIndicator {
            level: RiskLevel::Low,
            source: AgentKind::Triage,
            reason: "mild".to_string(),
        });
        findings
    }

    fn single(plan: (DispatchPlan, String)) -> AgentKind {
        match plan.0 {
            DispatchPlan::Single(kind) => kind,
            other => panic!("expected single dispatch, got {:?}", other),
        }
    }

    #[test]
    fn test_explicit_target_wins() {
        let policy = RoutingPolicy::default();
        let plan = policy.plan(
            "my chest hurts",
            MessageType::Emergency,
            Some(AgentKind::Research),
            &Findings::new(),
        );
        assert_eq!(single(plan), AgentKind::Research);
    }

    #[test]
    fn test_first_query_goes_to_triage() {
        let policy = RoutingPolicy::default();
        let plan = policy.plan(
            "what medication should I take?",
            MessageType::Query,
            None,
            &Findings::new(),
        );
        assert_eq!(single(plan), AgentKind::Triage);
    }

    #[test]
    fn test_keywords_after_triage() {
        let policy = RoutingPolicy::default();
        let findings = triaged();
        let cases = [
            ("what medication helps?", AgentKind::Treatment),
            ("is there any research on this?", AgentKind::Research),
            ("what could be the cause?", AgentKind::Diagnosis),
            ("which specialist should I see?", AgentKind::SpecialistRouter),
        ];
        for (message, expected) in cases {
            let plan = policy.plan(message, MessageType::FollowUp, None, &findings);
            assert_eq!(single(plan), expected, "{}", message);
        }
    }

    #[test]
    fn test_progression_fallback() {
        let policy = RoutingPolicy::default();
        let mut findings = triaged();
        assert_eq!(
            single(policy.plan("ok", MessageType::Query, None, &findings)),
            AgentKind::Diagnosis
        );

        findings.diagnoses.insert(DiagnosisFinding {
            condition: "migraine".to_string(),
            likelihood_pct: 60,
            primary: true,
            source: AgentKind::Diagnosis,
        });
        findings.treatments.insert("rest".to_string());
        assert_eq!(
            single(policy.plan("ok", MessageType::Query, None, &findings)),
            AgentKind::SpecialistRouter
        );
    }

    #[test]
    fn test_multi_agent_plans() {
        let policy = RoutingPolicy::default();
        let (plan, _) = policy.plan("x", MessageType::SecondOpinion, None, &Findings::new());
        assert_eq!(plan.mode(), RoutingMode::Consensus);
        assert_eq!(plan.agents().len(), 4);

        let (plan, _) = policy.plan("x", MessageType::FullAssessment, None, &Findings::new());
        assert_eq!(
            plan,
            DispatchPlan::Pipeline(vec![
                AgentKind::Triage,
                AgentKind::Diagnosis,
                AgentKind::Treatment,
                AgentKind::SpecialistRouter,
            ])
        );
    }
}
