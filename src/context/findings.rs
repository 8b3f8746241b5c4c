//! Accumulated clinical findings
//!
//! Findings only grow. Every field is an ordered set and [`Findings::merge`]
//! is a set union, so merging is commutative, associative and idempotent:
//! agents finishing in any order leave the same context behind.

use crate::types::AgentKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Risk assessed for the patient, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How soon the patient must be seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageLevel {
    Routine,
    Urgent,
    Immediate,
}

impl TriageLevel {
    pub fn from_risk(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Critical => TriageLevel::Immediate,
            RiskLevel::High | RiskLevel::Moderate => TriageLevel::Urgent,
            RiskLevel::Low => TriageLevel::Routine,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriageLevel::Routine => "routine",
            TriageLevel::Urgent => "urgent",
            TriageLevel::Immediate => "immediate",
        }
    }
}

/// A flagged risk with its origin
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RiskIndicator {
    pub level: RiskLevel,
    pub source: AgentKind,
    pub reason: String,
}

/// An interim diagnosis
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiagnosisFinding {
    pub condition: String,
    /// Likelihood rounded to whole percent
    pub likelihood_pct: u8,
    pub primary: bool,
    pub source: AgentKind,
}

/// Everything learned about the patient so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Findings {
    #[serde(default)]
    pub symptoms: BTreeSet<String>,
    #[serde(default)]
    pub red_flags: BTreeSet<String>,
    #[serde(default)]
    pub risk_indicators: BTreeSet<RiskIndicator>,
    #[serde(default)]
    pub diagnoses: BTreeSet<DiagnosisFinding>,
    #[serde(default)]
    pub treatments: BTreeSet<String>,
    #[serde(default)]
    pub interactions: BTreeSet<String>,
    #[serde(default)]
    pub literature: BTreeSet<String>,
    #[serde(default)]
    pub referrals: BTreeSet<String>,
    #[serde(default)]
    pub clarifications: BTreeSet<String>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `other` into `self`
    pub fn merge(&mut self, other: &Findings) {
        self.symptoms.extend(other.symptoms.iter().cloned());
        self.red_flags.extend(other.red_flags.iter().cloned());
        self.risk_indicators
            .extend(other.risk_indicators.iter().cloned());
        self.diagnoses.extend(other.diagnoses.iter().cloned());
        self.treatments.extend(other.treatments.iter().cloned());
        self.interactions.extend(other.interactions.iter().cloned());
        self.literature.extend(other.literature.iter().cloned());
        self.referrals.extend(other.referrals.iter().cloned());
        self.clarifications
            .extend(other.clarifications.iter().cloned());
    }

    /// Owned union of two finding sets
    pub fn merged(mut self, other: &Findings) -> Findings {
        self.merge(other);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.symptoms.is_empty()
            && self.red_flags.is_empty()
            && self.risk_indicators.is_empty()
            && self.diagnoses.is_empty()
            && self.treatments.is_empty()
            && self.interactions.is_empty()
            && self.literature.is_empty()
            && self.referrals.is_empty()
            && self.clarifications.is_empty()
    }

    /// Highest risk flagged by any agent
    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.risk_indicators.iter().map(|r| r.level).max()
    }

    pub fn has_critical_risk(&self) -> bool {
        self.risk_level() == Some(RiskLevel::Critical)
    }

    /// Whether the given agent has contributed a risk assessment
    pub fn assessed_by(&self, agent: AgentKind) -> bool {
        self.risk_indicators.iter().any(|r| r.source == agent)
    }

    /// Most likely primary diagnosis across all contributions
    pub fn primary_diagnosis(&self) -> Option<&DiagnosisFinding> {
        self.diagnoses
            .iter()
            .filter(|d| d.primary)
            .max_by_key(|d| d.likelihood_pct)
            .or_else(|| self.diagnoses.iter().max_by_key(|d| d.likelihood_pct))
    }

    /// Distinct conditions considered so far
    pub fn conditions(&self) -> BTreeSet<String> {
        self.diagnoses.iter().map(|d| d.condition.clone()).collect()
    }
}
