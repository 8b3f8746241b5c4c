//! drug_interactions: pairwise interaction lookup

use super::{string_list, DRUG_INTERACTIONS};
use crate::errors::Result;
use crate::tools::types::{Tool, ToolSpec};
use async_trait::async_trait;
use serde_json::{json, Value};

const INTERACTIONS: &[(&str, &[&str])] = &[
    (
        "warfarin",
        &["aspirin", "ibuprofen", "naproxen", "amiodarone", "fluconazole"],
    ),
    ("lisinopril", &["potassium", "spironolactone", "nsaids"]),
    ("metformin", &["contrast_dyes", "alcohol"]),
    (
        "simvastatin",
        &["clarithromycin", "itraconazole", "gemfibrozil"],
    ),
    ("digoxin", &["amiodarone", "quinidine", "verapamil"]),
    ("sildenafil", &["nitrates", "nitroglycerin"]),
];

const HIGH_RISK_PAIRS: &[(&str, &str)] = &[
    ("warfarin", "aspirin"),
    ("warfarin", "ibuprofen"),
    ("sildenafil", "nitrates"),
    ("sildenafil", "nitroglycerin"),
    ("digoxin", "verapamil"),
    ("metformin", "contrast_dyes"),
];

const NARROW_MARGIN: &[&str] = &["warfarin", "digoxin", "sildenafil", "metformin"];

/// Every medication name the checker knows
pub fn known_medications() -> impl Iterator<Item = &'static str> {
    INTERACTIONS
        .iter()
        .flat_map(|(drug, others)| std::iter::once(*drug).chain(others.iter().copied()))
}

fn interacts(a: &str, b: &str) -> bool {
    let listed = |x: &str, y: &str| {
        INTERACTIONS
            .iter()
            .any(|(drug, others)| *drug == x && others.contains(&y))
    };
    listed(a, b) || listed(b, a)
}

fn severity(a: &str, b: &str) -> &'static str {
    if HIGH_RISK_PAIRS
        .iter()
        .any(|(x, y)| (*x == a && *y == b) || (*x == b && *y == a))
    {
        "high"
    } else if NARROW_MARGIN.contains(&a) || NARROW_MARGIN.contains(&b) {
        "moderate"
    } else {
        "low"
    }
}

#[derive(Debug, Default)]
pub struct DrugInteractionChecker;

impl DrugInteractionChecker {
    pub fn new() -> Self {
        Self
    }

    fn check(current: &[String], proposed: &[String]) -> Value {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if proposed.is_empty() {
            for (i, a) in current.iter().enumerate() {
                for b in &current[i + 1..] {
                    pairs.push((a.clone(), b.clone()));
                }
            }
        } else {
            for a in current {
                for b in proposed {
                    pairs.push((a.clone(), b.clone()));
                }
            }
        }

        let interactions: Vec<Value> = pairs
            .iter()
            .filter(|(a, b)| interacts(a, b))
            .map(|(a, b)| {
                let level = severity(a, b);
                let advice = match level {
                    "high" => "Avoid combination; serious adverse effects possible",
                    "moderate" => "Use with caution; monitor for adverse effects",
                    _ => "Minor interaction; generally acceptable",
                };
                json!({
                    "medication_1": a,
                    "medication_2": b,
                    "severity": level,
                    "advice": advice,
                })
            })
            .collect();

        let count = |level: &str| {
            interactions
                .iter()
                .filter(|i| i["severity"] == level)
                .count()
        };

        json!({
            "interactions_found": !interactions.is_empty(),
            "severity_summary": {
                "high": count("high"),
                "moderate": count("moderate"),
                "low": count("low"),
            },
            "interactions": interactions,
        })
    }
}

#[async_trait]
impl Tool for DrugInteractionChecker {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            DRUG_INTERACTIONS,
            "Check current and proposed medications for known interactions",
            json!({
                "type": "object",
                "properties": {
                    "current": {"type": "array", "items": {"type": "string"}},
                    "proposed": {"type": "array", "items": {"type": "string"}}
                }
            }),
            true,
        )
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let normalize = |list: Vec<String>| -> Vec<String> {
            list.into_iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect()
        };
        let current = normalize(string_list(&params, "current"));
        let proposed = normalize(string_list(&params, "proposed"));
        Ok(Self::check(&current, &proposed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detects_high_risk_pair() {
        let out = DrugInteractionChecker::new()
            .call(json!({"current": ["Warfarin"], "proposed": ["aspirin", "paracetamol"]}))
            .await
            .unwrap();
        assert_eq!(out["interactions_found"], true);
        assert_eq!(out["severity_summary"]["high"], 1);
        assert_eq!(out["interactions"][0]["medication_2"], "aspirin");
    }

    #[tokio::test]
    async fn test_checks_current_list_pairwise() {
        let out = DrugInteractionChecker::new()
            .call(json!({"current": ["digoxin", "amiodarone"]}))
            .await
            .unwrap();
        assert_eq!(out["severity_summary"]["moderate"], 1);
    }

    #[tokio::test]
    async fn test_no_interactions() {
        let out = DrugInteractionChecker::new()
            .call(json!({"current": ["paracetamol"], "proposed": ["ibuprofen"]}))
            .await
            .unwrap();
        assert_eq!(out["interactions_found"], false);
    }

    #[test]
    fn test_known_medications() {
        let known: Vec<&str> = known_medications().collect();
        assert!(known.contains(&"nitroglycerin"));
        assert!(known.contains(&"lisinopril"));
    }
}
