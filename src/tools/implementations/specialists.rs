//! specialist_directory: maps conditions and red flags to a specialty

use super::{string_list, SPECIALIST_DIRECTORY};
use crate::errors::Result;
use crate::tools::types::{Tool, ToolSpec};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const SPECIALTIES: &[(&str, &[&str], &str)] = &[
    (
        "cardiology",
        &["myocardial infarction", "angina", "heart failure", "arrhythmia"],
        "within 2 weeks",
    ),
    (
        "pulmonology",
        &["asthma", "pulmonary embolism", "pneumonia", "chronic bronchitis"],
        "within 2 weeks",
    ),
    (
        "neurology",
        &["migraine", "cluster headache", "meningitis", "stroke", "vertigo"],
        "within 4 weeks",
    ),
    (
        "gastroenterology",
        &[
            "appendicitis",
            "gastroenteritis",
            "peptic ulcer",
            "gallstones",
            "gastroesophageal reflux disease",
        ],
        "within 4 weeks",
    ),
    (
        "rheumatology",
        &["osteoarthritis", "rheumatoid arthritis", "gout", "lupus"],
        "within 6 weeks",
    ),
    (
        "dermatology",
        &["contact dermatitis", "eczema", "psoriasis"],
        "within 6 weeks",
    ),
    (
        "endocrinology",
        &["hypothyroidism", "hyperthyroidism", "diabetes"],
        "within 6 weeks",
    ),
];

pub const EMERGENCY_MEDICINE: &str = "emergency medicine";
pub const GENERAL_PRACTICE: &str = "general practice";

#[derive(Debug, Default)]
pub struct SpecialistDirectory;

impl SpecialistDirectory {
    pub fn new() -> Self {
        Self
    }

    fn lookup(conditions: &[String], red_flags: &[String]) -> Value {
        let mut votes: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
        for condition in conditions {
            let lower = condition.to_lowercase();
            for (specialty, covered, _) in SPECIALTIES {
                if covered.iter().any(|c| lower.contains(c)) {
                    votes.entry(*specialty).or_default().push(condition.clone());
                }
            }
        }

        let best = votes
            .iter()
            .max_by(|a, b| a.1.len().cmp(&b.1.len()).then(b.0.cmp(a.0)))
            .map(|(specialty, matched)| (*specialty, matched.clone()));

        let (specialty, matched, timeline) = match best {
            Some((specialty, matched)) => {
                let timeline = if red_flags.is_empty() {
                    SPECIALTIES
                        .iter()
                        .find(|(s, _, _)| *s == specialty)
                        .map(|(_, _, t)| *t)
                        .unwrap_or("within 4 weeks")
                } else {
                    "within 48 hours"
                };
                (specialty, matched, timeline)
            }
            None if !red_flags.is_empty() => (EMERGENCY_MEDICINE, Vec::new(), "immediately"),
            None => (GENERAL_PRACTICE, Vec::new(), "routine appointment"),
        };

        json!({
            "specialty": specialty,
            "matched_conditions": matched,
            "timeline": timeline,
            "alternatives": votes.keys().filter(|s| **s != specialty).collect::<Vec<_>>(),
        })
    }
}

#[async_trait]
impl Tool for SpecialistDirectory {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            SPECIALIST_DIRECTORY,
            "Recommend a specialty for the given conditions and red flags",
            json!({
                "type": "object",
                "properties": {
                    "conditions": {"type": "array", "items": {"type": "string"}},
                    "red_flags": {"type": "array", "items": {"type": "string"}}
                }
            }),
            true,
        )
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let conditions = string_list(&params, "conditions");
        let red_flags = string_list(&params, "red_flags");
        Ok(Self::lookup(&conditions, &red_flags))
    }
}
