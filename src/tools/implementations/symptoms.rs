//! symptom_analyzer: symptom extraction, candidate conditions and red flags

use super::{string_list, SYMPTOM_ANALYZER};
use crate::errors::Result;
use crate::tools::types::{Tool, ToolSpec};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Known symptoms and the conditions they point to
const SYMPTOM_CONDITIONS: &[(&str, &[&str])] = &[
    (
        "chest pain",
        &[
            "myocardial infarction",
            "angina",
            "costochondritis",
            "gastroesophageal reflux disease",
        ],
    ),
    (
        "shortness of breath",
        &["asthma", "heart failure", "pulmonary embolism", "pneumonia"],
    ),
    (
        "headache",
        &["migraine", "tension headache", "cluster headache", "meningitis"],
    ),
    (
        "abdominal pain",
        &["appendicitis", "gastroenteritis", "peptic ulcer", "gallstones"],
    ),
    (
        "fever",
        &["infection", "influenza", "pneumonia", "urinary tract infection"],
    ),
    (
        "fatigue",
        &["anemia", "hypothyroidism", "depression", "chronic fatigue syndrome"],
    ),
    (
        "weight loss",
        &["hyperthyroidism", "diabetes", "malignancy", "malabsorption"],
    ),
    (
        "cough",
        &[
            "upper respiratory infection",
            "asthma",
            "pneumonia",
            "chronic bronchitis",
        ],
    ),
    (
        "dizziness",
        &[
            "orthostatic hypotension",
            "benign positional vertigo",
            "dehydration",
            "anemia",
        ],
    ),
    (
        "nausea",
        &["gastroenteritis", "pregnancy", "medication side effect", "migraine"],
    ),
    (
        "joint pain",
        &["osteoarthritis", "rheumatoid arthritis", "gout", "lupus"],
    ),
    (
        "rash",
        &["contact dermatitis", "eczema", "psoriasis", "allergic reaction"],
    ),
];

const RED_FLAGS: &[&str] = &[
    "chest pain",
    "shortness of breath",
    "difficulty breathing",
    "severe headache",
    "sudden vision loss",
    "severe abdominal pain",
    "sudden weakness",
    "severe dizziness",
    "high fever",
    "loss of consciousness",
];

pub const HIGH_SEVERITY_CONDITIONS: &[&str] = &[
    "myocardial infarction",
    "pulmonary embolism",
    "meningitis",
    "stroke",
    "sepsis",
    "anaphylaxis",
    "malignancy",
];

pub const MODERATE_SEVERITY_CONDITIONS: &[&str] = &[
    "angina",
    "heart failure",
    "pneumonia",
    "appendicitis",
    "gallstones",
    "kidney stones",
];

/// Grade a condition by the severity tables
pub fn condition_severity(condition: &str) -> &'static str {
    let lower = condition.to_lowercase();
    if HIGH_SEVERITY_CONDITIONS.iter().any(|c| lower.contains(c)) {
        "high"
    } else if MODERATE_SEVERITY_CONDITIONS.iter().any(|c| lower.contains(c)) {
        "moderate"
    } else {
        "low"
    }
}

#[derive(Debug, Default)]
pub struct SymptomAnalyzer;

impl SymptomAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Known symptoms present in `text`, plus free-form "<x> pain"/"<x> ache"
    fn extract(text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut found: Vec<String> = SYMPTOM_CONDITIONS
            .iter()
            .filter(|(symptom, _)| lower.contains(symptom))
            .map(|(symptom, _)| symptom.to_string())
            .collect();

        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        for pair in words.windows(2) {
            if matches!(pair[1], "pain" | "ache") && !matches!(pair[0], "no" | "a" | "the" | "of") {
                let phrase = format!("{} {}", pair[0], pair[1]);
                let known = found.iter().any(|f| f.contains(&phrase) || phrase.contains(f.as_str()));
                if !known {
                    found.push(phrase);
                }
            }
        }
        found
    }

    fn conditions_for(symptom: &str) -> Vec<&'static str> {
        SYMPTOM_CONDITIONS
            .iter()
            .find(|(known, _)| symptom == *known || symptom.contains(known) || known.contains(symptom))
            .map(|(_, conditions)| conditions.to_vec())
            .unwrap_or_default()
    }

    fn analyze(text: &str) -> Value {
        let lower = text.to_lowercase();
        let symptoms = Self::extract(text);

        let mut possible = BTreeMap::new();
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for symptom in &symptoms {
            let conditions = Self::conditions_for(symptom);
            for condition in &conditions {
                *counts.entry(*condition).or_default() += 1;
            }
            possible.insert(symptom.clone(), conditions);
        }

        let mut common: Vec<(&str, usize)> = counts
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(c, n)| (*c, *n))
            .collect();
        common.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        let red_flags: Vec<&str> = RED_FLAGS
            .iter()
            .copied()
            .filter(|flag| lower.contains(flag) || symptoms.iter().any(|s| s == flag))
            .collect();

        let severity = counts
            .keys()
            .map(|c| condition_severity(c))
            .max_by_key(|s| match *s {
                "high" => 2,
                "moderate" => 1,
                _ => 0,
            })
            .unwrap_or("low");

        let urgency = if !red_flags.is_empty() {
            "immediate"
        } else if common.iter().any(|(c, _)| condition_severity(c) == "high") {
            "urgent"
        } else if common.iter().any(|(c, _)| condition_severity(c) == "moderate") {
            "prompt"
        } else {
            "routine"
        };

        json!({
            "extracted_symptoms": symptoms,
            "possible_conditions": possible,
            "condition_counts": counts,
            "common_conditions": common.iter().map(|(c, _)| *c).collect::<Vec<_>>(),
            "red_flags": red_flags,
            "severity": severity,
            "urgency": urgency,
        })
    }
}

#[async_trait]
impl Tool for SymptomAnalyzer {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            SYMPTOM_ANALYZER,
            "Extract symptoms from text and map them to candidate conditions and red flags",
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "Free-text complaint"},
                    "symptoms": {"type": "array", "items": {"type": "string"}}
                }
            }),
            true,
        )
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let mut text = params
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        for symptom in string_list(&params, "symptoms") {
            text.push_str(". ");
            text.push_str(&symptom);
        }
        Ok(Self::analyze(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chest_pain_and_dyspnoea() {
        let out = SymptomAnalyzer::new()
            .call(json!({
                "text": "I have chest pain",
                "symptoms": ["shortness of breath"]
            }))
            .await
            .unwrap();

        let flags: Vec<&str> = out["red_flags"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(flags.contains(&"chest pain"));
        assert!(flags.contains(&"shortness of breath"));
        assert_eq!(out["severity"], "high");
        assert_eq!(out["urgency"], "immediate");
    }

    #[tokio::test]
    async fn test_common_conditions() {
        let out = SymptomAnalyzer::new()
            .call(json!({"text": "fever and a cough"}))
            .await
            .unwrap();
        let common: Vec<&str> = out["common_conditions"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(common, vec!["pneumonia"]);
        assert!(out["red_flags"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_free_form_pain() {
        let symptoms = SymptomAnalyzer::extract("my back pain is worse");
        assert_eq!(symptoms, vec!["back pain".to_string()]);
    }

    #[test]
    fn test_condition_severity() {
        assert_eq!(condition_severity("Myocardial infarction"), "high");
        assert_eq!(condition_severity("angina"), "moderate");
        assert_eq!(condition_severity("eczema"), "low");
    }
}
