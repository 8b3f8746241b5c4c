//! Patient context supplied when a consultation starts

use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

const MAX_AGE: u32 = 130;

/// Demographics, symptoms and history known about the patient
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientContext {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    /// Severity markers such as "severe" or "sudden onset"
    #[serde(default)]
    pub severity: Vec<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub medical_history: Vec<String>,
    #[serde(default)]
    pub current_medications: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub systolic_bp: Option<u32>,
    #[serde(default)]
    pub smoker: bool,
    #[serde(default)]
    pub diabetic: bool,
}

impl PatientContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    pub fn with_sex(mut self, sex: impl Into<String>) -> Self {
        self.sex = Some(sex.into());
        self
    }

    pub fn with_symptom(mut self, symptom: impl Into<String>) -> Self {
        self.symptoms.push(symptom.into());
        self
    }

    pub fn with_severity(mut self, marker: impl Into<String>) -> Self {
        self.severity.push(marker.into());
        self
    }

    pub fn with_medication(mut self, medication: impl Into<String>) -> Self {
        self.current_medications.push(medication.into());
        self
    }

    /// Reject malformed context before any state is created
    pub fn validate(&self) -> Result<()> {
        if let Some(age) = self.age {
            if age > MAX_AGE {
                return Err(EngineError::Validation(format!(
                    "age {} is outside 0..={}",
                    age, MAX_AGE
                )));
            }
        }

        let lists = [
            ("symptoms", &self.symptoms),
            ("severity", &self.severity),
            ("medical_history", &self.medical_history),
            ("current_medications", &self.current_medications),
            ("allergies", &self.allergies),
        ];
        for (field, values) in lists {
            if values.iter().any(|v| v.trim().is_empty()) {
                return Err(EngineError::Validation(format!(
                    "{} contains an empty entry",
                    field
                )));
            }
        }

        if let Some(bp) = self.systolic_bp {
            if !(50..=300).contains(&bp) {
                return Err(EngineError::Validation(format!(
                    "systolic_bp {} is implausible",
                    bp
                )));
            }
        }

        Ok(())
    }

    /// Whether any severity marker indicates an acute presentation
    pub fn has_acute_marker(&self) -> bool {
        self.severity.iter().any(|marker| is_acute_marker(marker))
    }
}

/// Words that turn a red flag into an emergency
pub fn is_acute_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["severe", "sudden", "worst", "unbearable", "crushing"]
        .iter()
        .any(|w| lower.contains(w))
}
