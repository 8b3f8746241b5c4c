//! Built-in tool implementations

pub mod interactions;
pub mod literature;
pub mod reasoning;
pub mod risk;
pub mod specialists;
pub mod symptoms;

pub use interactions::DrugInteractionChecker;
pub use literature::LiteratureSearch;
pub use reasoning::ReasoningTool;
pub use risk::RiskCalculator;
pub use specialists::SpecialistDirectory;
pub use symptoms::SymptomAnalyzer;

use serde_json::Value;

pub const SYMPTOM_ANALYZER: &str = "symptom_analyzer";
pub const RISK_CALCULATOR: &str = "risk_calculator";
pub const DRUG_INTERACTIONS: &str = "drug_interactions";
pub const LITERATURE_SEARCH: &str = "literature_search";
pub const SPECIALIST_DIRECTORY: &str = "specialist_directory";
pub const REASONING: &str = "reasoning";

/// String array parameter, skipping non-string entries
pub(crate) fn string_list(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
