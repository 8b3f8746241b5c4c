//! literature_search: ranked lookup over an in-process corpus
//!
//! A `deep` search does not answer immediately. It returns a pending job id
//! that is fetched later with `{"job_id", "query"}`; the query travels with
//! the job so a fetch works from any process.

use super::LITERATURE_SEARCH;
use crate::errors::{EngineError, Result};
use crate::tools::types::{Tool, ToolSpec};
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug)]
struct Paper {
    title: &'static str,
    journal: &'static str,
    year: u16,
    keywords: &'static [&'static str],
}

const CORPUS: &[Paper] = &[
    Paper {
        title: "High-sensitivity troponin pathways for suspected acute coronary syndrome",
        journal: "Lancet",
        year: 2023,
        keywords: &["chest pain", "myocardial infarction", "troponin", "angina"],
    },
    Paper {
        title: "Outpatient management of stable angina: a systematic review",
        journal: "BMJ",
        year: 2022,
        keywords: &["angina", "chest pain", "nitroglycerin", "beta blocker"],
    },
    Paper {
        title: "D-dimer guided diagnosis of pulmonary embolism",
        journal: "NEJM",
        year: 2021,
        keywords: &["pulmonary embolism", "shortness of breath", "d-dimer"],
    },
    Paper {
        title: "Acute treatment of migraine in adults",
        journal: "JAMA",
        year: 2023,
        keywords: &["migraine", "headache", "triptan", "ibuprofen"],
    },
    Paper {
        title: "Community-acquired pneumonia: antibiotic duration trials",
        journal: "Lancet Respiratory Medicine",
        year: 2022,
        keywords: &["pneumonia", "cough", "fever", "antibiotics"],
    },
    Paper {
        title: "Bleeding risk of warfarin combined with antiplatelet therapy",
        journal: "Circulation",
        year: 2020,
        keywords: &["warfarin", "aspirin", "interaction", "bleeding"],
    },
    Paper {
        title: "Early appendectomy versus antibiotics for appendicitis",
        journal: "NEJM",
        year: 2020,
        keywords: &["appendicitis", "abdominal pain", "surgery", "antibiotics"],
    },
    Paper {
        title: "Asthma control with as-needed inhaled corticosteroid-formoterol",
        journal: "NEJM",
        year: 2019,
        keywords: &["asthma", "shortness of breath", "cough", "inhaler"],
    },
    Paper {
        title: "Bacterial meningitis: recognition in primary care",
        journal: "BMJ",
        year: 2021,
        keywords: &["meningitis", "headache", "fever", "neck stiffness"],
    },
    Paper {
        title: "Heart failure with preserved ejection fraction: SGLT2 inhibitors",
        journal: "NEJM",
        year: 2022,
        keywords: &["heart failure", "shortness of breath", "sglt2"],
    },
];

const DEFAULT_LIMIT: usize = 3;
const DEEP_LIMIT: usize = 6;

#[derive(Debug, Default)]
pub struct LiteratureSearch;

impl LiteratureSearch {
    pub fn new() -> Self {
        Self
    }

    /// Papers matching `query`, best first
    fn rank(query: &str, limit: usize) -> Vec<Value> {
        let lower = query.to_lowercase();
        let terms: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|t| t.len() > 2)
            .collect();

        let mut scored: Vec<(usize, &Paper)> = CORPUS
            .iter()
            .map(|paper| {
                let title = paper.title.to_lowercase();
                let keyword_hits = paper
                    .keywords
                    .iter()
                    .filter(|k| lower.contains(*k))
                    .count();
                let term_hits = terms.iter().filter(|t| title.contains(*t)).count();
                (keyword_hits * 2 + term_hits, paper)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.year.cmp(&a.1.year)));

        scored
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(rank, (score, paper))| {
                json!({
                    "rank": rank + 1,
                    "score": score,
                    "title": paper.title,
                    "journal": paper.journal,
                    "year": paper.year,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Tool for LiteratureSearch {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            LITERATURE_SEARCH,
            "Search the medical literature; deep searches complete asynchronously",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer"},
                    "deep": {"type": "boolean"},
                    "job_id": {"type": "string", "description": "Fetch a pending deep search"}
                },
                "required": ["query"]
            }),
            true,
        )
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| EngineError::ToolInvocation {
                tool: LITERATURE_SEARCH.to_string(),
                message: "query is required".to_string(),
            })?;

        if let Some(job_id) = params.get("job_id").and_then(Value::as_str) {
            return Ok(json!({
                "status": "complete",
                "job_id": job_id,
                "results": Self::rank(query, DEEP_LIMIT),
            }));
        }

        if params.get("deep").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(json!({
                "status": "pending",
                "job_id": Uuid::new_v4().to_string(),
                "query": query,
            }));
        }

        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT);

        Ok(json!({
            "status": "complete",
            "results": Self::rank(query, limit),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ranked_results() {
        let out = LiteratureSearch::new()
            .call(json!({"query": "angina and chest pain"}))
            .await
            .unwrap();
        let results = out["results"].as_array().unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= DEFAULT_LIMIT);
        assert_eq!(results[0]["rank"], 1);
        let top = results[0]["score"].as_u64().unwrap();
        assert!(results.iter().all(|r| r["score"].as_u64().unwrap() <= top));
    }

    #[tokio::test]
    async fn test_deep_search_is_pending_then_fetchable() {
        let tool = LiteratureSearch::new();
        let pending = tool
            .call(json!({"query": "pneumonia", "deep": true}))
            .await
            .unwrap();
        assert_eq!(pending["status"], "pending");
        let job_id = pending["job_id"].as_str().unwrap().to_string();

        let done = tool
            .call(json!({"query": "pneumonia", "job_id": job_id}))
            .await
            .unwrap();
        assert_eq!(done["status"], "complete");
        assert!(!done["results"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requires_query() {
        let err = LiteratureSearch::new().call(json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::ToolInvocation { .. }));
    }

    #[tokio::test]
    async fn test_no_match() {
        let out = LiteratureSearch::new()
            .call(json!({"query": "zz"}))
            .await
            .unwrap();
        assert!(out["results"].as_array().unwrap().is_empty());
    }
}
