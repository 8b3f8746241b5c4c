//! Ollama reasoning backend
//!
//! One non-streaming POST /api/generate per call with `format: "json"`.
//! The model is asked for `{"text": ..., "confidence": ...}`; an answer
//! that is not valid JSON keeps its text with a neutral confidence.

use super::{clamp_confidence, Reasoning, ReasoningBackend, ReasoningRequest};
use crate::config::BackendConfig;
use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Confidence assumed when the model omits one
const NEUTRAL_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(EngineError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(
            &config.url,
            &config.model,
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_prompt(request: &ReasoningRequest) -> String {
        format!(
            "You are the {} agent of a clinical consultation service. \
             Answer in JSON as {{\"text\": string, \"confidence\": number between 0 and 1}}.\n\n\
             Task:\n{}\n\nContext:\n{}",
            request.agent.display_name(),
            request.prompt,
            request.context
        )
    }

    /// Interpret the model's `response` field
    fn parse_answer(raw: &str) -> Reasoning {
        match serde_json::from_str::<ModelAnswer>(raw) {
            Ok(answer) => Reasoning::new(
                answer.text,
                answer
                    .confidence
                    .map(clamp_confidence)
                    .unwrap_or(NEUTRAL_CONFIDENCE),
            ),
            Err(_) => Reasoning::new(raw.trim(), NEUTRAL_CONFIDENCE),
        }
    }
}

#[async_trait]
impl ReasoningBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn reason(&self, request: &ReasoningRequest) -> Result<Reasoning> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: self.model.clone(),
            prompt: Self::build_prompt(request),
            stream: false,
            format: "json",
        };

        debug!(agent = %request.agent, model = %self.model, "reasoning request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Backend(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EngineError::Backend(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Backend(format!("Failed to parse response: {}", e)))?;

        Ok(Self::parse_answer(&generated.response))
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct ModelAnswer {
    text: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_creation() {
        let backend =
            OllamaBackend::new("http://localhost:11434/", "llama2:7b", Duration::from_secs(5))
                .unwrap();
        assert_eq!(backend.base_url(), "http://localhost:11434");
        assert_eq!(backend.model(), "llama2:7b");
    }

    #[test]
    fn test_parse_structured_answer() {
        let r = OllamaBackend::parse_answer(r#"{"text": "likely angina", "confidence": 0.72}"#);
        assert_eq!(r.text, "likely angina");
        assert_eq!(r.confidence, 0.72);
    }

    #[test]
    fn test_parse_unstructured_answer() {
        let r = OllamaBackend::parse_answer("  plain words ");
        assert_eq!(r.text, "plain words");
        assert_eq!(r.confidence, NEUTRAL_CONFIDENCE);
    }

    #[test]
    fn test_parse_clamps_confidence() {
        let r = OllamaBackend::parse_answer(r#"{"text": "x", "confidence": 3}"#);
        assert_eq!(r.confidence, 1.0);
    }
}
