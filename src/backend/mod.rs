//! Reasoning backend capability
//!
//! Agents never talk to a language model directly. They go through the
//! `reasoning` tool, which forwards to a [`ReasoningBackend`]: an opaque
//! capability taking a prompt plus context and returning text with a
//! confidence score.

pub mod ollama;
pub mod template;

pub use ollama::OllamaBackend;
pub use template::TemplateBackend;

use crate::config::{BackendConfig, BackendKind};
use crate::errors::Result;
use crate::types::AgentKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Input to one reasoning call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub agent: AgentKind,
    pub prompt: String,
    #[serde(default)]
    pub context: Value,
}

/// Output of one reasoning call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    pub text: String,
    /// Always within [0, 1]
    pub confidence: f64,
}

impl Reasoning {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence: clamp_confidence(confidence),
        }
    }
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn reason(&self, request: &ReasoningRequest) -> Result<Reasoning>;
}

/// Build the backend selected in configuration
pub fn from_config(config: &BackendConfig) -> Result<Arc<dyn ReasoningBackend>> {
    match config.kind {
        BackendKind::Template => Ok(Arc::new(
            TemplateBackend::new().with_default_confidence(config.template_confidence),
        )),
        BackendKind::Ollama => Ok(Arc::new(OllamaBackend::from_config(config)?)),
    }
}

/// Clamp into [0, 1], mapping NaN to 0
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
