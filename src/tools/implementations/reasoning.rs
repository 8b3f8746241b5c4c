//! reasoning: the reasoning backend behind the uniform tool contract
//!
//! Not idempotent: a model call can have side effects on the provider side
//! (billing, rate limits) and need not return the same answer twice.

use super::REASONING;
use crate::backend::{ReasoningBackend, ReasoningRequest};
use crate::errors::{EngineError, Result};
use crate::tools::types::{Tool, ToolSpec};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct ReasoningTool {
    backend: Arc<dyn ReasoningBackend>,
}

impl ReasoningTool {
    pub fn new(backend: Arc<dyn ReasoningBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ReasoningTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            REASONING,
            "Ask the reasoning backend for a narrative answer with a confidence score",
            json!({
                "type": "object",
                "properties": {
                    "agent": {"type": "string"},
                    "prompt": {"type": "string"},
                    "context": {"type": "object"}
                },
                "required": ["agent", "prompt"]
            }),
            false,
        )
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let request: ReasoningRequest =
            serde_json::from_value(params).map_err(|e| EngineError::ToolInvocation {
                tool: REASONING.to_string(),
                message: format!("invalid parameters: {}", e),
            })?;

        let answer = self.backend.reason(&request).await?;
        Ok(json!({
            "text": answer.text,
            "confidence": answer.confidence,
            "backend": self.backend.name(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TemplateBackend;
    use crate::types::AgentKind;

    #[tokio::test]
    async fn test_forwards_to_backend() {
        let tool = ReasoningTool::new(Arc::new(
            TemplateBackend::new().with_confidence(AgentKind::Research, 0.55),
        ));
        assert!(!tool.spec().idempotent);

        let out = tool
            .call(json!({"agent": "research", "prompt": "Summarise evidence"}))
            .await
            .unwrap();
        assert_eq!(out["confidence"], 0.55);
        assert_eq!(out["backend"], "template");
    }

    #[tokio::test]
    async fn test_rejects_unknown_agent() {
        let tool = ReasoningTool::new(Arc::new(TemplateBackend::new()));
        let err = tool
            .call(json!({"agent": "surgeon", "prompt": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ToolInvocation { .. }));
    }
}
