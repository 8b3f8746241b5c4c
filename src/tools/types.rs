//! Tool contract and invocation records

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Tool description with parameter schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool identifier
    pub id: String,

    /// Human-readable description
    pub description: String,

    /// JSON schema for parameters
    pub parameters: Value,

    /// Safe to retry automatically
    pub idempotent: bool,
}

impl ToolSpec {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        idempotent: bool,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            parameters,
            idempotent,
        }
    }
}

/// An external capability reachable through the tool runtime
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn call(&self, params: Value) -> Result<Value>;
}

/// Record of one completed tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_id: String,
    pub params: Value,
    pub result: Option<Value>,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub idempotent: bool,
    /// Attempts made, retries included
    pub attempts: u32,
}

impl ToolInvocation {
    pub fn success(
        tool_id: impl Into<String>,
        params: Value,
        result: Value,
        latency: Duration,
        idempotent: bool,
        attempts: u32,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            params,
            result: Some(result),
            latency_ms: latency.as_millis() as u64,
            error: None,
            idempotent,
            attempts,
        }
    }

    pub fn failure(
        tool_id: impl Into<String>,
        params: Value,
        error: impl Into<String>,
        latency: Duration,
        idempotent: bool,
        attempts: u32,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            params,
            result: None,
            latency_ms: latency.as_millis() as u64,
            error: Some(error.into()),
            idempotent,
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Result value, `Null` when the call failed
    pub fn output(&self) -> &Value {
        self.result.as_ref().unwrap_or(&Value::Null)
    }
}

/// Tool execution statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStats {
    /// Total attempts that reached the tool
    pub total_executions: u64,

    pub successful_executions: u64,

    pub failed_executions: u64,

    /// Total execution time (ms)
    pub total_duration_ms: u64,

    /// Retry attempts
    pub retry_attempts: u64,

    /// Calls refused by an open circuit
    pub rejected_calls: u64,
}

impl ToolStats {
    pub fn record_success(&mut self, duration_ms: u64) {
        self.total_executions += 1;
        self.successful_executions += 1;
        self.total_duration_ms += duration_ms;
    }

    pub fn record_failure(&mut self, duration_ms: u64) {
        self.total_executions += 1;
        self.failed_executions += 1;
        self.total_duration_ms += duration_ms;
    }

    pub fn record_retry(&mut self) {
        self.retry_attempts += 1;
    }

    pub fn record_rejected(&mut self) {
        self.rejected_calls += 1;
    }

    pub fn average_duration_ms(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total_executions as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.successful_executions as f64 / self.total_executions as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invocation_constructors() {
        let ok = ToolInvocation::success(
            "risk_calculator",
            json!({"age": 60}),
            json!({"score": 2}),
            Duration::from_millis(12),
            true,
            1,
        );
        assert!(ok.is_success());
        assert_eq!(ok.output()["score"], 2);

        let failed = ToolInvocation::failure(
            "reasoning",
            json!({}),
            "backend down",
            Duration::from_millis(3),
            false,
            1,
        );
        assert!(!failed.is_success());
        assert!(failed.output().is_null());
    }

    #[test]
    fn test_stats() {
        let mut stats = ToolStats::default();
        stats.record_success(10);
        stats.record_failure(30);
        stats.record_rejected();
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.average_duration_ms(), 20.0);
        assert_eq!(stats.success_rate(), 0.5);
        assert_eq!(stats.rejected_calls, 1);
    }
}
