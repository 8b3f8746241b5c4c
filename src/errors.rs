//! Error types for the careflow engine
//!
//! One variant per failure class the orchestrator distinguishes. Validation
//! and state errors surface to callers unchanged; transient agent and tool
//! errors are retried and, once exhausted, degrade into a flagged response.

use thiserror::Error;

/// Main error type for the consultation engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed caller input (never retried)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Illegal lifecycle transition or operation on a terminal consultation
    #[error("Invalid state: cannot {action} while consultation is {from}")]
    InvalidState { from: String, action: String },

    /// Lock contention beyond the configured wait policy
    #[error("Consultation {consultation_id} is busy (waited {waited_ms}ms)")]
    ConcurrencyConflict {
        consultation_id: String,
        waited_ms: u64,
    },

    /// Agent task exceeded its deadline
    #[error("Agent {agent} timed out after {duration_ms}ms")]
    AgentTimeout { agent: String, duration_ms: u64 },

    /// Tool call failed
    #[error("Tool {tool} failed: {message}")]
    ToolInvocation { tool: String, message: String },

    /// Tool call exceeded its deadline
    #[error("Tool {tool} timed out after {duration_ms}ms")]
    ToolTimeout { tool: String, duration_ms: u64 },

    /// Circuit open or tool not registered
    #[error("Tool {tool} unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// No agent met its confidence threshold, SpecialistRouter included
    #[error("Routing ambiguity: {0}")]
    RoutingAmbiguity(String),

    /// Resume attempted on a task that is not suspended
    #[error("Cannot resume task {task_id}: {reason}")]
    InvalidResume { task_id: String, reason: String },

    /// Consultation, context, checkpoint or audit write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Unknown consultation or task
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient failures exhausted the retry budget
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<EngineError>,
    },

    /// In-flight task cancelled at a suspension point
    #[error("Task cancelled: {0}")]
    Cancelled(String),

    /// Reasoning backend failure
    #[error("Reasoning backend error: {0}")]
    Backend(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the failure is worth another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::AgentTimeout { .. }
            | EngineError::ToolInvocation { .. }
            | EngineError::ToolTimeout { .. }
            | EngineError::Backend(_)
            | EngineError::Http(_) => true,

            EngineError::Validation(_)
            | EngineError::InvalidState { .. }
            | EngineError::ConcurrencyConflict { .. }
            | EngineError::ToolUnavailable { .. }
            | EngineError::RoutingAmbiguity(_)
            | EngineError::InvalidResume { .. }
            | EngineError::Persistence(_)
            | EngineError::NotFound(_)
            | EngineError::RetriesExhausted { .. }
            | EngineError::Cancelled(_)
            | EngineError::Config(_)
            | EngineError::Serialization(_)
            | EngineError::Io(_) => false,
        }
    }

    /// Whether the caller should receive this error unchanged rather than a
    /// degraded response
    pub fn surfaces_to_caller(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::InvalidState { .. }
                | EngineError::ConcurrencyConflict { .. }
                | EngineError::InvalidResume { .. }
                | EngineError::NotFound(_)
                | EngineError::Persistence(_)
        )
    }

    /// Stable short name used in audit payloads
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::ConcurrencyConflict { .. } => "concurrency_conflict",
            EngineError::AgentTimeout { .. } => "agent_timeout",
            EngineError::ToolInvocation { .. } => "tool_invocation",
            EngineError::ToolTimeout { .. } => "tool_timeout",
            EngineError::ToolUnavailable { .. } => "tool_unavailable",
            EngineError::RoutingAmbiguity(_) => "routing_ambiguity",
            EngineError::InvalidResume { .. } => "invalid_resume",
            EngineError::Persistence(_) => "persistence",
            EngineError::NotFound(_) => "not_found",
            EngineError::RetriesExhausted { .. } => "retries_exhausted",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::Backend(_) => "backend",
            EngineError::Config(_) => "config",
            EngineError::Http(_) => "http",
            EngineError::Serialization(_) => "serialization",
            EngineError::Io(_) => "io",
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Convert anyhow errors raised at the edges (config files, CLI)
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}
