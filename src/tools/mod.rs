//! Tool invocation layer
//!
//! Uniform call interface to external capabilities:
//! - Tool trait with idempotency tagging
//! - Explicit registry of built-in tools
//! - Per-tool circuit breaker
//! - Retry manager (exponential backoff)
//! - Runtime coordinator applying breaker, deadline and retry policy

pub mod breaker;
pub mod implementations;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod types;

pub use breaker::{BreakerState, CircuitBreaker};
pub use registry::ToolRegistry;
pub use retry::RetryManager;
pub use runtime::{track_side_effects, ToolRuntime};
pub use types::{Tool, ToolInvocation, ToolSpec, ToolStats};
