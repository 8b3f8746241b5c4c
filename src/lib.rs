//! careflow - multi-agent medical consultation engine
//!
//! Patient questions are routed to specialised agents (triage, diagnosis,
//! treatment, research, specialist routing). Each consultation keeps an
//! ordered transcript and a shared clinical context, and runs under a
//! workflow state machine with persistence, audit and human review.
//!
//! # Architecture
//!
//! - **orchestrator**: routing, turn locks, dispatch, checkpoints
//! - **agents / tools / backend**: reasoning and its fault handling
//! - **store / audit / bus**: persistence, audit trail, agent messages

pub mod errors;
pub mod types;
pub mod workflow;
pub mod context;

pub mod backend;
pub mod tools;
pub mod agents;
pub mod bus;

pub mod audit;
pub mod store;
pub mod orchestrator;

pub mod config;
pub mod cli;

// Re-export commonly used types
pub use config::EngineConfig;
pub use errors::{EngineError, Result};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use types::{
    AgentKind, ContinueRequest, ContinueResponse, HistoryView, MessageType, PatientContext,
    StartRequest, StartResponse,
};
pub use workflow::ConsultationStatus;
