//! Type definitions module
//!
//! Core types shared by the orchestrator, agents, store and callers.

pub mod api;
pub mod consultation;
pub mod messages;
pub mod patient;
pub mod task;

// Re-export commonly used types
pub use api::{ContinueRequest, ContinueResponse, HistoryView, StartRequest, StartResponse};
pub use consultation::{Consultation, ConsultationId};
pub use messages::{AgentKind, Message, MessageId, MessageType, SenderRole};
pub use patient::{is_acute_marker, PatientContext};
pub use task::{AgentTask, TaskId, TaskInput, TaskStatus};
