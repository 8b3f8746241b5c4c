//! Consultation workflow states

pub mod state;

pub use state::{ConsultationStatus, WorkflowEvent};
