//! Session context and accumulated findings

pub mod findings;
pub mod session;

pub use findings::{DiagnosisFinding, Findings, RiskIndicator, RiskLevel, TriageLevel};
pub use session::SessionContext;
