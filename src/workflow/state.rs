//! Consultation lifecycle state machine
//!
//! Every status change goes through [`ConsultationStatus::transition`], so an
//! illegal move is rejected before anything is mutated or audited. Terminal
//! states have no outgoing edges.

use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a consultation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    /// Record exists, first turn not yet started
    Created,

    /// Accepting turns
    Active,

    /// An agent task is running for the current turn
    AwaitingAgent,

    /// Explicitly suspended by the caller
    Paused,

    /// Closed normally (terminal)
    Completed,

    /// Handed off to a human or emergency pathway (terminal)
    Transferred,

    /// Unrecoverable failure (terminal)
    Failed,
}

/// Events that drive status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// First turn begins
    Activate,

    /// Agent task dispatched
    Dispatch,

    /// Agent task finished, suspended, or was abandoned
    AgentReturned,

    Pause,

    Resume,

    /// Caller closed the consultation
    Complete,

    /// Critical risk or explicit handoff
    Transfer,

    /// Unrecoverable error such as a lost record write
    Fail,
}

impl WorkflowEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowEvent::Activate => "activate",
            WorkflowEvent::Dispatch => "dispatch",
            WorkflowEvent::AgentReturned => "agent_returned",
            WorkflowEvent::Pause => "pause",
            WorkflowEvent::Resume => "resume",
            WorkflowEvent::Complete => "complete",
            WorkflowEvent::Transfer => "transfer",
            WorkflowEvent::Fail => "fail",
        }
    }
}

impl ConsultationStatus {
    /// Completed, Transferred and Failed are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsultationStatus::Completed
                | ConsultationStatus::Transferred
                | ConsultationStatus::Failed
        )
    }

    /// Only an active consultation takes a new turn
    pub fn accepts_turns(&self) -> bool {
        matches!(self, ConsultationStatus::Active)
    }

    /// Attempt a transition
    ///
    /// Valid transitions (12 edges):
    /// 1.  Created       → Active        (on: Activate)
    /// 2.  Created       → Failed        (on: Fail)
    /// 3.  Active        → AwaitingAgent (on: Dispatch)
    /// 4.  Active        → Paused        (on: Pause)
    /// 5.  Active        → Completed     (on: Complete)
    /// 6.  Active        → Transferred   (on: Transfer)
    /// 7.  Active        → Failed        (on: Fail)
    /// 8.  AwaitingAgent → Active        (on: AgentReturned)
    /// 9.  AwaitingAgent → Transferred   (on: Transfer)
    /// 10. AwaitingAgent → Failed        (on: Fail)
    /// 11. Paused        → Active        (on: Resume)
    /// 12. Paused        → Failed        (on: Fail)
    pub fn transition(&self, event: WorkflowEvent) -> Result<ConsultationStatus> {
        use ConsultationStatus::*;
        use WorkflowEvent::*;

        let next = match (self, event) {
            (Created, Activate) => Active,
            (Created, Fail) => Failed,

            (Active, Dispatch) => AwaitingAgent,
            (Active, WorkflowEvent::Pause) => Paused,
            (Active, Complete) => Completed,
            (Active, Transfer) => Transferred,
            (Active, Fail) => Failed,

            (AwaitingAgent, AgentReturned) => Active,
            (AwaitingAgent, Transfer) => Transferred,
            (AwaitingAgent, Fail) => Failed,

            (Paused, WorkflowEvent::Resume) => Active,
            (Paused, Fail) => Failed,

            (from, event) => {
                return Err(EngineError::InvalidState {
                    from: from.as_str().to_string(),
                    action: event.as_str().to_string(),
                });
            }
        };

        Ok(next)
    }

    /// Events accepted from this status
    pub fn valid_events(&self) -> Vec<WorkflowEvent> {
        use ConsultationStatus::*;
        use WorkflowEvent::*;

        match self {
            Created => vec![Activate, Fail],
            Active => vec![Dispatch, WorkflowEvent::Pause, Complete, Transfer, Fail],
            AwaitingAgent => vec![AgentReturned, Transfer, Fail],
            Paused => vec![WorkflowEvent::Resume, Fail],
            Completed | Transferred | Failed => vec![],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultationStatus::Created => "created",
            ConsultationStatus::Active => "active",
            ConsultationStatus::AwaitingAgent => "awaiting_agent",
            ConsultationStatus::Paused => "paused",
            ConsultationStatus::Completed => "completed",
            ConsultationStatus::Transferred => "transferred",
            ConsultationStatus::Failed => "failed",
        }
    }

    /// Human-readable status name
    pub fn display_name(&self) -> &'static str {
        match self {
            ConsultationStatus::Created => "Created",
            ConsultationStatus::Active => "Active",
            ConsultationStatus::AwaitingAgent => "Awaiting Agent",
            ConsultationStatus::Paused => "Paused",
            ConsultationStatus::Completed => "Completed",
            ConsultationStatus::Transferred => "Transferred",
            ConsultationStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
