//! Agent task records

use super::messages::{AgentKind, MessageType};
use crate::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of an agent task
pub type TaskId = String;

/// Execution status of an agent task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    /// Parked with a checkpoint, waiting for an explicit resume
    Suspended,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    fn can_become(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Suspended)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Suspended, Running)
                | (Suspended, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Suspended => "suspended",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Snapshot of the turn input the task was created from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub message: String,
    pub message_type: MessageType,
}

/// One unit of agent work within a consultation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub consultation_id: String,
    pub agent: AgentKind,
    pub input: TaskInput,
    pub status: TaskStatus,
    /// Attempts made so far, retries and resumes included
    pub attempts: u32,
    /// Fan-out group this task belongs to, if any
    #[serde(default)]
    pub group_id: Option<String>,
    /// Summary of the agent's answer once the task succeeds
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentTask {
    pub fn new(consultation_id: impl Into<String>, agent: AgentKind, input: TaskInput) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            consultation_id: consultation_id.into(),
            agent,
            input,
            status: TaskStatus::Pending,
            attempts: 0,
            group_id: None,
            result: None,
            error: None,
            scheduled_at: now,
            updated_at: now,
        }
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Move to `next`, rejecting moves the task lifecycle does not allow
    pub fn set_status(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_become(next) {
            return Err(EngineError::InvalidState {
                from: format!("task {}", self.status.as_str()),
                action: format!("become {}", next.as_str()),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn succeed(&mut self, summary: impl Into<String>) -> Result<()> {
        self.set_status(TaskStatus::Succeeded)?;
        self.result = Some(summary.into());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.set_status(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }
}
