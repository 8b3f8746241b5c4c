//! Durable state of a suspended agent task

use crate::agents::Suspension;
use crate::types::{AgentTask, ConsultationId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything needed to resume a suspended task, possibly after a restart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub consultation_id: ConsultationId,
    pub task: AgentTask,
    pub suspension: Suspension,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(task: AgentTask, suspension: Suspension) -> Self {
        Self {
            consultation_id: task.consultation_id.clone(),
            task,
            suspension,
            created_at: Utc::now(),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task.id
    }
}
