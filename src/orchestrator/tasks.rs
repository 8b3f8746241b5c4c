//! Task board: the agent tasks of one consultation
//!
//! At most one task runs at a time, except members of one consensus group,
//! which may run together.

use crate::errors::{EngineError, Result};
use crate::types::{AgentTask, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

/// Task counts for one consultation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub suspended: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Most tasks ever running at once
    pub peak_running: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskBoard {
    tasks: Vec<AgentTask>,
    #[serde(default)]
    peak_running: usize,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, task: AgentTask) -> TaskId {
        let id = task.id.clone();
        self.tasks.push(task);
        id
    }

    /// Move a pending or suspended task to running
    pub fn start(&mut self, task_id: &str) -> Result<()> {
        let group = self.require(task_id)?.group_id.clone();
        let blocking = self.tasks.iter().find(|t| {
            t.status == TaskStatus::Running
                && t.id != task_id
                && (group.is_none() || t.group_id != group)
        });
        if let Some(other) = blocking {
            return Err(EngineError::InvalidState {
                from: format!("running {} task {}", other.agent, other.id),
                action: "start another task".to_string(),
            });
        }

        let task = self.require_mut(task_id)?;
        task.set_status(TaskStatus::Running)?;
        task.attempts += 1;

        let running = self.running_count();
        self.peak_running = self.peak_running.max(running);
        Ok(())
    }

    pub fn succeed(&mut self, task_id: &str, summary: &str, attempts: u32) -> Result<()> {
        let task = self.require_mut(task_id)?;
        task.attempts = task.attempts.max(attempts);
        task.succeed(summary)
    }

    pub fn fail(&mut self, task_id: &str, error: &str, attempts: u32) -> Result<()> {
        let task = self.require_mut(task_id)?;
        task.attempts = task.attempts.max(attempts);
        task.fail(error)
    }

    pub fn suspend(&mut self, task_id: &str) -> Result<()> {
        self.require_mut(task_id)?.set_status(TaskStatus::Suspended)
    }

    pub fn cancel(&mut self, task_id: &str) -> Result<()> {
        self.require_mut(task_id)?.set_status(TaskStatus::Cancelled)
    }

    pub fn get(&self, task_id: &str) -> Option<&AgentTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Tasks in scheduling order
    pub fn tasks(&self) -> &[AgentTask] {
        &self.tasks
    }

    pub fn running_count(&self) -> usize {
        self.count(TaskStatus::Running)
    }

    pub fn suspended(&self) -> Vec<&AgentTask> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Suspended)
            .collect()
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            total: self.tasks.len(),
            pending: self.count(TaskStatus::Pending),
            running: self.count(TaskStatus::Running),
            suspended: self.count(TaskStatus::Suspended),
            succeeded: self.count(TaskStatus::Succeeded),
            failed: self.count(TaskStatus::Failed),
            cancelled: self.count(TaskStatus::Cancelled),
            peak_running: self.peak_running,
        }
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    fn require(&self, task_id: &str) -> Result<&AgentTask> {
        self.get(task_id)
            .ok_or_else(|| EngineError::NotFound(format!("task {}", task_id)))
    }

    fn require_mut(&mut self, task_id: &str) -> Result<&mut AgentTask> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| EngineError::NotFound(format!("task {}", task_id)))
    }
}
