//! Consultation and checkpoint persistence
//!
//! Records are keyed by consultation id. A checkpoint is removed when it is
//! taken, so a suspended task is resumed at most once per suspension.

pub mod json;
pub mod record;

pub use json::JsonFileStore;
pub use record::ConsultationRecord;

use crate::errors::Result;
use crate::orchestrator::checkpoint::Checkpoint;
use crate::types::{ConsultationId, TaskId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait ConsultationStore: Send + Sync {
    /// Insert or replace a record
    async fn save(&self, record: &ConsultationRecord) -> Result<()>;

    async fn load(&self, consultation_id: &str) -> Result<Option<ConsultationRecord>>;

    /// Ids of every stored consultation, sorted
    async fn list(&self) -> Result<Vec<ConsultationId>>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Remove and return a checkpoint
    async fn take_checkpoint(
        &self,
        consultation_id: &str,
        task_id: &str,
    ) -> Result<Option<Checkpoint>>;

    /// Task ids with a stored checkpoint
    async fn pending_checkpoints(&self, consultation_id: &str) -> Result<Vec<TaskId>>;
}

/// Volatile store for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<ConsultationId, ConsultationRecord>>,
    checkpoints: Mutex<HashMap<(ConsultationId, TaskId), Checkpoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsultationStore for MemoryStore {
    async fn save(&self, record: &ConsultationRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id().to_string(), record.clone());
        Ok(())
    }

    async fn load(&self, consultation_id: &str) -> Result<Option<ConsultationRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(consultation_id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<ConsultationId>> {
        let mut ids: Vec<ConsultationId> = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                (checkpoint.consultation_id.clone(), checkpoint.task_id().clone()),
                checkpoint.clone(),
            );
        Ok(())
    }

    async fn take_checkpoint(
        &self,
        consultation_id: &str,
        task_id: &str,
    ) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(consultation_id.to_string(), task_id.to_string())))
    }

    async fn pending_checkpoints(&self, consultation_id: &str) -> Result<Vec<TaskId>> {
        let mut ids: Vec<TaskId> = self
            .checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .filter(|(cid, _)| cid == consultation_id)
            .map(|(_, task)| task.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::agents::Suspension;
    use crate::context::Findings;
    use crate::orchestrator::checkpoint::Checkpoint;
    use crate::types::{AgentKind, AgentTask, MessageType, TaskInput};
    use serde_json::json;

    pub fn checkpoint(consultation_id: &str) -> Checkpoint {
        let task = AgentTask::new(
            consultation_id,
            AgentKind::Research,
            TaskInput {
                message: "comprehensive review".to_string(),
                message_type: MessageType::Research,
            },
        );
        Checkpoint::new(
            task,
            Suspension {
                reason: "awaiting deep literature search".to_string(),
                state: json!({"job_id": "job-1", "query": "migraine"}),
                partial: Findings::new(),
                tools_used: vec!["literature_search".to_string()],
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PatientContext;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load("c-1").await.unwrap().is_none());

        let record = ConsultationRecord::new("c-1", PatientContext::new(), "tok");
        store.save(&record).await.unwrap();
        store
            .save(&ConsultationRecord::new("a-0", PatientContext::new(), "tok"))
            .await
            .unwrap();

        let loaded = store.load("c-1").await.unwrap().unwrap();
        assert_eq!(loaded.session_token, "tok");
        assert_eq!(store.list().await.unwrap(), vec!["a-0", "c-1"]);
    }

    #[tokio::test]
    async fn test_checkpoint_taken_once() {
        let store = MemoryStore::new();
        let checkpoint = test_support::checkpoint("c-1");
        let task_id = checkpoint.task_id().clone();
        store.save_checkpoint(&checkpoint).await.unwrap();
        assert_eq!(store.pending_checkpoints("c-1").await.unwrap(), vec![task_id.clone()]);

        assert!(store.take_checkpoint("c-1", &task_id).await.unwrap().is_some());
        assert!(store.take_checkpoint("c-1", &task_id).await.unwrap().is_none());
        assert!(store.pending_checkpoints("c-1").await.unwrap().is_empty());
    }
}
