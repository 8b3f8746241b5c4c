//! JSON-file store
//!
//! Layout under the storage directory:
//!
//! ```text
//! consultations/<consultation_id>.json
//! checkpoints/<consultation_id>_<task_id>.json
//! ```
//!
//! Writes go to a temporary file that is renamed into place, so a crash
//! never leaves a half-written record.

use super::{ConsultationRecord, ConsultationStore};
use crate::errors::{EngineError, Result};
use crate::orchestrator::checkpoint::Checkpoint;
use crate::types::{ConsultationId, TaskId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONSULTATIONS: &str = "consultations";
const CHECKPOINTS: &str = "checkpoints";

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open a store rooted at `root`, creating its directories
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [CONSULTATIONS, CHECKPOINTS] {
            tokio::fs::create_dir_all(root.join(dir))
                .await
                .map_err(|e| persistence("create", &root.join(dir), e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, consultation_id: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join(CONSULTATIONS)
            .join(format!("{}.json", safe_name(consultation_id)?)))
    }

    fn checkpoint_path(&self, consultation_id: &str, task_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(CHECKPOINTS).join(format!(
            "{}_{}.json",
            safe_name(consultation_id)?,
            safe_name(task_id)?
        )))
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| persistence("write", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| persistence("rename", path, e))?;
        debug!(path = %path.display(), "stored");
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persistence("read", path, e)),
        }
    }

    async fn file_stems(&self, dir: &str) -> Result<Vec<String>> {
        let dir = self.root.join(dir);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| persistence("list", &dir, e))?;
        let mut stems = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| persistence("list", &dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
        stems.sort();
        Ok(stems)
    }
}

#[async_trait]
impl ConsultationStore for JsonFileStore {
    async fn save(&self, record: &ConsultationRecord) -> Result<()> {
        let path = self.record_path(record.id())?;
        self.write_json(&path, record).await
    }

    async fn load(&self, consultation_id: &str) -> Result<Option<ConsultationRecord>> {
        let path = self.record_path(consultation_id)?;
        self.read_json(&path).await
    }

    async fn list(&self) -> Result<Vec<ConsultationId>> {
        self.file_stems(CONSULTATIONS).await
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.checkpoint_path(&checkpoint.consultation_id, checkpoint.task_id())?;
        self.write_json(&path, checkpoint).await
    }

    async fn take_checkpoint(
        &self,
        consultation_id: &str,
        task_id: &str,
    ) -> Result<Option<Checkpoint>> {
        let path = self.checkpoint_path(consultation_id, task_id)?;
        let Some(checkpoint) = self.read_json::<Checkpoint>(&path).await? else {
            return Ok(None);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(Some(checkpoint)),
            // Another taker removed it first
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persistence("remove", &path, e)),
        }
    }

    async fn pending_checkpoints(&self, consultation_id: &str) -> Result<Vec<TaskId>> {
        let prefix = format!("{}_", safe_name(consultation_id)?);
        Ok(self
            .file_stems(CHECKPOINTS)
            .await?
            .into_iter()
            .filter_map(|stem| stem.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

/// Ids become file names, so only a conservative character set is allowed
fn safe_name(id: &str) -> Result<&str> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(id)
    } else {
        Err(EngineError::Validation(format!("invalid identifier '{}'", id)))
    }
}

fn persistence(op: &str, path: &Path, err: std::io::Error) -> EngineError {
    EngineError::Persistence(format!("{} {}: {}", op, path.display(), err))
}
