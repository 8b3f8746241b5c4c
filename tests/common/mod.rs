//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use careflow::audit::MemoryAuditSink;
use careflow::backend::{Reasoning, ReasoningBackend, ReasoningRequest, TemplateBackend};
use careflow::orchestrator::Checkpoint;
use careflow::store::{ConsultationRecord, ConsultationStore, MemoryStore};
use careflow::types::{ConsultationId, TaskId};
use careflow::{
    EngineConfig, EngineError, Orchestrator, PatientContext, Result, StartRequest, StartResponse,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Template reasoning that can be slowed down or taken offline mid-test
pub struct SwitchBackend {
    inner: TemplateBackend,
    failing: AtomicBool,
    latency_ms: AtomicU64,
    calls: AtomicUsize,
}

impl SwitchBackend {
    pub fn new() -> Arc<Self> {
        Self::with(TemplateBackend::new())
    }

    pub fn with(inner: TemplateBackend) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningBackend for SwitchBackend {
    fn name(&self) -> &str {
        "switch"
    }

    async fn reason(&self, request: &ReasoningRequest) -> Result<Reasoning> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Backend("backend offline".to_string()));
        }
        self.inner.reason(request).await
    }
}

/// In-memory store whose record writes can be made to fail
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConsultationStore for FlakyStore {
    async fn save(&self, record: &ConsultationRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Persistence("disk full".to_string()));
        }
        self.inner.save(record).await
    }

    async fn load(&self, consultation_id: &str) -> Result<Option<ConsultationRecord>> {
        self.inner.load(consultation_id).await
    }

    async fn list(&self) -> Result<Vec<ConsultationId>> {
        self.inner.list().await
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.inner.save_checkpoint(checkpoint).await
    }

    async fn take_checkpoint(
        &self,
        consultation_id: &str,
        task_id: &str,
    ) -> Result<Option<Checkpoint>> {
        self.inner.take_checkpoint(consultation_id, task_id).await
    }

    async fn pending_checkpoints(&self, consultation_id: &str) -> Result<Vec<TaskId>> {
        self.inner.pending_checkpoints(consultation_id).await
    }
}

/// Defaults with retry delays short enough for tests
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.retry.jitter = false;
    config
}

pub fn orchestrator(
    backend: Arc<SwitchBackend>,
    config: EngineConfig,
) -> (Orchestrator, MemoryAuditSink) {
    let audit = MemoryAuditSink::new();
    let orchestrator = Orchestrator::builder()
        .with_config(config)
        .with_backend(backend)
        .with_audit_sink(Arc::new(audit.clone()))
        .build()
        .unwrap();
    (orchestrator, audit)
}

pub fn patient() -> PatientContext {
    PatientContext::new().with_age(45).with_sex("female")
}

/// Open a consultation with a routine, non-urgent complaint
pub async fn start_routine(orchestrator: &Orchestrator) -> StartResponse {
    orchestrator
        .start_consultation(StartRequest::new("I have had a cough for a week", patient()))
        .await
        .unwrap()
}
