//! Suspension, checkpoints and resume across an orchestrator restart

mod common;

use careflow::orchestrator::RoutingMode;
use careflow::store::{ConsultationStore, JsonFileStore};
use careflow::{AgentKind, ConsultationStatus, EngineError, Orchestrator};
use common::{orchestrator, start_routine, test_config, SwitchBackend};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const DEEP_QUERY: &str = "a comprehensive review of chronic cough treatments";

async fn open(dir: &Path) -> (Orchestrator, Arc<JsonFileStore>) {
    let store = Arc::new(JsonFileStore::open(dir).await.unwrap());
    let orch = Orchestrator::builder()
        .with_config(test_config())
        .with_store(store.clone())
        .build()
        .unwrap();
    (orch, store)
}

#[tokio::test]
async fn test_resume_after_restart_runs_exactly_once() {
    let dir = TempDir::new().unwrap();

    let (id, task_id, transcript_len) = {
        let (orch, store) = open(dir.path()).await;
        let id = start_routine(&orch).await.consultation_id;

        let response = orch.research(&id, DEEP_QUERY).await.unwrap();
        assert_eq!(response.status, ConsultationStatus::Active);
        assert_eq!(response.agent_responded, Some(AgentKind::Research));
        let task_id = response.pending_task.clone().expect("deep search suspends");

        assert_eq!(orch.pending_tasks(&id).await.unwrap(), vec![task_id.clone()]);
        assert_eq!(
            store.pending_checkpoints(&id).await.unwrap(),
            vec![task_id.clone()]
        );
        let len = orch.get_history(&id).await.unwrap().messages.len();
        (id, task_id, len)
    };

    let (orch, store) = open(dir.path()).await;
    assert_eq!(
        orch.get_history(&id).await.unwrap().messages.len(),
        transcript_len
    );
    assert_eq!(orch.pending_tasks(&id).await.unwrap(), vec![task_id.clone()]);

    let response = orch.resume_task(&id, &task_id).await.unwrap();
    assert!(response.pending_task.is_none());
    assert_ne!(response.status, ConsultationStatus::AwaitingAgent);
    assert!(store.pending_checkpoints(&id).await.unwrap().is_empty());

    let stats = orch.task_stats(&id).await.unwrap();
    assert_eq!(stats.suspended, 0);
    assert_eq!(stats.running, 0);

    let err = orch.resume_task(&id, &task_id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidResume { .. }));

    let log = orch.routing_log(&id).await.unwrap();
    assert_eq!(
        log.iter().filter(|d| d.mode == RoutingMode::Resume).count(),
        1
    );
    assert_eq!(
        orch.get_history(&id).await.unwrap().messages.len(),
        transcript_len + 1
    );
}

#[tokio::test]
async fn test_resume_rejects_unknown_task() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());
    let id = start_routine(&orch).await.consultation_id;

    let err = orch.resume_task(&id, "no-such-task").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidResume { .. }));
}

#[tokio::test]
async fn test_quick_research_does_not_suspend() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());
    let id = start_routine(&orch).await.consultation_id;

    let answered = orch
        .research(&id, "any papers on chronic cough?")
        .await
        .unwrap();
    assert!(answered.pending_task.is_none());

    let citations = orch
        .session_context(&id)
        .await
        .unwrap()
        .findings
        .literature
        .len();
    assert!(citations > 0);

    let stats = orch.task_stats(&id).await.unwrap();
    assert_eq!(stats.suspended, 0);
    assert!(orch.pending_tasks(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_requires_active_consultation() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());
    let id = start_routine(&orch).await.consultation_id;

    let task_id = orch
        .research(&id, DEEP_QUERY)
        .await
        .unwrap()
        .pending_task
        .expect("deep search suspends");
    orch.pause_consultation(&id).await.unwrap();

    let err = orch.resume_task(&id, &task_id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    orch.resume_consultation(&id).await.unwrap();
    assert!(orch.resume_task(&id, &task_id).await.is_ok());
}
