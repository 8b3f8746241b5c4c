//! End-to-end consultation flows against the built-in agents and tools

mod common;

use careflow::audit::AuditEventType;
use careflow::context::RiskLevel;
use careflow::orchestrator::{ResidentState, RoutingMode};
use careflow::types::SenderRole;
use careflow::{
    AgentKind, ConsultationStatus, ContinueRequest, EngineError, MessageType, PatientContext,
    StartRequest,
};
use common::{orchestrator, patient, start_routine, test_config, SwitchBackend};

#[tokio::test]
async fn test_critical_chest_pain_is_transferred() {
    let (orch, audit) = orchestrator(SwitchBackend::new(), test_config());

    let started = orch
        .start_consultation(StartRequest::new(
            "Sudden crushing chest pain spreading to my left arm",
            PatientContext::new()
                .with_age(58)
                .with_symptom("chest pain")
                .with_severity("severe"),
        ))
        .await
        .unwrap();

    assert_eq!(started.status, ConsultationStatus::Transferred);
    assert_eq!(started.agent_assigned, Some(AgentKind::Triage));
    assert!(started.initial_response.contains("emergency"));

    let err = orch
        .continue_consultation(&started.consultation_id, ContinueRequest::new("hello?"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    orch.flush_audit().await;
    let transferred = audit
        .events_for(&started.consultation_id)
        .into_iter()
        .filter(|e| e.event_type == AuditEventType::StatusTransition)
        .any(|e| e.payload["to"] == "transferred");
    assert!(transferred);
    assert_eq!(orch.resident(), ResidentState::default());
}

#[tokio::test]
async fn test_red_flag_profile_with_plain_query_is_transferred() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());

    let patient = PatientContext::new()
        .with_age(62)
        .with_symptom("chest pain")
        .with_symptom("shortness of breath")
        .with_severity("severe")
        .with_severity("sudden onset");
    let started = orch
        .start_consultation(StartRequest::new("I would like some advice please", patient))
        .await
        .unwrap();

    assert_eq!(started.status, ConsultationStatus::Transferred);
    assert_eq!(started.agent_assigned, Some(AgentKind::Triage));

    let findings = orch
        .session_context(&started.consultation_id)
        .await
        .unwrap()
        .findings;
    assert_eq!(findings.risk_level(), Some(RiskLevel::Critical));
    assert!(findings.red_flags.contains("chest pain"));
    assert!(findings.red_flags.contains("shortness of breath"));
}

#[tokio::test]
async fn test_routine_start_is_answered_by_triage() {
    let (orch, audit) = orchestrator(SwitchBackend::new(), test_config());
    let started = start_routine(&orch).await;

    assert_eq!(started.status, ConsultationStatus::Active);
    assert_eq!(started.agent_assigned, Some(AgentKind::Triage));
    assert!(!started.needs_human_review);
    assert!(started.pending_task.is_none());

    orch.flush_audit().await;
    let events = audit.events_for(&started.consultation_id);
    let transitions = events
        .iter()
        .filter(|e| e.event_type == AuditEventType::StatusTransition)
        .count();
    let routing = events
        .iter()
        .filter(|e| e.event_type == AuditEventType::RoutingDecision)
        .count();
    assert_eq!(transitions, 3);
    assert_eq!(routing, 1);
}

#[tokio::test]
async fn test_history_is_ordered_and_alternating() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());
    let id = start_routine(&orch).await.consultation_id;

    orch.triage(&id, "the cough is worse at night").await.unwrap();
    orch.triage(&id, "now I also have a fever").await.unwrap();
    orch.continue_consultation(&id, ContinueRequest::new("what should I do about it?"))
        .await
        .unwrap();

    let view = orch.get_history(&id).await.unwrap();
    assert_eq!(view.messages.len(), 8);
    for pair in view.messages.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
    }
    for (i, message) in view.messages.iter().enumerate() {
        if i % 2 == 0 {
            assert_eq!(message.role, SenderRole::Patient);
        } else {
            assert_ne!(message.role, SenderRole::Patient);
        }
    }
    assert!(!view.summary.is_empty());
}

#[tokio::test]
async fn test_idempotency_key_replays_first_response() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());
    let id = start_routine(&orch).await.consultation_id;

    let request = ContinueRequest::new("my cough is worse")
        .with_type(MessageType::Symptom)
        .with_idempotency_key("turn-1");
    let first = orch
        .continue_consultation(&id, request.clone())
        .await
        .unwrap();
    let len = orch.get_history(&id).await.unwrap().messages.len();

    let second = orch.continue_consultation(&id, request).await.unwrap();
    assert_eq!(first.message_id, second.message_id);
    assert_eq!(first.response, second.response);
    assert_eq!(orch.get_history(&id).await.unwrap().messages.len(), len);
}

#[tokio::test]
async fn test_full_assessment_runs_as_pipeline() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());
    let id = start_routine(&orch).await.consultation_id;

    orch.continue_consultation(
        &id,
        ContinueRequest::new("I have a cough and fever, please assess everything")
            .with_type(MessageType::FullAssessment),
    )
    .await
    .unwrap();

    let log = orch.routing_log(&id).await.unwrap();
    assert!(log.iter().any(|d| d.mode == RoutingMode::Pipeline
        && d.agents
            == vec![
                AgentKind::Triage,
                AgentKind::Diagnosis,
                AgentKind::Treatment,
                AgentKind::SpecialistRouter
            ]));
    assert_eq!(orch.task_stats(&id).await.unwrap().peak_running, 1);
}

#[tokio::test]
async fn test_second_opinion_runs_members_together() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());
    let id = start_routine(&orch).await.consultation_id;

    let response = orch
        .continue_consultation(
            &id,
            ContinueRequest::new("I would like a second opinion on this cough")
                .with_type(MessageType::SecondOpinion),
        )
        .await
        .unwrap();
    assert_ne!(response.status, ConsultationStatus::AwaitingAgent);

    let log = orch.routing_log(&id).await.unwrap();
    assert!(log.iter().any(|d| d.mode == RoutingMode::Consensus));

    let stats = orch.task_stats(&id).await.unwrap();
    assert_eq!(stats.peak_running, 3);
    assert_eq!(stats.running, 0);
}

#[tokio::test]
async fn test_targeted_operations_route_explicitly() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());
    let id = start_routine(&orch).await.consultation_id;

    orch.plan_treatment(&id, "what can I take for it?")
        .await
        .unwrap();
    orch.research(&id, "any papers on chronic cough?")
        .await
        .unwrap();

    let log = orch.routing_log(&id).await.unwrap();
    let explicit: Vec<_> = log
        .iter()
        .filter(|d| d.mode == RoutingMode::Single && d.rationale.starts_with("explicit"))
        .map(|d| d.agents.clone())
        .collect();
    assert_eq!(
        explicit,
        vec![vec![AgentKind::Treatment], vec![AgentKind::Research]]
    );
}

#[tokio::test]
async fn test_pause_resume_close_lifecycle() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());
    let id = start_routine(&orch).await.consultation_id;

    assert_eq!(
        orch.pause_consultation(&id).await.unwrap(),
        ConsultationStatus::Paused
    );
    let err = orch
        .continue_consultation(&id, ContinueRequest::new("still there?"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    assert_eq!(
        orch.resume_consultation(&id).await.unwrap(),
        ConsultationStatus::Active
    );
    assert_eq!(
        orch.close_consultation(&id).await.unwrap(),
        ConsultationStatus::Completed
    );

    assert!(matches!(
        orch.pause_consultation(&id).await,
        Err(EngineError::InvalidState { .. })
    ));
    assert!(matches!(
        orch.continue_consultation(&id, ContinueRequest::new("one more thing"))
            .await,
        Err(EngineError::InvalidState { .. })
    ));
    assert_eq!(
        orch.get_history(&id).await.unwrap().status,
        ConsultationStatus::Completed
    );
}

#[tokio::test]
async fn test_closed_consultation_leaves_nothing_resident() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());
    let id = start_routine(&orch).await.consultation_id;
    orch.triage(&id, "the cough is worse at night").await.unwrap();

    let live = orch.resident();
    assert_eq!(live.consultations, 1);
    assert_eq!(live.turn_locks, 0);
    assert_eq!(live.bus_partitions, 1);

    orch.close_consultation(&id).await.unwrap();
    assert_eq!(orch.resident(), ResidentState::default());

    let view = orch.get_history(&id).await.unwrap();
    assert_eq!(view.status, ConsultationStatus::Completed);
    assert_eq!(view.messages.len(), 4);
    assert!(matches!(
        orch.pause_consultation(&id).await,
        Err(EngineError::InvalidState { .. })
    ));
    assert_eq!(orch.resident(), ResidentState::default());
}

#[tokio::test]
async fn test_review_flag_stays_until_acknowledged() {
    let backend = SwitchBackend::new();
    let (orch, audit) = orchestrator(backend.clone(), test_config());
    let id = start_routine(&orch).await.consultation_id;

    backend.set_failing(true);
    assert!(orch.triage(&id, "the cough is worse").await.unwrap().needs_human_review);
    backend.set_failing(false);

    let answered = orch.triage(&id, "a bit better today").await.unwrap();
    assert_eq!(answered.agent_responded, Some(AgentKind::Triage));
    assert!(answered.needs_human_review);

    assert!(orch.acknowledge_review(&id, "dr-lee").await.unwrap());
    assert!(!orch.acknowledge_review(&id, "dr-lee").await.unwrap());
    assert!(!orch.get_history(&id).await.unwrap().needs_human_review);

    let answered = orch.triage(&id, "much better now").await.unwrap();
    assert!(!answered.needs_human_review);

    assert!(matches!(
        orch.acknowledge_review(&id, "  ").await,
        Err(EngineError::Validation(_))
    ));

    orch.flush_audit().await;
    let completed = audit
        .events_for(&id)
        .into_iter()
        .filter(|e| e.event_type == AuditEventType::HumanReviewCompleted)
        .count();
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn test_rejects_bad_requests() {
    let (orch, _) = orchestrator(SwitchBackend::new(), test_config());

    let err = orch
        .start_consultation(StartRequest::new("   ", patient()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = orch
        .continue_consultation("no-such-consultation", ContinueRequest::new("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    assert!(orch.list_consultations().await.unwrap().is_empty());
}
