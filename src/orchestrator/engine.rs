//! Consultation orchestrator
//!
//! A turn holds its consultation's turn lock from start to finish. The
//! record itself is locked only to mutate it (routing, task bookkeeping,
//! context merge, status transitions); agents run against a cloned context
//! with no record lock held. Readers take the published history snapshot
//! and never wait for a turn.
//!
//! Lifecycle operations (`pause_consultation`, `resume_consultation`,
//! `close_consultation`) take the same turn lock. Issued while a turn is in
//! flight they wait under the locking policy like any other turn and fail
//! with `ConcurrencyConflict` if the turn outlasts the wait; `cancel_task`
//! is the way to interrupt a running turn.
//!
//! Once a consultation reaches a terminal status and its last write has
//! succeeded, its slot, turn lock and bus partition are released. Later
//! reads load it from the store without keeping it resident.

use super::builder::OrchestratorBuilder;
use super::checkpoint::Checkpoint;
use super::dispatch::{AgentRunner, RunOutcome};
use super::locks::TurnLocks;
use super::routing::{DispatchPlan, RoutingDecision, RoutingMode, RoutingPolicy};
use super::tasks::TaskStats;
use crate::agents::{AgentInput, AgentRegistry, AgentResult, Suspension};
use crate::audit::{AuditDispatcher, AuditEvent, AuditEventType, AuditStats};
use crate::bus::{Envelope, MessageBus, Subscription};
use crate::config::{CancelPolicy, EngineConfig};
use crate::context::SessionContext;
use crate::errors::{EngineError, Result};
use crate::store::{ConsultationRecord, ConsultationStore};
use crate::tools::ToolRuntime;
use crate::types::{
    AgentKind, AgentTask, ConsultationId, ContinueRequest, ContinueResponse, HistoryView,
    MessageType, SenderRole, StartRequest, StartResponse, TaskId, TaskInput, TaskStatus,
};
use crate::workflow::{ConsultationStatus, WorkflowEvent};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const REVIEW_MESSAGE: &str = "Your question has been passed to a clinician for review. \
    If your symptoms get worse in the meantime, seek urgent care.";
const TRANSFER_MESSAGE: &str = "This needs emergency care. Call emergency services or go to \
    the nearest emergency department now.";
const SUMMARY_CHARS: usize = 160;

/// Live state of one loaded consultation
struct Slot {
    id: ConsultationId,
    record: AsyncMutex<ConsultationRecord>,
    snapshot: watch::Sender<Arc<HistoryView>>,
    cancel: watch::Sender<bool>,
    in_flight: AtomicBool,
    subscriptions: Mutex<HashMap<AgentKind, Subscription>>,
}

/// Marks a turn as cancellable for as long as it lives
struct InFlight<'a>(&'a Slot);

impl<'a> InFlight<'a> {
    fn enter(slot: &'a Slot) -> Self {
        slot.cancel.send_replace(false);
        slot.in_flight.store(true, Ordering::SeqCst);
        Self(slot)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

/// What committing agent work produced
#[derive(Debug)]
enum Settled {
    Answer(AgentResult),
    Transferred(AgentResult),
    LowConfidence(AgentResult),
    Suspended {
        agent: AgentKind,
        task_id: TaskId,
        reason: String,
    },
    /// Flagged for human review; `tentative` is shown as preliminary
    Degraded {
        reason: String,
        tentative: Option<AgentResult>,
    },
    /// Consultation moved to failed
    Ended { reason: String },
}

/// Outcome of a consensus group
enum GroupSettled {
    Results {
        results: Vec<AgentResult>,
        pending: Option<TaskId>,
    },
    Stopped(Settled),
}

/// Final answer of a turn before it is written to the transcript
struct Reply {
    agent: Option<AgentKind>,
    text: String,
    confidence: f64,
    next_steps: Vec<String>,
    pending_task: Option<TaskId>,
}

impl Reply {
    fn from_result(result: AgentResult) -> Self {
        Self {
            agent: Some(result.agent),
            text: result.content,
            confidence: result.confidence,
            next_steps: result.next_steps,
            pending_task: None,
        }
    }

    fn system(text: impl Into<String>) -> Self {
        Self {
            agent: None,
            text: text.into(),
            confidence: 0.0,
            next_steps: Vec::new(),
            pending_task: None,
        }
    }

    /// Prefix the answers of earlier stages
    fn after(mut self, earlier: &[AgentResult]) -> Self {
        if earlier.is_empty() {
            return self;
        }
        let mut sections: Vec<String> = earlier
            .iter()
            .map(|r| format!("{}: {}", r.agent.display_name(), r.content))
            .collect();
        sections.push(match self.agent {
            Some(agent) => format!("{}: {}", agent.display_name(), self.text),
            None => self.text.clone(),
        });
        self.text = sections.join("\n\n");

        let mut steps: Vec<String> = Vec::new();
        for step in earlier
            .iter()
            .flat_map(|r| r.next_steps.iter())
            .chain(self.next_steps.iter())
        {
            if !steps.contains(step) {
                steps.push(step.clone());
            }
        }
        self.next_steps = steps;

        if self.agent.is_some() {
            self.confidence = earlier
                .iter()
                .map(|r| r.confidence)
                .fold(self.confidence, f64::min);
        }
        self
    }
}

/// Per-consultation state currently held in memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResidentState {
    pub consultations: usize,
    pub turn_locks: usize,
    pub bus_partitions: usize,
}

/// Multi-agent consultation engine
pub struct Orchestrator {
    config: EngineConfig,
    agents: AgentRegistry,
    tools: Arc<ToolRuntime>,
    store: Arc<dyn ConsultationStore>,
    audit: AuditDispatcher,
    bus: MessageBus,
    routing: RoutingPolicy,
    locks: TurnLocks,
    runner: AgentRunner,
    slots: Mutex<HashMap<ConsultationId, Arc<Slot>>>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub(crate) fn from_parts(
        config: EngineConfig,
        agents: AgentRegistry,
        tools: Arc<ToolRuntime>,
        store: Arc<dyn ConsultationStore>,
        audit: AuditDispatcher,
    ) -> Self {
        let runner = AgentRunner::new(
            crate::tools::RetryManager::from_config(&config.retry),
            config.timeouts.agent(),
        );
        Self {
            routing: RoutingPolicy::new(config.routing.clone()),
            locks: TurnLocks::new(&config.locking),
            bus: MessageBus::new(),
            runner,
            config,
            agents,
            tools,
            store,
            audit,
            slots: Mutex::new(HashMap::new()),
        }
    }

    // ---- public operations ----

    /// Open a consultation and answer its first query
    pub async fn start_consultation(&self, request: StartRequest) -> Result<StartResponse> {
        request.validate()?;

        let id = Uuid::new_v4().to_string();
        let token = Uuid::new_v4().simple().to_string();
        let mut record =
            ConsultationRecord::new(id.clone(), request.patient_context.clone(), token.clone());
        self.transition(&mut record, WorkflowEvent::Activate, "consultation opened")?;

        let slot = self.install(record);
        let _turn = self.locks.acquire(&id).await?;
        {
            let mut rec = slot.record.lock().await;
            self.save(&slot, &mut rec).await?;
        }
        info!(consultation_id = %id, "consultation started");

        let response = self
            .run_turn(&slot, &request.initial_query, request.message_type, None)
            .await?;
        self.retire(&id, response.status);

        Ok(StartResponse {
            consultation_id: id,
            session_token: token,
            initial_response: response.response,
            agent_assigned: response.agent_responded,
            status: response.status,
            needs_human_review: response.needs_human_review,
            pending_task: response.pending_task,
            timestamp: response.timestamp,
        })
    }

    /// Add a turn to an active consultation
    ///
    /// A repeated idempotency key returns the first response unchanged.
    pub async fn continue_consultation(
        &self,
        consultation_id: &str,
        request: ContinueRequest,
    ) -> Result<ContinueResponse> {
        request.validate()?;
        let slot = self.slot(consultation_id).await?;
        let _turn = self.locks.acquire(consultation_id).await?;

        if let Some(key) = &request.idempotency_key {
            let cached = slot.record.lock().await.responses.get(key).cloned();
            if let Some(response) = cached {
                debug!(consultation_id, idempotency_key = %key, "replaying cached response");
                return Ok(response);
            }
        }

        let response = self
            .run_turn(
                &slot,
                &request.message,
                request.message_type,
                request.target_agent,
            )
            .await?;

        if let Some(key) = request.idempotency_key {
            let mut rec = slot.record.lock().await;
            rec.responses.insert(key, response.clone());
            self.save(&slot, &mut rec).await?;
        }
        self.retire(consultation_id, response.status);
        Ok(response)
    }

    pub async fn triage(&self, consultation_id: &str, message: &str) -> Result<ContinueResponse> {
        self.targeted(consultation_id, message, MessageType::Symptom, AgentKind::Triage)
            .await
    }

    pub async fn diagnose(&self, consultation_id: &str, message: &str) -> Result<ContinueResponse> {
        self.targeted(consultation_id, message, MessageType::Diagnosis, AgentKind::Diagnosis)
            .await
    }

    pub async fn plan_treatment(
        &self,
        consultation_id: &str,
        message: &str,
    ) -> Result<ContinueResponse> {
        self.targeted(consultation_id, message, MessageType::Treatment, AgentKind::Treatment)
            .await
    }

    pub async fn research(&self, consultation_id: &str, message: &str) -> Result<ContinueResponse> {
        self.targeted(consultation_id, message, MessageType::Research, AgentKind::Research)
            .await
    }

    pub async fn route_specialist(
        &self,
        consultation_id: &str,
        message: &str,
    ) -> Result<ContinueResponse> {
        self.targeted(
            consultation_id,
            message,
            MessageType::Referral,
            AgentKind::SpecialistRouter,
        )
        .await
    }

    async fn targeted(
        &self,
        consultation_id: &str,
        message: &str,
        message_type: MessageType,
        agent: AgentKind,
    ) -> Result<ContinueResponse> {
        let request = ContinueRequest::new(message)
            .with_type(message_type)
            .with_target(agent);
        self.continue_consultation(consultation_id, request).await
    }

    /// Transcript, summary and follow-up; never waits for a running turn
    pub async fn get_history(&self, consultation_id: &str) -> Result<HistoryView> {
        let slot = self.slot(consultation_id).await?;
        let view = HistoryView::clone(&slot.snapshot.borrow());
        Ok(view)
    }

    /// Resume a suspended task from its checkpoint
    pub async fn resume_task(
        &self,
        consultation_id: &str,
        task_id: &str,
    ) -> Result<ContinueResponse> {
        let slot = self.slot(consultation_id).await?;
        let _turn = self.locks.acquire(consultation_id).await?;

        {
            let rec = slot.record.lock().await;
            let status = rec.consultation.status;
            if !status.accepts_turns() {
                return Err(EngineError::InvalidState {
                    from: status.as_str().to_string(),
                    action: "resume a task".to_string(),
                });
            }
            let task = rec.tasks.get(task_id).ok_or_else(|| EngineError::InvalidResume {
                task_id: task_id.to_string(),
                reason: "unknown task".to_string(),
            })?;
            if task.status != TaskStatus::Suspended {
                return Err(EngineError::InvalidResume {
                    task_id: task_id.to_string(),
                    reason: format!("task is {}", task.status.as_str()),
                });
            }
        }

        let checkpoint = self
            .store
            .take_checkpoint(consultation_id, task_id)
            .await?
            .ok_or_else(|| EngineError::InvalidResume {
                task_id: task_id.to_string(),
                reason: "no checkpoint to resume from".to_string(),
            })?;
        let response = self.resume_from(&slot, checkpoint).await?;
        self.retire(consultation_id, response.status);
        Ok(response)
    }

    async fn resume_from(&self, slot: &Slot, checkpoint: Checkpoint) -> Result<ContinueResponse> {
        let _flight = InFlight::enter(slot);
        let kind = checkpoint.task.agent;
        let task_id = checkpoint.task.id.clone();

        let ctx = {
            let mut rec = slot.record.lock().await;
            rec.tasks.start(&task_id)?;
            self.record_routing(
                &mut rec,
                RoutingDecision::new(
                    vec![kind],
                    RoutingMode::Resume,
                    format!("resuming after: {}", checkpoint.suspension.reason),
                ),
            );
            self.transition(&mut rec, WorkflowEvent::Dispatch, "suspended task resumed")?;
            self.audit.emit(AuditEvent::new(
                &slot.id,
                AuditEventType::TaskResumed,
                json!({"task_id": task_id, "agent": kind}),
            ));
            self.save(slot, &mut rec).await?;
            rec.context.clone()
        };

        let input = &checkpoint.task.input;
        let outcome = self
            .run_task(
                slot,
                kind,
                &task_id,
                &ctx,
                &input.message,
                input.message_type,
                Vec::new(),
                Some(&checkpoint.suspension),
            )
            .await;
        let settled = self.commit(slot, kind, &task_id, outcome).await?;
        let settled = self
            .resolve(slot, kind, settled, &input.message, input.message_type)
            .await?;
        self.finish(slot, settled, &[], None).await
    }

    pub async fn pause_consultation(&self, consultation_id: &str) -> Result<ConsultationStatus> {
        self.apply_event(consultation_id, WorkflowEvent::Pause, "paused by caller")
            .await
    }

    pub async fn resume_consultation(&self, consultation_id: &str) -> Result<ConsultationStatus> {
        self.apply_event(consultation_id, WorkflowEvent::Resume, "resumed by caller")
            .await
    }

    pub async fn close_consultation(&self, consultation_id: &str) -> Result<ConsultationStatus> {
        self.apply_event(consultation_id, WorkflowEvent::Complete, "closed by caller")
            .await
    }

    /// Clear the human review flag once a clinician has seen the
    /// consultation
    ///
    /// The flag is sticky: every response reports it until this is called.
    /// Returns whether a review was outstanding.
    pub async fn acknowledge_review(&self, consultation_id: &str, reviewer: &str) -> Result<bool> {
        if reviewer.trim().is_empty() {
            return Err(EngineError::Validation("reviewer must not be empty".to_string()));
        }
        let slot = self.slot(consultation_id).await?;
        let _turn = self.locks.acquire(consultation_id).await?;
        let mut rec = slot.record.lock().await;
        if !rec.consultation.clear_review() {
            return Ok(false);
        }
        info!(consultation_id, reviewer, "human review completed");
        self.audit.emit(AuditEvent::new(
            consultation_id,
            AuditEventType::HumanReviewCompleted,
            json!({"reviewer": reviewer}),
        ));
        self.save(&slot, &mut rec).await?;
        Ok(true)
    }

    /// Signal the running task of a consultation to stop
    ///
    /// Returns false when no turn is in flight.
    pub fn cancel_task(&self, consultation_id: &str) -> bool {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(consultation_id)
            .cloned();
        match slot {
            Some(slot) if slot.in_flight.load(Ordering::SeqCst) => {
                slot.cancel.send_replace(true);
                info!(consultation_id, "cancellation requested");
                true
            }
            _ => false,
        }
    }

    pub async fn task_stats(&self, consultation_id: &str) -> Result<TaskStats> {
        let slot = self.slot(consultation_id).await?;
        let stats = slot.record.lock().await.tasks.stats();
        Ok(stats)
    }

    /// Suspended tasks waiting for `resume_task`
    pub async fn pending_tasks(&self, consultation_id: &str) -> Result<Vec<TaskId>> {
        let slot = self.slot(consultation_id).await?;
        let rec = slot.record.lock().await;
        Ok(rec.tasks.suspended().iter().map(|t| t.id.clone()).collect())
    }

    pub async fn session_context(&self, consultation_id: &str) -> Result<SessionContext> {
        let slot = self.slot(consultation_id).await?;
        let ctx = slot.record.lock().await.context.clone();
        Ok(ctx)
    }

    pub async fn routing_log(&self, consultation_id: &str) -> Result<Vec<RoutingDecision>> {
        let slot = self.slot(consultation_id).await?;
        let log = slot.record.lock().await.routing_log.clone();
        Ok(log)
    }

    pub async fn list_consultations(&self) -> Result<Vec<ConsultationId>> {
        self.store.list().await
    }

    pub fn audit_stats(&self) -> AuditStats {
        self.audit.stats()
    }

    /// Wait until every audit event emitted so far reached the sink
    pub async fn flush_audit(&self) {
        self.audit.flush().await
    }

    pub fn tools(&self) -> &ToolRuntime {
        &self.tools
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- turn execution ----

    async fn run_turn(
        &self,
        slot: &Slot,
        message: &str,
        message_type: MessageType,
        target: Option<AgentKind>,
    ) -> Result<ContinueResponse> {
        let _flight = InFlight::enter(slot);

        let plan = {
            let mut rec = slot.record.lock().await;
            let status = rec.consultation.status;
            if !status.accepts_turns() {
                return Err(EngineError::InvalidState {
                    from: status.as_str().to_string(),
                    action: "take a new turn".to_string(),
                });
            }

            let (plan, rationale) =
                self.routing
                    .plan(message, message_type, target, &rec.context.findings);
            let missing = self.missing_tools(&plan)?;
            rec.consultation
                .append(SenderRole::Patient, message, None, Some(message_type));

            if !missing.is_empty() {
                let reason = format!("required tools unavailable: {}", missing.join(", "));
                self.record_routing(
                    &mut rec,
                    RoutingDecision::for_plan(&plan, format!("{}; {}", rationale, reason)),
                );
                self.request_review(&mut rec, &reason, "tool_unavailable");
                return self.reply(slot, &mut rec, Reply::system(REVIEW_MESSAGE)).await;
            }

            self.record_routing(&mut rec, RoutingDecision::for_plan(&plan, rationale));
            self.save(slot, &mut rec).await?;
            plan
        };

        match plan {
            DispatchPlan::Single(kind) => {
                let settled = self
                    .run_stage(slot, kind, message, message_type, Vec::new())
                    .await?;
                let settled = self
                    .resolve(slot, kind, settled, message, message_type)
                    .await?;
                self.finish(slot, settled, &[], None).await
            }
            DispatchPlan::Pipeline(kinds) => {
                self.run_pipeline(slot, &kinds, message, message_type).await
            }
            DispatchPlan::Consensus {
                members,
                synthesiser,
            } => {
                self.run_consensus(slot, &members, synthesiser, message, message_type)
                    .await
            }
        }
    }

    /// Stages run one at a time; the first one that does not answer
    /// confidently ends the pipeline
    async fn run_pipeline(
        &self,
        slot: &Slot,
        kinds: &[AgentKind],
        message: &str,
        message_type: MessageType,
    ) -> Result<ContinueResponse> {
        let mut answered: Vec<AgentResult> = Vec::new();
        for &kind in kinds {
            match self
                .run_stage(slot, kind, message, message_type, Vec::new())
                .await?
            {
                Settled::Answer(result) => answered.push(result),
                other => {
                    let settled = self
                        .resolve(slot, kind, other, message, message_type)
                        .await?;
                    return self.finish(slot, settled, &answered, None).await;
                }
            }
        }

        match answered.pop() {
            Some(last) => {
                self.finish(slot, Settled::Answer(last), &answered, None)
                    .await
            }
            None => {
                self.finish(
                    slot,
                    Settled::Degraded {
                        reason: "empty pipeline".to_string(),
                        tentative: None,
                    },
                    &[],
                    None,
                )
                .await
            }
        }
    }

    /// Members run as one task group, bounded by `fanout.max_parallel`,
    /// then the synthesiser sees all their results
    async fn run_consensus(
        &self,
        slot: &Slot,
        members: &[AgentKind],
        synthesiser: AgentKind,
        message: &str,
        message_type: MessageType,
    ) -> Result<ContinueResponse> {
        let group = Uuid::new_v4().to_string();
        let tasks = members
            .iter()
            .map(|&kind| {
                AgentTask::new(slot.id.clone(), kind, task_input(message, message_type))
                    .in_group(group.clone())
            })
            .collect();
        let (ctx, ids) = self.begin(slot, tasks).await?;
        info!(
            consultation_id = %slot.id,
            group_id = %group,
            members = members.len(),
            "consensus group dispatched"
        );

        let ctx = &ctx;
        let outcomes: Vec<(AgentKind, TaskId, RunOutcome)> =
            stream::iter(members.iter().copied().zip(ids))
                .map(|(kind, task_id)| async move {
                    let outcome = self
                        .run_task(
                            slot,
                            kind,
                            &task_id,
                            ctx,
                            message,
                            message_type,
                            Vec::new(),
                            None,
                        )
                        .await;
                    (kind, task_id, outcome)
                })
                .buffered(self.config.fanout.max_parallel.max(1))
                .collect()
                .await;

        match self.commit_group(slot, outcomes).await? {
            GroupSettled::Results { results, pending } => {
                let settled = self
                    .run_stage(slot, synthesiser, message, message_type, results.clone())
                    .await?;
                let settled = self
                    .resolve(slot, synthesiser, settled, message, message_type)
                    .await?;
                self.finish(slot, settled, &results, pending).await
            }
            GroupSettled::Stopped(settled) => self.finish(slot, settled, &[], None).await,
        }
    }

    /// Dispatch one agent and commit its outcome
    async fn run_stage(
        &self,
        slot: &Slot,
        kind: AgentKind,
        message: &str,
        message_type: MessageType,
        peer_results: Vec<AgentResult>,
    ) -> Result<Settled> {
        let task = AgentTask::new(slot.id.clone(), kind, task_input(message, message_type));
        let (ctx, ids) = self.begin(slot, vec![task]).await?;
        let task_id = ids.into_iter().next().ok_or_else(|| {
            EngineError::NotFound(format!("task for {} was not scheduled", kind))
        })?;

        let outcome = self
            .run_task(
                slot,
                kind,
                &task_id,
                &ctx,
                message,
                message_type,
                peer_results,
                None,
            )
            .await;
        self.commit(slot, kind, &task_id, outcome).await
    }

    /// Schedule and start tasks, then move to awaiting-agent
    async fn begin(
        &self,
        slot: &Slot,
        tasks: Vec<AgentTask>,
    ) -> Result<(SessionContext, Vec<TaskId>)> {
        let mut rec = slot.record.lock().await;
        let agents: Vec<String> = tasks.iter().map(|t| t.agent.to_string()).collect();
        let ids: Vec<TaskId> = tasks.into_iter().map(|t| rec.tasks.schedule(t)).collect();
        for id in &ids {
            rec.tasks.start(id)?;
        }
        self.transition(
            &mut rec,
            WorkflowEvent::Dispatch,
            &format!("dispatched {}", agents.join(", ")),
        )?;
        self.save(slot, &mut rec).await?;
        Ok((rec.context.clone(), ids))
    }

    /// Run an agent with no record lock held
    #[allow(clippy::too_many_arguments)]
    async fn run_task(
        &self,
        slot: &Slot,
        kind: AgentKind,
        task_id: &TaskId,
        ctx: &SessionContext,
        message: &str,
        message_type: MessageType,
        peer_results: Vec<AgentResult>,
        suspension: Option<&Suspension>,
    ) -> RunOutcome {
        let agent = match self.agents.get(kind) {
            Ok(agent) => agent,
            Err(error) => return RunOutcome::Failed { error, attempts: 0 },
        };
        let input = AgentInput::new(task_id.clone(), slot.id.clone(), message, message_type)
            .with_peer_messages(self.peer_messages(slot, kind))
            .with_peer_results(peer_results);

        self.runner
            .run(
                agent.as_ref(),
                ctx,
                &input,
                suspension,
                &self.tools,
                slot.cancel.subscribe(),
            )
            .await
    }

    /// Record the outcome of one task and move the consultation on
    async fn commit(
        &self,
        slot: &Slot,
        kind: AgentKind,
        task_id: &TaskId,
        outcome: RunOutcome,
    ) -> Result<Settled> {
        let mut rec = slot.record.lock().await;
        let attempts = outcome.attempts();

        match outcome {
            RunOutcome::Completed { result, .. } => {
                rec.tasks.succeed(task_id, &summarise(&result), attempts)?;
                self.absorb(&mut rec, task_id, &result);

                if result.findings.has_critical_risk() {
                    self.transition(
                        &mut rec,
                        WorkflowEvent::Transfer,
                        "critical risk, emergency pathway",
                    )?;
                    self.save(slot, &mut rec).await?;
                    return Ok(Settled::Transferred(result));
                }

                self.transition(
                    &mut rec,
                    WorkflowEvent::AgentReturned,
                    &format!("{} answered", kind),
                )?;
                self.save(slot, &mut rec).await?;

                if result.meets(self.routing.threshold(kind)) {
                    Ok(Settled::Answer(result))
                } else {
                    Ok(Settled::LowConfidence(result))
                }
            }
            RunOutcome::Suspended { suspension, .. } => {
                let reason = suspension.reason.clone();
                self.park(slot, &mut rec, kind, task_id, suspension).await?;
                self.transition(
                    &mut rec,
                    WorkflowEvent::AgentReturned,
                    &format!("{} suspended", kind),
                )?;
                self.save(slot, &mut rec).await?;
                Ok(Settled::Suspended {
                    agent: kind,
                    task_id: task_id.clone(),
                    reason,
                })
            }
            RunOutcome::Failed { error, .. } => {
                rec.tasks.fail(task_id, &error.to_string(), attempts)?;
                self.transition(
                    &mut rec,
                    WorkflowEvent::AgentReturned,
                    &format!("{} failed", kind),
                )?;
                if error.surfaces_to_caller() {
                    self.save(slot, &mut rec).await?;
                    return Err(error);
                }
                let reason = format!("{} could not answer: {}", kind.display_name(), error);
                self.request_review(&mut rec, &reason, error.kind());
                self.save(slot, &mut rec).await?;
                Ok(Settled::Degraded {
                    reason,
                    tentative: None,
                })
            }
            RunOutcome::Cancelled { .. } => {
                rec.tasks.cancel(task_id)?;
                self.audit_cancel(&rec, kind, task_id);
                let settled = self.apply_cancel_policy(&mut rec)?;
                self.save(slot, &mut rec).await?;
                Ok(settled)
            }
        }
    }

    /// Commit every member of a consensus group under one record lock
    async fn commit_group(
        &self,
        slot: &Slot,
        outcomes: Vec<(AgentKind, TaskId, RunOutcome)>,
    ) -> Result<GroupSettled> {
        let mut rec = slot.record.lock().await;
        let mut results = Vec::new();
        let mut failures = Vec::new();
        let mut pending = None;
        let mut cancelled = false;

        for (kind, task_id, outcome) in outcomes {
            let attempts = outcome.attempts();
            match outcome {
                RunOutcome::Completed { result, .. } => {
                    rec.tasks.succeed(&task_id, &summarise(&result), attempts)?;
                    self.absorb(&mut rec, &task_id, &result);
                    results.push(result);
                }
                RunOutcome::Suspended { suspension, .. } => {
                    self.park(slot, &mut rec, kind, &task_id, suspension).await?;
                    pending = Some(task_id);
                }
                RunOutcome::Failed { error, .. } => {
                    rec.tasks.fail(&task_id, &error.to_string(), attempts)?;
                    failures.push(format!("{}: {}", kind, error));
                }
                RunOutcome::Cancelled { .. } => {
                    rec.tasks.cancel(&task_id)?;
                    self.audit_cancel(&rec, kind, &task_id);
                    cancelled = true;
                }
            }
        }

        if cancelled {
            let settled = self.apply_cancel_policy(&mut rec)?;
            self.save(slot, &mut rec).await?;
            return Ok(GroupSettled::Stopped(settled));
        }

        if let Some(index) = results.iter().position(|r| r.findings.has_critical_risk()) {
            self.transition(
                &mut rec,
                WorkflowEvent::Transfer,
                "critical risk, emergency pathway",
            )?;
            self.save(slot, &mut rec).await?;
            return Ok(GroupSettled::Stopped(Settled::Transferred(
                results.swap_remove(index),
            )));
        }

        self.transition(
            &mut rec,
            WorkflowEvent::AgentReturned,
            "consensus group returned",
        )?;

        if results.is_empty() {
            let reason = if failures.is_empty() {
                "no specialist produced an answer".to_string()
            } else {
                format!("no specialist produced an answer ({})", failures.join("; "))
            };
            self.request_review(&mut rec, &reason, "consensus_failed");
            self.save(slot, &mut rec).await?;
            return Ok(GroupSettled::Stopped(Settled::Degraded {
                reason,
                tentative: None,
            }));
        }
        if !failures.is_empty() {
            warn!(
                consultation_id = %slot.id,
                failed = failures.len(),
                answered = results.len(),
                "partial consensus"
            );
        }

        self.save(slot, &mut rec).await?;
        Ok(GroupSettled::Results { results, pending })
    }

    /// Hand a low-confidence answer to the specialist router; if the router
    /// is not confident either, the turn degrades to human review
    async fn resolve(
        &self,
        slot: &Slot,
        kind: AgentKind,
        settled: Settled,
        message: &str,
        message_type: MessageType,
    ) -> Result<Settled> {
        let result = match settled {
            Settled::LowConfidence(result) => result,
            other => return Ok(other),
        };
        if kind == AgentKind::SpecialistRouter {
            return self.ambiguity(slot, result).await;
        }

        let threshold = self.routing.threshold(kind);
        {
            let mut rec = slot.record.lock().await;
            let decision = RoutingDecision::new(
                vec![AgentKind::SpecialistRouter],
                RoutingMode::Reroute,
                format!(
                    "{} confidence {:.2} below threshold {:.2}",
                    kind.display_name(),
                    result.confidence,
                    threshold
                ),
            )
            .with_confidence(result.confidence);
            self.record_routing(&mut rec, decision);
            self.save(slot, &mut rec).await?;
        }

        match self
            .run_stage(
                slot,
                AgentKind::SpecialistRouter,
                message,
                message_type,
                vec![result],
            )
            .await?
        {
            Settled::LowConfidence(router) => self.ambiguity(slot, router).await,
            other => Ok(other),
        }
    }

    async fn ambiguity(&self, slot: &Slot, result: AgentResult) -> Result<Settled> {
        let err = EngineError::RoutingAmbiguity(format!(
            "no agent reached its confidence threshold (last: {} at {:.2})",
            result.agent, result.confidence
        ));
        let mut rec = slot.record.lock().await;
        self.request_review(&mut rec, &err.to_string(), err.kind());
        self.save(slot, &mut rec).await?;
        Ok(Settled::Degraded {
            reason: err.to_string(),
            tentative: Some(result),
        })
    }

    /// Write the turn's answer to the transcript and build the response
    async fn finish(
        &self,
        slot: &Slot,
        settled: Settled,
        earlier: &[AgentResult],
        pending: Option<TaskId>,
    ) -> Result<ContinueResponse> {
        let mut rec = slot.record.lock().await;

        let reply = match settled {
            Settled::Answer(result) => Reply::from_result(result),
            Settled::Transferred(result) => {
                let mut reply = Reply::from_result(result);
                reply.text = format!("{}\n\n{}", TRANSFER_MESSAGE, reply.text);
                reply
                    .next_steps
                    .insert(0, "Seek emergency care immediately".to_string());
                reply
            }
            Settled::LowConfidence(result) => {
                self.request_review(&mut rec, "answer below confidence threshold", "low_confidence");
                tentative_reply(result)
            }
            Settled::Suspended {
                agent,
                task_id,
                reason,
            } => Reply {
                agent: Some(agent),
                text: format!(
                    "{} is still working ({}). Resume task {} to get the full answer.",
                    agent.display_name(),
                    reason,
                    task_id
                ),
                confidence: 0.0,
                next_steps: vec![format!("Resume task {}", task_id)],
                pending_task: Some(task_id),
            },
            Settled::Degraded { reason, tentative } => {
                debug!(consultation_id = %slot.id, reason = %reason, "degraded reply");
                match tentative {
                    Some(result) => tentative_reply(result),
                    None => Reply::system(REVIEW_MESSAGE),
                }
            }
            Settled::Ended { reason } => {
                Reply::system(format!("This consultation has ended: {}.", reason))
            }
        };

        let mut reply = reply.after(earlier);
        if reply.pending_task.is_none() {
            reply.pending_task = pending;
        }
        self.reply(slot, &mut rec, reply).await
    }

    async fn reply(
        &self,
        slot: &Slot,
        rec: &mut ConsultationRecord,
        reply: Reply,
    ) -> Result<ContinueResponse> {
        let role = if reply.agent.is_some() {
            SenderRole::Agent
        } else {
            SenderRole::System
        };
        let message_id = rec
            .consultation
            .append(role, reply.text.clone(), reply.agent, None)
            .id
            .clone();
        if !reply.next_steps.is_empty() {
            rec.followup = reply.next_steps.clone();
        }
        self.save(slot, rec).await?;

        Ok(ContinueResponse {
            message_id,
            response: reply.text,
            agent_responded: reply.agent,
            next_steps: reply.next_steps,
            confidence_level: reply.confidence,
            status: rec.consultation.status,
            needs_human_review: rec.consultation.needs_human_review,
            pending_task: reply.pending_task,
            timestamp: Utc::now(),
        })
    }

    // ---- record mutation helpers (record lock held by the caller) ----

    fn transition(
        &self,
        rec: &mut ConsultationRecord,
        event: WorkflowEvent,
        reason: &str,
    ) -> Result<()> {
        let from = rec.consultation.status;
        let to = from.transition(event)?;
        rec.consultation.set_status(to);
        info!(
            consultation_id = %rec.id(),
            from = from.as_str(),
            to = to.as_str(),
            event = event.as_str(),
            "status transition"
        );
        self.audit.emit(AuditEvent::new(
            rec.id(),
            AuditEventType::StatusTransition,
            json!({"from": from, "to": to, "event": event, "reason": reason}),
        ));
        Ok(())
    }

    fn record_routing(&self, rec: &mut ConsultationRecord, decision: RoutingDecision) {
        info!(
            consultation_id = %rec.id(),
            agents = ?decision.agents,
            mode = ?decision.mode,
            rationale = %decision.rationale,
            "routing decision"
        );
        self.audit.emit(AuditEvent::new(
            rec.id(),
            AuditEventType::RoutingDecision,
            serde_json::to_value(&decision).unwrap_or_default(),
        ));
        rec.routing_log.push(decision);
    }

    fn request_review(&self, rec: &mut ConsultationRecord, reason: &str, cause: &str) {
        rec.consultation.flag_for_review();
        warn!(consultation_id = %rec.id(), cause, reason, "human review requested");
        self.audit.emit(AuditEvent::new(
            rec.id(),
            AuditEventType::HumanReviewRequested,
            json!({"reason": reason, "cause": cause}),
        ));
    }

    /// Merge a task's findings once and share what it published
    fn absorb(&self, rec: &mut ConsultationRecord, task_id: &TaskId, result: &AgentResult) {
        if !rec.context.apply(task_id, result.agent, &result.findings) {
            debug!(consultation_id = %rec.id(), task_id = %task_id, "delta already applied");
            return;
        }
        for payload in &result.publications {
            self.bus
                .publish(rec.id(), Some(result.agent), payload.clone());
        }
    }

    /// Persist a checkpoint and mark the task suspended
    async fn park(
        &self,
        slot: &Slot,
        rec: &mut ConsultationRecord,
        kind: AgentKind,
        task_id: &TaskId,
        suspension: Suspension,
    ) -> Result<()> {
        rec.tasks.suspend(task_id)?;
        let task = rec
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("task {}", task_id)))?;
        if let Err(e) = self
            .store
            .save_checkpoint(&Checkpoint::new(task, suspension.clone()))
            .await
        {
            return Err(self.persistence_failed(slot, rec, e));
        }
        rec.context.apply_partial(task_id, &suspension.partial);
        info!(consultation_id = %slot.id, task_id = %task_id, agent = %kind, "task suspended");
        self.audit.emit(AuditEvent::new(
            &slot.id,
            AuditEventType::TaskSuspended,
            json!({"task_id": task_id, "agent": kind, "reason": suspension.reason}),
        ));
        Ok(())
    }

    fn audit_cancel(&self, rec: &ConsultationRecord, kind: AgentKind, task_id: &TaskId) {
        self.audit.emit(AuditEvent::new(
            rec.id(),
            AuditEventType::TaskCancelled,
            json!({
                "task_id": task_id,
                "agent": kind,
                "policy": self.config.cancellation.policy,
            }),
        ));
    }

    fn apply_cancel_policy(&self, rec: &mut ConsultationRecord) -> Result<Settled> {
        let reason = "the running task was cancelled".to_string();
        match self.config.cancellation.policy {
            CancelPolicy::Fail => {
                self.transition(rec, WorkflowEvent::Fail, "task cancelled")?;
                Ok(Settled::Ended { reason })
            }
            CancelPolicy::HumanReview => {
                self.transition(rec, WorkflowEvent::AgentReturned, "task cancelled")?;
                self.request_review(rec, &reason, "cancelled");
                Ok(Settled::Degraded {
                    reason,
                    tentative: None,
                })
            }
        }
    }

    async fn apply_event(
        &self,
        consultation_id: &str,
        event: WorkflowEvent,
        reason: &str,
    ) -> Result<ConsultationStatus> {
        let slot = self.slot(consultation_id).await?;
        let _turn = self.locks.acquire(consultation_id).await?;
        let status = {
            let mut rec = slot.record.lock().await;
            self.transition(&mut rec, event, reason)?;
            self.save(&slot, &mut rec).await?;
            rec.consultation.status
        };
        self.retire(consultation_id, status);
        Ok(status)
    }

    /// Persist the record and publish a fresh snapshot
    async fn save(&self, slot: &Slot, rec: &mut ConsultationRecord) -> Result<()> {
        match self.store.save(rec).await {
            Ok(()) => {
                publish_snapshot(slot, rec);
                Ok(())
            }
            Err(e) => Err(self.persistence_failed(slot, rec, e)),
        }
    }

    /// A lost record write fails the consultation
    fn persistence_failed(
        &self,
        slot: &Slot,
        rec: &mut ConsultationRecord,
        err: EngineError,
    ) -> EngineError {
        error!(consultation_id = %rec.id(), error = %err, "consultation write failed");
        self.audit.emit(AuditEvent::new(
            rec.id(),
            AuditEventType::PersistenceFailure,
            json!({"error": err.to_string()}),
        ));
        if !rec.consultation.is_terminal() {
            if let Err(e) = self.transition(rec, WorkflowEvent::Fail, "record write failed") {
                warn!(consultation_id = %rec.id(), error = %e, "could not mark consultation failed");
            }
        }
        publish_snapshot(slot, rec);
        match err {
            EngineError::Persistence(_) => err,
            other => EngineError::Persistence(other.to_string()),
        }
    }

    // ---- slots ----

    /// Loaded consultation, reading it from the store on first use
    ///
    /// A terminal consultation read back from the store is served from a
    /// detached slot and not kept resident.
    async fn slot(&self, consultation_id: &str) -> Result<Arc<Slot>> {
        let cached = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(consultation_id)
            .cloned();
        if let Some(slot) = cached {
            return Ok(slot);
        }

        let record = self
            .store
            .load(consultation_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("consultation {}", consultation_id)))?;
        debug!(consultation_id, "consultation loaded from store");
        if record.consultation.is_terminal() {
            return Ok(Arc::new(self.new_slot(record, false)));
        }
        Ok(self.install(record))
    }

    fn install(&self, record: ConsultationRecord) -> Arc<Slot> {
        let id = record.id().to_string();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(id)
            .or_insert_with(|| Arc::new(self.new_slot(record, true)))
            .clone()
    }

    /// `live` slots subscribe every agent to the consultation's bus partition
    fn new_slot(&self, record: ConsultationRecord, live: bool) -> Slot {
        let id = record.id().to_string();
        let (snapshot, _) = watch::channel(Arc::new(record.history_view()));
        let (cancel, _) = watch::channel(false);
        let subscriptions = if live {
            AgentKind::ALL
                .into_iter()
                .map(|kind| (kind, self.bus.subscribe(&id)))
                .collect()
        } else {
            HashMap::new()
        };
        Slot {
            id,
            record: AsyncMutex::new(record),
            snapshot,
            cancel,
            in_flight: AtomicBool::new(false),
            subscriptions: Mutex::new(subscriptions),
        }
    }

    /// Release the slot and bus partition of a consultation that has
    /// settled in a terminal status; its turn lock goes when the turn ends
    fn retire(&self, consultation_id: &str, status: ConsultationStatus) {
        if !status.is_terminal() {
            return;
        }
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(consultation_id);
        self.bus.drop_partition(consultation_id);
        debug!(consultation_id, status = status.as_str(), "consultation released from memory");
    }

    /// Per-consultation state currently held in memory
    pub fn resident(&self) -> ResidentState {
        ResidentState {
            consultations: self.slots.lock().unwrap_or_else(|e| e.into_inner()).len(),
            turn_locks: self.locks.len(),
            bus_partitions: self.bus.partition_count(),
        }
    }

    /// Bus messages for `kind` published by other agents since it last ran
    fn peer_messages(&self, slot: &Slot, kind: AgentKind) -> Vec<Envelope> {
        let mut subscriptions = slot
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        subscriptions
            .get_mut(&kind)
            .map(Subscription::try_drain)
            .unwrap_or_default()
            .into_iter()
            .filter(|envelope| envelope.from != Some(kind))
            .collect()
    }

    fn missing_tools(&self, plan: &DispatchPlan) -> Result<Vec<String>> {
        let mut missing: Vec<String> = Vec::new();
        for kind in plan.agents() {
            let agent = self.agents.get(kind)?;
            for tool in self.tools.unavailable(agent.required_tools()) {
                if !missing.iter().any(|m| m == tool) {
                    missing.push(tool.to_string());
                }
            }
        }
        Ok(missing)
    }
}

fn publish_snapshot(slot: &Slot, rec: &ConsultationRecord) {
    slot.snapshot.send_replace(Arc::new(rec.history_view()));
}

fn task_input(message: &str, message_type: MessageType) -> TaskInput {
    TaskInput {
        message: message.to_string(),
        message_type,
    }
}

fn summarise(result: &AgentResult) -> String {
    result.content.chars().take(SUMMARY_CHARS).collect()
}

fn tentative_reply(result: AgentResult) -> Reply {
    let mut reply = Reply::from_result(result);
    reply.text = format!("{}\n\nPreliminary assessment: {}", REVIEW_MESSAGE, reply.text);
    reply
}
