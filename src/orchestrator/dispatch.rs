//! Running one agent task: deadline, retry and cancellation

use crate::agents::{Agent, AgentInput, AgentResult, AgentStep, Suspension};
use crate::context::SessionContext;
use crate::errors::{EngineError, Result};
use crate::tools::{track_side_effects, RetryManager, ToolRuntime};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// How an agent task ended
#[derive(Debug)]
pub enum RunOutcome {
    Completed { result: AgentResult, attempts: u32 },
    Suspended { suspension: Suspension, attempts: u32 },
    Failed { error: EngineError, attempts: u32 },
    Cancelled { attempts: u32 },
}

impl RunOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            RunOutcome::Completed { attempts, .. }
            | RunOutcome::Suspended { attempts, .. }
            | RunOutcome::Failed { attempts, .. }
            | RunOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentRunner {
    retry: RetryManager,
    timeout: Duration,
}

impl AgentRunner {
    pub fn new(retry: RetryManager, timeout: Duration) -> Self {
        Self { retry, timeout }
    }

    /// Run `handle`, or `resume` when a suspension is given
    ///
    /// Each attempt gets the full agent deadline. A cancel signal drops the
    /// attempt at its next await point. An attempt that already reached a
    /// non-idempotent tool without confirmation is not retried.
    pub async fn run(
        &self,
        agent: &dyn Agent,
        ctx: &SessionContext,
        input: &AgentInput,
        suspension: Option<&Suspension>,
        tools: &ToolRuntime,
        mut cancel: watch::Receiver<bool>,
    ) -> RunOutcome {
        let kind = agent.kind();
        let attempts = AtomicU32::new(0);
        let deadline = self.timeout;
        let side_effects = Arc::new(AtomicU32::new(0));

        let retryable = |e: &EngineError| {
            if !e.is_transient() {
                return false;
            }
            let unconfirmed = side_effects.load(Ordering::SeqCst);
            if unconfirmed > 0 {
                warn!(agent = %kind, task_id = %input.task_id, unconfirmed, "not retrying after non-idempotent tool call");
            }
            unconfirmed == 0
        };

        let work = self.retry.execute_with_retry_if(retryable, |attempt| {
            attempts.store(attempt, Ordering::Relaxed);
            debug!(agent = %kind, task_id = %input.task_id, attempt, "agent attempt");
            let step = match suspension {
                Some(s) => agent.resume(ctx, input, s, tools),
                None => agent.handle(ctx, input, tools),
            };
            let step = track_side_effects(side_effects.clone(), step);
            async move {
                match tokio::time::timeout(deadline, step).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(EngineError::AgentTimeout {
                        agent: kind.to_string(),
                        duration_ms: deadline.as_millis() as u64,
                    }),
                }
            }
        });

        let outcome: Option<Result<AgentStep>> = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => None,
            outcome = work => Some(outcome),
        };
        let attempts = attempts.load(Ordering::Relaxed);

        match outcome {
            None => {
                warn!(agent = %kind, task_id = %input.task_id, "agent task cancelled");
                RunOutcome::Cancelled { attempts }
            }
            Some(Ok(AgentStep::Complete(result))) => RunOutcome::Completed { result, attempts },
            Some(Ok(AgentStep::Suspend(suspension))) => RunOutcome::Suspended {
                suspension,
                attempts,
            },
            Some(Err(error)) => {
                warn!(agent = %kind, task_id = %input.task_id, attempts, error = %error, "agent task failed");
                RunOutcome::Failed { error, attempts }
            }
        }
    }
}

/// Resolves once the flag is raised; never resolves if the sender is gone
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow_and_update() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow_and_update() {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentOutput, TriageAgent};
    use crate::agents::test_support;
    use crate::config::{BreakerConfig, RetryConfig, TimeoutConfig};
    use crate::tools::{Tool, ToolRegistry, ToolSpec};
    use crate::types::{AgentKind, MessageType, PatientContext};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Stalling;

    #[async_trait]
    impl Agent for Stalling {
        fn kind(&self) -> AgentKind {
            AgentKind::Research
        }

        fn required_tools(&self) -> &'static [&'static str] {
            &[]
        }

        async fn handle(
            &self,
            _ctx: &SessionContext,
            _input: &AgentInput,
            _tools: &ToolRuntime,
        ) -> Result<AgentStep> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(AgentStep::Complete(AgentResult::new(
                AgentKind::Research,
                "late",
                1.0,
                AgentOutput::Research {
                    results: vec![],
                    deep: false,
                },
            )))
        }
    }

    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Agent for Flaky {
        fn kind(&self) -> AgentKind {
            AgentKind::Diagnosis
        }

        fn required_tools(&self) -> &'static [&'static str] {
            &[]
        }

        async fn handle(
            &self,
            _ctx: &SessionContext,
            _input: &AgentInput,
            _tools: &ToolRuntime,
        ) -> Result<AgentStep> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Backend("model overloaded".to_string()))
        }
    }

    /// Non-idempotent tool that always fails
    struct Charge {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Charge {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("charge", "bills the patient", serde_json::json!({}), false)
        }

        async fn call(&self, _params: serde_json::Value) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Backend("gateway reset".to_string()))
        }
    }

    /// Calls `charge` before answering
    struct Billing;

    #[async_trait]
    impl Agent for Billing {
        fn kind(&self) -> AgentKind {
            AgentKind::Treatment
        }

        fn required_tools(&self) -> &'static [&'static str] {
            &["charge"]
        }

        async fn handle(
            &self,
            _ctx: &SessionContext,
            _input: &AgentInput,
            tools: &ToolRuntime,
        ) -> Result<AgentStep> {
            tools.invoke("charge", serde_json::json!({}), None).await?;
            Err(EngineError::Validation("unreachable".to_string()))
        }
    }

    fn billing_runtime(confirmed: &[&str]) -> (ToolRuntime, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Charge {
            calls: calls.clone(),
        }));
        let retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter: false,
            confirmed_tools: confirmed.iter().map(|t| t.to_string()).collect(),
        };
        let runtime = ToolRuntime::with_settings(
            registry,
            &retry,
            &BreakerConfig::default(),
            TimeoutConfig::default(),
        );
        (runtime, calls)
    }

    fn input() -> AgentInput {
        AgentInput::new("t-1", "c-1", "I have a rash", MessageType::Symptom)
    }

    #[tokio::test]
    async fn test_completes() {
        let runner = AgentRunner::new(RetryManager::with_config(3, 1), Duration::from_secs(5));
        let (_tx, rx) = watch::channel(false);
        let outcome = runner
            .run(
                &TriageAgent::new(),
                &SessionContext::new(PatientContext::new()),
                &input(),
                None,
                &test_support::runtime(),
                rx,
            )
            .await;
        assert!(matches!(outcome, RunOutcome::Completed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_retried_then_exhausted() {
        let runner = AgentRunner::new(RetryManager::with_config(2, 1), Duration::from_millis(20));
        let (_tx, rx) = watch::channel(false);
        let outcome = runner
            .run(
                &Stalling,
                &SessionContext::default(),
                &input(),
                None,
                &test_support::runtime(),
                rx,
            )
            .await;
        match outcome {
            RunOutcome::Failed { error, attempts } => {
                assert_eq!(attempts, 2);
                assert!(matches!(error, EngineError::RetriesExhausted { .. }));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attempts_bounded() {
        let agent = Flaky {
            calls: AtomicUsize::new(0),
        };
        let runner = AgentRunner::new(RetryManager::with_config(3, 1), Duration::from_secs(1));
        let (_tx, rx) = watch::channel(false);
        let outcome = runner
            .run(
                &agent,
                &SessionContext::default(),
                &input(),
                None,
                &test_support::runtime(),
                rx,
            )
            .await;
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unconfirmed_tool_call_is_not_retried() {
        let (tools, calls) = billing_runtime(&[]);
        let runner = AgentRunner::new(RetryManager::with_config(3, 1), Duration::from_secs(1));
        let (_tx, rx) = watch::channel(false);
        let outcome = runner
            .run(&Billing, &SessionContext::default(), &input(), None, &tools, rx)
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match outcome {
            RunOutcome::Failed { error, attempts } => {
                assert_eq!(attempts, 1);
                assert!(matches!(error, EngineError::Backend(_)));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_confirmed_tool_retries_inside_the_tool_layer() {
        let (tools, calls) = billing_runtime(&["charge"]);
        let runner = AgentRunner::new(RetryManager::with_config(3, 1), Duration::from_secs(1));
        let (_tx, rx) = watch::channel(false);
        let outcome = runner
            .run(&Billing, &SessionContext::default(), &input(), None, &tools, rx)
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts() {
        let runner = AgentRunner::new(RetryManager::single_attempt(), Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);
        let tools = test_support::runtime();
        let ctx = SessionContext::default();
        let input = input();
        let run = runner.run(&Stalling, &ctx, &input, None, &tools, rx);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send_replace(true);
        };
        let (outcome, _) = tokio::join!(run, cancel);
        assert!(matches!(outcome, RunOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_resume_without_support_fails() {
        let runner = AgentRunner::new(RetryManager::single_attempt(), Duration::from_secs(1));
        let (_tx, rx) = watch::channel(false);
        let suspension = Suspension {
            reason: "x".to_string(),
            state: serde_json::Value::Null,
            partial: Default::default(),
            tools_used: vec![],
        };
        let outcome = runner
            .run(
                &TriageAgent::new(),
                &SessionContext::default(),
                &input(),
                Some(&suspension),
                &test_support::runtime(),
                rx,
            )
            .await;
        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                error: EngineError::InvalidResume { .. },
                ..
            }
        ));
    }
}
