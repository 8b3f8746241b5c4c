//! Tool runtime coordinator
//!
//! Uniform entry point for every tool call made by an agent. Each attempt
//! passes through:
//! 1. the tool's circuit breaker (fail fast while open)
//! 2. a per-call deadline
//! 3. the retry manager, for idempotent tools or confirmed retries only
//!
//! Unconfirmed calls to non-idempotent tools are counted in the task-local
//! set up by [`track_side_effects`], so an outer retry loop can tell that an
//! attempt has already reached such a tool.

use crate::config::{BreakerConfig, EngineConfig, RetryConfig, TimeoutConfig};
use crate::errors::{EngineError, Result};
use crate::tools::breaker::CircuitBreaker;
use crate::tools::registry::ToolRegistry;
use crate::tools::retry::RetryManager;
use crate::tools::types::{Tool, ToolInvocation, ToolStats};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

tokio::task_local! {
    static SIDE_EFFECTS: Arc<AtomicU32>;
}

/// Run `work`, counting into `counter` every unconfirmed non-idempotent
/// tool attempt it makes
pub async fn track_side_effects<F: Future>(counter: Arc<AtomicU32>, work: F) -> F::Output {
    SIDE_EFFECTS.scope(counter, work).await
}

/// Tool runtime coordinator
pub struct ToolRuntime {
    registry: ToolRegistry,

    /// One breaker per registered tool
    breakers: HashMap<String, Arc<CircuitBreaker>>,

    retry: RetryManager,

    /// Non-idempotent tools whose retries are confirmed by configuration
    confirmed: HashSet<String>,

    timeouts: TimeoutConfig,

    stats: Mutex<HashMap<String, ToolStats>>,
}

impl ToolRuntime {
    /// Runtime with default retry, breaker and timeout settings
    pub fn new(registry: ToolRegistry) -> Self {
        Self::with_settings(
            registry,
            &RetryConfig::default(),
            &BreakerConfig::default(),
            TimeoutConfig::default(),
        )
    }

    pub fn from_config(registry: ToolRegistry, config: &EngineConfig) -> Self {
        Self::with_settings(
            registry,
            &config.retry,
            &config.breaker,
            config.timeouts.clone(),
        )
    }

    pub fn with_settings(
        registry: ToolRegistry,
        retry: &RetryConfig,
        breaker: &BreakerConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        let cooldown = Duration::from_millis(breaker.cooldown_ms);
        let breakers = registry
            .tool_ids()
            .into_iter()
            .map(|id| {
                let cb = Arc::new(CircuitBreaker::new(
                    id.clone(),
                    breaker.failure_threshold,
                    cooldown,
                ));
                (id, cb)
            })
            .collect();

        Self {
            registry,
            breakers,
            retry: RetryManager::from_config(retry),
            confirmed: retry.confirmed_tools.iter().cloned().collect(),
            timeouts,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Invoke a tool
    ///
    /// Idempotent tools are retried on transient failure; non-idempotent
    /// tools get exactly one attempt unless listed in
    /// `retry.confirmed_tools` (see [`ToolRuntime::invoke_confirmed`]).
    /// `timeout` overrides the configured per-tool deadline.
    pub async fn invoke(
        &self,
        tool_id: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolInvocation> {
        self.invoke_inner(tool_id, params, timeout, false).await
    }

    /// Invoke a tool with caller confirmation that retrying is safe
    pub async fn invoke_confirmed(
        &self,
        tool_id: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolInvocation> {
        self.invoke_inner(tool_id, params, timeout, true).await
    }

    async fn invoke_inner(
        &self,
        tool_id: &str,
        params: Value,
        timeout: Option<Duration>,
        confirmed: bool,
    ) -> Result<ToolInvocation> {
        let tool = self
            .registry
            .get(tool_id)
            .ok_or_else(|| EngineError::ToolUnavailable {
                tool: tool_id.to_string(),
                reason: "not registered".to_string(),
            })?;

        let idempotent = tool.spec().idempotent;
        let confirmed = confirmed || self.confirmed.contains(tool_id);
        let deadline = timeout.unwrap_or_else(|| self.timeouts.tool(tool_id));
        let single = RetryManager::single_attempt();
        let retry = if idempotent || confirmed {
            &self.retry
        } else {
            &single
        };

        let attempts = AtomicU32::new(0);
        let started = Instant::now();
        let outcome = retry
            .execute_with_retry(|attempt| {
                attempts.store(attempt, Ordering::Relaxed);
                let side_effect = !idempotent && !confirmed;
                self.attempt_once(&tool, tool_id, params.clone(), deadline, attempt, side_effect)
            })
            .await;

        match outcome {
            Ok(result) => Ok(ToolInvocation::success(
                tool_id,
                params,
                result,
                started.elapsed(),
                idempotent,
                attempts.load(Ordering::Relaxed),
            )),
            Err(e) => {
                warn!(tool = %tool_id, error = %e, "tool invocation failed");
                Err(e)
            }
        }
    }

    async fn attempt_once(
        &self,
        tool: &Arc<dyn Tool>,
        tool_id: &str,
        params: Value,
        deadline: Duration,
        attempt: u32,
        side_effect: bool,
    ) -> Result<Value> {
        let breaker = self.breaker(tool_id);
        if let Some(breaker) = &breaker {
            if let Err(e) = breaker.check() {
                self.with_stats(tool_id, ToolStats::record_rejected);
                return Err(e);
            }
        }
        if attempt > 1 {
            self.with_stats(tool_id, ToolStats::record_retry);
        }
        if side_effect {
            let _ = SIDE_EFFECTS.try_with(|count| count.fetch_add(1, Ordering::SeqCst));
        }

        let started = Instant::now();
        let outcome = match tokio::time::timeout(deadline, tool.call(params)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::ToolTimeout {
                tool: tool_id.to_string(),
                duration_ms: deadline.as_millis() as u64,
            }),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => {
                if let Some(breaker) = &breaker {
                    breaker.record_success();
                }
                self.with_stats(tool_id, |s| s.record_success(elapsed_ms));
            }
            Err(e) => {
                if let Some(breaker) = &breaker {
                    breaker.record_failure();
                }
                self.with_stats(tool_id, |s| s.record_failure(elapsed_ms));
                debug!(tool = %tool_id, attempt, error = %e, "tool attempt failed");
            }
        }
        outcome
    }

    /// Registered and not behind an open circuit
    pub fn is_available(&self, tool_id: &str) -> bool {
        self.registry.contains(tool_id)
            && self
                .breakers
                .get(tool_id)
                .map(|b| b.allows())
                .unwrap_or(true)
    }

    /// Tools from `required` that cannot be called right now
    pub fn unavailable<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|id| !self.is_available(id))
            .collect()
    }

    pub fn breaker(&self, tool_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(tool_id).cloned()
    }

    pub fn stats(&self, tool_id: &str) -> Option<ToolStats> {
        self.lock_stats().get(tool_id).cloned()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_ids(&self) -> Vec<String> {
        self.registry.tool_ids()
    }

    fn with_stats(&self, tool_id: &str, update: impl FnOnce(&mut ToolStats)) {
        update(self.lock_stats().entry(tool_id.to_string()).or_default());
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, HashMap<String, ToolStats>> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ToolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRuntime")
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish()
    }
}
