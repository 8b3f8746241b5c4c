//! Per-tool circuit breaker
//!
//! N consecutive failures → open → cooldown → half-open → success → closed.
//! While open, calls fail fast without reaching the tool. Half-open admits a
//! single trial call; other callers are turned away until it reports back, or
//! until a cooldown passes without a report and another trial is let in.

use crate::errors::{EngineError, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen { trial_started: Instant },
}

/// Observable breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    tool: String,
    threshold: u32,
    cooldown: Duration,
    state: Mutex<CircuitState>,
    consecutive_failures: AtomicU32,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(tool: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            tool: tool.into(),
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Admit a call, or fail fast with `ToolUnavailable` while open or
    /// while a half-open trial call is outstanding
    pub fn check(&self) -> Result<()> {
        let mut state = self.lock_state();
        match *state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.cooldown {
                    info!(tool = %self.tool, "circuit breaker half-open, allowing a trial call");
                    *state = CircuitState::HalfOpen {
                        trial_started: Instant::now(),
                    };
                    Ok(())
                } else {
                    Err(self.reject(format!(
                        "circuit open, retry in {}ms",
                        self.cooldown.saturating_sub(since.elapsed()).as_millis()
                    )))
                }
            }
            CircuitState::HalfOpen { trial_started } => {
                if trial_started.elapsed() >= self.cooldown {
                    warn!(tool = %self.tool, "half-open trial call never reported, allowing another");
                    *state = CircuitState::HalfOpen {
                        trial_started: Instant::now(),
                    };
                    Ok(())
                } else {
                    Err(self.reject("circuit half-open, trial call in flight".to_string()))
                }
            }
        }
    }

    /// Whether a call would currently be admitted, without changing state
    pub fn allows(&self) -> bool {
        match *self.lock_state() {
            CircuitState::Closed => true,
            CircuitState::Open { since } => since.elapsed() >= self.cooldown,
            CircuitState::HalfOpen { trial_started } => trial_started.elapsed() >= self.cooldown,
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.lock_state();
        if *state != CircuitState::Closed {
            info!(tool = %self.tool, "circuit breaker closed after successful call");
            *state = CircuitState::Closed;
        }
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold {
            let mut state = self.lock_state();
            if !matches!(*state, CircuitState::Open { .. }) {
                warn!(
                    tool = %self.tool,
                    failures,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "circuit breaker opened"
                );
                *state = CircuitState::Open {
                    since: Instant::now(),
                };
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        match *self.lock_state() {
            CircuitState::Closed => BreakerState::Closed,
            CircuitState::Open { .. } => BreakerState::Open,
            CircuitState::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Calls turned away while open
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn reject(&self, reason: String) -> EngineError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        EngineError::ToolUnavailable {
            tool: self.tool.clone(),
            reason,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CircuitState> {
        // A poisoned breaker still holds a valid state value
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new("t", 3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.check().is_ok());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(
            breaker.check(),
            Err(EngineError::ToolUnavailable { .. })
        ));
        assert!(!breaker.allows());
        assert_eq!(breaker.rejected(), 1);
    }

    #[test]
    fn test_success_resets_count() {
        let breaker = CircuitBreaker::new("t", 3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new("t", 1, Duration::from_millis(20));
        breaker.record_failure();
        assert!(breaker.check().is_err());

        std::thread::sleep(Duration::from_millis(40));
        assert!(breaker.allows());
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_failed_trial_reopens() {
        let breaker = CircuitBreaker::new("t", 2, Duration::from_millis(20));
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(40));
        assert!(breaker.check().is_ok());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_half_open_admits_one_trial() {
        let breaker = CircuitBreaker::new("t", 1, Duration::from_millis(20));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(40));

        assert!(breaker.check().is_ok());
        assert!(matches!(
            breaker.check(),
            Err(EngineError::ToolUnavailable { .. })
        ));
        assert!(!breaker.allows());
        assert_eq!(breaker.rejected(), 1);

        breaker.record_success();
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn test_abandoned_trial_is_replaced() {
        let breaker = CircuitBreaker::new("t", 1, Duration::from_millis(20));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(40));
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_err());

        std::thread::sleep(Duration::from_millis(40));
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }
}
