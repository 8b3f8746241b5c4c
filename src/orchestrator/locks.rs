//! Per-consultation turn locks
//!
//! A turn holds its consultation's lock from start to finish, so turns on
//! one consultation are serialised while other consultations proceed.
//! Waiters are served in arrival order. An entry exists only while some
//! caller holds or waits for the lock; the last guard out removes it.

use crate::config::{LockPolicyKind, LockingConfig};
use crate::errors::{EngineError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Debug)]
pub struct TurnLocks {
    policy: LockPolicyKind,
    wait: Duration,
    locks: Mutex<LockMap>,
}

/// Held turn lock; dropping it releases the turn
#[derive(Debug)]
pub struct TurnGuard<'a> {
    locks: &'a TurnLocks,
    consultation_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.prune(&self.consultation_id);
    }
}

impl TurnLocks {
    pub fn new(config: &LockingConfig) -> Self {
        Self {
            policy: config.policy,
            wait: Duration::from_millis(config.wait_timeout_ms),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> LockPolicyKind {
        self.policy
    }

    /// Take the turn lock for a consultation under the configured policy
    pub async fn acquire(&self, consultation_id: &str) -> Result<TurnGuard<'_>> {
        let lock = self.lock_for(consultation_id);
        let acquired = match self.policy {
            LockPolicyKind::FailFast => {
                lock.try_lock_owned()
                    .map_err(|_| EngineError::ConcurrencyConflict {
                        consultation_id: consultation_id.to_string(),
                        waited_ms: 0,
                    })
            }
            LockPolicyKind::Block => {
                let started = Instant::now();
                match tokio::time::timeout(self.wait, lock.lock_owned()).await {
                    Ok(guard) => {
                        debug!(
                            consultation_id,
                            waited_ms = started.elapsed().as_millis() as u64,
                            "turn lock acquired"
                        );
                        Ok(guard)
                    }
                    Err(_) => Err(EngineError::ConcurrencyConflict {
                        consultation_id: consultation_id.to_string(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    }),
                }
            }
        };

        match acquired {
            Ok(guard) => Ok(TurnGuard {
                locks: self,
                consultation_id: consultation_id.to_string(),
                guard: Some(guard),
            }),
            Err(e) => {
                self.prune(consultation_id);
                Err(e)
            }
        }
    }

    /// Whether a turn currently holds the lock
    pub fn is_held(&self, consultation_id: &str) -> bool {
        self.map()
            .get(consultation_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Consultations with a lock entry
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_for(&self, consultation_id: &str) -> Arc<AsyncMutex<()>> {
        self.map()
            .entry(consultation_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Remove the entry when nobody holds or waits for it
    fn prune(&self, consultation_id: &str) {
        let mut locks = self.map();
        let idle = locks
            .get(consultation_id)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        if idle {
            locks.remove(consultation_id);
        }
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
