//! Fire-and-forget audit delivery
//!
//! `emit` only enqueues. A background task drains the queue into the sink
//! in order; sink failures are logged and counted, never returned to the
//! caller.

use super::{AuditEvent, AuditEventType, AuditSink};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Counters for emitted and delivered events
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    pub emitted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub by_type: BTreeMap<AuditEventType, u64>,
}

enum Command {
    Record(AuditEvent),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit worker; clones share the same queue
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct AuditDispatcher {
    tx: mpsc::UnboundedSender<Command>,
    stats: Arc<Mutex<AuditStats>>,
}

impl AuditDispatcher {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let stats = Arc::new(Mutex::new(AuditStats::default()));
        let worker_stats = stats.clone();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Record(event) => {
                        let outcome = sink.record(&event).await;
                        let mut stats = worker_stats.lock().unwrap_or_else(|e| e.into_inner());
                        match outcome {
                            Ok(()) => stats.delivered += 1,
                            Err(e) => {
                                stats.failed += 1;
                                warn!(
                                    consultation_id = %event.consultation_id,
                                    event_type = %event.event_type,
                                    error = %e,
                                    "audit sink write failed"
                                );
                            }
                        }
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx, stats }
    }

    /// Queue an event for delivery
    pub fn emit(&self, event: AuditEvent) {
        {
            let mut stats = self.lock_stats();
            stats.emitted += 1;
            *stats.by_type.entry(event.event_type).or_default() += 1;
        }
        if self.tx.send(Command::Record(event)).is_err() {
            warn!("audit worker stopped, event dropped");
        }
    }

    /// Wait until every event emitted so far has reached the sink
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn stats(&self) -> AuditStats {
        self.lock_stats().clone()
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, AuditStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::errors::{EngineError, Result};
    use async_trait::async_trait;
    use serde_json::json;

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn record(&self, _event: &AuditEvent) -> Result<()> {
            Err(EngineError::Persistence("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let sink = MemoryAuditSink::new();
        let dispatcher = AuditDispatcher::new(Arc::new(sink.clone()));
        for i in 0..5 {
            dispatcher.emit(AuditEvent::new(
                "c",
                AuditEventType::StatusTransition,
                json!({"n": i}),
            ));
        }
        dispatcher.flush().await;

        let seen: Vec<i64> = sink
            .events()
            .iter()
            .map(|e| e.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        let stats = dispatcher.stats();
        assert_eq!(stats.emitted, 5);
        assert_eq!(stats.delivered, 5);
        assert_eq!(stats.by_type[&AuditEventType::StatusTransition], 5);
    }

    #[tokio::test]
    async fn test_sink_failure_is_not_fatal() {
        let dispatcher = AuditDispatcher::new(Arc::new(BrokenSink));
        dispatcher.emit(AuditEvent::new("c", AuditEventType::RoutingDecision, json!({})));
        dispatcher.flush().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);
    }
}
