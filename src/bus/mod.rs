//! Agent-to-agent message bus
//!
//! In-process publish/subscribe partitioned by consultation id. Each
//! partition assigns sequence numbers in issuance order and fans envelopes
//! out to its subscribers in that order. Delivery is at-least-once: a
//! partition keeps a bounded log that can be redelivered, and every
//! [`Subscription`] drops envelopes at or below its sequence watermark.

pub mod types;

pub use types::{A2aPayload, Envelope, IdempotencyKey};

use crate::types::{AgentKind, ConsultationId};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

const DEFAULT_RETAINED: usize = 256;

#[derive(Default)]
struct Partition {
    next_sequence: u64,
    log: VecDeque<Envelope>,
    subscribers: Vec<mpsc::UnboundedSender<Envelope>>,
}

impl Partition {
    fn fan_out(&mut self, envelope: &Envelope) {
        self.subscribers
            .retain(|tx| tx.send(envelope.clone()).is_ok());
    }
}

/// Per-consultation publish/subscribe bus
pub struct MessageBus {
    partitions: Mutex<HashMap<ConsultationId, Partition>>,
    retained: usize,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAINED)
    }

    /// Bus keeping the last `retained` envelopes of each partition
    pub fn with_retention(retained: usize) -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
            retained: retained.max(1),
        }
    }

    /// Publish to a consultation's partition, returning the sealed envelope
    pub fn publish(
        &self,
        consultation_id: &str,
        from: Option<AgentKind>,
        payload: A2aPayload,
    ) -> Envelope {
        let mut partitions = self.lock();
        let partition = partitions.entry(consultation_id.to_string()).or_default();
        partition.next_sequence += 1;

        let envelope = Envelope {
            key: IdempotencyKey {
                consultation_id: consultation_id.to_string(),
                sequence: partition.next_sequence,
            },
            from,
            payload,
            timestamp: Utc::now(),
        };

        partition.log.push_back(envelope.clone());
        while partition.log.len() > self.retained {
            partition.log.pop_front();
        }
        partition.fan_out(&envelope);

        debug!(
            consultation_id,
            sequence = envelope.key.sequence,
            kind = envelope.payload.kind(),
            "a2a message published"
        );
        envelope
    }

    /// Subscribe to envelopes published from now on
    pub fn subscribe(&self, consultation_id: &str) -> Subscription {
        let mut partitions = self.lock();
        let partition = partitions.entry(consultation_id.to_string()).or_default();
        let (tx, rx) = mpsc::unbounded_channel();
        partition.subscribers.push(tx);
        Subscription::new(consultation_id, rx, partition.next_sequence)
    }

    /// Subscribe and replay retained envelopes after `after_sequence`
    pub fn subscribe_from(&self, consultation_id: &str, after_sequence: u64) -> Subscription {
        let mut partitions = self.lock();
        let partition = partitions.entry(consultation_id.to_string()).or_default();
        let (tx, rx) = mpsc::unbounded_channel();
        for envelope in partition
            .log
            .iter()
            .filter(|e| e.key.sequence > after_sequence)
        {
            let _ = tx.send(envelope.clone());
        }
        partition.subscribers.push(tx);
        Subscription::new(consultation_id, rx, after_sequence)
    }

    /// Deliver retained envelopes from `from_sequence` again to every subscriber
    ///
    /// Returns the number of envelopes re-sent.
    pub fn redeliver(&self, consultation_id: &str, from_sequence: u64) -> usize {
        let mut partitions = self.lock();
        let Some(partition) = partitions.get_mut(consultation_id) else {
            return 0;
        };
        let replay: Vec<Envelope> = partition
            .log
            .iter()
            .filter(|e| e.key.sequence >= from_sequence)
            .cloned()
            .collect();
        for envelope in &replay {
            partition.fan_out(envelope);
        }
        replay.len()
    }

    /// Last sequence issued for a consultation, 0 if none
    pub fn last_sequence(&self, consultation_id: &str) -> u64 {
        self.lock()
            .get(consultation_id)
            .map(|p| p.next_sequence)
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, consultation_id: &str) -> usize {
        self.lock()
            .get(consultation_id)
            .map(|p| p.subscribers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Forget a consultation's partition
    pub fn drop_partition(&self, consultation_id: &str) {
        self.lock().remove(consultation_id);
    }

    /// Consultations with a live partition
    pub fn partition_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConsultationId, Partition>> {
        self.partitions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of one partition, deduplicating by sequence
pub struct Subscription {
    consultation_id: ConsultationId,
    receiver: mpsc::UnboundedReceiver<Envelope>,
    watermark: u64,
    duplicates: u64,
}

impl Subscription {
    fn new(
        consultation_id: &str,
        receiver: mpsc::UnboundedReceiver<Envelope>,
        watermark: u64,
    ) -> Self {
        Self {
            consultation_id: consultation_id.to_string(),
            receiver,
            watermark,
            duplicates: 0,
        }
    }

    /// Next unseen envelope; `None` once the partition is dropped
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let envelope = self.receiver.recv().await?;
            if self.accept(&envelope) {
                return Some(envelope);
            }
        }
    }

    /// Every unseen envelope already delivered, in order
    pub fn try_drain(&mut self) -> Vec<Envelope> {
        let mut drained = Vec::new();
        while let Ok(envelope) = self.receiver.try_recv() {
            if self.accept(&envelope) {
                drained.push(envelope);
            }
        }
        drained
    }

    fn accept(&mut self, envelope: &Envelope) -> bool {
        if envelope.key.sequence <= self.watermark {
            self.duplicates += 1;
            debug!(
                consultation_id = %self.consultation_id,
                sequence = envelope.key.sequence,
                "duplicate a2a delivery discarded"
            );
            return false;
        }
        self.watermark = envelope.key.sequence;
        true
    }

    pub fn consultation_id(&self) -> &str {
        &self.consultation_id
    }

    /// Highest sequence accepted so far
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn duplicates_discarded(&self) -> u64 {
        self.duplicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn note(text: &str) -> A2aPayload {
        A2aPayload::Notification {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_sequences_per_partition() {
        let bus = MessageBus::new();
        assert_eq!(bus.publish("a", None, note("1")).sequence(), 1);
        assert_eq!(bus.publish("a", None, note("2")).sequence(), 2);
        assert_eq!(bus.publish("b", None, note("1")).sequence(), 1);
        assert_eq!(bus.last_sequence("a"), 2);
        assert_eq!(bus.last_sequence("missing"), 0);
    }

    #[test]
    fn test_partition_isolation() {
        let bus = MessageBus::new();
        let mut sub_a = bus.subscribe("a");
        bus.publish("b", Some(AgentKind::Triage), note("other"));
        bus.publish("a", Some(AgentKind::Triage), note("mine"));

        let got = sub_a.try_drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].key.consultation_id, "a");
    }

    #[test]
    fn test_redelivery_is_deduplicated() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe("c");
        for i in 0..3 {
            bus.publish("c", None, note(&i.to_string()));
        }
        assert_eq!(sub.try_drain().len(), 3);

        assert_eq!(bus.redeliver("c", 2), 2);
        assert!(sub.try_drain().is_empty());
        assert_eq!(sub.duplicates_discarded(), 2);
    }

    #[test]
    fn test_subscribe_from_replays() {
        let bus = MessageBus::new();
        for i in 0..4 {
            bus.publish("c", None, note(&i.to_string()));
        }
        let mut sub = bus.subscribe_from("c", 2);
        let seqs: Vec<u64> = sub.try_drain().iter().map(Envelope::sequence).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn test_retention_bound() {
        let bus = MessageBus::with_retention(2);
        for i in 0..5 {
            bus.publish("c", None, note(&i.to_string()));
        }
        let mut sub = bus.subscribe_from("c", 0);
        let seqs: Vec<u64> = sub.try_drain().iter().map(Envelope::sequence).collect();
        assert_eq!(seqs, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_recv_in_issuance_order() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe("c");
        bus.publish("c", None, note("first"));
        bus.publish("c", None, note("second"));

        assert_eq!(sub.recv().await.unwrap().payload, note("first"));
        assert_eq!(sub.recv().await.unwrap().payload, note("second"));
        assert_eq!(sub.watermark(), 2);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = MessageBus::new();
        let sub = bus.subscribe("c");
        assert_eq!(bus.subscriber_count("c"), 1);
        drop(sub);
        bus.publish("c", None, note("x"));
        assert_eq!(bus.subscriber_count("c"), 0);
    }

    #[quickcheck]
    fn prop_redelivery_never_duplicates(count: u8, replay_from: u8) -> bool {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe("p");
        let count = (count % 20) as u64;
        for i in 0..count {
            bus.publish("p", None, note(&i.to_string()));
        }
        bus.redeliver("p", replay_from as u64);
        let seqs: Vec<u64> = sub.try_drain().iter().map(Envelope::sequence).collect();
        seqs == (1..=count).collect::<Vec<_>>()
    }
}
