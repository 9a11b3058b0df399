//! Durable outbound event queue with cursor-gated delivery
//!
//! Every transition is appended (fsynced) to events.jsonl before any
//! delivery attempt, and the cursor in cursor.json advances only after
//! the consumer acknowledges. On restart the queue tail beyond the
//! cursor replays: at-least-once delivery, with the cursor as the
//! exclusive dedup point. Delivery failures keep the event queued and
//! back off exponentially across flushes.

use crate::domain::types::{epoch_ms, TransitionEvent};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::storage::{StateStore, StorageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const EVENTS_FILE: &str = "events.jsonl";
const CURSOR_FILE: &str = "cursor.json";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("consumer rejected event: {0}")]
    Consumer(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Receiving end of the engine's output. The hosting layer implements
/// this once; everything behind it (marshaling, bridging) is theirs.
#[async_trait]
pub trait TransitionConsumer: Send + Sync {
    async fn deliver(&self, event: &TransitionEvent) -> Result<(), DispatchError>;
}

/// Default consumer for the shipped binary: one JSON line per event
pub struct StdoutConsumer;

#[async_trait]
impl TransitionConsumer for StdoutConsumer {
    async fn deliver(&self, event: &TransitionEvent) -> Result<(), DispatchError> {
        let json = serde_json::to_string(event).map_err(StorageError::Encode)?;
        println!("{json}");
        Ok(())
    }
}

/// One line of events.jsonl
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueRecord {
    seq: u64,
    #[serde(flatten)]
    event: TransitionEvent,
}

/// Persisted pointer to the last acknowledged event
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct DeliveryCursor {
    acked_seq: u64,
}

/// At-least-once event delivery over a durable queue
pub struct Dispatcher {
    store: StateStore,
    consumer: Arc<dyn TransitionConsumer>,
    metrics: Arc<Metrics>,
    cursor: DeliveryCursor,
    next_seq: u64,
    /// Queue tail beyond the cursor, oldest first
    pending: VecDeque<QueueRecord>,
    retry_base_ms: u64,
    retry_max_ms: u64,
    consecutive_failures: u32,
    /// Earliest wall-clock time the next delivery attempt is allowed
    next_attempt_at_ms: u64,
}

impl Dispatcher {
    /// Open the queue, loading the cursor and any undelivered tail
    pub fn open(
        config: &Config,
        store: StateStore,
        consumer: Arc<dyn TransitionConsumer>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, StorageError> {
        let cursor: DeliveryCursor = store.load(CURSOR_FILE)?.unwrap_or_default();
        let records: Vec<QueueRecord> = store.read_lines(EVENTS_FILE)?;

        let next_seq = records.last().map(|r| r.seq + 1).unwrap_or(cursor.acked_seq + 1).max(1);
        let pending: VecDeque<QueueRecord> =
            records.into_iter().filter(|r| r.seq > cursor.acked_seq).collect();

        if !pending.is_empty() {
            info!(
                acked_seq = %cursor.acked_seq,
                pending = %pending.len(),
                "dispatcher_replay_pending"
            );
        }

        Ok(Self {
            store,
            consumer,
            metrics,
            cursor,
            next_seq,
            pending,
            retry_base_ms: config.retry_base_ms(),
            retry_max_ms: config.retry_max_ms(),
            consecutive_failures: 0,
            next_attempt_at_ms: 0,
        })
    }

    /// Enqueue an event durably, then try to drain the queue.
    /// A delivery failure is returned but the event stays queued.
    pub async fn dispatch(&mut self, event: TransitionEvent) -> Result<(), DispatchError> {
        let record = QueueRecord { seq: self.next_seq, event };
        self.store.append_line(EVENTS_FILE, &record)?;
        self.next_seq += 1;

        debug!(seq = %record.seq, region = %record.event.region_id, "event_enqueued");
        self.pending.push_back(record);

        // A fresh event bypasses the backoff gate: failures before it may
        // have been transient and the consumer deserves a prompt attempt
        self.next_attempt_at_ms = 0;
        self.flush().await
    }

    /// Deliver queued events in order, advancing the cursor per ack.
    /// Honors the retry backoff window; call on every engine tick.
    pub async fn flush(&mut self) -> Result<(), DispatchError> {
        if self.pending.is_empty() || epoch_ms() < self.next_attempt_at_ms {
            return Ok(());
        }

        while let Some(record) = self.pending.front() {
            self.metrics.record_dispatch_attempt();
            match self.consumer.deliver(&record.event).await {
                Ok(()) => {
                    let acked = DeliveryCursor { acked_seq: record.seq };
                    // The ack is only real once the cursor is durable
                    self.store.save(CURSOR_FILE, &acked)?;
                    self.cursor = acked;
                    self.consecutive_failures = 0;

                    info!(
                        seq = %record.seq,
                        region = %record.event.region_id,
                        kind = %record.event.kind.as_str(),
                        "event_delivered"
                    );
                    self.pending.pop_front();
                }
                Err(e) => {
                    self.metrics.record_dispatch_failure();
                    self.consecutive_failures += 1;
                    let backoff = self
                        .retry_base_ms
                        .saturating_mul(1u64 << (self.consecutive_failures - 1).min(16))
                        .min(self.retry_max_ms);
                    self.next_attempt_at_ms = epoch_ms() + backoff;

                    warn!(
                        seq = %record.seq,
                        failures = %self.consecutive_failures,
                        backoff_ms = %backoff,
                        error = %e,
                        "event_delivery_failed"
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Undelivered event count
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Sequence of the last acknowledged event
    pub fn acked_seq(&self) -> u64 {
        self.cursor.acked_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{FilteredSample, RegionId, TransitionKind};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    /// Records delivered events; optionally fails every delivery
    struct RecordingConsumer {
        delivered: Mutex<Vec<TransitionEvent>>,
        fail: AtomicBool,
    }

    impl RecordingConsumer {
        fn new() -> Arc<Self> {
            Arc::new(Self { delivered: Mutex::new(Vec::new()), fail: AtomicBool::new(false) })
        }

        fn delivered(&self) -> Vec<TransitionEvent> {
            self.delivered.lock().clone()
        }
    }

    #[async_trait]
    impl TransitionConsumer for RecordingConsumer {
        async fn deliver(&self, event: &TransitionEvent) -> Result<(), DispatchError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::Consumer("unreachable".to_string()));
            }
            self.delivered.lock().push(event.clone());
            Ok(())
        }
    }

    fn event(ts_ms: u64, kind: TransitionKind) -> TransitionEvent {
        let sample = FilteredSample { ts_ms, lat: 1.0, lon: 2.0, accuracy_m: 5.0 };
        TransitionEvent::new(RegionId::from("r1"), kind, ts_ms, &sample)
    }

    fn open(
        dir: &std::path::Path,
        consumer: Arc<RecordingConsumer>,
    ) -> Dispatcher {
        Dispatcher::open(
            &Config::default(),
            StateStore::open(dir).unwrap(),
            consumer,
            Arc::new(Metrics::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_delivers_and_advances_cursor() {
        let dir = tempdir().unwrap();
        let consumer = RecordingConsumer::new();
        let mut dispatcher = open(dir.path(), consumer.clone());

        dispatcher.dispatch(event(1000, TransitionKind::Enter)).await.unwrap();
        dispatcher.dispatch(event(2000, TransitionKind::Exit)).await.unwrap();

        assert_eq!(consumer.delivered().len(), 2);
        assert_eq!(dispatcher.acked_seq(), 2);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_event_queued() {
        let dir = tempdir().unwrap();
        let consumer = RecordingConsumer::new();
        consumer.fail.store(true, Ordering::SeqCst);
        let mut dispatcher = open(dir.path(), consumer.clone());

        let result = dispatcher.dispatch(event(1000, TransitionKind::Enter)).await;

        assert!(result.is_err());
        assert_eq!(dispatcher.pending_count(), 1);
        assert_eq!(dispatcher.acked_seq(), 0);
        assert!(consumer.delivered().is_empty());

        // Consumer recovers; a fresh dispatch drains the backlog in order
        consumer.fail.store(false, Ordering::SeqCst);
        dispatcher.dispatch(event(2000, TransitionKind::Exit)).await.unwrap();

        let delivered = consumer.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].kind, TransitionKind::Enter);
        assert_eq!(delivered[1].kind, TransitionKind::Exit);
        assert_eq!(dispatcher.acked_seq(), 2);
    }

    #[tokio::test]
    async fn test_replay_skips_acked_events() {
        let dir = tempdir().unwrap();

        {
            let consumer = RecordingConsumer::new();
            let mut dispatcher = open(dir.path(), consumer.clone());
            dispatcher.dispatch(event(1000, TransitionKind::Enter)).await.unwrap();
            dispatcher.dispatch(event(2000, TransitionKind::Exit)).await.unwrap();
        }

        // Restart: both events are acked, nothing replays
        let consumer = RecordingConsumer::new();
        let mut dispatcher = open(dir.path(), consumer.clone());
        assert_eq!(dispatcher.pending_count(), 0);
        dispatcher.flush().await.unwrap();
        assert!(consumer.delivered().is_empty());
        // Sequence numbering continues past the persisted tail
        dispatcher.dispatch(event(3000, TransitionKind::Enter)).await.unwrap();
        assert_eq!(dispatcher.acked_seq(), 3);
    }

    #[tokio::test]
    async fn test_replay_delivers_unacked_tail() {
        let dir = tempdir().unwrap();

        {
            let consumer = RecordingConsumer::new();
            consumer.fail.store(true, Ordering::SeqCst);
            let mut dispatcher = open(dir.path(), consumer.clone());
            // Enqueued durably, never delivered
            let _ = dispatcher.dispatch(event(1000, TransitionKind::Enter)).await;
        }

        // Restart with a healthy consumer: the tail replays exactly once
        let consumer = RecordingConsumer::new();
        let mut dispatcher = open(dir.path(), consumer.clone());
        assert_eq!(dispatcher.pending_count(), 1);

        dispatcher.flush().await.unwrap();
        assert_eq!(consumer.delivered().len(), 1);
        assert_eq!(dispatcher.acked_seq(), 1);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_backoff_gates_flush_until_window_elapses() {
        let dir = tempdir().unwrap();
        let consumer = RecordingConsumer::new();
        consumer.fail.store(true, Ordering::SeqCst);
        let mut dispatcher = open(dir.path(), consumer.clone());

        let _ = dispatcher.dispatch(event(1000, TransitionKind::Enter)).await;

        // Consumer is healthy again, but the backoff window has not
        // elapsed: flush is a no-op rather than a hot retry loop
        consumer.fail.store(false, Ordering::SeqCst);
        dispatcher.flush().await.unwrap();
        assert!(consumer.delivered().is_empty());
        assert_eq!(dispatcher.pending_count(), 1);
    }
}
