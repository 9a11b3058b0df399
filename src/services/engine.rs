//! Central pipeline orchestrator
//!
//! The Engine is the single consumer of the location-sample stream. For
//! each accepted sample it evaluates every active region against a
//! consistent snapshot, feeds the verdicts to the transition detector,
//! persists the membership snapshot when it changed, and hands resulting
//! events to the dispatcher. A periodic tick services dwell deadlines,
//! pending-exit debounce windows and dispatcher retries.
//!
//! Ordering invariant: membership is durable before any event derived
//! from it enters the outbound queue, so the delivery cursor can never
//! get ahead of the membership state it depends on.

use crate::domain::types::{epoch_ms, MembershipState, RawSample, RegionId, TransitionEvent, TransitionKind};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::storage::{StateStore, StorageError};
use crate::io::dispatcher::Dispatcher;
use crate::services::detector::TransitionDetector;
use crate::services::membership::MembershipEvaluator;
use crate::services::region_store::RegionStore;
use crate::services::sample_filter::SampleFilter;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{error, info, warn};

const MEMBERSHIP_FILE: &str = "membership.json";

/// Pipeline orchestrator: filter -> evaluate -> detect -> dispatch
pub struct Engine {
    filter: SampleFilter,
    evaluator: MembershipEvaluator,
    detector: TransitionDetector,
    regions: Arc<RegionStore>,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    state: StateStore,
    tick_interval_ms: u64,
}

impl Engine {
    /// Build the pipeline, restoring the persisted membership snapshot
    pub fn new(
        config: &Config,
        state: StateStore,
        regions: Arc<RegionStore>,
        dispatcher: Dispatcher,
        metrics: Arc<Metrics>,
    ) -> Result<Self, StorageError> {
        let mut detector = TransitionDetector::new(config);
        if let Some(snapshot) = state.load::<Vec<MembershipState>>(MEMBERSHIP_FILE)? {
            info!(regions = %snapshot.len(), "membership_restored");
            detector.restore(snapshot);
        }

        Ok(Self {
            filter: SampleFilter::new(config, metrics.clone()),
            evaluator: MembershipEvaluator::new(config),
            detector,
            regions,
            dispatcher,
            metrics,
            state,
            tick_interval_ms: config.tick_interval_ms(),
        })
    }

    /// Start the engine, consuming samples from the channel
    pub async fn run(
        &mut self,
        mut sample_rx: mpsc::Receiver<RawSample>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick_interval = interval(Duration::from_millis(self.tick_interval_ms.max(10)));

        loop {
            tokio::select! {
                sample = sample_rx.recv() => {
                    match sample {
                        Some(raw) => self.process_sample(raw).await,
                        None => break, // Channel closed
                    }
                }
                _ = tick_interval.tick() => {
                    self.handle_tick(epoch_ms()).await;
                }
                changed = shutdown.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("engine_stopped");
    }

    /// Run one raw fix through the full pipeline
    pub async fn process_sample(&mut self, raw: RawSample) {
        let Some(filtered) = self.filter.ingest(&raw) else {
            return;
        };

        // Drop machines for regions removed since the last sample; this is
        // where a removal cancels its pending dwell without a synthetic exit
        let registered: HashSet<RegionId> = self.regions.region_ids().into_iter().collect();
        self.detector.retain_known(&registered);

        let active = self.regions.active_snapshot();
        let mut events = Vec::new();
        for region in &active {
            let verdict = self.evaluator.evaluate(&filtered, region);
            if let Some(event) = self.detector.observe(region, verdict, &filtered) {
                events.push(event);
            }
        }

        self.commit_and_dispatch(events).await;
    }

    /// Deadline sweep: pending-exit debounce, dwell timers, dispatch retry
    pub async fn handle_tick(&mut self, now_ms: u64) {
        let registered: HashSet<RegionId> = self.regions.region_ids().into_iter().collect();
        self.detector.retain_known(&registered);

        let active = self.regions.active_snapshot();
        let mut events = Vec::new();
        for region in &active {
            if let Some(event) = self.detector.tick(region, now_ms) {
                events.push(event);
            }
        }

        self.commit_and_dispatch(events).await;

        if self.dispatcher.pending_count() > 0 {
            if let Err(e) = self.dispatcher.flush().await {
                warn!(error = %e, pending = %self.dispatcher.pending_count(), "dispatch_retry_failed");
            }
        }
    }

    /// Persist changed membership, then enqueue and deliver events.
    /// On a failed membership write the events are dropped unsent: the
    /// queue must never hold events derived from unpersisted state.
    async fn commit_and_dispatch(&mut self, events: Vec<TransitionEvent>) {
        if self.detector.is_dirty() {
            match self.state.save(MEMBERSHIP_FILE, &self.detector.snapshot()) {
                Ok(()) => self.detector.mark_clean(),
                Err(e) => {
                    error!(error = %e, dropped_events = %events.len(), "membership_persist_failed");
                    return;
                }
            }
        }

        for event in events {
            match event.kind {
                TransitionKind::Enter => self.metrics.record_enter(),
                TransitionKind::Exit => self.metrics.record_exit(),
                TransitionKind::Dwell => self.metrics.record_dwell(),
            }

            if let Err(e) = self.dispatcher.dispatch(event).await {
                // Queued durably; the tick path retries delivery
                warn!(error = %e, "transition_dispatch_deferred");
            }
        }
    }

    /// Membership for one region, if initialized
    pub fn membership(&self, id: &RegionId) -> Option<MembershipState> {
        self.detector.membership(id)
    }

    /// Undelivered event count in the outbound queue
    pub fn pending_dispatch(&self) -> usize {
        self.dispatcher.pending_count()
    }
}
