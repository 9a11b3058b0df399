//! Per-region transition state machines
//!
//! One independent machine per region, held in a flat table keyed by
//! region id (no cross-region state). Entry commits immediately; exit
//! requires sustained evidence (consecutive outside verdicts or an
//! elapsed debounce window); dwell fires once per containment episode.
//! The first-ever determinate verdict for a region initializes its
//! machine silently — a device already inside a region when monitoring
//! starts must not produce a synthetic Enter.

use crate::domain::types::{
    Containment, FilteredSample, MembershipState, Region, RegionId, TransitionEvent, TransitionKind,
};
use crate::infra::config::Config;
use rustc_hash::FxHashMap;
use std::collections::HashSet;
use tracing::{debug, info};

/// Unconfirmed exit evidence
#[derive(Debug, Clone)]
struct PendingExit {
    first_outside_ms: u64,
    outside_streak: u32,
    last_outside: FilteredSample,
}

/// State machine for one region
#[derive(Debug, Clone)]
struct RegionMachine {
    contained: bool,
    /// Timestamp of the sample that established the current state
    since_ms: u64,
    entered_at_ms: Option<u64>,
    dwell_emitted: bool,
    pending_exit: Option<PendingExit>,
    /// Last sample that read Inside; payload for tick-driven events
    last_inside: Option<FilteredSample>,
}

impl RegionMachine {
    fn initialized(contained: bool, sample: &FilteredSample) -> Self {
        Self {
            contained,
            since_ms: sample.ts_ms,
            entered_at_ms: contained.then_some(sample.ts_ms),
            dwell_emitted: false,
            pending_exit: None,
            last_inside: contained.then_some(*sample),
        }
    }
}

/// Detects emit-worthy transitions from per-sample containment verdicts
pub struct TransitionDetector {
    exit_confirm_samples: u32,
    exit_debounce_ms: u64,
    machines: FxHashMap<RegionId, RegionMachine>,
    /// Persisted-visible state changed since the last snapshot was taken
    dirty: bool,
}

impl TransitionDetector {
    pub fn new(config: &Config) -> Self {
        Self {
            exit_confirm_samples: config.exit_confirm_samples().max(1),
            exit_debounce_ms: config.exit_debounce_ms(),
            machines: FxHashMap::default(),
            dirty: false,
        }
    }

    /// Feed one containment verdict for one region.
    /// Returns the transition to emit, if any.
    pub fn observe(
        &mut self,
        region: &Region,
        verdict: Containment,
        sample: &FilteredSample,
    ) -> Option<TransitionEvent> {
        let Some(machine) = self.machines.get_mut(&region.id) else {
            // First-ever verdict: initialize without emitting. Indeterminate
            // leaves the machine unborn until the evaluator can commit.
            match verdict {
                Containment::Indeterminate => return None,
                Containment::Inside | Containment::Outside => {
                    let contained = verdict == Containment::Inside;
                    self.machines
                        .insert(region.id.clone(), RegionMachine::initialized(contained, sample));
                    self.dirty = true;
                    debug!(
                        region = %region.id,
                        contained = %contained,
                        ts = %sample.ts_ms,
                        "membership_initialized"
                    );
                    return None;
                }
            }
        };

        match verdict {
            // The machine holds: no transition, no streak advance, pending exit kept
            Containment::Indeterminate => None,

            Containment::Inside => {
                if machine.contained {
                    // Jitter cleared
                    machine.pending_exit = None;
                    machine.last_inside = Some(*sample);
                    self.dwell_due(&region.id, region.dwell_ms(), sample.ts_ms)
                } else {
                    machine.contained = true;
                    machine.since_ms = sample.ts_ms;
                    machine.entered_at_ms = Some(sample.ts_ms);
                    machine.dwell_emitted = false;
                    machine.pending_exit = None;
                    machine.last_inside = Some(*sample);
                    self.dirty = true;
                    Some(self.emit(region, TransitionKind::Enter, sample.ts_ms, sample))
                }
            }

            Containment::Outside => {
                if !machine.contained {
                    machine.pending_exit = None;
                    return None;
                }

                let pending = machine.pending_exit.get_or_insert(PendingExit {
                    first_outside_ms: sample.ts_ms,
                    outside_streak: 0,
                    last_outside: *sample,
                });
                pending.outside_streak += 1;
                pending.last_outside = *sample;

                let confirmed = pending.outside_streak >= self.exit_confirm_samples
                    || sample.ts_ms.saturating_sub(pending.first_outside_ms)
                        >= self.exit_debounce_ms;

                if confirmed {
                    self.commit_exit(region, sample.ts_ms, *sample)
                } else {
                    debug!(
                        region = %region.id,
                        outside_streak = %pending.outside_streak,
                        "exit_pending"
                    );
                    None
                }
            }
        }
    }

    /// Deadline sweep, driven by the engine tick. Confirms a pending exit
    /// whose debounce window elapsed without further samples, and fires a
    /// due dwell when the device has gone quiet inside a region.
    pub fn tick(&mut self, region: &Region, now_ms: u64) -> Option<TransitionEvent> {
        let machine = self.machines.get_mut(&region.id)?;
        if !machine.contained {
            return None;
        }

        if let Some(pending) = &machine.pending_exit {
            if now_ms.saturating_sub(pending.first_outside_ms) >= self.exit_debounce_ms {
                let last_outside = pending.last_outside;
                return self.commit_exit(region, now_ms, last_outside);
            }
            // Evidence of leaving: hold the dwell check until it resolves
            return None;
        }

        self.dwell_due(&region.id, region.dwell_ms(), now_ms)
    }

    /// Emit Dwell once the containment episode outlasts the configured
    /// duration. Returns None when no dwell is configured, not yet due,
    /// or already emitted for this episode.
    fn dwell_due(
        &mut self,
        region_id: &RegionId,
        dwell_ms: Option<u64>,
        at_ms: u64,
    ) -> Option<TransitionEvent> {
        let dwell_ms = dwell_ms?;
        let machine = self.machines.get_mut(region_id)?;
        if machine.dwell_emitted {
            return None;
        }
        let entered_at = machine.entered_at_ms?;
        // Restored machines have no position until a sample arrives;
        // the deadline check waits for one rather than firing blind
        let payload = machine.last_inside?;
        if at_ms.saturating_sub(entered_at) < dwell_ms {
            return None;
        }

        machine.dwell_emitted = true;
        self.dirty = true;
        let event = TransitionEvent::new(region_id.clone(), TransitionKind::Dwell, at_ms, &payload);
        info!(region = %region_id, ts = %at_ms, kind = "dwell", "transition_detected");
        Some(event)
    }

    fn commit_exit(
        &mut self,
        region: &Region,
        ts_ms: u64,
        sample: FilteredSample,
    ) -> Option<TransitionEvent> {
        let machine = self.machines.get_mut(&region.id)?;
        machine.contained = false;
        machine.since_ms = ts_ms;
        machine.entered_at_ms = None;
        machine.dwell_emitted = false;
        machine.pending_exit = None;
        machine.last_inside = None;
        self.dirty = true;
        Some(self.emit(region, TransitionKind::Exit, ts_ms, &sample))
    }

    fn emit(
        &self,
        region: &Region,
        kind: TransitionKind,
        ts_ms: u64,
        sample: &FilteredSample,
    ) -> TransitionEvent {
        info!(region = %region.id, ts = %ts_ms, kind = %kind.as_str(), "transition_detected");
        TransitionEvent::new(region.id.clone(), kind, ts_ms, sample)
    }

    /// Discard machines for regions no longer registered. Cancels any
    /// pending dwell or exit without emitting (no synthetic Exit).
    pub fn retain_known(&mut self, known: &HashSet<RegionId>) {
        let before = self.machines.len();
        self.machines.retain(|id, _| {
            let keep = known.contains(id);
            if !keep {
                info!(region = %id, "membership_discarded");
            }
            keep
        });
        if self.machines.len() != before {
            self.dirty = true;
        }
    }

    /// Current membership snapshot, ordered by region id
    pub fn snapshot(&self) -> Vec<MembershipState> {
        let mut states: Vec<MembershipState> = self
            .machines
            .iter()
            .map(|(id, m)| MembershipState {
                region_id: id.clone(),
                contained: m.contained,
                since_ms: m.since_ms,
                entered_at_ms: m.entered_at_ms,
                dwell_emitted: m.dwell_emitted,
            })
            .collect();
        states.sort_by(|a, b| a.region_id.cmp(&b.region_id));
        states
    }

    /// Seed machines from a persisted snapshot (restart path).
    /// Transient evidence (pending exits, last positions) does not survive;
    /// it rebuilds from the next samples.
    pub fn restore(&mut self, states: Vec<MembershipState>) {
        for s in states {
            self.machines.insert(
                s.region_id.clone(),
                RegionMachine {
                    contained: s.contained,
                    since_ms: s.since_ms,
                    entered_at_ms: s.entered_at_ms,
                    dwell_emitted: s.dwell_emitted,
                    pending_exit: None,
                    last_inside: None,
                },
            );
        }
        self.dirty = false;
    }

    /// Membership for one region, if initialized
    pub fn membership(&self, id: &RegionId) -> Option<MembershipState> {
        self.machines.get(id).map(|m| MembershipState {
            region_id: id.clone(),
            contained: m.contained,
            since_ms: m.since_ms,
            entered_at_ms: m.entered_at_ms,
            dwell_emitted: m.dwell_emitted,
        })
    }

    /// True when persisted-visible state changed since the last snapshot
    /// was successfully saved
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Call after the snapshot has been durably written
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    #[cfg(test)]
    fn machine_count(&self) -> usize {
        self.machines.len()
    }
}
