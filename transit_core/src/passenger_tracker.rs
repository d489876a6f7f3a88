//! Passenger Tracker - correlates vision tracks with door windows.
//!
//! The vision detector is unreliable frame to frame, so nothing it reports is
//! counted directly. Instead:
//!
//! 1. While a door window is open, tracks that appear become *pending
//!    entries* and onboard tracks that vanish become *pending exits*.
//! 2. Every fusion tick resolves pending records against their windows
//!    (confirm or cancel), but only while the vehicle is stopped.
//! 3. At confirmed closure the window is reconciled against the live vision
//!    count, emitting bulk corrections for whatever per-track resolution
//!    missed.
//!
//! Every [`PassengerEvent`] carries the counters as they stand after the
//! event is applied, so the stream alone reconstructs the totals.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use transit_env::Moment;

use crate::config::{FusionConfig, PassengerTimings};
use crate::event_bus::EventBus;
use crate::events::{
    Event, EventPayload, PassengerEvent, PassengerEventKind, ProximitySample, TrackRef,
    VisionFrame,
};

// ============================================================================
// BOOKKEEPING RECORDS
// ============================================================================

/// Per-track history, owned by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub track_id: u64,
    pub first_seen: Duration,
    pub last_seen: Duration,

    /// Has produced an ENTRY (individual or bulk)
    pub counted: bool,

    /// Believed to be aboard; its disappearance in a window is a candidate exit
    pub onboard: bool,
}

/// A track that appeared during a door window and may be boarding.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub track_id: u64,
    pub created: Duration,
    pub confidence: f64,
    pub sensor_distance_mm: Option<u32>,
}

/// An onboard track that vanished during a door window and may be alighting.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingExit {
    pub track_id: u64,
    pub created: Duration,
    pub confidence: f64,
    pub sensor_distance_mm: Option<u32>,

    /// Consecutive frames the track has been absent from
    pub frames_missing: u32,
}

/// Snapshot of one open door window.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DoorWindow {
    opened_at: Duration,

    /// Live vision count when the door opened
    baseline: u32,

    /// Individually confirmed during this window
    entries_confirmed: u32,
    exits_confirmed: u32,
}

/// Counters exposed to status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PassengerStats {
    pub onboard: u32,
    pub total_entries: u32,
    pub total_exits: u32,
}

// ============================================================================
// TRACKER
// ============================================================================

/// Converts vision frames and door notifications into confirmed passenger
/// events.
pub struct PassengerTracker {
    bus: Arc<EventBus>,
    device_id: String,
    timings: PassengerTimings,
    bulk_confidence: f64,

    onboard: u32,
    daily_entries: u32,
    daily_exits: u32,

    tracks: HashMap<u64, TrackInfo>,
    pending_entries: HashMap<u64, PendingEntry>,
    pending_exits: HashMap<u64, PendingExit>,

    window: Option<DoorWindow>,
    last_proximity_mm: Option<u32>,

    /// Source of synthetic ids for bulk-correction events
    next_bulk_id: u64,
}

impl PassengerTracker {
    pub fn new(bus: Arc<EventBus>, config: &FusionConfig) -> Self {
        Self {
            bus,
            device_id: config.device_id.clone(),
            timings: config.passenger_timings(),
            bulk_confidence: config.bulk_confidence,
            onboard: 0,
            daily_entries: 0,
            daily_exits: 0,
            tracks: HashMap::new(),
            pending_entries: HashMap::new(),
            pending_exits: HashMap::new(),
            window: None,
            last_proximity_mm: None,
            next_bulk_id: 1,
        }
    }

    // ------------------------------------------------------------------------
    // Door hooks
    // ------------------------------------------------------------------------

    /// Opens a window, snapshotting the live vision count as baseline.
    pub fn on_door_opened(&mut self, now: Moment) {
        let baseline = self.live_count(now);
        self.window = Some(DoorWindow {
            opened_at: now.monotonic,
            baseline,
            entries_confirmed: 0,
            exits_confirmed: 0,
        });

        info!(baseline, onboard = self.onboard, "door window opened");
    }

    /// Informational: the door started closing. Counters are untouched.
    pub fn on_door_closing(&self, now: Moment) {
        debug!(
            live = self.live_count(now),
            pending_entries = self.pending_entries.len(),
            pending_exits = self.pending_exits.len(),
            "door closing"
        );
    }

    /// Reconciles the window after closure is confirmed.
    ///
    /// Exactly one rule applies:
    /// - onboard > 0 but no live tracks: every onboard passenger exits;
    /// - otherwise the vision delta not already explained by individually
    ///   confirmed events is emitted as bulk entries or exits.
    ///
    /// Pending records still unresolved are cancelled first.
    pub fn on_door_closed(&mut self, now: Moment) -> Vec<PassengerEvent> {
        let Some(window) = self.window.take() else {
            warn!("door closure confirmed without an open window, nothing to reconcile");
            return Vec::new();
        };

        self.cancel_unresolved("door closed");

        let live = self.live_count(now);
        let raw_delta = live as i64 - window.baseline as i64;
        let net_confirmed = window.entries_confirmed as i64 - window.exits_confirmed as i64;

        info!(
            baseline = window.baseline,
            live,
            delta = raw_delta,
            onboard = self.onboard,
            duration_secs = now.since(window.opened_at).as_secs_f64(),
            "reconciling door window"
        );

        if self.onboard > 0 && live == 0 {
            let exits = self.onboard;
            warn!(
                onboard = self.onboard,
                "vision sees nobody aboard, emitting bulk exits"
            );
            for track in self.tracks.values_mut() {
                track.onboard = false;
            }
            return self.bulk(PassengerEventKind::Exit, exits, now);
        }

        let effective = raw_delta - net_confirmed;
        match effective {
            e if e > 0 => {
                let count = e as u32;
                self.mark_window_tracks_onboard(window.opened_at, count, now);
                info!(count, "bulk entries from door window");
                self.bulk(PassengerEventKind::Entry, count, now)
            }
            e if e < 0 => {
                let count = e.unsigned_abs() as u32;
                self.unmark_vanished_onboard(count, now);
                info!(count, "bulk exits from door window");
                self.bulk(PassengerEventKind::Exit, count, now)
            }
            _ => {
                if self.onboard != live {
                    warn!(
                        onboard = self.onboard,
                        vision = live,
                        "passenger count inconsistent with vision"
                    );
                }
                Vec::new()
            }
        }
    }

    /// Discards the window after a safety timeout. No reconciliation.
    pub fn on_monitoring_timeout(&mut self, _now: Moment) {
        if self.window.take().is_some() {
            self.cancel_unresolved("monitoring timeout");
            warn!(onboard = self.onboard, "door window discarded after safety timeout");
        }
    }

    // ------------------------------------------------------------------------
    // Sensor input
    // ------------------------------------------------------------------------

    /// Latest door distance, stamped on pending records.
    pub fn record_proximity(&mut self, sample: &ProximitySample) {
        self.last_proximity_mm = Some(sample.distance_mm);
    }

    /// Refreshes track history from one frame and, inside a window, opens
    /// pending entries and exits.
    pub fn process_camera_data(&mut self, frame: &VisionFrame, now: Moment) {
        let in_window = self.window.is_some();

        for person in &frame.tracks {
            match self.tracks.get_mut(&person.track_id) {
                Some(track) => {
                    track.last_seen = now.monotonic;
                    if self.pending_exits.remove(&person.track_id).is_some() {
                        debug!(track_id = person.track_id, "track reappeared, pending exit cancelled");
                    }
                }
                None => {
                    self.tracks.insert(
                        person.track_id,
                        TrackInfo {
                            track_id: person.track_id,
                            first_seen: now.monotonic,
                            last_seen: now.monotonic,
                            counted: false,
                            onboard: false,
                        },
                    );

                    if in_window {
                        self.pending_entries.insert(
                            person.track_id,
                            PendingEntry {
                                track_id: person.track_id,
                                created: now.monotonic,
                                confidence: person.confidence,
                                sensor_distance_mm: self.last_proximity_mm,
                            },
                        );
                        debug!(track_id = person.track_id, "pending entry");
                    }
                }
            }
        }

        if in_window {
            for track in self.tracks.values() {
                if !track.onboard || frame.tracks.iter().any(|p| p.track_id == track.track_id) {
                    continue;
                }
                self.pending_exits
                    .entry(track.track_id)
                    .and_modify(|exit| exit.frames_missing += 1)
                    .or_insert_with(|| {
                        debug!(track_id = track.track_id, "pending exit");
                        PendingExit {
                            track_id: track.track_id,
                            created: now.monotonic,
                            confidence: frame.mean_confidence,
                            sensor_distance_mm: self.last_proximity_mm,
                            frames_missing: 1,
                        }
                    });
            }
        }

        self.collect_stale(now);
    }

    /// Resolves pending entries and exits. Does nothing while moving.
    pub fn check_pending_confirmations(
        &mut self,
        now: Moment,
        vehicle_stopped: bool,
    ) -> Vec<PassengerEvent> {
        if !vehicle_stopped {
            return Vec::new();
        }

        let mut events = Vec::new();

        let mut entry_ids: Vec<u64> = self.pending_entries.keys().copied().collect();
        entry_ids.sort_unstable();
        for track_id in entry_ids {
            let Some(entry) = self.pending_entries.get(&track_id).cloned() else {
                continue;
            };
            let dwell = self
                .tracks
                .get(&track_id)
                .map(|t| t.last_seen.saturating_sub(entry.created))
                .unwrap_or_default();

            if dwell >= self.timings.entry_min {
                self.pending_entries.remove(&track_id);
                if let Some(track) = self.tracks.get_mut(&track_id) {
                    track.counted = true;
                    track.onboard = true;
                }
                if let Some(window) = self.window.as_mut() {
                    window.entries_confirmed += 1;
                }
                let event = self.emit(
                    PassengerEventKind::Entry,
                    TrackRef::Vision(track_id),
                    entry.confidence,
                    entry.sensor_distance_mm,
                    now,
                );
                info!(track_id, onboard = self.onboard, "entry confirmed");
                events.push(event);
            } else if now.since(entry.created) >= self.timings.entry_max {
                self.pending_entries.remove(&track_id);
                info!(track_id, "pending entry cancelled by timeout");
            }
        }

        let mut exit_ids: Vec<u64> = self.pending_exits.keys().copied().collect();
        exit_ids.sort_unstable();
        for track_id in exit_ids {
            let Some(exit) = self.pending_exits.get(&track_id).cloned() else {
                continue;
            };
            if now.since(exit.created) < self.timings.exit_confirmation {
                continue;
            }

            self.pending_exits.remove(&track_id);
            self.tracks.remove(&track_id);
            if let Some(window) = self.window.as_mut() {
                window.exits_confirmed += 1;
            }
            let event = self.emit(
                PassengerEventKind::Exit,
                TrackRef::Vision(track_id),
                exit.confidence,
                exit.sensor_distance_mm,
                now,
            );
            info!(
                track_id,
                frames_missing = exit.frames_missing,
                onboard = self.onboard,
                "exit confirmed"
            );
            events.push(event);
        }

        events
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Tracks seen within the liveness window.
    pub fn live_count(&self, now: Moment) -> u32 {
        self.tracks
            .values()
            .filter(|t| now.since(t.last_seen) <= self.timings.track_live)
            .count() as u32
    }

    pub fn stats(&self) -> PassengerStats {
        PassengerStats {
            onboard: self.onboard,
            total_entries: self.daily_entries,
            total_exits: self.daily_exits,
        }
    }

    pub fn track(&self, track_id: u64) -> Option<&TrackInfo> {
        self.tracks.get(&track_id)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn pending_entry_count(&self) -> usize {
        self.pending_entries.len()
    }

    pub fn pending_exit_count(&self) -> usize {
        self.pending_exits.len()
    }

    pub fn window_open(&self) -> bool {
        self.window.is_some()
    }

    /// Zeroes cumulative entries/exits. The onboard count is kept.
    pub fn reset_daily_totals(&mut self) {
        info!(
            entries = self.daily_entries,
            exits = self.daily_exits,
            "daily passenger totals reset"
        );
        self.daily_entries = 0;
        self.daily_exits = 0;
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Applies one event to the counters, then publishes it.
    fn emit(
        &mut self,
        kind: PassengerEventKind,
        track: TrackRef,
        confidence: f64,
        sensor_distance_mm: Option<u32>,
        now: Moment,
    ) -> PassengerEvent {
        match kind {
            PassengerEventKind::Entry => {
                self.onboard += 1;
                self.daily_entries += 1;
            }
            PassengerEventKind::Exit => {
                self.onboard = self.onboard.saturating_sub(1);
                self.daily_exits += 1;
            }
        }

        let event = PassengerEvent {
            kind,
            track,
            confidence,
            sensor_distance_mm,
            delta: kind.delta(),
            current_onboard: self.onboard,
            total_entries: self.daily_entries,
            total_exits: self.daily_exits,
            device_id: self.device_id.clone(),
            timestamp_ms: now.unix_ms,
        };

        self.bus
            .publish(Event::new(now.unix_ms, EventPayload::Passenger(event.clone())));
        event
    }

    fn bulk(&mut self, kind: PassengerEventKind, count: u32, now: Moment) -> Vec<PassengerEvent> {
        let confidence = self.bulk_confidence;
        let mut events = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = self.next_bulk_id;
            self.next_bulk_id += 1;
            events.push(self.emit(kind, TrackRef::Bulk(id), confidence, None, now));
        }
        events
    }

    fn cancel_unresolved(&mut self, reason: &str) {
        let entries = self.pending_entries.len();
        let exits = self.pending_exits.len();
        if entries + exits > 0 {
            debug!(entries, exits, reason, "cancelling unresolved pending records");
        }
        self.pending_entries.clear();
        self.pending_exits.clear();
    }

    fn mark_window_tracks_onboard(&mut self, opened_at: Duration, count: u32, now: Moment) {
        let live = self.timings.track_live;
        let mut candidates: Vec<&mut TrackInfo> = self
            .tracks
            .values_mut()
            .filter(|t| !t.counted && t.first_seen >= opened_at && now.since(t.last_seen) <= live)
            .collect();
        candidates.sort_unstable_by_key(|t| t.track_id);

        for track in candidates.into_iter().take(count as usize) {
            track.counted = true;
            track.onboard = true;
        }
    }

    fn unmark_vanished_onboard(&mut self, count: u32, now: Moment) {
        let live = self.timings.track_live;
        let mut candidates: Vec<&mut TrackInfo> = self
            .tracks
            .values_mut()
            .filter(|t| t.onboard && now.since(t.last_seen) > live)
            .collect();
        candidates.sort_unstable_by_key(|t| t.track_id);

        for track in candidates.into_iter().take(count as usize) {
            track.onboard = false;
        }
    }

    fn collect_stale(&mut self, now: Moment) {
        let stale = self.timings.track_stale;
        let before = self.tracks.len();
        self.tracks.retain(|_, t| now.since(t.last_seen) <= stale);

        let removed = before - self.tracks.len();
        if removed > 0 {
            debug!(removed, remaining = self.tracks.len(), "stale tracks collected");
        }
    }
}
