//! Pending-change accumulation and flush scheduling.
//!
//! [`PendingChanges`] holds the per-mapping sets of paths with unresolved
//! changes; a path appears at most once per mapping (later events overwrite).
//!
//! [`BatchPlanner`] owns the flush deadline. Two timer levels compose:
//! a quiet-period debounce (every event re-arms `now + delay`, a full batch
//! arms an immediate flush) nested inside a minimum-interval floor (a firing
//! deadline defers itself until `last_sync_start + min_interval`). Deadlines
//! are plain monotonic instants decided against a caller-supplied `now`, so
//! tests can drive the planner with a virtual clock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use driftsync_core::types::{ChangeEvent, MappingName};

// ---------------------------------------------------------------------------
// Pending set and frozen batch
// ---------------------------------------------------------------------------

/// Mapping-name → path → most recent event for that path.
#[derive(Debug, Clone, Default)]
pub struct PendingChanges {
    by_mapping: HashMap<MappingName, HashMap<PathBuf, ChangeEvent>>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one event. A newer event for an already-pending path replaces
    /// the older one; it never duplicates.
    pub fn insert(&mut self, mapping: MappingName, event: ChangeEvent) {
        self.by_mapping
            .entry(mapping)
            .or_default()
            .insert(event.path.clone(), event);
    }

    /// Total distinct pending paths across all mappings.
    pub fn total_len(&self) -> usize {
        self.by_mapping.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_mapping.values().all(HashMap::is_empty)
    }

    /// Freeze everything currently pending into a [`Batch`], leaving the
    /// pending set empty.
    pub fn take_all(&mut self) -> Batch {
        let mut changes = std::mem::take(&mut self.by_mapping);
        changes.retain(|_, paths| !paths.is_empty());
        Batch { changes }
    }

    /// Re-insert a failed batch so its paths are eligible for the next
    /// flush. An event that arrived after the batch was frozen wins over the
    /// stale batch copy for the same path.
    pub fn requeue(&mut self, batch: Batch) {
        for (mapping, paths) in batch.changes {
            let slot = self.by_mapping.entry(mapping).or_default();
            for (path, event) in paths {
                slot.entry(path).or_insert(event);
            }
        }
    }

    pub fn events_for(&self, mapping: &MappingName) -> Option<&HashMap<PathBuf, ChangeEvent>> {
        self.by_mapping.get(mapping)
    }
}

/// A frozen set of pending changes handed to one sync attempt.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub changes: HashMap<MappingName, HashMap<PathBuf, ChangeEvent>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.changes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mappings(&self) -> impl Iterator<Item = &MappingName> {
        self.changes.keys()
    }

    /// All (mapping, event) pairs in the batch.
    pub fn events(&self) -> impl Iterator<Item = (&MappingName, &ChangeEvent)> {
        self.changes
            .iter()
            .flat_map(|(mapping, paths)| paths.values().map(move |event| (mapping, event)))
    }
}

// ---------------------------------------------------------------------------
// Flush planning
// ---------------------------------------------------------------------------

/// What the scheduler should do when a deadline fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    /// Hand the current pending set to the coordinator now.
    Flush,
    /// The min-interval floor is not met yet; the deadline has been re-armed
    /// to the contained instant.
    Defer(Instant),
    /// No deadline is due.
    Wait,
}

/// Deadline state machine for one scheduler worker.
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    delay: Duration,
    min_interval: Duration,
    batch_size: usize,
    deadline: Option<Instant>,
    last_sync_start: Option<Instant>,
}

impl BatchPlanner {
    pub fn new(delay: Duration, min_interval: Duration, batch_size: usize) -> Self {
        Self {
            delay,
            min_interval,
            batch_size,
            deadline: None,
            last_sync_start: None,
        }
    }

    /// Record one new event: cancel any outstanding deadline and re-arm.
    /// A full batch (`pending_total >= batch_size`) arms an immediate flush;
    /// otherwise the quiet period restarts at `now + delay`.
    pub fn note_event(&mut self, now: Instant, pending_total: usize) {
        self.deadline = Some(if pending_total >= self.batch_size {
            now
        } else {
            now + self.delay
        });
    }

    /// Arm an immediate flush regardless of pending count (operator-requested
    /// sync). The min-interval floor still applies in [`BatchPlanner::decide`].
    pub fn arm_immediate(&mut self, now: Instant) {
        self.deadline = Some(now);
    }

    /// The currently armed deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Evaluate a fired deadline. Enforces the min-interval floor: when the
    /// previous sync started less than `min_interval` ago the flush is
    /// deferred (never dropped) to exactly `last_sync_start + min_interval`.
    pub fn decide(&mut self, now: Instant) -> FlushDecision {
        let Some(deadline) = self.deadline else {
            return FlushDecision::Wait;
        };
        if now < deadline {
            return FlushDecision::Wait;
        }

        if let Some(start) = self.last_sync_start {
            let floor = start + self.min_interval;
            if now < floor {
                self.deadline = Some(floor);
                return FlushDecision::Defer(floor);
            }
        }

        self.deadline = None;
        FlushDecision::Flush
    }

    /// Record that a sync attempt started; the next flush is gated on
    /// `now + min_interval`.
    pub fn note_sync_start(&mut self, now: Instant) {
        self.last_sync_start = Some(now);
    }

    /// Cancel any armed deadline. Idempotent: clearing an already-fired or
    /// never-armed deadline is a no-op.
    pub fn clear(&mut self) {
        self.deadline = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use driftsync_core::types::{ChangeEvent, ChangeKind};

    use super::*;

    fn event(path: &str) -> ChangeEvent {
        ChangeEvent::now(path, ChangeKind::Modified)
    }

    fn planner(delay_s: u64, min_interval_s: u64, batch_size: usize) -> BatchPlanner {
        BatchPlanner::new(
            Duration::from_secs(delay_s),
            Duration::from_secs(min_interval_s),
            batch_size,
        )
    }

    // ─── PendingChanges ────────────────────────────────────────────────────

    #[test]
    fn repeated_events_for_one_path_do_not_duplicate() {
        let mut pending = PendingChanges::new();
        let mapping = MappingName::from("code");
        pending.insert(mapping.clone(), event("a.txt"));
        pending.insert(mapping.clone(), event("a.txt"));
        pending.insert(mapping.clone(), event("b.txt"));
        assert_eq!(pending.total_len(), 2);
    }

    #[test]
    fn later_event_overwrites_earlier_one() {
        let mut pending = PendingChanges::new();
        let mapping = MappingName::from("code");
        pending.insert(mapping.clone(), event("a.txt"));
        let mut deleted = event("a.txt");
        deleted.kind = ChangeKind::Deleted;
        pending.insert(mapping.clone(), deleted);

        let stored = &pending.events_for(&mapping).expect("mapping")[&PathBuf::from("a.txt")];
        assert_eq!(stored.kind, ChangeKind::Deleted);
    }

    #[test]
    fn take_all_freezes_and_clears() {
        let mut pending = PendingChanges::new();
        pending.insert(MappingName::from("code"), event("a.txt"));
        pending.insert(MappingName::from("docs"), event("b.txt"));

        let batch = pending.take_all();
        assert_eq!(batch.len(), 2);
        assert!(pending.is_empty());
    }

    #[test]
    fn requeue_does_not_clobber_newer_pending_events() {
        let mut pending = PendingChanges::new();
        let mapping = MappingName::from("code");
        pending.insert(mapping.clone(), event("a.txt"));
        let batch = pending.take_all();

        // A newer deletion arrives while the (failing) sync is in flight.
        let mut newer = event("a.txt");
        newer.kind = ChangeKind::Deleted;
        pending.insert(mapping.clone(), newer);

        pending.requeue(batch);
        assert_eq!(pending.total_len(), 1);
        let stored = &pending.events_for(&mapping).expect("mapping")[&PathBuf::from("a.txt")];
        assert_eq!(stored.kind, ChangeKind::Deleted, "newer event must win");
    }

    #[test]
    fn requeue_restores_paths_missing_from_pending() {
        let mut pending = PendingChanges::new();
        let mapping = MappingName::from("code");
        pending.insert(mapping.clone(), event("a.txt"));
        pending.insert(mapping.clone(), event("b.txt"));
        let batch = pending.take_all();
        assert!(pending.is_empty());

        pending.requeue(batch);
        assert_eq!(pending.total_len(), 2, "failed batch must come back whole");
    }

    // ─── BatchPlanner ──────────────────────────────────────────────────────

    #[test]
    fn burst_under_batch_size_debounces_to_one_deadline() {
        let mut p = planner(5, 30, 10);
        let t0 = Instant::now();

        // Three rapid events, 1s apart: each re-arms the quiet period.
        for i in 0..3u64 {
            p.note_event(t0 + Duration::from_secs(i), (i + 1) as usize);
        }
        let last_event = t0 + Duration::from_secs(2);
        assert_eq!(
            p.deadline().expect("armed"),
            last_event + Duration::from_secs(5),
            "deadline must be lastEventTime + delay"
        );

        // Before the deadline: nothing to do. At the deadline: one flush.
        assert_eq!(p.decide(last_event + Duration::from_secs(4)), FlushDecision::Wait);
        assert_eq!(p.decide(last_event + Duration::from_secs(5)), FlushDecision::Flush);
        assert_eq!(p.decide(last_event + Duration::from_secs(6)), FlushDecision::Wait);
    }

    #[test]
    fn reaching_batch_size_arms_an_immediate_flush() {
        let mut p = planner(5, 30, 10);
        let t0 = Instant::now();

        p.note_event(t0, 9);
        assert_eq!(p.deadline().expect("armed"), t0 + Duration::from_secs(5));

        p.note_event(t0 + Duration::from_millis(1), 10);
        assert_eq!(
            p.deadline().expect("armed"),
            t0 + Duration::from_millis(1),
            "full batch must not wait out the quiet period"
        );
        assert_eq!(p.decide(t0 + Duration::from_millis(1)), FlushDecision::Flush);
    }

    #[test]
    fn min_interval_defers_but_never_drops_a_flush() {
        let mut p = planner(5, 30, 10);
        let t0 = Instant::now();

        p.note_sync_start(t0);
        p.note_event(t0 + Duration::from_secs(2), 1);

        // Quiet period elapses at t0+7s, but the floor holds until t0+30s.
        let fired = t0 + Duration::from_secs(7);
        match p.decide(fired) {
            FlushDecision::Defer(next) => {
                assert_eq!(next, t0 + Duration::from_secs(30));
            }
            other => panic!("expected Defer, got {other:?}"),
        }

        // At the floor the deferred flush goes through.
        assert_eq!(p.decide(t0 + Duration::from_secs(30)), FlushDecision::Flush);
    }

    #[test]
    fn flush_proceeds_once_min_interval_already_elapsed() {
        let mut p = planner(5, 30, 10);
        let t0 = Instant::now();

        p.note_sync_start(t0);
        p.note_event(t0 + Duration::from_secs(40), 1);
        assert_eq!(p.decide(t0 + Duration::from_secs(45)), FlushDecision::Flush);
    }

    #[test]
    fn arm_immediate_respects_the_floor() {
        let mut p = planner(5, 30, 10);
        let t0 = Instant::now();

        p.note_sync_start(t0);
        p.arm_immediate(t0 + Duration::from_secs(1));
        match p.decide(t0 + Duration::from_secs(1)) {
            FlushDecision::Defer(next) => assert_eq!(next, t0 + Duration::from_secs(30)),
            other => panic!("expected Defer, got {other:?}"),
        }
    }

    #[test]
    fn clear_is_idempotent() {
        let mut p = planner(5, 30, 10);
        p.clear();
        p.note_event(Instant::now(), 1);
        p.clear();
        p.clear();
        assert_eq!(p.decide(Instant::now()), FlushDecision::Wait);
    }
}
