//! Transfer size/duration projection and live-run progress tracking.
//!
//! Projections come from a bounded history of past runs; live progress is
//! whatever the transfer executor last reported, stored verbatim.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use driftsync_core::types::{ProgressSnapshot, ProgressUpdate, SyncHistoryRecord};

/// Maximum retained history records; oldest evicted first.
pub const HISTORY_LIMIT: usize = 10;

/// How many of the most recent records feed the projections.
pub const ESTIMATE_WINDOW: usize = 5;

/// Per-file size assumed when a path cannot be stat'ed and no history exists.
pub const DEFAULT_FILE_SIZE: u64 = 1024 * 1024;

/// Conservative throughput assumed with no history (1 MiB/s).
pub const DEFAULT_THROUGHPUT: f64 = 1024.0 * 1024.0;

/// History-backed estimator plus the live progress snapshot for the current
/// run. Owned by the coordinator; readers get cloned snapshots.
#[derive(Debug, Clone, Default)]
pub struct ProgressEstimator {
    history: VecDeque<SyncHistoryRecord>,
    live: ProgressSnapshot,
}

impl ProgressEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one completed-run record, evicting the oldest past the cap.
    pub fn record_run(&mut self, record: SyncHistoryRecord) {
        self.history.push_back(record);
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> &VecDeque<SyncHistoryRecord> {
        &self.history
    }

    /// The last ≤ `ESTIMATE_WINDOW` records, newest last.
    fn window(&self) -> impl Iterator<Item = &SyncHistoryRecord> {
        let skip = self.history.len().saturating_sub(ESTIMATE_WINDOW);
        self.history.iter().skip(skip)
    }

    /// Mean per-file size over the estimate window, or the 1 MiB default.
    fn mean_file_size(&self) -> u64 {
        let (bytes, files) = self
            .window()
            .fold((0u64, 0usize), |(b, f), r| (b + r.total_size_bytes, f + r.file_count));
        if files == 0 {
            DEFAULT_FILE_SIZE
        } else {
            bytes / files as u64
        }
    }

    /// Projected batch size: on-disk sizes of the paths that still exist,
    /// with the historical mean substituted per unstatable path.
    pub fn estimate_size(&self, paths: &[PathBuf]) -> u64 {
        let fallback = self.mean_file_size();
        paths
            .iter()
            .map(|p| std::fs::metadata(p).map(|m| m.len()).unwrap_or(fallback))
            .sum()
    }

    /// Average throughput over the window: `Σ bytes / Σ duration`, not a
    /// mean of per-run ratios.
    fn average_throughput(&self) -> f64 {
        let (bytes, secs) = self
            .window()
            .fold((0u64, 0.0f64), |(b, s), r| {
                (b + r.total_size_bytes, s + r.duration.as_secs_f64())
            });
        if secs <= f64::EPSILON || bytes == 0 {
            DEFAULT_THROUGHPUT
        } else {
            bytes as f64 / secs
        }
    }

    /// Projected duration for a batch of `size_bytes`.
    pub fn estimate_duration(&self, size_bytes: u64) -> Duration {
        Duration::from_secs_f64(size_bytes as f64 / self.average_throughput())
    }

    // ─── Live progress ─────────────────────────────────────────────────────

    /// Mark a run as started and seed the live snapshot with the estimate.
    pub fn begin_run(
        &mut self,
        start_time: DateTime<Utc>,
        estimated_total_bytes: u64,
        total_files: usize,
    ) {
        self.live = ProgressSnapshot {
            in_progress: true,
            start_time: Some(start_time),
            estimated_total_bytes,
            total_files,
            ..ProgressSnapshot::default()
        };
    }

    /// Store the executor's latest progress tuple verbatim. None of the rate,
    /// ETA, or percentage fields are recomputed here while a run is active.
    pub fn update_live(&mut self, update: &ProgressUpdate) {
        self.live.apply(update);
    }

    /// Mark the in-flight run as finished.
    pub fn finish_run(&mut self) {
        self.live.in_progress = false;
        self.live.current_file = None;
    }

    /// Copy-on-read view for status consumers.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.live.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn record(bytes: u64, files: usize, secs: u64) -> SyncHistoryRecord {
        SyncHistoryRecord {
            duration: Duration::from_secs(secs),
            total_size_bytes: bytes,
            file_count: files,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn history_is_capped_at_ten_newest_records() {
        let mut est = ProgressEstimator::new();
        for i in 0..50u64 {
            est.record_run(record(i, 1, 1));
        }
        assert_eq!(est.history().len(), HISTORY_LIMIT);
        let sizes: Vec<u64> = est.history().iter().map(|r| r.total_size_bytes).collect();
        assert_eq!(sizes, (40..50).collect::<Vec<u64>>(), "oldest evicted first");
    }

    #[test]
    fn size_estimate_sums_real_sizes_for_existing_paths() {
        let dir = TempDir::new().expect("dir");
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, vec![0u8; 100]).expect("write");
        std::fs::write(&b, vec![0u8; 250]).expect("write");

        let est = ProgressEstimator::new();
        assert_eq!(est.estimate_size(&[a, b]), 350);
    }

    #[test]
    fn unstatable_path_falls_back_to_historical_mean() {
        let mut est = ProgressEstimator::new();
        // 4000 bytes over 8 files → 500 bytes per file.
        est.record_run(record(1000, 2, 1));
        est.record_run(record(3000, 6, 1));

        let missing = PathBuf::from("/definitely/not/here.bin");
        assert_eq!(est.estimate_size(&[missing]), 500);
    }

    #[test]
    fn unstatable_path_defaults_to_one_mebibyte_without_history() {
        let est = ProgressEstimator::new();
        let missing = PathBuf::from("/definitely/not/here.bin");
        assert_eq!(est.estimate_size(&[missing]), DEFAULT_FILE_SIZE);
    }

    #[test]
    fn duration_estimate_uses_aggregate_throughput() {
        let mut est = ProgressEstimator::new();
        // 10 MiB over 10 s → 1 MiB/s aggregate.
        est.record_run(record(8 * 1024 * 1024, 4, 6));
        est.record_run(record(2 * 1024 * 1024, 1, 4));

        let projected = est.estimate_duration(5 * 1024 * 1024);
        assert_eq!(projected, Duration::from_secs(5));
    }

    #[test]
    fn duration_estimate_only_sees_the_last_five_records() {
        let mut est = ProgressEstimator::new();
        // An ancient, pathologically slow run…
        est.record_run(record(1, 1, 1_000_000));
        // …pushed out of the window by five fast ones (1 MiB/s each).
        for _ in 0..ESTIMATE_WINDOW {
            est.record_run(record(1024 * 1024, 1, 1));
        }
        assert_eq!(
            est.estimate_duration(2 * 1024 * 1024),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn duration_estimate_assumes_one_mebibyte_per_second_without_history() {
        let est = ProgressEstimator::new();
        assert_eq!(
            est.estimate_duration(3 * 1024 * 1024),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn live_progress_is_stored_verbatim_and_cleared_on_finish() {
        let mut est = ProgressEstimator::new();
        est.begin_run(Utc::now(), 1000, 3);
        assert!(est.snapshot().in_progress);
        assert_eq!(est.snapshot().estimated_total_bytes, 1000);

        let update = ProgressUpdate {
            bytes_transferred: 400,
            current_file: Some(PathBuf::from("a.txt")),
            files_completed: 1,
            rate_bytes_per_sec: 123.4,
            eta_seconds: 4.9,
            percentage: 40.0,
        };
        est.update_live(&update);
        let live = est.snapshot();
        assert_eq!(live.transferred_bytes, 400);
        assert_eq!(live.rate_bytes_per_sec, 123.4);
        assert_eq!(live.percentage, 40.0);

        est.finish_run();
        let done = est.snapshot();
        assert!(!done.in_progress);
        assert!(done.current_file.is_none());
    }
}
