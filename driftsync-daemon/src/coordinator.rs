//! Daemon runtime: detector workers + scheduler worker + socket server.
//!
//! The coordinator walks `Idle → Batching → Eligible → Syncing → Cooldown`
//! per attempt. Detector tasks (one per watched root) only *produce* change
//! events; every mutation of the pending set happens on the single scheduler
//! worker, which also owns the flush deadline and the one-attempt-at-a-time
//! guard. Events arriving while a sync is in flight accumulate into the next
//! batch, never into the frozen one.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::event::ModifyKind;
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use driftsync_core::config::{self, DirectoryMapping, SyncSettings};
use driftsync_core::types::{
    ChangeEvent, ChangeKind, ConflictStrategy, DaemonStatus, MappingName, ProgressUpdate,
    SyncHistoryRecord, SyncMode,
};
use driftsync_detector::{filter_notification, ExcludeMatcher, PollDetector, RawNotification};
use driftsync_engine::{
    batch::{Batch, BatchPlanner, FlushDecision, PendingChanges},
    conflict::{self, Conflict, ConflictOutcome},
    EngineError, HostResolver, ProgressEstimator, RsyncExecutor, StaticHostResolver,
    SyncDirection, TransferExecutor, TransferStats,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{logs_dir, run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::status;

/// How long `stop()` waits for an in-flight sync before giving up on it.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(120);

const LOG_ROTATION_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Scheduler messages and shared state
// ---------------------------------------------------------------------------

/// Which side of a mapping a change was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeOrigin {
    Local,
    Remote,
}

/// One detector-produced change routed to the scheduler worker.
#[derive(Debug, Clone)]
struct DetectedChange {
    mapping: MappingName,
    origin: ChangeOrigin,
    event: ChangeEvent,
}

/// Everything the scheduler worker reacts to. Keeping attempt completion on
/// the same channel preserves the single-writer discipline for all pending
/// state.
enum SchedulerMsg {
    Change(DetectedChange),
    /// Operator-requested flush; still gated by the min-interval floor.
    FlushNow,
    AttemptFinished(AttemptReport),
}

#[derive(Debug, Default)]
struct DaemonState {
    last_sync_time: Option<DateTime<Utc>>,
    pending_change_count: usize,
    conflicts: Vec<Conflict>,
    sync_in_progress: bool,
    error_count: u64,
}

type SharedState = Arc<RwLock<DaemonState>>;

async fn status_snapshot(state: &SharedState) -> DaemonStatus {
    let s = state.read().await;
    DaemonStatus {
        running: true,
        last_sync_time: s.last_sync_time,
        pending_change_count: s.pending_change_count,
        conflict_count: s.conflicts.len(),
        sync_in_progress: s.sync_in_progress,
        error_count: s.error_count,
    }
}

/// Outcome of one spawned sync attempt, reported back to the scheduler.
struct AttemptReport {
    success: bool,
    error: Option<String>,
    stats: TransferStats,
    /// The size estimate taken at start; recorded in history verbatim.
    estimated_bytes: u64,
    file_count: usize,
    duration: Duration,
    /// The frozen batch, handed back so a failure can re-queue it.
    batch: Batch,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load + validate config, wire the production collaborators, run.
///
/// Configuration errors propagate to the caller; the daemon never enters
/// `Idle` on an invalid config.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let settings = config::load_at(&home)?;
    settings.validate()?;

    let executor: Arc<dyn TransferExecutor> = Arc::new(RsyncExecutor::new(
        settings.remote.clone(),
        settings.exclude_patterns.clone(),
    ));
    let resolver: Arc<dyn HostResolver> =
        Arc::new(StaticHostResolver::new(settings.remote.host.clone()));
    run_with(home, settings, executor, resolver).await
}

/// Run the daemon runtime with explicit collaborators.
pub async fn run_with(
    home: PathBuf,
    settings: SyncSettings,
    executor: Arc<dyn TransferExecutor>,
    resolver: Arc<dyn HostResolver>,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let state: SharedState = Arc::new(RwLock::new(DaemonState::default()));
    let estimator = Arc::new(Mutex::new(ProgressEstimator::new()));
    let (sched_tx, sched_rx) = mpsc::channel::<SchedulerMsg>(1024);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let mut handles: Vec<(String, JoinHandle<Result<(), DaemonError>>)> = Vec::new();

    for mapping in settings.enabled_mappings() {
        let excludes = ExcludeMatcher::new(&settings.exclude_patterns_for(mapping))?;

        {
            let shutdown = shutdown_tx.clone();
            let mapping = mapping.clone();
            let excludes = excludes.clone();
            let tx = sched_tx.clone();
            let label = format!("watcher:{}", mapping.name);
            handles.push((
                label,
                tokio::spawn(async move {
                    let result = watcher_task(mapping, excludes, tx, shutdown.subscribe()).await;
                    let _ = shutdown.send(());
                    result
                }),
            ));
        }

        if let Some(poll_root) = &mapping.remote_poll_path {
            let shutdown = shutdown_tx.clone();
            let name = mapping.name.clone();
            let poll_root = poll_root.clone();
            let tx = sched_tx.clone();
            let interval = settings.poll_interval();
            let label = format!("poll:{}", name);
            handles.push((
                label,
                tokio::spawn(async move {
                    let result =
                        poll_task(name, poll_root, excludes, interval, tx, shutdown.subscribe())
                            .await;
                    let _ = shutdown.send(());
                    result
                }),
            ));
        }
    }

    {
        let shutdown = shutdown_tx.clone();
        let scheduler = Scheduler::new(
            home.clone(),
            &settings,
            state.clone(),
            estimator.clone(),
            executor,
            resolver,
            sched_tx.clone(),
        );
        handles.push((
            "scheduler".to_string(),
            tokio::spawn(async move {
                let result = scheduler.run(sched_rx, shutdown.subscribe()).await;
                let _ = shutdown.send(());
                result
            }),
        ));
    }

    {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let state = state.clone();
        let estimator = estimator.clone();
        let tx = sched_tx.clone();
        handles.push((
            "socket_server".to_string(),
            tokio::spawn(async move {
                let result = socket_server_task(
                    home,
                    state,
                    estimator,
                    tx,
                    shutdown.clone(),
                    shutdown.subscribe(),
                )
                .await;
                let _ = shutdown.send(());
                result
            }),
        ));
    }

    {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        handles.push((
            "log_rotation".to_string(),
            tokio::spawn(async move {
                let result = log_rotation_task(home, shutdown.subscribe()).await;
                let _ = shutdown.send(());
                result
            }),
        ));
    }

    {
        let shutdown = shutdown_tx.clone();
        handles.push((
            "signal_handler".to_string(),
            tokio::spawn(async move {
                let mut shutdown_rx = shutdown.subscribe();
                tokio::select! {
                    _ = shutdown_rx.recv() => Ok(()),
                    signal = tokio::signal::ctrl_c() => {
                        match signal {
                            Ok(()) => {
                                tracing::info!("received ctrl-c, shutting down daemon");
                                let _ = shutdown.send(());
                                Ok(())
                            }
                            Err(err) => Err(DaemonError::Protocol(format!(
                                "ctrl-c handler failed: {err}"
                            ))),
                        }
                    }
                }
            }),
        ));
    }

    drop(sched_tx);

    let mut first_error = None;
    for (name, handle) in handles {
        if let Err(err) = handle_join(&name, handle.await) {
            tracing::error!(task = %name, error = %err, "daemon task failed");
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Detector workers
// ---------------------------------------------------------------------------

/// Push-mode worker: one notify watcher over a mapping's local root.
async fn watcher_task(
    mapping: DirectoryMapping,
    excludes: ExcludeMatcher,
    sched_tx: mpsc::Sender<SchedulerMsg>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = &mapping.local_path;
    if !root.exists() {
        fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
    }
    // Canonicalize so backend-reported real paths (e.g. /private/var/... on
    // macOS) survive the strip_prefix against the root.
    let root = fs::canonicalize(root).unwrap_or_else(|_| root.clone());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut _watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    _watcher.watch(&root, RecursiveMode::Recursive)?;
    tracing::info!(mapping = %mapping.name, root = %root.display(), "watching local root");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                let Some(kind) = change_kind_for(&event.kind) else { continue };

                for path in event.paths {
                    let raw = RawNotification {
                        is_directory: path.is_dir(),
                        path,
                        kind,
                    };
                    let Some(change) = filter_notification(&root, &excludes, raw) else {
                        continue;
                    };
                    let msg = SchedulerMsg::Change(DetectedChange {
                        mapping: mapping.name.clone(),
                        origin: ChangeOrigin::Local,
                        event: change,
                    });
                    if sched_tx.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    Ok(())
}

fn change_kind_for(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Moved),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

/// Poll-mode worker: snapshot-diffs a locally reachable view of the remote
/// tree on a fixed cadence. Scanning happens off the runtime threads.
async fn poll_task(
    mapping: MappingName,
    poll_root: PathBuf,
    excludes: ExcludeMatcher,
    poll_interval: Duration,
    sched_tx: mpsc::Sender<SchedulerMsg>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut detector = Some(PollDetector::new(poll_root, excludes));
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let Some(mut d) = detector.take() else { break };
                let (d, events) = tokio::task::spawn_blocking(move || {
                    let events = d.poll();
                    (d, events)
                })
                .await
                .map_err(|err| DaemonError::Protocol(format!("poll task join error: {err}")))?;
                detector = Some(d);

                if !events.is_empty() {
                    tracing::info!(mapping = %mapping, count = events.len(), "remote changes detected");
                }
                for event in events {
                    let msg = SchedulerMsg::Change(DetectedChange {
                        mapping: mapping.clone(),
                        origin: ChangeOrigin::Remote,
                        event,
                    });
                    if sched_tx.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Scheduler worker
// ---------------------------------------------------------------------------

struct Scheduler {
    home: PathBuf,
    mode: SyncMode,
    strategy: ConflictStrategy,
    mappings: HashMap<MappingName, DirectoryMapping>,
    planner: BatchPlanner,
    pending_local: PendingChanges,
    pending_remote: PendingChanges,
    inflight: bool,
    state: SharedState,
    estimator: Arc<Mutex<ProgressEstimator>>,
    executor: Arc<dyn TransferExecutor>,
    resolver: Arc<dyn HostResolver>,
    sched_tx: mpsc::Sender<SchedulerMsg>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    fn new(
        home: PathBuf,
        settings: &SyncSettings,
        state: SharedState,
        estimator: Arc<Mutex<ProgressEstimator>>,
        executor: Arc<dyn TransferExecutor>,
        resolver: Arc<dyn HostResolver>,
        sched_tx: mpsc::Sender<SchedulerMsg>,
    ) -> Self {
        Self {
            home,
            mode: settings.mode,
            strategy: settings.conflict_strategy,
            mappings: settings
                .enabled_mappings()
                .map(|m| (m.name.clone(), m.clone()))
                .collect(),
            planner: BatchPlanner::new(
                settings.delay(),
                settings.min_interval(),
                settings.batch_size,
            ),
            pending_local: PendingChanges::new(),
            pending_remote: PendingChanges::new(),
            inflight: false,
            state,
            estimator,
            executor,
            resolver,
            sched_tx,
        }
    }

    async fn run(
        mut self,
        mut sched_rx: mpsc::Receiver<SchedulerMsg>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), DaemonError> {
        self.write_status().await;

        loop {
            let deadline = self.planner.deadline().map(Instant::from_std);
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    self.drain_on_shutdown(&mut sched_rx).await;
                    break;
                }
                maybe = sched_rx.recv() => {
                    let Some(msg) = maybe else { break };
                    match msg {
                        SchedulerMsg::Change(change) => self.absorb(change).await,
                        SchedulerMsg::FlushNow => {
                            tracing::info!("immediate flush requested");
                            self.planner.arm_immediate(Instant::now().into_std());
                        }
                        SchedulerMsg::AttemptFinished(report) => {
                            self.finish_attempt(report).await;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(far_future)),
                    if deadline.is_some() =>
                {
                    self.on_deadline().await;
                }
            }
        }

        status::remove_status_file(&self.home);
        Ok(())
    }

    fn total_pending(&self) -> usize {
        self.pending_local.total_len() + self.pending_remote.total_len()
    }

    /// Merge one detected change and re-arm the flush deadline. The whole
    /// pending set is only ever touched from this worker.
    async fn absorb(&mut self, change: DetectedChange) {
        tracing::debug!(
            mapping = %change.mapping,
            path = %change.event.path.display(),
            kind = %change.event.kind,
            origin = ?change.origin,
            "change absorbed",
        );
        match change.origin {
            ChangeOrigin::Local => self.pending_local.insert(change.mapping, change.event),
            ChangeOrigin::Remote => self.pending_remote.insert(change.mapping, change.event),
        }
        let total = self.total_pending();
        self.planner.note_event(Instant::now().into_std(), total);
        self.state.write().await.pending_change_count = total;
    }

    async fn on_deadline(&mut self) {
        match self.planner.decide(Instant::now().into_std()) {
            FlushDecision::Wait => {}
            FlushDecision::Defer(_) => {
                tracing::debug!("flush deferred by min-interval floor");
            }
            FlushDecision::Flush => {
                if self.inflight {
                    // One attempt at a time; the completion handler re-arms.
                    self.planner.clear();
                    return;
                }
                if self.total_pending() == 0 {
                    // Empty flush: no history record, no state transition.
                    return;
                }

                let (batch, conflicts) = freeze_batch(
                    &mut self.pending_local,
                    &mut self.pending_remote,
                    self.strategy,
                );
                let total = self.total_pending();
                {
                    let mut s = self.state.write().await;
                    s.pending_change_count = total;
                    if !conflicts.is_empty() {
                        tracing::warn!(
                            count = conflicts.len(),
                            "conflicts require manual resolution",
                        );
                        s.conflicts.extend(conflicts);
                    }
                }

                if batch.is_empty() {
                    tracing::debug!("batch empty after conflict screening; nothing to sync");
                    return;
                }
                self.start_attempt(batch).await;
            }
        }
    }

    async fn start_attempt(&mut self, batch: Batch) {
        self.planner.note_sync_start(Instant::now().into_std());

        let abs_paths: Vec<PathBuf> = batch
            .events()
            .filter_map(|(name, event)| {
                self.mappings
                    .get(name)
                    .map(|m| m.local_path.join(&event.path))
            })
            .collect();
        let mappings: Vec<DirectoryMapping> = batch
            .mappings()
            .filter_map(|name| self.mappings.get(name).cloned())
            .collect();

        let file_count = batch.len();
        let estimated_bytes = {
            let mut est = self.estimator.lock().await;
            let size = est.estimate_size(&abs_paths);
            let eta = est.estimate_duration(size);
            est.begin_run(Utc::now(), size, file_count);
            tracing::info!(
                files = file_count,
                estimated_bytes = size,
                eta_secs = eta.as_secs(),
                "starting sync attempt",
            );
            size
        };

        self.state.write().await.sync_in_progress = true;
        self.inflight = true;
        self.write_status().await;

        let executor = self.executor.clone();
        let resolver = self.resolver.clone();
        let estimator = self.estimator.clone();
        let direction = SyncDirection::from(self.mode);
        let report_tx = self.sched_tx.clone();
        tokio::spawn(async move {
            let report = run_sync_attempt(
                executor,
                resolver,
                estimator,
                direction,
                mappings,
                batch,
                estimated_bytes,
                file_count,
            )
            .await;
            if report_tx
                .send(SchedulerMsg::AttemptFinished(report))
                .await
                .is_err()
            {
                tracing::warn!("scheduler gone before sync report could be delivered");
            }
        });
    }

    /// Cooldown bookkeeping. Success destroys the batch's pending entries
    /// for good; failure re-queues them for the next flush. Either way the
    /// next attempt stays behind the min-interval floor.
    async fn finish_attempt(&mut self, report: AttemptReport) {
        self.inflight = false;
        let finished_at = Utc::now();

        {
            let mut est = self.estimator.lock().await;
            est.finish_run();
            est.record_run(SyncHistoryRecord {
                duration: report.duration,
                total_size_bytes: report.estimated_bytes,
                file_count: report.file_count,
                timestamp: finished_at,
            });
        }

        if report.success {
            tracing::info!(
                files = report.stats.files_transferred,
                bytes = report.stats.total_bytes,
                "sync attempt succeeded",
            );
        } else {
            tracing::warn!(
                error = report.error.as_deref().unwrap_or("unknown"),
                "sync attempt failed; re-queueing batch",
            );
            // Re-queued changes re-enter on the local side; a fresh remote
            // event for the same path pairs against them at the next freeze.
            self.pending_local.requeue(report.batch);
        }

        let total = self.total_pending();
        {
            let mut s = self.state.write().await;
            s.sync_in_progress = false;
            s.last_sync_time = Some(finished_at);
            s.pending_change_count = total;
            if !report.success {
                s.error_count += 1;
            }
        }

        if total > 0 {
            self.planner.note_event(Instant::now().into_std(), total);
        }
        self.write_status().await;
    }

    /// Let an in-flight attempt finish (bounded) before reporting stopped.
    async fn drain_on_shutdown(&mut self, sched_rx: &mut mpsc::Receiver<SchedulerMsg>) {
        self.planner.clear();
        if !self.inflight {
            return;
        }
        tracing::info!(
            timeout_secs = SHUTDOWN_DRAIN.as_secs(),
            "waiting for in-flight sync before stopping",
        );
        let drained = tokio::time::timeout(SHUTDOWN_DRAIN, async {
            while let Some(msg) = sched_rx.recv().await {
                if let SchedulerMsg::AttemptFinished(report) = msg {
                    return Some(report);
                }
            }
            None
        })
        .await;
        match drained {
            Ok(Some(report)) => self.finish_attempt(report).await,
            Ok(None) => {}
            Err(_) => tracing::warn!("in-flight sync did not finish before shutdown"),
        }
    }

    async fn write_status(&self) {
        let snapshot = status_snapshot(&self.state).await;
        if let Err(err) = status::write_status_file(&self.home, &snapshot) {
            tracing::warn!(error = %err, "failed to write status file");
        }
    }
}

/// Freeze the current pending set into a batch, resolving local/remote pairs
/// that touch the same path. `ManualRequired` pairs are pulled out of the
/// batch and surfaced; they do not block the rest of the batch.
fn freeze_batch(
    local: &mut PendingChanges,
    remote: &mut PendingChanges,
    strategy: ConflictStrategy,
) -> (Batch, Vec<Conflict>) {
    use std::collections::hash_map::Entry;

    let local_batch = local.take_all();
    let remote_batch = remote.take_all();

    let mut merged = local_batch.changes;
    let mut conflicts = Vec::new();

    for (mapping, paths) in remote_batch.changes {
        let slot = merged.entry(mapping.clone()).or_default();
        for (path, remote_event) in paths {
            match slot.entry(path) {
                Entry::Occupied(mut occupied) => {
                    let local_event = occupied.get().clone();
                    let (outcome, _winner) =
                        conflict::resolve(&local_event, &remote_event, strategy);
                    match outcome {
                        ConflictOutcome::LocalWins => {}
                        ConflictOutcome::RemoteWins => {
                            occupied.insert(remote_event);
                        }
                        ConflictOutcome::ManualRequired => {
                            let (path, local_event) = occupied.remove_entry();
                            conflicts.push(Conflict {
                                mapping: mapping.clone(),
                                path,
                                local: local_event,
                                remote: remote_event,
                            });
                        }
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(remote_event);
                }
            }
        }
    }

    merged.retain(|_, paths| !paths.is_empty());
    (Batch { changes: merged }, conflicts)
}

/// Execute one frozen batch against the transfer executor. Runs on its own
/// task; the scheduler keeps absorbing events meanwhile.
#[allow(clippy::too_many_arguments)]
async fn run_sync_attempt(
    executor: Arc<dyn TransferExecutor>,
    resolver: Arc<dyn HostResolver>,
    estimator: Arc<Mutex<ProgressEstimator>>,
    direction: SyncDirection,
    mappings: Vec<DirectoryMapping>,
    batch: Batch,
    estimated_bytes: u64,
    file_count: usize,
) -> AttemptReport {
    let started = Instant::now();

    let outcome = tokio::task::spawn_blocking(move || {
        let host = resolver.ensure_reachable()?;
        let progress: Box<dyn Fn(ProgressUpdate) + Send + Sync> = Box::new(move |update| {
            estimator.blocking_lock().update_live(&update);
        });

        let mut stats = TransferStats::default();
        for mapping in &mappings {
            stats = stats.merge(executor.execute(
                &host,
                direction,
                mapping,
                false,
                Some(progress.as_ref()),
            )?);
        }
        Ok::<TransferStats, EngineError>(stats)
    })
    .await;

    let duration = started.elapsed();
    let (success, error, stats) = match outcome {
        Ok(Ok(stats)) => (true, None, stats),
        Ok(Err(err)) => (false, Some(err.to_string()), TransferStats::default()),
        Err(join_err) => (
            false,
            Some(format!("sync task join error: {join_err}")),
            TransferStats::default(),
        ),
    };

    AttemptReport {
        success,
        error,
        stats,
        estimated_bytes,
        file_count,
        duration,
        batch,
    }
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    home: PathBuf,
    state: SharedState,
    estimator: Arc<Mutex<ProgressEstimator>>,
    sched_tx: mpsc::Sender<SchedulerMsg>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let run = run_dir(&home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let estimator = estimator.clone();
                let sched_tx = sched_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, state, estimator, sched_tx, shutdown_tx).await
                    {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: SharedState,
    estimator: Arc<Mutex<ProgressEstimator>>,
    sched_tx: mpsc::Sender<SchedulerMsg>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: Result<DaemonRequest, _> = serde_json::from_str(&line);
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let cmd = request.cmd.clone();
        let response = match cmd.as_str() {
            "status" => {
                let payload = build_status_payload(&state, &estimator).await;
                DaemonResponse::ok(payload)
            }
            "sync" => {
                if request.mapping.is_some() {
                    DaemonResponse::error(
                        "mapping-scoped flush is not supported; the daemon flushes all pending changes",
                    )
                } else {
                    match sched_tx.send(SchedulerMsg::FlushNow).await {
                        Ok(()) => {
                            let status = status_snapshot(&state).await;
                            DaemonResponse::ok(json!({
                                "scheduled": true,
                                "pending_change_count": status.pending_change_count,
                            }))
                        }
                        Err(_) => DaemonResponse::error("scheduler is not running"),
                    }
                }
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(
    state: &SharedState,
    estimator: &Arc<Mutex<ProgressEstimator>>,
) -> Value {
    let status = status_snapshot(state).await;
    let progress = estimator.lock().await.snapshot();

    let mut payload = serde_json::to_value(&status).unwrap_or(Value::Null);
    if let Value::Object(ref mut map) = payload {
        map.insert(
            "progress".to_string(),
            serde_json::to_value(&progress).unwrap_or(Value::Null),
        );
    }
    payload
}

// ---------------------------------------------------------------------------
// Housekeeping tasks and helpers
// ---------------------------------------------------------------------------

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(LOG_ROTATION_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // skip the immediate tick; no rotation on startup

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&home);
                })
                .await
                .ok(); // rotation errors are logged inside rotate_logs
            }
        }
    }
    Ok(())
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    let logs = logs_dir(home);
    if !logs.exists() {
        fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365)
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use driftsync_core::config::SyncSettings;
    use driftsync_core::types::ChangeKind;

    use super::*;

    // ─── Scripted executor ────────────────────────────────────────────────

    struct ScriptedExecutor {
        calls: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TransferExecutor for ScriptedExecutor {
        fn execute(
            &self,
            _host: &str,
            _direction: SyncDirection,
            _mapping: &DirectoryMapping,
            _dry_run: bool,
            _progress: Option<&driftsync_engine::ProgressFn>,
        ) -> Result<TransferStats, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::Transfer("scripted failure".to_string()));
            }
            Ok(TransferStats::default())
        }
    }

    // ─── Test rig around a spawned scheduler ──────────────────────────────

    struct Rig {
        _home: TempDir,
        _root: TempDir,
        mapping: MappingName,
        state: SharedState,
        estimator: Arc<Mutex<ProgressEstimator>>,
        executor: Arc<ScriptedExecutor>,
        sched_tx: mpsc::Sender<SchedulerMsg>,
        shutdown_tx: broadcast::Sender<()>,
        handle: JoinHandle<Result<(), DaemonError>>,
    }

    fn test_settings(root: &Path, delay: u64, min_interval: u64, batch: usize) -> SyncSettings {
        let mut settings = SyncSettings::starter("rigtest", root.to_path_buf());
        settings.delay_secs = delay;
        settings.min_interval_secs = min_interval;
        settings.batch_size = batch;
        settings
    }

    fn spawn_rig(
        delay: u64,
        min_interval: u64,
        batch: usize,
        failures: usize,
        strategy: ConflictStrategy,
    ) -> Rig {
        let home = TempDir::new().expect("home");
        let root = TempDir::new().expect("root");
        let mut settings = test_settings(root.path(), delay, min_interval, batch);
        settings.conflict_strategy = strategy;
        let mapping = settings.mappings[0].name.clone();

        let state: SharedState = Arc::new(RwLock::new(DaemonState::default()));
        let estimator = Arc::new(Mutex::new(ProgressEstimator::new()));
        let executor = ScriptedExecutor::new(failures);
        let resolver: Arc<dyn HostResolver> = Arc::new(StaticHostResolver::new("test-host"));
        let (sched_tx, sched_rx) = mpsc::channel(64);
        let (shutdown_tx, _) = broadcast::channel(4);

        let scheduler = Scheduler::new(
            home.path().to_path_buf(),
            &settings,
            state.clone(),
            estimator.clone(),
            executor.clone(),
            resolver,
            sched_tx.clone(),
        );
        let handle = tokio::spawn(scheduler.run(sched_rx, shutdown_tx.subscribe()));

        Rig {
            _home: home,
            _root: root,
            mapping,
            state,
            estimator,
            executor,
            sched_tx,
            shutdown_tx,
            handle,
        }
    }

    impl Rig {
        async fn send(&self, origin: ChangeOrigin, path: &str) {
            self.sched_tx
                .send(SchedulerMsg::Change(DetectedChange {
                    mapping: self.mapping.clone(),
                    origin,
                    event: ChangeEvent::now(path, ChangeKind::Modified),
                }))
                .await
                .expect("scheduler alive");
            tokio::task::yield_now().await;
        }

        async fn wait_for_calls(&self, n: usize) {
            for _ in 0..2000 {
                if self.executor.calls() >= n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("timed out waiting for {n} executor calls");
        }

        async fn wait_for_idle(&self) {
            for _ in 0..2000 {
                if !self.state.read().await.sync_in_progress {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("timed out waiting for sync to finish");
        }

        async fn history_len(&self) -> usize {
            self.estimator.lock().await.history().len()
        }
    }

    // ─── Scheduler behavior ───────────────────────────────────────────────

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn burst_under_batch_size_flushes_exactly_once() {
        let rig = spawn_rig(5, 0, 10, 0, ConflictStrategy::Newer);

        rig.send(ChangeOrigin::Local, "a.txt").await;
        rig.send(ChangeOrigin::Local, "b.txt").await;
        rig.send(ChangeOrigin::Local, "a.txt").await; // overwrite, not duplicate

        // Quiet period not yet elapsed.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(rig.executor.calls(), 0, "must not flush inside quiet period");

        tokio::time::sleep(Duration::from_secs(2)).await;
        rig.wait_for_calls(1).await;
        rig.wait_for_idle().await;

        // No further flush without new events.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(rig.executor.calls(), 1, "burst must collapse to one flush");
        assert_eq!(rig.history_len().await, 1);
        assert_eq!(rig.state.read().await.pending_change_count, 0);

        let _ = rig.shutdown_tx.send(());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn reaching_batch_size_skips_the_quiet_period() {
        // delay of 100s would dominate if the immediate flush didn't fire.
        let rig = spawn_rig(100, 0, 3, 0, ConflictStrategy::Newer);

        rig.send(ChangeOrigin::Local, "a.txt").await;
        rig.send(ChangeOrigin::Local, "b.txt").await;
        rig.send(ChangeOrigin::Local, "c.txt").await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        rig.wait_for_calls(1).await;
        assert_eq!(rig.executor.calls(), 1);

        let _ = rig.shutdown_tx.send(());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn min_interval_floors_the_second_attempt() {
        let rig = spawn_rig(1, 30, 10, 0, ConflictStrategy::Newer);

        rig.send(ChangeOrigin::Local, "a.txt").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        rig.wait_for_calls(1).await;
        rig.wait_for_idle().await;

        // Second event right after the first attempt; its quiet period ends
        // long before the floor does.
        rig.send(ChangeOrigin::Local, "b.txt").await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            rig.executor.calls(),
            1,
            "second attempt must wait out the min-interval floor"
        );

        tokio::time::sleep(Duration::from_secs(25)).await;
        rig.wait_for_calls(2).await;

        let _ = rig.shutdown_tx.send(());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn failed_attempt_requeues_batch_until_a_success_clears_it() {
        let rig = spawn_rig(1, 5, 10, 1, ConflictStrategy::Newer);

        rig.send(ChangeOrigin::Local, "x.txt").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        rig.wait_for_calls(1).await;
        rig.wait_for_idle().await;

        {
            let s = rig.state.read().await;
            assert_eq!(s.error_count, 1, "failure must bump the error counter");
            assert_eq!(
                s.pending_change_count, 1,
                "failed batch must be pending again immediately"
            );
        }
        assert_eq!(rig.history_len().await, 1, "failed attempt is recorded");

        // Retry is still throttled by the floor; then it succeeds.
        tokio::time::sleep(Duration::from_secs(10)).await;
        rig.wait_for_calls(2).await;
        rig.wait_for_idle().await;

        {
            let s = rig.state.read().await;
            assert_eq!(s.error_count, 1);
            assert_eq!(
                s.pending_change_count, 0,
                "successful retry must clear the pending set"
            );
        }
        assert_eq!(rig.history_len().await, 2);

        let _ = rig.shutdown_tx.send(());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn flush_with_empty_pending_set_is_a_noop() {
        let rig = spawn_rig(1, 0, 10, 0, ConflictStrategy::Newer);

        rig.sched_tx
            .send(SchedulerMsg::FlushNow)
            .await
            .expect("scheduler alive");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(rig.executor.calls(), 0, "nothing pending, nothing to run");
        assert_eq!(rig.history_len().await, 0, "no history for an empty flush");
        assert!(rig.state.read().await.last_sync_time.is_none());

        let _ = rig.shutdown_tx.send(());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn manual_conflicts_are_surfaced_and_excluded_from_the_batch() {
        let rig = spawn_rig(1, 0, 10, 0, ConflictStrategy::Manual);

        rig.send(ChangeOrigin::Local, "clash.txt").await;
        rig.send(ChangeOrigin::Remote, "clash.txt").await;
        rig.send(ChangeOrigin::Local, "free.txt").await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        rig.wait_for_calls(1).await;
        rig.wait_for_idle().await;

        let s = rig.state.read().await;
        assert_eq!(s.conflicts.len(), 1, "conflicting pair must be surfaced");
        assert_eq!(s.conflicts[0].path, PathBuf::from("clash.txt"));
        assert_eq!(
            s.pending_change_count, 0,
            "the unconflicted path must still have synced"
        );
        drop(s);
        assert_eq!(rig.history_len().await, 1);

        let _ = rig.shutdown_tx.send(());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn shutdown_stops_the_scheduler_and_removes_the_status_file() {
        let rig = spawn_rig(5, 0, 10, 0, ConflictStrategy::Newer);
        tokio::task::yield_now().await;

        let status_path = crate::paths::status_file_path(rig._home.path());
        // Stop twice; the second send simply has no receiver left to notify.
        let _ = rig.shutdown_tx.send(());
        let _ = rig.shutdown_tx.send(());

        let result = rig.handle.await.expect("join");
        result.expect("scheduler exits cleanly");
        assert!(!status_path.exists(), "status file removed on clean stop");
    }

    // ─── freeze_batch ─────────────────────────────────────────────────────

    fn event_at(path: &str, secs: i64) -> ChangeEvent {
        use chrono::TimeZone;
        let mut event = ChangeEvent::now(path, ChangeKind::Modified);
        event.timestamp = Utc
            .timestamp_opt(secs, 0)
            .single()
            .expect("valid timestamp");
        event
    }

    #[test]
    fn freeze_merges_disjoint_sides_without_conflicts() {
        let mapping = MappingName::from("m");
        let mut local = PendingChanges::new();
        let mut remote = PendingChanges::new();
        local.insert(mapping.clone(), event_at("a.txt", 10));
        remote.insert(mapping.clone(), event_at("b.txt", 20));

        let (batch, conflicts) = freeze_batch(&mut local, &mut remote, ConflictStrategy::Newer);
        assert_eq!(batch.len(), 2);
        assert!(conflicts.is_empty());
        assert!(local.is_empty() && remote.is_empty());
    }

    #[test]
    fn freeze_resolves_newer_remote_over_older_local() {
        let mapping = MappingName::from("m");
        let mut local = PendingChanges::new();
        let mut remote = PendingChanges::new();
        local.insert(mapping.clone(), event_at("x.txt", 100));
        remote.insert(mapping.clone(), event_at("x.txt", 200));

        let (batch, conflicts) = freeze_batch(&mut local, &mut remote, ConflictStrategy::Newer);
        assert!(conflicts.is_empty());
        assert_eq!(batch.len(), 1);
        let (_, event) = batch.events().next().expect("one event");
        assert_eq!(event.timestamp, event_at("x.txt", 200).timestamp, "remote wins");
    }

    #[test]
    fn freeze_pulls_manual_pairs_out_of_the_batch() {
        let mapping = MappingName::from("m");
        let mut local = PendingChanges::new();
        let mut remote = PendingChanges::new();
        local.insert(mapping.clone(), event_at("clash.txt", 100));
        remote.insert(mapping.clone(), event_at("clash.txt", 200));
        local.insert(mapping.clone(), event_at("free.txt", 100));

        let (batch, conflicts) = freeze_batch(&mut local, &mut remote, ConflictStrategy::Manual);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].path, PathBuf::from("clash.txt"));
        assert_eq!(batch.len(), 1, "unrelated path stays in the batch");
        let (_, event) = batch.events().next().expect("one event");
        assert_eq!(event.path, PathBuf::from("free.txt"));
    }

    // ─── change_kind_for ──────────────────────────────────────────────────

    #[test]
    fn notify_kinds_map_to_change_kinds() {
        use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};

        assert_eq!(
            change_kind_for(&EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            change_kind_for(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            change_kind_for(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(ChangeKind::Moved)
        );
        assert_eq!(
            change_kind_for(&EventKind::Remove(RemoveKind::File)),
            Some(ChangeKind::Deleted)
        );
        assert_eq!(change_kind_for(&EventKind::Any), None);
    }
}
