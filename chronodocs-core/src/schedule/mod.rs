//! Debounce and throttle coordinator that drives reconciliation passes.
//!
//! One [`ReconcileScheduler`] exists per watched directory. Qualifying change
//! events restart a trailing-edge debounce timer; when it fires the scheduler
//! tries to take the single-flight lock around the target, enforces the
//! minimum spacing between passes by deferring, and runs the pass on the
//! blocking pool.
//!
//! ```text
//!            event                      timer fires, lock free, cooled down
//!   Idle ─────────────▶ PendingDebounce ───────────────────────────────────▶ Running
//!    ▲                   │  ▲   │ not cooled down: re-arm for the remainder     │
//!    │                   │  └───┘                                               │
//!    └───────────────────┴──────────────────── pass finished ◀──────────────────┘
//! ```
//!
//! A firing that finds a pass already in flight is dropped, but the scheduler
//! remembers it and arms a fresh debounce cycle once that pass completes.

use std::future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::fs_watch::ChangeEvent;
use crate::ignore::IgnoreSet;
use crate::reconcile::ReconcileReport;

/// Work driven by the scheduler. Implemented by
/// [`Reconciler`](crate::reconcile::Reconciler); tests substitute fakes.
pub trait ReconcileTarget: Send + 'static {
    /// Run one blocking pass.
    fn run_pass(&mut self) -> Result<ReconcileReport>;

    /// Name used in log lines.
    fn label(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Timing knobs for one scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Quiet period required after the last event before a pass fires.
    pub debounce_interval: Duration,
    /// Minimum time between the end of one pass and the start of the next.
    pub min_interval: Duration,
    /// Upper bound of the uniform random delay added to each debounce.
    pub jitter_max: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_interval: Duration::from_millis(2000),
            min_interval: Duration::from_millis(8000),
            jitter_max: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    PendingDebounce,
    Running,
}

#[derive(Debug)]
enum Command {
    Request,
    TriggerNow,
}

type PassOutcome = std::result::Result<Result<ReconcileReport>, JoinError>;

/// Handle to a running coordinator task.
#[derive(Debug)]
pub struct ReconcileScheduler {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SchedulerState>,
    completed: Arc<AtomicU64>,
    ignore: IgnoreSet,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconcileScheduler {
    /// Start the coordinator on the current tokio runtime. `ignore` filters
    /// events passed to [`notify`](Self::notify).
    pub fn spawn<T: ReconcileTarget>(
        target: T,
        config: SchedulerConfig,
        ignore: IgnoreSet,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SchedulerState::Idle);
        let completed = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();

        let label = target.label();
        let coordinator = Coordinator {
            target: Arc::new(Mutex::new(target)),
            label,
            config,
            commands: command_rx,
            state: state_tx,
            completed: Arc::clone(&completed),
            shutdown: shutdown.clone(),
            deadline: None,
            in_flight: None,
            last_completed: None,
            dirty: false,
        };
        let task = tokio::spawn(coordinator.run());

        Self {
            commands,
            state,
            completed,
            ignore,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Feed a change notification. Directory events, read-only events and
    /// ignored paths are discarded. Returns whether the event was accepted.
    pub fn notify(&self, event: &ChangeEvent) -> bool {
        if event.is_directory
            || event.kind.is_read_only()
            || self.ignore.is_ignored(&event.path)
        {
            return false;
        }
        self.commands.send(Command::Request).is_ok()
    }

    /// Restart the debounce timer as if a qualifying event arrived.
    pub fn request(&self) {
        let _ = self.commands.send(Command::Request);
    }

    /// Fire as soon as possible, skipping the debounce delay. The single
    /// flight lock and the cooldown still apply.
    pub fn trigger_now(&self) {
        let _ = self.commands.send(Command::TriggerNow);
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Passes that have finished, successfully or not.
    pub fn completed_runs(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Cancel any pending timer and wait for an in-flight pass to finish.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            error!(error = %err, "scheduler task ended abnormally");
        }
    }
}

impl Drop for ReconcileScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Coordinator<T: ReconcileTarget> {
    target: Arc<Mutex<T>>,
    label: String,
    config: SchedulerConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<SchedulerState>,
    completed: Arc<AtomicU64>,
    shutdown: CancellationToken,
    deadline: Option<Instant>,
    in_flight: Option<JoinHandle<Result<ReconcileReport>>>,
    last_completed: Option<Instant>,
    dirty: bool,
}

impl<T: ReconcileTarget> Coordinator<T> {
    async fn run(mut self) {
        debug!(target_dir = %self.label, "scheduler started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(Command::Request) => self.arm_debounce(),
                    Some(Command::TriggerNow) => self.deadline = Some(Instant::now()),
                    None => break,
                },
                _ = wait_for(self.deadline) => {
                    self.deadline = None;
                    self.fire();
                }
                outcome = join_pass(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.finish(outcome);
                }
            }
            self.publish_state();
        }

        self.deadline = None;
        if let Some(pass) = self.in_flight.take() {
            debug!(target_dir = %self.label, "waiting for in-flight pass before stopping");
            let outcome = pass.await;
            self.finish(outcome);
        }
        self.state.send_replace(SchedulerState::Idle);
        debug!(target_dir = %self.label, "scheduler stopped");
    }

    fn arm_debounce(&mut self) {
        let jitter_ms = self.config.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        self.deadline = Some(Instant::now() + self.config.debounce_interval + jitter);
    }

    fn fire(&mut self) {
        // The lock is released when the pass returns, slightly before its
        // join handle resolves, so an unjoined pass also counts as held.
        let acquired = match self.in_flight {
            Some(_) => None,
            None => Arc::clone(&self.target).try_lock_owned().ok(),
        };
        let guard = match acquired {
            Some(guard) => guard,
            None => {
                debug!(target_dir = %self.label, "pass already in flight, dropping firing");
                self.dirty = true;
                return;
            }
        };

        if let Some(finished) = self.last_completed {
            let elapsed = finished.elapsed();
            if elapsed < self.config.min_interval {
                let remaining = self.config.min_interval - elapsed;
                drop(guard);
                debug!(
                    target_dir = %self.label,
                    remaining_ms = remaining.as_millis() as u64,
                    "cooldown active, deferring pass"
                );
                self.deadline = Some(Instant::now() + remaining);
                return;
            }
        }

        self.in_flight = Some(tokio::task::spawn_blocking(move || run_guarded(guard)));
    }

    fn finish(&mut self, outcome: PassOutcome) {
        self.last_completed = Some(Instant::now());
        self.completed.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(Ok(report)) => {
                if report.renamed.is_empty() && report.skipped.is_empty() {
                    debug!(
                        target_dir = %self.label,
                        observed = report.observed,
                        "pass finished, nothing to rename"
                    );
                } else {
                    info!(
                        target_dir = %self.label,
                        renamed = report.renamed.len(),
                        skipped = report.skipped.len(),
                        pruned = report.pruned,
                        "pass finished"
                    );
                }
            }
            Ok(Err(err)) => {
                error!(target_dir = %self.label, error = %err, "reconciliation pass failed");
            }
            Err(err) => {
                error!(target_dir = %self.label, error = %err, "reconciliation pass panicked");
            }
        }

        if std::mem::take(&mut self.dirty) && self.deadline.is_none() {
            self.arm_debounce();
        }
    }

    fn publish_state(&self) {
        let next = if self.in_flight.is_some() {
            SchedulerState::Running
        } else if self.deadline.is_some() {
            SchedulerState::PendingDebounce
        } else {
            SchedulerState::Idle
        };
        self.state.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }
}

fn run_guarded<T: ReconcileTarget>(mut guard: OwnedMutexGuard<T>) -> Result<ReconcileReport> {
    guard.run_pass()
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn join_pass(
    in_flight: &mut Option<JoinHandle<Result<ReconcileReport>>>,
) -> PassOutcome {
    match in_flight {
        Some(handle) => handle.await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChronoError;
    use crate::fs_watch::ChangeKind;
    use std::sync::atomic::AtomicBool;

    #[derive(Clone, Default)]
    struct Probe {
        runs: Arc<AtomicU64>,
        finished: Arc<AtomicBool>,
    }

    struct FakeTarget {
        probe: Probe,
        work: Duration,
        fail_first: bool,
    }

    impl FakeTarget {
        fn new(probe: &Probe) -> Self {
            Self {
                probe: probe.clone(),
                work: Duration::ZERO,
                fail_first: false,
            }
        }
    }

    impl ReconcileTarget for FakeTarget {
        fn run_pass(&mut self) -> Result<ReconcileReport> {
            let run = self.probe.runs.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.work);
            self.probe.finished.store(true, Ordering::SeqCst);
            if self.fail_first && run == 0 {
                return Err(ChronoError::Internal("boom".into()));
            }
            Ok(ReconcileReport::default())
        }
    }

    fn config(debounce_ms: u64, min_interval_ms: u64) -> SchedulerConfig {
        SchedulerConfig {
            debounce_interval: Duration::from_millis(debounce_ms),
            min_interval: Duration::from_millis(min_interval_ms),
            jitter_max: Duration::ZERO,
        }
    }

    const SETTLE: Duration = Duration::from_secs(1);

    async fn wait_until(limit: Duration, check: impl Fn() -> bool) -> bool {
        let give_up = Instant::now() + limit;
        while Instant::now() < give_up {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }

    fn event(name: &str) -> ChangeEvent {
        ChangeEvent::new(format!("/phase/{name}"), ChangeKind::Modified)
    }

    #[tokio::test]
    async fn burst_of_events_yields_one_pass() {
        let probe = Probe::default();
        let scheduler = ReconcileScheduler::spawn(
            FakeTarget::new(&probe),
            config(100, 0),
            IgnoreSet::default(),
        );

        for _ in 0..5 {
            assert!(scheduler.notify(&event("notes.md")));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(probe.runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.state(), SchedulerState::PendingDebounce);

        assert!(wait_until(Duration::from_secs(2), || scheduler.completed_runs() == 1).await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn event_during_cooldown_is_deferred_not_dropped() {
        let probe = Probe::default();
        let scheduler = ReconcileScheduler::spawn(
            FakeTarget::new(&probe),
            config(20, 300),
            IgnoreSet::default(),
        );

        scheduler.request();
        assert!(wait_until(SETTLE, || scheduler.completed_runs() == 1).await);

        scheduler.request();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), SchedulerState::PendingDebounce);

        assert!(wait_until(Duration::from_secs(2), || scheduler.completed_runs() == 2).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 2);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn firing_during_a_pass_reruns_afterwards() {
        let probe = Probe::default();
        let mut target = FakeTarget::new(&probe);
        target.work = Duration::from_millis(200);
        let scheduler = ReconcileScheduler::spawn(target, config(20, 0), IgnoreSet::default());

        scheduler.request();
        assert!(wait_until(SETTLE, || scheduler.state() == SchedulerState::Running).await);
        scheduler.request();

        assert!(wait_until(Duration::from_secs(2), || scheduler.completed_runs() == 2).await);
        assert_eq!(probe.runs.load(Ordering::SeqCst), 2);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn failed_pass_leaves_scheduler_usable() {
        let probe = Probe::default();
        let mut target = FakeTarget::new(&probe);
        target.fail_first = true;
        let scheduler = ReconcileScheduler::spawn(target, config(10, 0), IgnoreSet::default());

        scheduler.trigger_now();
        assert!(wait_until(SETTLE, || scheduler.completed_runs() == 1).await);
        assert!(wait_until(SETTLE, || scheduler.state() == SchedulerState::Idle).await);

        scheduler.request();
        assert!(wait_until(SETTLE, || scheduler.completed_runs() == 2).await);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_pass() {
        let probe = Probe::default();
        let mut target = FakeTarget::new(&probe);
        target.work = Duration::from_millis(200);
        let scheduler = ReconcileScheduler::spawn(target, config(0, 0), IgnoreSet::default());

        scheduler.trigger_now();
        assert!(wait_until(SETTLE, || scheduler.state() == SchedulerState::Running).await);
        scheduler.stop().await;

        assert!(probe.finished.load(Ordering::SeqCst));
        assert_eq!(scheduler.completed_runs(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        // Further requests after stop go nowhere.
        scheduler.request();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_pending_timer() {
        let probe = Probe::default();
        let scheduler = ReconcileScheduler::spawn(
            FakeTarget::new(&probe),
            config(100, 0),
            IgnoreSet::default(),
        );

        scheduler.request();
        scheduler.stop().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_qualifying_events_are_filtered() {
        let probe = Probe::default();
        let scheduler = ReconcileScheduler::spawn(
            FakeTarget::new(&probe),
            config(10, 0),
            IgnoreSet::new(["*.bak"]),
        );

        assert!(!scheduler.notify(&ChangeEvent::directory("/phase/sub", ChangeKind::Created)));
        assert!(!scheduler.notify(&ChangeEvent::new("/phase/a.md", ChangeKind::Opened)));
        let read_close = ChangeEvent::new("/phase/a.md", ChangeKind::ClosedWithoutWrite);
        assert!(!scheduler.notify(&read_close));
        assert!(!scheduler.notify(&ChangeEvent::new("/phase/a.md.lock", ChangeKind::Created)));
        let index_write = ChangeEvent::new("/phase/.update_index.json", ChangeKind::Modified);
        assert!(!scheduler.notify(&index_write));
        assert!(!scheduler.notify(&ChangeEvent::new("/phase/a.bak", ChangeKind::Modified)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 0);

        assert!(scheduler.notify(&ChangeEvent::new("/phase/a.md", ChangeKind::Deleted)));
        assert!(wait_until(SETTLE, || scheduler.completed_runs() == 1).await);
        scheduler.stop().await;
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = SchedulerConfig::default();
        assert_eq!(config.debounce_interval, Duration::from_millis(2000));
        assert_eq!(config.min_interval, Duration::from_millis(8000));
        assert_eq!(config.jitter_max, Duration::from_millis(100));
    }
}
