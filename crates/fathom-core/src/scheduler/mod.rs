//! Cron-driven sync scheduling shared by crawl and git tenants.
//!
//! A [`Scheduler`] owns one [`SyncCycle`] (the tenant's crawl or git sync
//! implementation) and drives it from a background loop: parse the
//! tenant's 5-field cron, sleep until the next tick, run one cycle. The
//! loop never dies; a failed cycle increments the error counter and backs
//! off for a minute before consulting the cron again.
//!
//! `trigger_sync` runs a cycle immediately as a background task unless one
//! is already active, in which case the trigger is rejected. Observers run
//! after every successful cycle; their errors are logged and swallowed.

/// Online (crawl) sync cycle.
pub mod crawl;
/// Git sparse-checkout sync cycle.
pub mod git;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{Error, Result};

/// Backoff applied after a failed sync before the cron is consulted
/// again.
const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Parse a standard 5-field cron expression.
///
/// The underlying crate wants a seconds field, so one is prepended.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() != 5 {
        return Err(Error::Config(format!(
            "Cron expression '{expr}' must have exactly 5 fields"
        )));
    }
    format!("0 {trimmed}")
        .parse::<Schedule>()
        .map_err(|e| Error::Config(format!("Cron expression '{expr}': {e}")))
}

/// Outcome of one sync cycle, fed to observers and surfaced in stats.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncOutcome {
    /// `crawl` or `git`.
    pub mode: String,
    /// Documents fetched/copied this cycle.
    pub documents_processed: u64,
    /// Per-URL or per-file errors inside the cycle.
    pub errors: u64,
    /// Wall-clock duration in seconds.
    pub duration_s: f64,
    /// Head commit after a git sync.
    pub commit_id: Option<String>,
    /// Files copied by a git sync.
    pub files_copied: Option<u64>,
    /// Whether a git sync saw new commits.
    pub repo_updated: Option<bool>,
    /// Non-fatal issues worth surfacing.
    pub warnings: Vec<String>,
}

/// One tenant's sync implementation.
#[async_trait]
pub trait SyncCycle: Send + Sync {
    /// `crawl` or `git`, for stats.
    fn mode(&self) -> &'static str;
    /// Whether syncing is possible at all (offline mode, missing URLs or
    /// repo configuration disable it).
    fn enabled(&self) -> bool;
    /// Run one full sync.
    async fn run(&self, force_full: bool) -> Result<SyncOutcome>;
}

/// Invoked after each successful sync cycle (index rebuild, segment
/// reload). Errors are logged by the scheduler and never propagate.
#[async_trait]
pub trait SyncObserver: Send + Sync {
    /// React to a completed sync.
    async fn on_sync_complete(&self, outcome: &SyncOutcome) -> Result<()>;
}

/// Response to a manual sync trigger; `success` reflects admission, not
/// completion.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TriggerResponse {
    /// Whether the sync was started.
    pub success: bool,
    /// Human-readable admission result.
    pub message: String,
}

/// Scheduler statistics for `sync/status`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStats {
    /// Sync mode of the underlying cycle.
    pub mode: String,
    /// Whether `initialize` succeeded.
    pub is_initialized: bool,
    /// Whether the cron loop is running.
    pub running: bool,
    /// Whether a cycle is active right now.
    pub sync_in_progress: bool,
    /// Completed cycles.
    pub sync_count: u64,
    /// Failed cycles.
    pub errors: u64,
    /// Completion time of the last cycle.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Duration of the last cycle in seconds.
    pub last_sync_duration_s: Option<f64>,
    /// Next cron fire time, when a schedule exists.
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct StatsInner {
    initialized: bool,
    running: bool,
    sync_count: u64,
    errors: u64,
    last_sync_at: Option<DateTime<Utc>>,
    last_sync_duration_s: Option<f64>,
}

struct SchedulerShared {
    cycle: Arc<dyn SyncCycle>,
    observers: Vec<Arc<dyn SyncObserver>>,
    schedule: Option<Schedule>,
    stop_flag: AtomicBool,
    stop_notify: Notify,
    sync_gate: tokio::sync::Mutex<()>,
    stats: Mutex<StatsInner>,
}

/// Per-tenant scheduler driving a [`SyncCycle`].
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Build a scheduler. An invalid cron expression fails construction.
    pub fn new(
        cycle: Arc<dyn SyncCycle>,
        observers: Vec<Arc<dyn SyncObserver>>,
        refresh_schedule: Option<&str>,
    ) -> Result<Self> {
        let schedule = refresh_schedule.map(parse_cron).transpose()?;
        Ok(Self {
            shared: Arc::new(SchedulerShared {
                cycle,
                observers,
                schedule,
                stop_flag: AtomicBool::new(false),
                stop_notify: Notify::new(),
                sync_gate: tokio::sync::Mutex::new(()),
                stats: Mutex::new(StatsInner::default()),
            }),
            task: Mutex::new(None),
        })
    }

    /// Start the scheduler.
    ///
    /// Returns `false` without starting anything when the cycle is
    /// disabled (offline mode or missing source configuration). With
    /// `run_initial_sync`, one cycle is kicked off immediately in the
    /// background. A missing cron schedule means manual-only triggers.
    pub fn initialize(&self, run_initial_sync: bool) -> bool {
        if !self.shared.cycle.enabled() {
            debug!(mode = self.shared.cycle.mode(), "Scheduler disabled");
            return false;
        }
        {
            let mut stats = lock_stats(&self.shared);
            stats.initialized = true;
        }

        if run_initial_sync {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                run_once(&shared, false).await;
            });
        }

        if self.shared.schedule.is_some() {
            let shared = Arc::clone(&self.shared);
            {
                let mut stats = lock_stats(&self.shared);
                stats.running = true;
            }
            let handle = tokio::spawn(async move {
                run_loop(&shared).await;
                lock_stats(&shared).running = false;
            });
            *self
                .task
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
        }
        info!(
            mode = self.shared.cycle.mode(),
            scheduled = self.shared.schedule.is_some(),
            "Scheduler initialized"
        );
        true
    }

    /// Run one cycle now unless one is already active.
    ///
    /// The cycle runs as a background task; the caller gets an immediate
    /// admission response.
    pub fn trigger_sync(&self, force_full_sync: bool) -> TriggerResponse {
        if !lock_stats(&self.shared).initialized {
            return TriggerResponse {
                success: false,
                message: "scheduler not initialized".to_string(),
            };
        }
        if self.shared.sync_gate.try_lock().is_err() {
            return TriggerResponse {
                success: false,
                message: "sync already in progress".to_string(),
            };
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            run_once(&shared, force_full_sync).await;
        });
        TriggerResponse {
            success: true,
            message: "sync started".to_string(),
        }
    }

    /// Stop the background loop and cancel any pending wait.
    pub async fn stop(&self) {
        self.shared.stop_flag.store(true, Ordering::SeqCst);
        self.shared.stop_notify.notify_waiters();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        let mut stats = lock_stats(&self.shared);
        stats.running = false;
        info!(mode = self.shared.cycle.mode(), "Scheduler stopped");
    }

    /// Current scheduler statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let inner = lock_stats(&self.shared);
        SchedulerStats {
            mode: self.shared.cycle.mode().to_string(),
            is_initialized: inner.initialized,
            running: inner.running,
            sync_in_progress: self.shared.sync_gate.try_lock().is_err(),
            sync_count: inner.sync_count,
            errors: inner.errors,
            last_sync_at: inner.last_sync_at,
            last_sync_duration_s: inner.last_sync_duration_s,
            next_run_at: self
                .shared
                .schedule
                .as_ref()
                .and_then(|s| s.upcoming(Utc).next()),
        }
    }
}

fn lock_stats(shared: &SchedulerShared) -> std::sync::MutexGuard<'_, StatsInner> {
    shared
        .stats
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

async fn run_loop(shared: &Arc<SchedulerShared>) {
    let Some(schedule) = shared.schedule.clone() else {
        return;
    };
    loop {
        if shared.stop_flag.load(Ordering::SeqCst) {
            break;
        }
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!("Cron schedule has no upcoming fire times");
            break;
        };
        let wait = (next - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(1));

        tokio::select! {
            () = shared.stop_notify.notified() => break,
            () = tokio::time::sleep(wait) => {
                let succeeded = run_once(shared, false).await;
                if !succeeded {
                    // Hold off before consulting the cron again.
                    tokio::select! {
                        () = shared.stop_notify.notified() => break,
                        () = tokio::time::sleep(ERROR_BACKOFF) => {},
                    }
                }
            },
        }
    }
}

/// Run one guarded sync cycle. Returns whether it succeeded; a cycle that
/// could not start because another is active counts as success.
async fn run_once(shared: &Arc<SchedulerShared>, force_full: bool) -> bool {
    let Ok(_guard) = shared.sync_gate.try_lock() else {
        debug!("Sync already in progress; skipping");
        return true;
    };

    let started = std::time::Instant::now();
    match shared.cycle.run(force_full).await {
        Ok(mut outcome) => {
            outcome.duration_s = started.elapsed().as_secs_f64();
            {
                let mut stats = lock_stats(shared);
                stats.sync_count += 1;
                stats.last_sync_at = Some(Utc::now());
                stats.last_sync_duration_s = Some(outcome.duration_s);
            }
            for observer in &shared.observers {
                if let Err(e) = observer.on_sync_complete(&outcome).await {
                    // Post-sync hooks never fail the sync.
                    warn!(error = %e, "Post-sync observer failed");
                }
            }
            info!(
                mode = outcome.mode,
                documents = outcome.documents_processed,
                errors = outcome.errors,
                duration_s = outcome.duration_s,
                "Sync cycle complete"
            );
            true
        },
        Err(e) => {
            lock_stats(shared).errors += 1;
            error!(error = %e, "Sync cycle failed");
            false
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct MockCycle {
        enabled: bool,
        runs: AtomicU64,
        fail: AtomicBool,
        delay: Duration,
    }

    impl MockCycle {
        fn new(enabled: bool) -> Arc<Self> {
            Arc::new(Self {
                enabled,
                runs: AtomicU64::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                enabled: true,
                runs: AtomicU64::new(0),
                fail: AtomicBool::new(false),
                delay,
            })
        }
    }

    #[async_trait]
    impl SyncCycle for MockCycle {
        fn mode(&self) -> &'static str {
            "crawl"
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn run(&self, _force_full: bool) -> Result<SyncOutcome> {
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Other("sync blew up".to_string()));
            }
            Ok(SyncOutcome {
                mode: "crawl".to_string(),
                documents_processed: 3,
                ..SyncOutcome::default()
            })
        }
    }

    struct RecordingObserver {
        calls: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl SyncObserver for RecordingObserver {
        async fn on_sync_complete(&self, _outcome: &SyncOutcome) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Other("observer failed".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn cron_parsing_enforces_five_fields() {
        assert!(parse_cron("0 3 * * *").is_ok());
        assert!(parse_cron("*/15 * * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
        assert!(parse_cron("0 3 * *").is_err());
        assert!(parse_cron("0 0 3 * * *").is_err());
    }

    #[test]
    fn invalid_cron_fails_scheduler_construction() {
        let result = Scheduler::new(MockCycle::new(true), Vec::new(), Some("bogus"));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn disabled_cycle_refuses_initialization() {
        let scheduler = Scheduler::new(MockCycle::new(false), Vec::new(), None).unwrap();
        assert!(!scheduler.initialize(false));

        let stats = scheduler.stats();
        assert!(!stats.is_initialized);
        assert!(!stats.running);
    }

    #[tokio::test]
    async fn trigger_runs_one_cycle_and_notifies_observers() {
        let cycle = MockCycle::new(true);
        let observer = Arc::new(RecordingObserver {
            calls: AtomicU64::new(0),
            fail: false,
        });
        let observers: Vec<Arc<dyn SyncObserver>> = vec![observer.clone()];
        let scheduler = Scheduler::new(cycle.clone(), observers, None).unwrap();
        assert!(scheduler.initialize(false));

        let response = scheduler.trigger_sync(false);
        assert!(response.success);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.stats().sync_count, 1);
    }

    #[tokio::test]
    async fn trigger_while_running_is_rejected() {
        let cycle = MockCycle::slow(Duration::from_millis(300));
        let scheduler = Scheduler::new(cycle.clone(), Vec::new(), None).unwrap();
        scheduler.initialize(false);

        let first = scheduler.trigger_sync(false);
        assert!(first.success);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = scheduler.trigger_sync(false);
        assert!(!second.success);
        assert_eq!(second.message, "sync already in progress");

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_cycle_increments_errors_without_killing_anything() {
        let cycle = MockCycle::new(true);
        cycle.fail.store(true, Ordering::SeqCst);
        let scheduler = Scheduler::new(cycle.clone(), Vec::new(), None).unwrap();
        scheduler.initialize(false);

        scheduler.trigger_sync(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.stats().errors, 1);

        // The scheduler still accepts new triggers.
        cycle.fail.store(false, Ordering::SeqCst);
        let response = scheduler.trigger_sync(false);
        assert!(response.success);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.stats().sync_count, 1);
    }

    #[tokio::test]
    async fn observer_errors_are_swallowed() {
        let cycle = MockCycle::new(true);
        let observer = Arc::new(RecordingObserver {
            calls: AtomicU64::new(0),
            fail: true,
        });
        let observers: Vec<Arc<dyn SyncObserver>> = vec![observer.clone()];
        let scheduler = Scheduler::new(cycle.clone(), observers, None).unwrap();
        scheduler.initialize(false);

        scheduler.trigger_sync(false);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
        // The sync itself still counts as successful.
        assert_eq!(scheduler.stats().sync_count, 1);
        assert_eq!(scheduler.stats().errors, 0);
    }

    #[tokio::test]
    async fn stop_halts_the_cron_loop() {
        let cycle = MockCycle::new(true);
        let scheduler =
            Scheduler::new(cycle, Vec::new(), Some("0 3 * * *")).unwrap();
        assert!(scheduler.initialize(false));
        assert!(scheduler.stats().running);
        assert!(scheduler.stats().next_run_at.is_some());

        scheduler.stop().await;
        assert!(!scheduler.stats().running);
    }

    #[tokio::test]
    async fn initial_sync_runs_on_initialize() {
        let cycle = MockCycle::new(true);
        let scheduler = Scheduler::new(cycle.clone(), Vec::new(), None).unwrap();
        scheduler.initialize(true);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);
    }
}
