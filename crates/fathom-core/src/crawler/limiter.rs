//! Adaptive concurrency and per-host rate limiting for the crawler.
//!
//! Two cooperating mechanisms: a resizable concurrency limiter that grows
//! on sustained success and halves on any 429, and a per-host backoff
//! tracker that spaces out requests to hosts that have been rate limiting
//! us.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::debug;

/// Default floor for the concurrency limit.
pub const DEFAULT_MIN_LIMIT: usize = 5;

/// Successes required before the limit may grow by one.
const GROWTH_STREAK: u64 = 25;

/// Quiet period after a rate-limit event before growth resumes.
const GROWTH_QUIET_PERIOD: Duration = Duration::from_secs(60);

/// Base backoff for a host's first consecutive 429.
const HOST_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Ceiling on per-host backoff.
const HOST_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Observability snapshot of the concurrency limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct LimiterSnapshot {
    /// Current permit ceiling.
    pub current_limit: usize,
    /// Highest ceiling reached.
    pub peak_limit: usize,
    /// Permits currently held.
    pub active_workers: usize,
    /// Most permits ever held at once.
    pub peak_active: usize,
}

#[derive(Debug)]
struct LimiterState {
    current_limit: usize,
    peak_limit: usize,
    active: usize,
    peak_active: usize,
    success_streak: u64,
    last_rate_limit: Option<Instant>,
}

#[derive(Debug)]
struct LimiterInner {
    min_limit: usize,
    max_limit: usize,
    state: Mutex<LimiterState>,
    notify: Notify,
}

/// A semaphore whose capacity grows on sustained success and halves on
/// rate-limit signals. Capacity always stays within
/// `[min_limit, max_limit]`.
#[derive(Debug, Clone)]
pub struct AdaptiveConcurrencyLimiter {
    inner: Arc<LimiterInner>,
}

/// Permit handle; dropping it releases the slot.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    inner: Arc<LimiterInner>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.active = state.active.saturating_sub(1);
        }
        self.inner.notify.notify_waiters();
    }
}

impl AdaptiveConcurrencyLimiter {
    /// Build a limiter starting at `min_limit`, capped at `max_limit`.
    #[must_use]
    pub fn new(min_limit: usize, max_limit: usize) -> Self {
        let min_limit = min_limit.max(1);
        let max_limit = max_limit.max(min_limit);
        Self {
            inner: Arc::new(LimiterInner {
                min_limit,
                max_limit,
                state: Mutex::new(LimiterState {
                    current_limit: min_limit,
                    peak_limit: min_limit,
                    active: 0,
                    peak_active: 0,
                    success_streak: 0,
                    last_rate_limit: None,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Acquire a permit, waiting for a free slot.
    pub async fn acquire(&self) -> ConcurrencyPermit {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self
                    .inner
                    .state
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if state.active < state.current_limit {
                    state.active += 1;
                    state.peak_active = state.peak_active.max(state.active);
                    return ConcurrencyPermit {
                        inner: Arc::clone(&self.inner),
                    };
                }
            }
            notified.await;
        }
    }

    /// Acquire a permit only if a slot is free right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<ConcurrencyPermit> {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.active < state.current_limit {
            state.active += 1;
            state.peak_active = state.peak_active.max(state.active);
            Some(ConcurrencyPermit {
                inner: Arc::clone(&self.inner),
            })
        } else {
            None
        }
    }

    /// Record a successful fetch. After a sustained streak, and only
    /// outside the quiet period that follows a rate-limit event, the
    /// limit grows by one.
    pub fn record_success(&self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.success_streak += 1;
        if state.success_streak < GROWTH_STREAK {
            return;
        }
        let quiet = state
            .last_rate_limit
            .is_none_or(|at| at.elapsed() >= GROWTH_QUIET_PERIOD);
        if quiet && state.current_limit < self.inner.max_limit {
            state.current_limit += 1;
            state.peak_limit = state.peak_limit.max(state.current_limit);
            state.success_streak = 0;
            debug!(limit = state.current_limit, "Concurrency limit raised");
            self.inner.notify.notify_waiters();
        } else if quiet {
            state.success_streak = 0;
        }
    }

    /// Record a 429: halve the limit (never below the floor) and reset
    /// the success streak.
    pub fn record_rate_limited(&self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.current_limit = (state.current_limit / 2).max(self.inner.min_limit);
        state.success_streak = 0;
        state.last_rate_limit = Some(Instant::now());
        debug!(limit = state.current_limit, "Concurrency limit halved");
    }

    /// Current limiter state for observability.
    #[must_use]
    pub fn snapshot(&self) -> LimiterSnapshot {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        LimiterSnapshot {
            current_limit: state.current_limit,
            peak_limit: state.peak_limit,
            active_workers: state.active,
            peak_active: state.peak_active,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct HostState {
    consecutive_rate_limits: u32,
}

/// Per-host exponential backoff driven by 429 responses.
#[derive(Debug, Default)]
pub struct AdaptiveRateLimiter {
    hosts: Mutex<HashMap<String, HostState>>,
}

impl AdaptiveRateLimiter {
    /// Build an empty rate limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backoff currently owed to a host before the next request.
    #[must_use]
    pub fn current_backoff(&self, host: &str) -> Duration {
        let hosts = self
            .hosts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(state) = hosts.get(host) else {
            return Duration::ZERO;
        };
        if state.consecutive_rate_limits == 0 {
            return Duration::ZERO;
        }
        let shift = state.consecutive_rate_limits.saturating_sub(1).min(6);
        (HOST_BACKOFF_BASE * 2_u32.pow(shift)).min(HOST_BACKOFF_MAX)
    }

    /// Sleep out the host's current backoff, if any.
    pub async fn wait_for_host(&self, host: &str) {
        let delay = self.current_backoff(host);
        if delay > Duration::ZERO {
            debug!(host, delay_ms = delay.as_millis() as u64, "Host backoff");
            tokio::time::sleep(delay).await;
        }
    }

    /// Record a 429 from a host; backoff grows exponentially.
    pub fn record_rate_limited(&self, host: &str) {
        let mut hosts = self
            .hosts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        hosts
            .entry(host.to_string())
            .or_default()
            .consecutive_rate_limits += 1;
    }

    /// Record a success from a host; the counter decays toward zero.
    pub fn record_success(&self, host: &str) {
        let mut hosts = self
            .hosts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(state) = hosts.get_mut(host) {
            state.consecutive_rate_limits = state.consecutive_rate_limits.saturating_sub(1);
        }
    }
}
