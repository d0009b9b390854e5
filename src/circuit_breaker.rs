//! Three-state circuit breaker gating archive uploads (§4.4).
//!
//! Only upload failures feed this breaker; source-side failures do not
//! (§4.4, §7). Purely in-memory, never persisted.
//!
//! While `Open`'s recovery timeout has elapsed the breaker is logically
//! `HalfOpen`, but only one probe may be in flight at a time: the mutex
//! guarding state transitions doubles as the admission gate, so a second
//! concurrent `allow_request` sees the probe already claimed and is
//! refused until `record_success`/`record_failure` resolves it.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, warn};

const DEFAULT_THRESHOLD: u32 = 5;
const DEFAULT_RECOVERY: Duration = Duration::from_secs(60);
const MAX_RECOVERY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    recovery_timeout: Duration,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    threshold: u32,
    base_recovery: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            threshold,
            base_recovery: recovery_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                recovery_timeout,
                probe_in_flight: false,
            }),
        }
    }

    fn recovery_elapsed(inner: &Inner) -> bool {
        inner
            .opened_at
            .map(|t| t.elapsed() >= inner.recovery_timeout)
            .unwrap_or(false)
    }

    /// The externally observable state: `Open` becomes `HalfOpen` once the
    /// recovery timeout has elapsed, computed lazily as in §4.4.
    fn observed_state(inner: &Inner) -> CircuitState {
        if inner.state == CircuitState::Open && Self::recovery_elapsed(inner) {
            return CircuitState::HalfOpen;
        }
        inner.state
    }

    pub async fn state(&self) -> CircuitState {
        let inner = self.inner.lock().await;
        Self::observed_state(&inner)
    }

    /// Admits the request, claiming the single half-open probe slot when
    /// applicable. Returns `false` when closed-for-business or when a probe
    /// is already outstanding.
    pub async fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match Self::observed_state(&inner) {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
            CircuitState::Open => false,
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count = 0;
        inner.state = CircuitState::Closed;
        inner.recovery_timeout = self.base_recovery;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count += 1;
        inner.probe_in_flight = false;

        if inner.state == CircuitState::Open && Self::recovery_elapsed(inner) {
            // The outstanding half-open probe failed — reopen with doubled timeout.
            inner.recovery_timeout = (inner.recovery_timeout * 2).min(MAX_RECOVERY);
            inner.opened_at = Some(Instant::now());
            warn!(next_retry_s = inner.recovery_timeout.as_secs(), "circuit_breaker_reopen");
        } else if inner.failure_count >= self.threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            error!(
                failures = inner.failure_count,
                recovery_s = inner.recovery_timeout.as_secs(),
                "circuit_breaker_open"
            );
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_RECOVERY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(5, Duration::from_secs(60));
        for _ in 0..4 {
            cb.record_failure().await;
            assert!(cb.allow_request().await);
        }
        cb.record_failure().await;
        assert!(!cb.allow_request().await);
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_success_resets_to_closed() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        assert!(cb.allow_request().await);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_doubles_timeout_and_reopens() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cb.allow_request().await); // admits the probe

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        // Recovery timeout doubled to ~20ms; immediately after reopening
        // the breaker must still refuse.
        assert!(!cb.allow_request().await);
    }

    #[tokio::test]
    async fn recovery_timeout_caps_at_300_seconds() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(1));
        cb.record_failure().await;
        {
            let mut inner = cb.inner.lock().await;
            inner.recovery_timeout = Duration::from_secs(200);
            inner.opened_at = Some(Instant::now() - Duration::from_secs(201));
        }
        assert!(cb.allow_request().await); // claims the half-open probe
        cb.record_failure().await; // would double to 400s, capped at 300s
        let inner = cb.inner.lock().await;
        assert_eq!(inner.recovery_timeout, MAX_RECOVERY);
    }

    #[tokio::test]
    async fn only_one_probe_admitted_concurrently_in_half_open() {
        use std::sync::Arc;

        let cb = Arc::new(CircuitBreaker::new(1, Duration::from_millis(10)));
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cb = cb.clone();
            handles.push(tokio::spawn(async move { cb.allow_request().await }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1, "exactly one probe must be admitted in half-open");
    }
}
