//! Generic three-state fault-isolation wrapper around a fallible async call.
//!
//! Ports the source's closed/open/half-open state machine. The source admits
//! "the first call" into half-open under an implicit single-threaded
//! assumption; here that admission is made explicit with a CAS gate so that
//! under concurrent callers exactly one call is ever in flight while the
//! breaker is half-open.

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,

    state: Mutex<CircuitState>,
    opened_at: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU64,

    total_calls: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    last_failure_ts: Mutex<Option<i64>>,
    last_success_ts: Mutex<Option<i64>>,

    /// Held by exactly one in-flight call while the breaker is half-open.
    half_open_admitted: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            state: Mutex::new(CircuitState::Closed),
            opened_at: Mutex::new(None),
            consecutive_failures: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            last_failure_ts: Mutex::new(None),
            last_success_ts: Mutex::new(None),
            half_open_admitted: AtomicBool::new(false),
        }
    }

    /// Returns true if a new call may proceed, transitioning Open -> HalfOpen
    /// when the recovery timeout has elapsed. For HalfOpen this additionally
    /// claims the single-admission slot; only one caller ever sees `true`
    /// while the breaker remains HalfOpen.
    fn try_admit(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .lock()
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    *state = CircuitState::HalfOpen;
                    self.half_open_admitted.store(true, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self
                .half_open_admitted
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
        }
    }

    fn on_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        *self.last_success_ts.lock() = Some(chrono::Utc::now().timestamp());
        self.consecutive_failures.store(0, Ordering::Relaxed);

        let mut state = self.state.lock();
        if *state != CircuitState::Closed {
            *state = CircuitState::Closed;
            *self.opened_at.lock() = None;
        }
        self.half_open_admitted.store(false, Ordering::SeqCst);
    }

    fn on_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_failure_ts.lock() = Some(chrono::Utc::now().timestamp());

        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.failure_threshold as u64 {
                    *state = CircuitState::Open;
                    *self.opened_at.lock() = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                *self.opened_at.lock() = Some(Instant::now());
                self.half_open_admitted.store(false, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    /// Execute an async call through the breaker. Rejects immediately with
    /// `Err(None)` when the breaker will not admit the call.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, Option<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_admit() {
            return Err(None);
        }
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match f().await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_failure();
                Err(Some(e))
            }
        }
    }

    /// Synchronous counterpart, used by call sites with no async boundary.
    pub fn call_sync<F, T, E>(&self, f: F) -> Result<T, Option<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !self.try_admit() {
            return Err(None);
        }
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match f() {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_failure();
                Err(Some(e))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    pub fn reset(&self) {
        *self.state.lock() = CircuitState::Closed;
        *self.opened_at.lock() = None;
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.half_open_admitted.store(false, Ordering::SeqCst);
    }

    pub fn force_open(&self) {
        *self.state.lock() = CircuitState::Open;
        *self.opened_at.lock() = Some(Instant::now());
    }

    pub fn force_close(&self) {
        self.reset();
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let total = self.total_calls.load(Ordering::Relaxed);
        let successes = self.total_successes.load(Ordering::Relaxed);
        let failures = self.total_failures.load(Ordering::Relaxed);
        CircuitBreakerMetrics {
            state: self.state(),
            total_calls: total,
            successes,
            failures,
            success_rate: if total == 0 {
                1.0
            } else {
                successes as f64 / total as f64
            },
            last_failure_ts: *self.last_failure_ts.lock(),
            last_success_ts: *self.last_success_ts.lock(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub last_failure_ts: Option<i64>,
    pub last_success_ts: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let cb = CircuitBreaker::new(5, Duration::from_millis(50));
        for _ in 0..5 {
            let _ = cb.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert!(cb.is_open());

        let result = cb.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn half_open_admits_one_call_and_closes_on_success() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        let _ = cb.call(|| async { Err::<(), _>("boom") }).await;
        assert!(cb.is_open());

        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = cb.call(|| async { Ok::<_, &str>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert!(cb.is_closed());
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_concurrent_caller() {
        let cb = std::sync::Arc::new(CircuitBreaker::new(1, Duration::from_millis(10)));
        let _ = cb.call(|| async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cb = cb.clone();
            handles.push(tokio::spawn(async move {
                cb.call(|| async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, &str>(())
                })
                .await
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
