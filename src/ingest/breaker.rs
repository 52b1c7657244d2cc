//! Circuit breaker protecting calls into unreliable backends.
//!
//! Applied to the metadata store and the vector store so that a sustained
//! outage fails fast instead of stacking up doomed retries.
//!
//! # State Machine
//!
//! ```text
//!   Closed ──(failure_threshold consecutive failures)──> Open
//!   Open ──(recovery_timeout elapsed)──> HalfOpen
//!   HalfOpen ──(success_threshold consecutive successes)──> Closed
//!   HalfOpen ──(any failure)──> Open
//! ```
//!
//! Thread-safe: all state transitions use atomic operations, so concurrent
//! pipeline jobs share one breaker per backend without locks.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError {
    /// The breaker is open; the operation was not invoked. Callers treat
    /// this as a transient failure.
    #[error("circuit breaker '{0}' is open")]
    Open(&'static str),
    /// The operation ran and failed.
    #[error(transparent)]
    Inner(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerState {
    const fn from_u32(v: u32) -> Self {
        match v {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Generic protective wrapper with atomic state transitions.
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    /// Current state: 0=Closed, 1=Open, 2=HalfOpen.
    state: AtomicU32,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    /// Milliseconds since `epoch` when the breaker last tripped.
    last_trip_ms: AtomicU64,
    epoch: Instant,
    trip_count: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(
        name: &'static str,
        failure_threshold: u32,
        recovery_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        Self {
            name,
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            success_threshold: success_threshold.max(1),
            state: AtomicU32::new(BreakerState::Closed as u32),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            last_trip_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            trip_count: AtomicU64::new(0),
        }
    }

    /// Run `operation` behind the breaker. When open, fails immediately
    /// with [`BreakerError::Open`] without polling the operation.
    pub async fn call<T, Fut>(&self, operation: Fut) -> Result<T, BreakerError>
    where
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if !self.try_acquire() {
            return Err(BreakerError::Open(self.name));
        }

        match operation.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn trips(&self) -> u64 {
        self.trip_count.load(Ordering::Relaxed)
    }

    // ─── Internal ───────────────────────────────────────────────────

    /// Whether a call may proceed; handles the Open → HalfOpen probe
    /// transition when the recovery timeout has elapsed.
    fn try_acquire(&self) -> bool {
        match self.state() {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self.elapsed_ms();
                let tripped = self.last_trip_ms.load(Ordering::Acquire);
                if elapsed.saturating_sub(tripped) >= self.recovery_timeout.as_millis() as u64 {
                    self.state
                        .store(BreakerState::HalfOpen as u32, Ordering::Release);
                    self.consecutive_successes.store(0, Ordering::Release);
                    info!("circuit breaker '{}' half-open, probing", self.name);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        match self.state() {
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            BreakerState::HalfOpen => {
                let successes = self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.success_threshold {
                    self.state
                        .store(BreakerState::Closed as u32, Ordering::Release);
                    self.consecutive_failures.store(0, Ordering::Release);
                    self.consecutive_successes.store(0, Ordering::Release);
                    info!("circuit breaker '{}' closed after recovery", self.name);
                }
            }
            BreakerState::Open => {}
        }
    }

    fn record_failure(&self) {
        match self.state() {
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.failure_threshold {
                    self.trip();
                }
            }
            // A single probe failure re-opens the breaker.
            BreakerState::HalfOpen => self.trip(),
            BreakerState::Open => {}
        }
    }

    fn trip(&self) {
        self.state.store(BreakerState::Open as u32, Ordering::Release);
        self.last_trip_ms.store(self.elapsed_ms(), Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.trip_count.fetch_add(1, Ordering::Relaxed);
        warn!("circuit breaker '{}' tripped", self.name);
    }

    fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as Counter;

    fn test_breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", 3, Duration::from_millis(20), 2)
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .call(async { Err::<(), _>(anyhow::anyhow!("boom")) })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        let _ = breaker.call(async { Ok::<_, anyhow::Error>(()) }).await;
    }

    #[tokio::test]
    async fn test_initial_state_is_closed() {
        let breaker = test_breaker();
        assert_eq!(breaker.state(), BreakerState::Closed);
        let result = breaker.call(async { Ok::<_, anyhow::Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_trips_after_consecutive_failures() {
        let breaker = test_breaker();
        for _ in 0..2 {
            fail(&breaker).await;
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.trips(), 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = test_breaker();
        fail(&breaker).await;
        fail(&breaker).await;
        succeed(&breaker).await;
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_open_fails_fast_without_invoking_operation() {
        let breaker = test_breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let calls = Counter::new(0);
        let result = breaker
            .call(async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open("test"))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_after_recovery_timeout() {
        let breaker = test_breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // First probe is allowed through.
        succeed(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // Second consecutive success closes it.
        succeed(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = test_breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.trips(), 2);
    }
}
