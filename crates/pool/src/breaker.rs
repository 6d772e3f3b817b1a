//! Per-tenant circuit breaker (§4.7). Closed -> Open -> Half_Open ->
//! Closed, one breaker per tenant slot, each fully independent of every
//! other tenant's.

use qgw_core::{config::CircuitBreakerConfig, error::Result, Error, ErrorCode};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_probes_in_flight: u32,
    half_open_successes: u32,
}

/// Single-tenant circuit breaker. `record_success`/`record_failure` must
/// be called exactly once per acquire that `try_acquire` admitted.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_probes_in_flight: 0,
                half_open_successes: 0,
            }),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Admits a request or rejects it with `CircuitOpen`. Call exactly
    /// once before an acquire attempt, and follow with
    /// [`Self::record_success`]/[`Self::record_failure`] once the
    /// attempt resolves.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened_at = inner.opened_at.expect("Open state always carries opened_at");
                let open_for = Duration::from_secs(self.config.open_for_seconds);
                if opened_at.elapsed() >= open_for {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probes_in_flight = 1;
                    inner.half_open_successes = 0;
                    Ok(())
                } else {
                    let retry_after = open_for.saturating_sub(opened_at.elapsed()).as_secs().max(1);
                    Err(Error::new(ErrorCode::CircuitOpen, "tenant circuit breaker is open").with_retry_after(retry_after))
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probes_in_flight < self.config.half_open_probe_count {
                    inner.half_open_probes_in_flight += 1;
                    Ok(())
                } else {
                    Err(Error::new(ErrorCode::CircuitOpen, "tenant circuit breaker is probing").with_retry_after(1))
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                inner.half_open_probes_in_flight = inner.half_open_probes_in_flight.saturating_sub(1);
                if inner.half_open_successes >= self.config.half_open_probe_count {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_probes_in_flight = 0;
                inner.half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            open_for_seconds: 0,
            half_open_probe_count: 2,
        }
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.try_acquire().unwrap();
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn half_open_closes_after_enough_successful_probes() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.try_acquire().unwrap();
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.try_acquire().unwrap();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.try_acquire().unwrap();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn a_single_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.try_acquire().unwrap();
            breaker.record_failure();
        }
        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn tenants_are_independent() {
        let a = CircuitBreaker::new(config());
        let b = CircuitBreaker::new(config());
        for _ in 0..3 {
            a.try_acquire().unwrap();
            a.record_failure();
        }
        assert_eq!(a.state(), CircuitState::Open);
        assert_eq!(b.state(), CircuitState::Closed);
    }
}
