//! Circuit breaker for the shared cache store.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    /// Failing fast until the cooldown elapses.
    Open,
    /// Cooldown elapsed; one probe call is in flight.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: BreakerState,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// How many times the breaker has opened since creation.
    pub trips: u64,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_secs = cooldown.as_secs();
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    trips: u64,
}

/// Closed → Open after `failure_threshold` consecutive store failures.
/// Open → HalfOpen once the cooldown elapses, admitting a single probe.
/// The probe's outcome closes the breaker or re-opens it for another cooldown.
///
/// While open (or while a probe is outstanding) calls fail fast with
/// [`Error::CacheUnavailable`].
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self::with_cooldown(cfg.failure_threshold, cfg.cooldown())
    }

    /// Build with a sub-second cooldown.
    pub fn with_cooldown(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                open_until: None,
                trips: 0,
            }),
        }
    }

    fn open_error(details: &str) -> Error {
        Error::cache_unavailable(
            "circuit breaker open",
            ErrorContext::new()
                .with_details(details)
                .with_source("circuit_breaker"),
        )
    }

    /// Admit or reject a store call.
    pub fn allow(&self) -> Result<()> {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match st.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => Err(Self::open_error("probe in flight")),
            BreakerState::Open => {
                let now = Instant::now();
                match st.open_until {
                    Some(until) if now < until => Err(Self::open_error("cooling down")),
                    _ => {
                        st.state = BreakerState::HalfOpen;
                        st.open_until = None;
                        Ok(())
                    }
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if st.state != BreakerState::Closed {
            info!(trips = st.trips, "cache store recovered, circuit closed");
        }
        st.state = BreakerState::Closed;
        st.consecutive_failures = 0;
        st.open_until = None;
    }

    pub fn on_failure(&self) {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        let trip = match st.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => st.consecutive_failures >= self.failure_threshold,
            BreakerState::Open => false,
        };
        if trip {
            st.state = BreakerState::Open;
            st.open_until = Some(Instant::now() + self.cooldown);
            st.trips += 1;
            warn!(
                consecutive_failures = st.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "cache store circuit opened"
            );
        }
    }

    pub fn state(&self) -> BreakerState {
        self.snapshot().state
    }

    pub fn is_open(&self) -> bool {
        self.snapshot().open_remaining_ms.is_some()
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CircuitBreakerSnapshot {
            state: st.state,
            failure_threshold: self.failure_threshold,
            cooldown_ms: self.cooldown.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            trips: st.trips,
            open_remaining_ms: st
                .open_until
                .filter(|until| *until > now)
                .map(|until| (until - now).as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_config_from_yaml_defaults() {
        let cfg: CircuitBreakerConfig = serde_yaml::from_str("failure_threshold: 2").unwrap();
        assert_eq!(cfg.failure_threshold, 2);
        assert_eq!(cfg.cooldown(), Duration::from_secs(30));
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new().with_failure_threshold(5));
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.snapshot().consecutive_failures, 2);

        cb.on_success();
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = CircuitBreaker::with_cooldown(3, Duration::from_millis(100));
        cb.on_failure();
        cb.on_failure();
        assert!(cb.allow().is_ok());

        cb.on_failure();
        assert!(cb.allow().unwrap_err().is_cache_unavailable());
        assert!(cb.is_open());
        assert_eq!(cb.snapshot().trips, 1);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let cb = CircuitBreaker::with_cooldown(1, Duration::from_millis(30));
        cb.on_failure();
        assert!(cb.allow().is_err());

        thread::sleep(Duration::from_millis(40));
        assert!(cb.allow().is_ok());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        // A second caller is turned away while the probe is outstanding.
        assert!(cb.allow().is_err());

        cb.on_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow().is_ok());
    }

    #[test]
    fn test_failed_probe_reopens() {
        let cb = CircuitBreaker::with_cooldown(2, Duration::from_millis(30));
        cb.on_failure();
        cb.on_failure();
        thread::sleep(Duration::from_millis(40));
        assert!(cb.allow().is_ok());

        cb.on_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.is_open());
        assert_eq!(cb.snapshot().trips, 2);
    }
}
