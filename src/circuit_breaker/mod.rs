//! CircuitBreaker - Detector Endpoint Protection
//!
//! ## Responsibilities
//!
//! - Track consecutive failures per named downstream dependency
//! - Fail fast while the dependency is assumed down (no network I/O)
//! - Probe recovery with a bounded number of half-open trial calls
//! - Registry for shared lookup and bulk reset
//!
//! ## State Transitions
//!
//! ```text
//! Closed -> Open: failure_count reaches failure_threshold
//! Open -> HalfOpen: recovery_timeout elapsed
//! HalfOpen -> Closed: success_threshold consecutive trial successes
//! HalfOpen -> Open: any trial failure
//! ```
//!
//! `half_open_max_calls` is a hard cap: trial slots are reserved before the
//! operation runs and released through RAII, so an abandoned call never
//! leaks a slot.

use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Dependency assumed down, calls rejected immediately
    Open,
    /// Testing recovery with limited trial calls
    HalfOpen,
}

impl CircuitState {
    /// Convert to string for logging/serialization
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration (immutable once constructed)
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before opening
    pub failure_threshold: u32,
    /// Cooldown before an Open breaker allows trial calls
    pub recovery_timeout: Duration,
    /// Consecutive trial successes in HalfOpen required to close
    pub success_threshold: u32,
    /// Concurrent trial calls allowed while HalfOpen
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }
}

/// Mutable breaker bookkeeping, guarded by one mutex
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_in_flight: u32,
    last_failure_at: Option<Instant>,
    /// Half-open generation. Bumped on every transition out of HalfOpen so
    /// that stale trial guards from a previous probing round are ignored.
    epoch: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_in_flight: 0,
            last_failure_at: None,
            epoch: 0,
        }
    }

    fn enter_half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.success_count = 0;
        self.half_open_in_flight = 0;
        self.epoch += 1;
    }

    fn trip_open(&mut self) {
        self.state = CircuitState::Open;
        self.last_failure_at = Some(Instant::now());
        self.success_count = 0;
        self.half_open_in_flight = 0;
        self.epoch += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.half_open_in_flight = 0;
        self.last_failure_at = None;
        self.epoch += 1;
    }
}

/// Named circuit breaker for one downstream dependency endpoint
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Half-open trial slot, released on drop unless settled
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    settled: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Caller abandoned the trial (cancellation path)
        let mut inner = self.breaker.inner.lock();
        if inner.epoch == self.epoch && inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

impl CircuitBreaker {
    /// Create new breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state (performs the Open -> HalfOpen timeout transition)
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Whether a call would be admitted right now.
    ///
    /// Non-reserving probe: it performs the Open -> HalfOpen transition when
    /// the recovery timeout has elapsed, but does not hold a trial slot.
    pub fn allow_call(&self) -> bool {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => inner.half_open_in_flight < self.config.half_open_max_calls,
        }
    }

    /// Reset to Closed with zeroed counters (ops/test tooling)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.close();
        tracing::debug!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Execute `op` under breaker protection.
    ///
    /// The operation runs only when the breaker is Closed or a HalfOpen trial
    /// slot is granted; otherwise `Error::CircuitOpen` is returned and the
    /// closure is never invoked. On failure the original error is returned
    /// to the caller after bookkeeping.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let trial = self.admit()?;
        let result = op().await;
        match result {
            Ok(value) => {
                self.record_success(trial);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(trial);
                Err(e)
            }
        }
    }

    /// Admit a call, reserving a trial slot when half-open
    fn admit(&self) -> Result<Option<TrialGuard<'_>>> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => Err(Error::CircuitOpen(self.name.clone())),
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_calls {
                    return Err(Error::CircuitOpen(self.name.clone()));
                }
                inner.half_open_in_flight += 1;
                Ok(Some(TrialGuard {
                    breaker: self,
                    epoch: inner.epoch,
                    settled: false,
                }))
            }
        }
    }

    /// Open -> HalfOpen once the recovery timeout has elapsed
    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .last_failure_at
            .map(|t| t.elapsed() >= self.config.recovery_timeout)
            .unwrap_or(true);
        if elapsed {
            inner.enter_half_open();
            tracing::info!(
                breaker = %self.name,
                max_trials = self.config.half_open_max_calls,
                "Circuit breaker half-open, probing recovery"
            );
        }
    }

    fn record_success(&self, trial: Option<TrialGuard<'_>>) {
        let mut inner = self.inner.lock();
        match trial {
            Some(mut guard) => {
                guard.settled = true;
                if inner.epoch == guard.epoch && inner.state == CircuitState::HalfOpen {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        inner.close();
                        tracing::info!(breaker = %self.name, "Circuit breaker closed, dependency recovered");
                    }
                }
            }
            None => {
                if inner.state == CircuitState::Closed {
                    inner.failure_count = 0;
                }
            }
        }
    }

    fn record_failure(&self, trial: Option<TrialGuard<'_>>) {
        let mut inner = self.inner.lock();
        match trial {
            Some(mut guard) => {
                guard.settled = true;
                // Any trial failure reopens, discarding remaining trial slots
                if inner.epoch == guard.epoch && inner.state == CircuitState::HalfOpen {
                    inner.trip_open();
                    tracing::warn!(breaker = %self.name, "Trial call failed, circuit breaker reopened");
                }
            }
            None => {
                if inner.state == CircuitState::Closed {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.config.failure_threshold {
                        inner.trip_open();
                        tracing::warn!(
                            breaker = %self.name,
                            failure_count = inner.failure_count,
                            recovery_timeout_sec = self.config.recovery_timeout.as_secs_f64(),
                            "Failure threshold reached, circuit breaker opened"
                        );
                    }
                }
            }
        }
    }
}

/// Registry of named breakers, constructed once at startup and injected.
///
/// `get_or_create` keeps one breaker per dependency endpoint; `reset_all`
/// exists for test harnesses and ops tooling.
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create registry; `default_config` applies to breakers created on lookup
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get breaker by name, creating it with the default config if absent
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read();
            if let Some(breaker) = breakers.get(name) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
            })
            .clone()
    }

    /// Get breaker by name without creating
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Reset every registered breaker to Closed
    pub fn reset_all(&self) {
        let breakers = self.breakers.read();
        for breaker in breakers.values() {
            breaker.reset();
        }
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
