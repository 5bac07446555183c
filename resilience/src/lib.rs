//! Circuit breaker for calls to external collaborators.
//!
//! ```text
//!   Closed ──(failure_threshold consecutive failures)──► Open
//!     ▲                                                   │
//!     │ success                          recovery_time elapsed
//!     │                                                   ▼
//!     └──────────────────────────────────────────────── HalfOpen
//!                        failure while half-open ──► Open
//! ```
//!
//! [`CircuitBreaker::call`] refuses to run the wrapped operation while the
//! breaker is open and reports that as [`GuardError::CircuitOpen`], distinct
//! from the operation's own failure ([`GuardError::Inner`]).

use {
    log::*,
    parking_lot::Mutex,
    std::{
        future::Future,
        time::{Duration, Instant},
    },
    thiserror::Error,
};

/// Breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    /// Default: 3.
    pub failure_threshold: u32,

    /// How long the breaker stays open before allowing a probe.
    /// Default: 10 seconds.
    pub recovery_time: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_time: Duration::from_secs(10),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failure_threshold must be > 0")]
    ZeroFailureThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Outcome of a guarded call.
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The breaker refused the call; the operation was not attempted.
    #[error("circuit open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> GuardError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::CircuitOpen { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            GuardError::Inner(e) => Some(e),
            GuardError::CircuitOpen { .. } => None,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    next_try: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                next_try: None,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call may be attempted now.
    pub fn can_proceed(&self) -> bool {
        self.can_proceed_at(Instant::now())
    }

    /// [`Self::can_proceed`] against an explicit clock reading.
    ///
    /// An open breaker whose recovery time has elapsed moves to half-open
    /// and lets the probe through.
    pub fn can_proceed_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.next_try.is_some_and(|next_try| now >= next_try) {
                    info!("circuit breaker half-open, allowing probe");
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!("circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.next_try = None;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let trips = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold;
        if trips {
            if inner.state != CircuitState::Open {
                warn!(
                    "circuit breaker open after {} consecutive failures",
                    inner.consecutive_failures
                );
            }
            inner.state = CircuitState::Open;
            inner.next_try = now.checked_add(self.config.recovery_time);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Time left until an open breaker admits a probe.
    pub fn retry_in(&self) -> Duration {
        self.retry_in_at(Instant::now())
    }

    fn retry_in_at(&self, now: Instant) -> Duration {
        self.inner
            .lock()
            .next_try
            .map_or(Duration::ZERO, |next_try| next_try.saturating_duration_since(now))
    }

    /// Run `op` under the breaker.
    ///
    /// `op` is not invoked at all when the breaker refuses the call. Its
    /// outcome is recorded as a success or failure.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let now = Instant::now();
        if !self.can_proceed_at(now) {
            return Err(GuardError::CircuitOpen {
                retry_in: self.retry_in_at(now),
            });
        }
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(GuardError::Inner(e))
            }
        }
    }

    /// Run `op` under the breaker, recording only its failure.
    ///
    /// For calls whose success says nothing about the health of the path
    /// the breaker protects, such as a best-effort broadcast. The caller
    /// confirms health separately with [`Self::record_success`].
    pub async fn guard<T, E, F, Fut>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let now = Instant::now();
        if !self.can_proceed_at(now) {
            return Err(GuardError::CircuitOpen {
                retry_in: self.retry_in_at(now),
            });
        }
        op().await.map_err(|e| {
            self.record_failure();
            GuardError::Inner(e)
        })
    }
}
