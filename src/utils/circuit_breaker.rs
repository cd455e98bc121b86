use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards an outbound dependency (the event broker). After enough consecutive
// failures calls are refused outright until a cool-down elapses, then a few
// probe calls decide whether to close again.
//
// Closed -> Open      after `failure_threshold` consecutive failures
// Open -> HalfOpen    once `open_for` has elapsed since the last failure
// HalfOpen -> Closed  after `success_threshold` successes
// HalfOpen -> Open    on any failure
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 = closed, 1 = open, 2 = half-open.
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_for: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_for: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    inner: Arc<Mutex<Inner>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
            })),
            config,
        }
    }

    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        self.admit().await?;

        match operation.await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(error) => {
                self.on_failure().await;
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    async fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let cooled_down = inner
            .last_failure
            .is_none_or(|at| at.elapsed() >= self.config.open_for);
        if !cooled_down {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        tracing::info!(breaker = self.name, "Circuit breaker half-open, probing");
        inner.state = CircuitState::HalfOpen;
        inner.successes = 0;
        Ok(())
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    tracing::info!(breaker = self.name, successes = inner.successes, "Circuit breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.last_failure = None;
                }
            }
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                tracing::warn!(breaker = self.name, failures = inner.failures, "Circuit breaker opened");
                inner.state = CircuitState::Open;
            }
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = self.name, "Probe failed, circuit breaker reopened");
                inner.state = CircuitState::Open;
                inner.successes = 0;
            }
            _ => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}
