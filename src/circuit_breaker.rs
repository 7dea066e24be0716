use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{ErrorCode, ProbeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

/// Per-dispatch-target circuit breaker guarding queue-controller calls into
/// lifecycle controllers (§4.2). After `max_failures` consecutive failures
/// the breaker opens and fails fast with `ServiceUnavailable`; after
/// `reset_timeout` it allows one half-open probe call through.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    consecutive_failures: Mutex<u32>,
    max_failures: u32,
    call_timeout: Duration,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, call_timeout: Duration, reset_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed),
            consecutive_failures: Mutex::new(0),
            max_failures,
            call_timeout,
            reset_timeout,
        }
    }

    fn admit(&self) -> Result<bool, ProbeError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed => Ok(false),
            BreakerState::HalfOpen => Ok(false),
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    *state = BreakerState::HalfOpen;
                    Ok(true)
                } else {
                    Err(ProbeError::service_unavailable(
                        "circuit breaker open: too many recent dispatch failures",
                    ))
                }
            }
        }
    }

    fn record_success(&self) {
        *self.consecutive_failures.lock().unwrap() = 0;
        *self.state.lock().unwrap() = BreakerState::Closed;
    }

    fn record_failure(&self) {
        let mut failures = self.consecutive_failures.lock().unwrap();
        *failures += 1;
        if *failures >= self.max_failures {
            *self.state.lock().unwrap() = BreakerState::Open {
                opened_at: Instant::now(),
            };
        }
    }

    /// Runs `call` under the breaker's admission and timeout policy.
    /// Timeouts are converted to `ServiceTimeout` (§4.2); any other error
    /// counts toward the consecutive-failure tally.
    pub async fn call<F, T>(&self, call: F) -> Result<T, ProbeError>
    where
        F: Future<Output = Result<T, ProbeError>>,
    {
        self.admit()?;
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure();
                Err(err)
            }
            Err(_) => {
                self.record_failure();
                Err(ProbeError::new(ErrorCode::Timeout, "dispatch timed out"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(50), Duration::from_millis(50));
        for _ in 0..2 {
            let result = breaker
                .call(async { Err::<(), _>(ProbeError::validation("boom")) })
                .await;
            assert!(result.is_err());
        }
        let result = breaker.call(async { Ok::<_, ProbeError>(()) }).await;
        assert_eq!(result.unwrap_err().code, ErrorCode::ServiceUnavailable);
    }

    #[tokio::test]
    async fn half_opens_after_reset_timeout_and_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50), Duration::from_millis(20));
        let _ = breaker
            .call(async { Err::<(), _>(ProbeError::validation("boom")) })
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let result = breaker.call(async { Ok::<_, ProbeError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn call_timeout_surfaces_as_timeout_error() {
        let breaker = CircuitBreaker::new(5, Duration::from_millis(10), Duration::from_secs(30));
        let result = breaker
            .call(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, ProbeError>(())
            })
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::Timeout);
    }
}
