//! Bounded retries with exponential backoff, jitter and per-attempt
//! deadlines.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::health::HealthRegistry;

/// Retry configuration. Defaults match the balanced pipeline profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            timeout_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Undithered backoff base for attempt `i`:
    /// `min(initial × multiplier^i, max)`.
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let millis = (self.initial_delay_ms as f64 * factor).round();
        (millis as u64).min(self.max_delay_ms)
    }

    /// Jittered delay for attempt `i`:
    /// `min(base + uniform(0, 0.2 × base), max)`. The jitter spreads
    /// synchronized retries apart.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms(attempt);
        let jitter_cap = (base as f64 * 0.2).round() as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        Duration::from_millis((base + jitter).min(self.max_delay_ms))
    }
}

/// Executes operations with retries and records per-service health.
#[derive(Debug, Clone)]
pub struct Retrier {
    health: Arc<HealthRegistry>,
}

impl Retrier {
    pub fn new(health: Arc<HealthRegistry>) -> Self {
        Self { health }
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Run `op` against `service` with up to `max_retries` retries.
    ///
    /// Each attempt runs under its own `timeout_ms` deadline; a timeout
    /// counts as a failed attempt. Non-retriable domain errors propagate
    /// immediately and unchanged, but still count toward failure tallies.
    /// When retries are exhausted the last underlying error surfaces
    /// unchanged.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        service: &str,
        config: &RetryConfig,
        op: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error: Option<Error> = None;

        for attempt in 0..=config.max_retries {
            let outcome = tokio::time::timeout(Duration::from_millis(config.timeout_ms), op()).await;

            let error = match outcome {
                Ok(Ok(value)) => {
                    self.health.record(service, true);
                    return Ok(value);
                }
                Ok(Err(err)) => err,
                Err(_) => Error::timeout(config.timeout_ms),
            };

            self.health.record(service, false);

            if !error.is_retriable() {
                debug!(service, %error, "non-retriable error, propagating");
                return Err(error);
            }

            if attempt < config.max_retries {
                let delay = config.delay_for_attempt(attempt);
                debug!(
                    service,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
            } else {
                warn!(service, attempts = attempt + 1, %error, "retries exhausted");
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| Error::Internal("retry loop without attempts".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::health::HealthStatus;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(2)
            .with_initial_delay_ms(1)
            .with_max_delay_ms(5)
            .with_timeout_ms(1000)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let retrier = Retrier::new(Arc::new(HealthRegistry::new()));
        let calls = AtomicU32::new(0);

        let result = retrier
            .execute_with_retry("svc", &fast_config(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::service("svc", "transient"))
                } else {
                    Ok(7u32)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error_unchanged() {
        let retrier = Retrier::new(Arc::new(HealthRegistry::new()));
        let calls = AtomicU32::new(0);

        let result: Result<()> = retrier
            .execute_with_retry("svc", &fast_config(), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::service("svc", format!("failure #{n}")))
            })
            .await;

        // 1 initial + 2 retries, and the final message is the last one seen.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::Service { message, .. }) => assert_eq!(message, "failure #2"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retriable_short_circuits() {
        let retrier = Retrier::new(Arc::new(HealthRegistry::new()));
        let calls = AtomicU32::new(0);

        let result: Result<()> = retrier
            .execute_with_retry("svc", &fast_config(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("bad input"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::Validation(_))));
        // The failure still counted toward health.
        assert_eq!(retrier.health().status("svc"), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_attempt_deadline_counts_as_failure() {
        let retrier = Retrier::new(Arc::new(HealthRegistry::new()));
        let config = RetryConfig::new()
            .with_max_retries(0)
            .with_timeout_ms(10)
            .with_initial_delay_ms(1);

        let result: Result<()> = retrier
            .execute_with_retry("slow", &config, || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout { duration_ms: 10 })));
        assert_eq!(retrier.health().report("slow").consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_health_cascade_with_zero_retries() {
        // Scenario S6: three failing calls with max_retries 0.
        let retrier = Retrier::new(Arc::new(HealthRegistry::new()));
        let config = fast_config().with_max_retries(0);

        for expected in [HealthStatus::Degraded, HealthStatus::Degraded, HealthStatus::Down] {
            let _ = retrier
                .execute_with_retry::<(), _, _>("firecrawl", &config, || async {
                    Err(Error::service("firecrawl", "boom"))
                })
                .await;
            assert_eq!(retrier.health().status("firecrawl"), expected);
        }

        let _ = retrier
            .execute_with_retry("firecrawl", &config, || async { Ok(()) })
            .await;
        let report = retrier.health().report("firecrawl");
        assert_eq!(report.consecutive_failures, 0);
        // 3 failures in a 4-call window keeps the rate above 0.25.
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    proptest! {
        // Backoff bounds: initial <= delay_i <= max, non-decreasing base.
        #[test]
        fn prop_backoff_bounds(
            initial in 1u64..5_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..12,
        ) {
            let config = RetryConfig::new()
                .with_initial_delay_ms(initial)
                .with_max_delay_ms(30_000)
                .with_backoff_multiplier(multiplier);

            let delay = config.delay_for_attempt(attempt).as_millis() as u64;
            prop_assert!(delay >= initial.min(config.max_delay_ms));
            prop_assert!(delay <= config.max_delay_ms);

            if attempt > 0 {
                prop_assert!(config.base_delay_ms(attempt) >= config.base_delay_ms(attempt - 1));
            }
        }
    }
}
