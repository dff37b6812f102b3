//! Resilience layer: retry/backoff/timeout plus per-service health tallies.
//!
//! Every external call (LLM gateway, crawler bridge, repositories used from
//! the generators) goes through [`Retrier::execute_with_retry`], which
//! records one health outcome per attempt and surfaces the last underlying
//! error unchanged once retries are exhausted.

mod health;
mod retry;

pub use health::{HealthRegistry, HealthReport, HealthStatus, ServiceHealth, HEALTH_WINDOW};
pub use retry::{Retrier, RetryConfig};
