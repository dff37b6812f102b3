//! Per-service health tracking.
//!
//! Every call through the resilience layer records one outcome per service.
//! Status derives from a sliding window of the last 100 outcomes plus a
//! consecutive-failure counter.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Outcomes retained per service.
pub const HEALTH_WINDOW: usize = 100;

/// Derived health status of an external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Rolling outcome window for one service.
#[derive(Debug, Default)]
pub struct ServiceHealth {
    window: VecDeque<bool>,
    consecutive_failures: u32,
}

impl ServiceHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call outcome. Success resets the consecutive counter.
    pub fn record(&mut self, success: bool) {
        if self.window.len() == HEALTH_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(success);
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    /// Failure fraction over the retained window; 0 when no calls recorded.
    pub fn error_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|ok| !**ok).count();
        failures as f64 / self.window.len() as f64
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Status rules:
    /// down when `consecutive_failures >= 3` or error rate > 0.75;
    /// degraded when `consecutive_failures > 0` or error rate > 0.25;
    /// healthy otherwise.
    pub fn status(&self) -> HealthStatus {
        let rate = self.error_rate();
        if self.consecutive_failures >= 3 || rate > 0.75 {
            HealthStatus::Down
        } else if self.consecutive_failures > 0 || rate > 0.25 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Point-in-time health report for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub service: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub error_rate: f64,
    pub recorded_calls: usize,
}

/// Registry of per-service health windows.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    services: Mutex<HashMap<String, ServiceHealth>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome for a service.
    pub fn record(&self, service: &str, success: bool) {
        let mut services = self.services.lock().unwrap();
        services.entry(service.to_string()).or_default().record(success);
    }

    /// Current status; unknown services report healthy.
    pub fn status(&self, service: &str) -> HealthStatus {
        let services = self.services.lock().unwrap();
        services
            .get(service)
            .map(ServiceHealth::status)
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Full report for one service.
    pub fn report(&self, service: &str) -> HealthReport {
        let services = self.services.lock().unwrap();
        match services.get(service) {
            Some(health) => HealthReport {
                service: service.to_string(),
                status: health.status(),
                consecutive_failures: health.consecutive_failures(),
                error_rate: health.error_rate(),
                recorded_calls: health.window.len(),
            },
            None => HealthReport {
                service: service.to_string(),
                status: HealthStatus::Healthy,
                consecutive_failures: 0,
                error_rate: 0.0,
                recorded_calls: 0,
            },
        }
    }

    /// Reports for every tracked service.
    pub fn all_reports(&self) -> Vec<HealthReport> {
        let services = self.services.lock().unwrap();
        let mut reports: Vec<HealthReport> = services
            .iter()
            .map(|(name, health)| HealthReport {
                service: name.clone(),
                status: health.status(),
                consecutive_failures: health.consecutive_failures(),
                error_rate: health.error_rate(),
                recorded_calls: health.window.len(),
            })
            .collect();
        reports.sort_by(|a, b| a.service.cmp(&b.service));
        reports
    }
}
