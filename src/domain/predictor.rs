//! Predictors: weighted directional opinions feeding Tier 2.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::direction::Direction;

/// Lifecycle of a predictor. Consumed and expired are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorStatus {
    Active,
    Consumed,
    Expired,
}

impl std::fmt::Display for PredictorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Consumed => write!(f, "consumed"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// A single direction-bearing opinion derived from one article × analyst
/// ensemble run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictor {
    pub id: String,
    pub target_id: String,
    pub article_id: String,
    pub analyst_slug: String,
    pub direction: Direction,
    /// Opinion strength in `[1..10]`.
    pub strength: u8,
    /// Opinion confidence in `[0..1]`.
    pub confidence: f64,
    pub reasoning: String,
    pub status: PredictorStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_by_prediction_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Predictor {
    /// Create an active predictor, clamping strength and confidence to
    /// their contract ranges.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target_id: impl Into<String>,
        article_id: impl Into<String>,
        analyst_slug: impl Into<String>,
        direction: Direction,
        strength: u8,
        confidence: f64,
        reasoning: impl Into<String>,
        created_at: DateTime<Utc>,
        ttl_hours: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_id: target_id.into(),
            article_id: article_id.into(),
            analyst_slug: analyst_slug.into(),
            direction,
            strength: strength.clamp(1, 10),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            status: PredictorStatus::Active,
            consumed_by_prediction_id: None,
            expires_at: created_at + Duration::hours(ttl_hours),
            created_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PredictorStatus::Active
    }

    /// Age in fractional hours at `now`.
    pub fn hours_old(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds() as f64 / 3_600_000.0
    }

    /// Whether the expiry deadline has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(created_at: DateTime<Utc>) -> Predictor {
        Predictor::new(
            "t-1",
            "a-1",
            "technical-analyst",
            Direction::Bullish,
            8,
            0.8,
            "momentum breakout",
            created_at,
            48,
        )
    }

    #[test]
    fn test_new_clamps_ranges() {
        let now = Utc::now();
        let p = Predictor::new(
            "t-1", "a-1", "s", Direction::Neutral, 14, 1.7, "r", now, 24,
        );
        assert_eq!(p.strength, 10);
        assert_eq!(p.confidence, 1.0);

        let p = Predictor::new(
            "t-1", "a-1", "s", Direction::Neutral, 0, -0.5, "r", now, 24,
        );
        assert_eq!(p.strength, 1);
        assert_eq!(p.confidence, 0.0);
    }

    #[test]
    fn test_expiry_window() {
        let created = Utc::now();
        let p = base(created);
        assert!(!p.is_expired_at(created + Duration::hours(47)));
        assert!(p.is_expired_at(created + Duration::hours(49)));
    }

    #[test]
    fn test_hours_old() {
        let created = Utc::now();
        let p = base(created);
        let age = p.hours_old(created + Duration::minutes(90));
        assert!((age - 1.5).abs() < 1e-9);
    }
}
