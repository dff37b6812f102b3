//! Tier-3 predictions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::direction::{Magnitude, TrendDirection};

/// Slug reserved for the synthesized arbitrator row.
pub const ARBITRATOR_SLUG: &str = "arbitrator";

/// Lifecycle of a prediction. The core owns only the transition into
/// `Active` and refresh-in-place; the rest belong to outcome capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Active,
    Resolved,
    Expired,
    Cancelled,
}

impl std::fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Resolved => write!(f, "resolved"),
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Context-version ids captured at generation time for traceability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextVersionIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Per-analyst user-fork context version ids.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub analysts: HashMap<String, String>,
}

/// The Tier-3 artifact: direction, magnitude, confidence and horizon for a
/// target, plus the semi-structured ensemble blobs for audit and UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub target_id: String,
    pub direction: TrendDirection,
    pub magnitude: Magnitude,
    pub confidence: f64,
    pub timeframe_hours: i64,
    pub expires_at: DateTime<Utc>,
    pub predicted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reasoning: String,
    /// Semi-structured record: `predictor_count`, `combined_strength`,
    /// `direction_consensus`, optional `versions[]` history and the
    /// per-analyst fork breakdown. Unknown keys are opaque.
    pub analyst_ensemble: Value,
    /// Per-tier LLM usage summary for the generation run.
    pub llm_ensemble: Value,
    pub status: PredictionStatus,
    /// Owning analyst slug, or the literal `arbitrator`.
    pub analyst_slug: String,
    pub is_arbitrator: bool,
    #[serde(default)]
    pub context_versions: ContextVersionIds,
    #[serde(default)]
    pub is_test: bool,
}

impl Prediction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target_id: impl Into<String>,
        analyst_slug: impl Into<String>,
        direction: TrendDirection,
        magnitude: Magnitude,
        confidence: f64,
        timeframe_hours: i64,
        reasoning: impl Into<String>,
        predicted_at: DateTime<Utc>,
    ) -> Self {
        let analyst_slug = analyst_slug.into();
        let is_arbitrator = analyst_slug == ARBITRATOR_SLUG;
        Self {
            id: Uuid::new_v4().to_string(),
            target_id: target_id.into(),
            direction,
            magnitude,
            confidence: confidence.clamp(0.0, 1.0),
            timeframe_hours: timeframe_hours.max(1),
            expires_at: predicted_at + Duration::hours(timeframe_hours.max(1)),
            predicted_at,
            updated_at: predicted_at,
            reasoning: reasoning.into(),
            analyst_ensemble: Value::Null,
            llm_ensemble: Value::Null,
            status: PredictionStatus::Active,
            analyst_slug,
            is_arbitrator,
            context_versions: ContextVersionIds::default(),
            is_test: false,
        }
    }

    pub fn with_analyst_ensemble(mut self, ensemble: Value) -> Self {
        self.analyst_ensemble = ensemble;
        self
    }

    pub fn with_llm_ensemble(mut self, ensemble: Value) -> Self {
        self.llm_ensemble = ensemble;
        self
    }

    pub fn with_context_versions(mut self, versions: ContextVersionIds) -> Self {
        self.context_versions = versions;
        self
    }

    pub fn as_test(mut self) -> Self {
        self.is_test = true;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == PredictionStatus::Active
    }

    /// Read a numeric field out of the `analyst_ensemble` blob.
    pub fn ensemble_f64(&self, key: &str) -> Option<f64> {
        self.analyst_ensemble.get(key).and_then(Value::as_f64)
    }
}

/// Mutable subset applied by `PredictionRepository::update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<TrendDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<Magnitude>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PredictionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PredictionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direction(mut self, direction: TrendDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn magnitude(mut self, magnitude: Magnitude) -> Self {
        self.magnitude = Some(magnitude);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn status(mut self, status: PredictionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Apply the patch in place.
    pub fn apply_to(&self, prediction: &mut Prediction) {
        if let Some(direction) = self.direction {
            prediction.direction = direction;
        }
        if let Some(magnitude) = self.magnitude {
            prediction.magnitude = magnitude;
        }
        if let Some(confidence) = self.confidence {
            prediction.confidence = confidence;
        }
        if let Some(ref reasoning) = self.reasoning {
            prediction.reasoning = reasoning.clone();
        }
        if let Some(status) = self.status {
            prediction.status = status;
        }
        if let Some(updated_at) = self.updated_at {
            prediction.updated_at = updated_at;
        }
    }
}
