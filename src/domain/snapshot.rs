//! Immutable audit snapshots accompanying predictions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::direction::Direction;

/// Denormalized copy of one predictor as captured at generation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorCapture {
    pub id: String,
    pub content: String,
    pub direction: Direction,
    pub strength: u8,
    pub confidence: f64,
    pub analyst_slug: String,
    pub created_at: DateTime<Utc>,
}

/// One entry in the snapshot's generation timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub details: String,
}

/// Immutable audit record, one-to-one with a prediction. Written once,
/// never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSnapshot {
    pub id: String,
    pub prediction_id: String,
    pub predictors: Vec<PredictorCapture>,
    /// Signals that were considered but rejected before predictor creation.
    #[serde(default)]
    pub rejected_signals: Vec<Value>,
    /// Full ensemble output (every assessment across forks), semi-structured.
    pub analyst_assessments: Value,
    /// `{tiers_used, tier_results, agreement_level}`.
    pub llm_ensemble: Value,
    #[serde(default)]
    pub learnings_applied: Vec<String>,
    /// Threshold config, actual values and the pass verdict.
    pub threshold_evaluation: Value,
    pub timeline: Vec<TimelineEvent>,
    pub created_at: DateTime<Utc>,
}

impl PredictionSnapshot {
    pub fn new(prediction_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prediction_id: prediction_id.into(),
            predictors: Vec::new(),
            rejected_signals: Vec::new(),
            analyst_assessments: Value::Null,
            llm_ensemble: Value::Null,
            learnings_applied: Vec::new(),
            threshold_evaluation: Value::Null,
            timeline: Vec::new(),
            created_at,
        }
    }
}
