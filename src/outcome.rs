//! Outcome capture and resolution hooks.
//!
//! The core owns only the transition into `active` plus refresh-in-place;
//! external collaborators drive resolved/expired/cancelled through the
//! recorder here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::domain::{PredictionPatch, PredictionStatus, TrendDirection};
use crate::error::{Error, Result};
use crate::repo::PredictionRepository;

/// Captured outcome for one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub prediction_id: String,
    pub realized_direction: TrendDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_at_resolution: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

/// Applies outcome and expiry transitions on behalf of external callers.
pub struct OutcomeRecorder {
    predictions: Arc<dyn PredictionRepository>,
    clock: Arc<dyn Clock>,
}

impl OutcomeRecorder {
    pub fn new(predictions: Arc<dyn PredictionRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { predictions, clock }
    }

    /// active → resolved. Rejected for rows no longer active.
    pub async fn capture_outcome(&self, outcome: &PredictionOutcome) -> Result<()> {
        let prediction = self.predictions.find_by_id(&outcome.prediction_id).await?;
        if prediction.status != PredictionStatus::Active {
            return Err(Error::validation(format!(
                "prediction {} is {}, not active",
                prediction.id, prediction.status
            )));
        }
        self.predictions
            .update(
                &prediction.id,
                &PredictionPatch::new()
                    .status(PredictionStatus::Resolved)
                    .updated_at(outcome.captured_at),
            )
            .await?;
        info!(
            prediction = %prediction.id,
            realized = %outcome.realized_direction,
            "captured prediction outcome"
        );
        Ok(())
    }

    /// active → expired once the horizon passed with no outcome.
    /// Idempotent: already-terminal rows are left untouched.
    pub async fn expire_if_overdue(&self, prediction_id: &str) -> Result<bool> {
        let prediction = self.predictions.find_by_id(prediction_id).await?;
        if prediction.status != PredictionStatus::Active {
            return Ok(false);
        }
        let now = self.clock.now();
        if prediction.expires_at >= now {
            return Ok(false);
        }
        self.predictions
            .update(
                prediction_id,
                &PredictionPatch::new()
                    .status(PredictionStatus::Expired)
                    .updated_at(now),
            )
            .await?;
        Ok(true)
    }

    /// active → cancelled (administrative).
    pub async fn cancel(&self, prediction_id: &str) -> Result<()> {
        let prediction = self.predictions.find_by_id(prediction_id).await?;
        if prediction.status != PredictionStatus::Active {
            return Err(Error::validation(format!(
                "prediction {} is {}, not active",
                prediction.id, prediction.status
            )));
        }
        self.predictions
            .update(
                prediction_id,
                &PredictionPatch::new()
                    .status(PredictionStatus::Cancelled)
                    .updated_at(self.clock.now()),
            )
            .await
    }
}
