//! Repository and collaborator contracts.
//!
//! The core talks to the rest of the system exclusively through the traits
//! here. Every operation is async and may fail with a transport-level
//! [`crate::error::Error::Storage`]; lookups of a specific id fail with a
//! typed not-found error instead of returning partial data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::analysts::{Analyst, AnalystContextVersion, ForkType, Learning};
use crate::domain::{
    Article, Prediction, PredictionPatch, PredictionSnapshot, PredictionStatus, Predictor, Signal,
    SourceSubscription, Target, TargetSnapshot,
};
use crate::error::Result;

/// Query modifiers for prediction lookups. Production reads exclude test
/// rows unless explicitly asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredictionQueryOptions {
    pub include_test_data: bool,
    pub test_scenario_id: Option<String>,
    pub test_data_only: bool,
}

impl PredictionQueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn including_test_data(mut self) -> Self {
        self.include_test_data = true;
        self
    }

    pub fn test_data_only(mut self) -> Self {
        self.test_data_only = true;
        self.include_test_data = true;
        self
    }
}

/// Targets.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// Fetch a target or fail with not-found.
    async fn find_by_id(&self, id: &str) -> Result<Target>;
    async fn find_all_active(&self) -> Result<Vec<Target>>;
    async fn find_by_symbol(&self, universe_id: &str, symbol: &str) -> Result<Option<Target>>;
    async fn find_active_by_universe(&self, universe_id: &str) -> Result<Vec<Target>>;
}

/// Articles, deduplicated on `(source_id, content_hash)`.
#[async_trait]
pub trait ArticleRepository: Send + Sync {
    /// Insert unless the `(source_id, content_hash)` pair already exists.
    /// Returns false on dedup.
    async fn insert(&self, article: &Article) -> Result<bool>;
    async fn find_by_id(&self, id: &str) -> Result<Article>;
}

/// Predictors (Tier-2 pool rows).
#[async_trait]
pub trait PredictorRepository: Send + Sync {
    async fn create(&self, predictor: &Predictor) -> Result<()>;
    async fn find_active_by_target(&self, target_id: &str) -> Result<Vec<Predictor>>;
    /// Mark rows with `expires_at < now` expired. Returns the sweep count.
    async fn expire_old_predictors(&self, target_id: &str, now: DateTime<Utc>) -> Result<usize>;
    /// Consume one predictor, linking it to a prediction. Returns false when
    /// the row was already consumed or expired (idempotent).
    async fn consume_predictor(&self, id: &str, prediction_id: &str) -> Result<bool>;
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Predictor>>;
    /// Whether an active or consumed predictor already exists for the
    /// article × target pair (ingestion idempotency).
    async fn exists_for_article(&self, target_id: &str, article_id: &str) -> Result<bool>;
    /// Copy a predictor into a replay scenario, preserving its opinion.
    async fn create_test_copy(&self, predictor: &Predictor, scenario_id: &str)
        -> Result<Predictor>;
}

/// Predictions (Tier-3 artifacts).
#[async_trait]
pub trait PredictionRepository: Send + Sync {
    /// Create a prediction. Fails with a conflict when an active row for
    /// `(target_id, analyst_slug)` already exists.
    async fn create(&self, prediction: &Prediction) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Prediction>;
    async fn update(&self, id: &str, patch: &PredictionPatch) -> Result<()>;
    async fn update_analyst_ensemble(&self, id: &str, ensemble: &Value) -> Result<()>;
    async fn find_by_target(
        &self,
        target_id: &str,
        status: Option<PredictionStatus>,
        options: &PredictionQueryOptions,
    ) -> Result<Vec<Prediction>>;
}

/// Signals. Append-only.
#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn create(&self, signal: &Signal) -> Result<()>;
    /// Whether a signal with this content hash already exists for the
    /// target (ingestion idempotency).
    async fn exists(&self, target_id: &str, content_hash: &str) -> Result<bool>;
    async fn find_by_target(&self, target_id: &str, limit: usize) -> Result<Vec<Signal>>;
}

/// Source subscriptions and their watermarks.
#[async_trait]
pub trait SourceSubscriptionRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<SourceSubscription>;
    async fn find_active_by_target(&self, target_id: &str) -> Result<Vec<SourceSubscription>>;
    /// Advance the watermark. Implementations never move it backwards.
    async fn update_watermark(&self, id: &str, processed_at: DateTime<Utc>) -> Result<()>;
    /// Articles at or after the subscription watermark, ascending by
    /// `first_seen_at`, capped at `limit`.
    async fn get_new_articles(
        &self,
        subscription: &SourceSubscription,
        limit: usize,
    ) -> Result<Vec<Article>>;
}

/// Prediction snapshots. Write-once.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn create(&self, snapshot: &PredictionSnapshot) -> Result<()>;
    async fn find_by_prediction(&self, prediction_id: &str) -> Result<Option<PredictionSnapshot>>;
}

/// Analysts and their fork-scoped context versions.
#[async_trait]
pub trait AnalystRepository: Send + Sync {
    async fn find_active_for_target(&self, target_id: &str) -> Result<Vec<Analyst>>;
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Analyst>>;
    async fn current_context_version(
        &self,
        analyst_id: &str,
        fork: ForkType,
    ) -> Result<Option<AnalystContextVersion>>;
    async fn all_current_context_versions(
        &self,
        fork: ForkType,
    ) -> Result<HashMap<String, AnalystContextVersion>>;
    /// Persist a new current version, clearing `is_current` on the previous
    /// one for the same `(analyst_id, fork_type)`.
    async fn create_context_version(&self, version: &AnalystContextVersion) -> Result<()>;
}

/// Analyst learnings.
#[async_trait]
pub trait LearningRepository: Send + Sync {
    /// Learnings for an analyst, optionally narrowed to a target (target
    /// scoped learnings plus analyst-global ones).
    async fn find_for_analyst(
        &self,
        analyst_id: &str,
        target_id: Option<&str>,
    ) -> Result<Vec<Learning>>;
    async fn create(&self, learning: &Learning) -> Result<()>;
}

/// Latest market snapshot per target.
#[async_trait]
pub trait TargetSnapshotRepository: Send + Sync {
    async fn latest(&self, target_id: &str) -> Result<Option<TargetSnapshot>>;
    async fn record(&self, snapshot: &TargetSnapshot) -> Result<()>;
}

/// External positions collaborator. Creation requests are fire-and-forget
/// from the pipeline's point of view.
#[async_trait]
pub trait PositionsPort: Send + Sync {
    async fn create_position(&self, request: PositionRequest) -> Result<()>;
}

/// A position the generator asks the external collaborator to open.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRequest {
    pub target_id: String,
    pub prediction_id: String,
    pub analyst_slug: String,
    pub fork: ForkType,
    pub direction: crate::domain::TrendDirection,
    pub quantity: f64,
    pub entry_price: f64,
}

/// Price data router, used for test mirrors and position pricing.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn latest_price(&self, symbol: &str, universe_id: &str) -> Result<Option<f64>>;
}

/// Stubbed price source: always reports no price. The backing feed is an
/// open integration point.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnpricedSource;

#[async_trait]
impl PriceSource for UnpricedSource {
    async fn latest_price(&self, _symbol: &str, _universe_id: &str) -> Result<Option<f64>> {
        Ok(None)
    }
}
