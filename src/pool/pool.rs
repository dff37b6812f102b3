//! Per-target predictor pool management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::clock::Clock;
use crate::config::ThresholdConfig;
use crate::domain::{Direction, Predictor};
use crate::error::Result;
use crate::events::{EventBus, PipelineEventType};
use crate::repo::PredictorRepository;

use super::threshold::{evaluate, ThresholdEvaluation};

/// Per-direction and aggregate statistics over the active set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorStats {
    pub target_id: String,
    pub active_count: usize,
    pub bullish_count: usize,
    pub bearish_count: usize,
    pub neutral_count: usize,
    pub combined_strength: f64,
    pub avg_confidence: f64,
    pub oldest_created_at: Option<DateTime<Utc>>,
    pub newest_created_at: Option<DateTime<Utc>>,
}

/// Tier-2 owner of the per-target active predictor set.
///
/// The pool is the only shared state between Tier-1 and Tier-3 tasks; the
/// per-target lock serializes the evaluate → consume → create transition
/// while stats and would-meet reads stay lock-free snapshot reads.
pub struct PredictorPool {
    predictors: Arc<dyn PredictorRepository>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    default_config: ThresholdConfig,
    target_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PredictorPool {
    pub fn new(
        predictors: Arc<dyn PredictorRepository>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        default_config: ThresholdConfig,
    ) -> Self {
        Self {
            predictors,
            events,
            clock,
            default_config,
            target_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The single-flight lock for one target. Tier-3 holds this across
    /// evaluate → consume → create.
    pub fn target_lock(&self, target_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.target_locks.lock().unwrap();
        locks
            .entry(target_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Sweep expired rows, then return the remaining active set.
    pub async fn get_active_predictors(&self, target_id: &str) -> Result<Vec<Predictor>> {
        let now = self.clock.now();
        let swept = self.predictors.expire_old_predictors(target_id, now).await?;
        if swept > 0 {
            debug!(target_id, swept, "expired stale predictors");
        }
        self.predictors.find_active_by_target(target_id).await
    }

    /// Evaluate the threshold over the current active set. Emits
    /// `predictor.ready` when the threshold is met.
    pub async fn evaluate_threshold(
        &self,
        target_id: &str,
        config: Option<&ThresholdConfig>,
    ) -> Result<ThresholdEvaluation> {
        let config = config.unwrap_or(&self.default_config);
        let active = self.get_active_predictors(target_id).await?;
        let evaluation = evaluate(&active, config, self.clock.now());

        if evaluation.meets_threshold {
            self.events
                .emit(
                    PipelineEventType::PredictorReady,
                    target_id,
                    "tier2.threshold",
                    format!(
                        "threshold met: {} predictors, strength {:.0}, {} consensus {:.2}",
                        evaluation.active_count,
                        evaluation.combined_strength,
                        evaluation.dominant_direction,
                        evaluation.direction_consensus
                    ),
                    json!({
                        "active_count": evaluation.active_count,
                        "combined_strength": evaluation.combined_strength,
                        "dominant_direction": evaluation.dominant_direction,
                        "direction_consensus": evaluation.direction_consensus,
                    }),
                )
                .await;
        }

        Ok(evaluation)
    }

    /// Mark every currently active predictor consumed by `prediction_id`.
    /// Idempotent per predictor; returns the number actually transitioned.
    pub async fn consume_predictors(&self, target_id: &str, prediction_id: &str) -> Result<usize> {
        let active = self.get_active_predictors(target_id).await?;
        let mut consumed = 0usize;
        for predictor in &active {
            if self
                .predictors
                .consume_predictor(&predictor.id, prediction_id)
                .await?
            {
                consumed += 1;
            }
        }
        debug!(target_id, prediction_id, consumed, "consumed predictor pool");
        Ok(consumed)
    }

    /// Snapshot statistics over the active set.
    pub async fn get_predictor_stats(&self, target_id: &str) -> Result<PredictorStats> {
        let active = self.get_active_predictors(target_id).await?;
        let mut stats = PredictorStats {
            target_id: target_id.to_string(),
            active_count: active.len(),
            bullish_count: 0,
            bearish_count: 0,
            neutral_count: 0,
            combined_strength: 0.0,
            avg_confidence: 0.0,
            oldest_created_at: None,
            newest_created_at: None,
        };

        for predictor in &active {
            match predictor.direction {
                Direction::Bullish => stats.bullish_count += 1,
                Direction::Bearish => stats.bearish_count += 1,
                Direction::Neutral => stats.neutral_count += 1,
            }
            stats.combined_strength += predictor.strength as f64;
            stats.avg_confidence += predictor.confidence;
            stats.oldest_created_at = Some(
                stats
                    .oldest_created_at
                    .map_or(predictor.created_at, |t| t.min(predictor.created_at)),
            );
            stats.newest_created_at = Some(
                stats
                    .newest_created_at
                    .map_or(predictor.created_at, |t| t.max(predictor.created_at)),
            );
        }
        if !active.is_empty() {
            stats.avg_confidence /= active.len() as f64;
        }
        Ok(stats)
    }

    /// Would the pool meet the threshold if one more predictor with the
    /// given strength and direction arrived now? Snapshot read; may race
    /// with concurrent writes.
    pub async fn would_meet_threshold(
        &self,
        target_id: &str,
        new_strength: u8,
        new_direction: Direction,
        config: Option<&ThresholdConfig>,
    ) -> Result<bool> {
        let config = config.unwrap_or(&self.default_config);
        let now = self.clock.now();
        let mut pool = self.get_active_predictors(target_id).await?;
        pool.push(Predictor::new(
            target_id,
            "hypothetical",
            "hypothetical",
            new_direction,
            new_strength,
            0.5,
            "would-meet probe",
            now,
            config.predictor_ttl_hours,
        ));
        Ok(evaluate(&pool, config, now).meets_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::{MemoryEventSink, PipelineEventType};
    use crate::store::SqliteStore;
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        // Millisecond-precise so sqlite round-trips compare exactly.
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn predictor(target: &str, direction: Direction, strength: u8, confidence: f64, created_at: DateTime<Utc>) -> Predictor {
        Predictor::new(
            target, "a-1", "analyst", direction, strength, confidence, "r", created_at, 48,
        )
    }

    async fn pool_with(now: DateTime<Utc>) -> (PredictorPool, Arc<SqliteStore>, Arc<MemoryEventSink>, Arc<ManualClock>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let sink = Arc::new(MemoryEventSink::new(64));
        let clock = Arc::new(ManualClock::new(now));
        let events = Arc::new(EventBus::new(sink.clone(), clock.clone()));
        let pool = PredictorPool::new(
            store.clone(),
            events,
            clock.clone(),
            ThresholdConfig::balanced(),
        );
        (pool, store, sink, clock)
    }

    #[tokio::test]
    async fn test_active_retrieval_sweeps_expired_rows() {
        let now = base_time();
        let (pool, store, _, clock) = pool_with(now).await;

        store
            .create(&predictor("t-1", Direction::Bullish, 8, 0.8, now))
            .await
            .unwrap();
        store
            .create(&predictor("t-1", Direction::Bullish, 7, 0.7, now - Duration::hours(60)))
            .await
            .unwrap();

        let active = pool.get_active_predictors("t-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].strength, 8);

        // The sweep is idempotent.
        clock.advance(Duration::minutes(1));
        let active = pool.get_active_predictors("t-1").await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_threshold_emits_ready_event() {
        let now = base_time();
        let (pool, store, sink, _) = pool_with(now).await;

        for _ in 0..3 {
            store
                .create(&predictor("t-1", Direction::Bullish, 7, 0.8, now))
                .await
                .unwrap();
        }

        let evaluation = pool.evaluate_threshold("t-1", None).await.unwrap();
        assert!(evaluation.meets_threshold);
        assert_eq!(sink.count_of(PipelineEventType::PredictorReady), 1);

        // A below-threshold pool stays silent.
        let evaluation = pool.evaluate_threshold("t-2", None).await.unwrap();
        assert!(!evaluation.meets_threshold);
        assert_eq!(sink.count_of(PipelineEventType::PredictorReady), 1);
    }

    #[tokio::test]
    async fn test_consume_is_idempotent_per_predictor() {
        let now = base_time();
        let (pool, store, _, _) = pool_with(now).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let row = predictor("t-1", Direction::Bullish, 7, 0.8, now);
            ids.push(row.id.clone());
            store.create(&row).await.unwrap();
        }

        let consumed = pool.consume_predictors("t-1", "p-1").await.unwrap();
        assert_eq!(consumed, 3);

        // Re-consuming an already consumed pool transitions nothing.
        let consumed = pool.consume_predictors("t-1", "p-2").await.unwrap();
        assert_eq!(consumed, 0);

        // Every consumed row carries the linking prediction id.
        for row in store.find_by_ids(&ids).await.unwrap() {
            assert_eq!(row.status, crate::domain::PredictorStatus::Consumed);
            assert_eq!(row.consumed_by_prediction_id.as_deref(), Some("p-1"));
        }
    }

    #[tokio::test]
    async fn test_stats_counts_directions() {
        let now = base_time();
        let (pool, store, _, _) = pool_with(now).await;

        store.create(&predictor("t-1", Direction::Bullish, 8, 0.8, now)).await.unwrap();
        store.create(&predictor("t-1", Direction::Bullish, 6, 0.6, now - Duration::hours(2))).await.unwrap();
        store.create(&predictor("t-1", Direction::Bearish, 4, 0.7, now)).await.unwrap();

        let stats = pool.get_predictor_stats("t-1").await.unwrap();
        assert_eq!(stats.active_count, 3);
        assert_eq!(stats.bullish_count, 2);
        assert_eq!(stats.bearish_count, 1);
        assert_eq!(stats.neutral_count, 0);
        assert_eq!(stats.combined_strength, 18.0);
        assert!((stats.avg_confidence - 0.7).abs() < 1e-9);
        assert_eq!(stats.oldest_created_at, Some(now - Duration::hours(2)));
        assert_eq!(stats.newest_created_at, Some(now));
    }

    #[tokio::test]
    async fn test_would_meet_threshold_probe() {
        let now = base_time();
        let (pool, store, _, _) = pool_with(now).await;

        store.create(&predictor("t-1", Direction::Bullish, 8, 0.8, now)).await.unwrap();
        store.create(&predictor("t-1", Direction::Bullish, 7, 0.8, now)).await.unwrap();

        // Two predictors, strength 15: one more bullish tips all gates.
        assert!(pool
            .would_meet_threshold("t-1", 5, Direction::Bullish, None)
            .await
            .unwrap());
        // A bearish addition would break consensus.
        assert!(!pool
            .would_meet_threshold("t-1", 5, Direction::Bearish, None)
            .await
            .unwrap());
        // The probe itself never persists anything.
        assert_eq!(pool.get_active_predictors("t-1").await.unwrap().len(), 2);
    }
}
