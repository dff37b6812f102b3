//! Tier 3: threshold-gated prediction generation and refresh.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analysts::{AnalystRegistry, ForkType};
use crate::clock::Clock;
use crate::config::{EnsembleOptions, GenerationConfig, ThresholdConfig};
use crate::domain::{
    Direction, Magnitude, Prediction, PredictionPatch, PredictionStatus, Predictor, Target,
    TargetSnapshot, TimelineEvent, ARBITRATOR_SLUG,
};
use crate::ensemble::{Assessment, EnsembleEngine, EnsembleInput, ThreeWayForkResult};
use crate::error::{Error, Result};
use crate::events::{EventBus, PipelineEventType};
use crate::pool::{PredictorPool, ThresholdEvaluation};
use crate::repo::{
    PositionRequest, PositionsPort, PredictionQueryOptions, PredictionRepository, PriceSource,
    TargetRepository, TargetSnapshotRepository,
};

use super::sizing::{recommended_quantity, SYSTEM_USER};
use super::snapshot::{build_llm_ensemble, SnapshotContext, SnapshotWriter};

/// Who asked for the generation run. The synthetic `system` user never
/// gets sized positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationContext {
    pub user: String,
}

impl GenerationContext {
    pub fn system() -> Self {
        Self {
            user: SYSTEM_USER.to_string(),
        }
    }

    pub fn for_user(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    pub fn is_system(&self) -> bool {
        self.user == SYSTEM_USER
    }
}

/// Refresh rule: direction shifted, or the estimated confidence moved more
/// than `delta` from the stored row. The estimator is intentionally the
/// simplified `0.6 × consensus + 0.4 × avg_confidence` mix.
pub fn should_refresh(
    existing: &Prediction,
    evaluation: &ThresholdEvaluation,
    delta: f64,
) -> bool {
    let new_direction = evaluation.dominant_direction.to_trend();
    if new_direction != existing.direction {
        return true;
    }
    let estimated = 0.6 * evaluation.direction_consensus + 0.4 * evaluation.avg_confidence;
    (existing.confidence - estimated).abs() > delta
}

/// Flat-only filter: analysts whose user AND ai forks are both neutral are
/// dropped; the survivors carry the prediction.
pub fn eligible_analysts(forks: &ThreeWayForkResult) -> Vec<String> {
    let mut slugs: BTreeSet<String> = BTreeSet::new();
    for result in [&forks.user, &forks.ai, &forks.arbitrator] {
        for assessment in &result.assessments {
            slugs.insert(assessment.analyst.clone());
        }
    }

    slugs
        .into_iter()
        .filter(|slug| {
            let user_dir = forks
                .user
                .assessment_for(slug)
                .map(|a| a.direction)
                .unwrap_or(Direction::Neutral);
            let ai_dir = forks
                .ai
                .assessment_for(slug)
                .map(|a| a.direction)
                .unwrap_or(Direction::Neutral);
            !(user_dir.is_neutral() && ai_dir.is_neutral())
        })
        .collect()
}

/// Context string handed to the three-way ensemble: the active predictors,
/// the threshold verdict and the latest market snapshot when available.
pub fn build_generation_context(
    predictors: &[Predictor],
    evaluation: &ThresholdEvaluation,
    market: Option<&TargetSnapshot>,
) -> String {
    let mut out = format!("Active predictors ({}):\n", predictors.len());
    for p in predictors {
        out.push_str(&format!(
            "- {} strength {} confidence {:.2} ({}): {}\n",
            p.direction, p.strength, p.confidence, p.analyst_slug, p.reasoning
        ));
    }
    out.push_str(&format!(
        "\nThreshold: combined strength {:.0}, dominant {} with consensus {:.2}, avg confidence {:.2}\n",
        evaluation.combined_strength,
        evaluation.dominant_direction,
        evaluation.direction_consensus,
        evaluation.avg_confidence
    ));
    if let Some(snapshot) = market {
        out.push_str(&format!("\nMarket: {}\n", snapshot.summary_line()));
    }
    out
}

fn assessment_digest(assessment: &Assessment) -> Value {
    json!({
        "direction": assessment.direction,
        "confidence": assessment.confidence,
        "reasoning": assessment.reasoning,
        "is_paper_only": assessment.is_paper_only,
        "used_fallback": assessment.used_fallback,
    })
}

fn analyst_breakdown(forks: &ThreeWayForkResult, eligible: &[String]) -> Value {
    let rows: Vec<Value> = eligible
        .iter()
        .map(|slug| {
            let mut row = Map::new();
            row.insert("analyst".into(), json!(slug));
            for (name, result) in [
                ("user", &forks.user),
                ("ai", &forks.ai),
                ("arbitrator", &forks.arbitrator),
            ] {
                if let Some(assessment) = result.assessment_for(slug) {
                    row.insert(name.into(), assessment_digest(assessment));
                }
            }
            Value::Object(row)
        })
        .collect();
    Value::Array(rows)
}

fn base_analyst_ensemble(
    evaluation: &ThresholdEvaluation,
    forks: &ThreeWayForkResult,
    eligible: &[String],
) -> Map<String, Value> {
    let mut ensemble = Map::new();
    ensemble.insert("predictor_count".into(), json!(evaluation.active_count));
    ensemble.insert(
        "combined_strength".into(),
        json!(evaluation.combined_strength),
    );
    ensemble.insert(
        "direction_consensus".into(),
        json!(evaluation.direction_consensus),
    );
    ensemble.insert("avg_confidence".into(), json!(evaluation.avg_confidence));
    ensemble.insert(
        "fork_agreement".into(),
        serde_json::to_value(&forks.metadata).unwrap_or(Value::Null),
    );
    ensemble.insert("analysts".into(), analyst_breakdown(forks, eligible));
    ensemble.insert("versions".into(), json!([]));
    ensemble
}

/// Tier-3 generator.
pub struct PredictionGenerator {
    targets: Arc<dyn TargetRepository>,
    predictions: Arc<dyn PredictionRepository>,
    pool: Arc<PredictorPool>,
    engine: Arc<EnsembleEngine>,
    registry: Arc<AnalystRegistry>,
    snapshot_writer: SnapshotWriter,
    target_snapshots: Arc<dyn TargetSnapshotRepository>,
    price_source: Arc<dyn PriceSource>,
    positions: Option<Arc<dyn PositionsPort>>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: GenerationConfig,
    threshold_config: ThresholdConfig,
    ensemble_options: EnsembleOptions,
}

impl PredictionGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        targets: Arc<dyn TargetRepository>,
        predictions: Arc<dyn PredictionRepository>,
        pool: Arc<PredictorPool>,
        engine: Arc<EnsembleEngine>,
        registry: Arc<AnalystRegistry>,
        snapshot_writer: SnapshotWriter,
        target_snapshots: Arc<dyn TargetSnapshotRepository>,
        price_source: Arc<dyn PriceSource>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: GenerationConfig,
        threshold_config: ThresholdConfig,
        ensemble_options: EnsembleOptions,
    ) -> Self {
        Self {
            targets,
            predictions,
            pool,
            engine,
            registry,
            snapshot_writer,
            target_snapshots,
            price_source,
            positions: None,
            events,
            clock,
            config,
            threshold_config,
            ensemble_options,
        }
    }

    /// Attach the external positions collaborator.
    pub fn with_positions(mut self, positions: Arc<dyn PositionsPort>) -> Self {
        self.positions = Some(positions);
        self
    }

    fn query_options(target: &Target) -> PredictionQueryOptions {
        if target.is_test() {
            PredictionQueryOptions::new().test_data_only()
        } else {
            PredictionQueryOptions::new()
        }
    }

    /// Attempt generation for a target.
    ///
    /// Returns the active arbitrator row (fresh, refreshed or unchanged),
    /// or `None` when the threshold is unmet or the flat-only filter
    /// suppressed the run. The evaluate → consume → create transition is
    /// serialized per target.
    pub async fn attempt_prediction_generation(
        &self,
        ctx: &GenerationContext,
        target_id: &str,
        config: Option<&ThresholdConfig>,
    ) -> Result<Option<Prediction>> {
        let target = self.targets.find_by_id(target_id).await?;
        let threshold_config = config.unwrap_or(&self.threshold_config);

        let lock = self.pool.target_lock(target_id);
        let _guard = lock.lock().await;

        let active = self
            .predictions
            .find_by_target(
                target_id,
                Some(PredictionStatus::Active),
                &Self::query_options(&target),
            )
            .await?;

        if let Some(existing) = active.iter().find(|p| p.is_arbitrator) {
            let evaluation = self
                .pool
                .evaluate_threshold(target_id, Some(threshold_config))
                .await?;
            if !evaluation.meets_threshold {
                debug!(target_id, "threshold unmet, keeping existing prediction");
                return Ok(Some(existing.clone()));
            }
            if should_refresh(existing, &evaluation, self.config.refresh_confidence_delta) {
                return self
                    .refresh_prediction(&target, existing, &evaluation)
                    .await
                    .map(Some);
            }
            debug!(target_id, prediction = %existing.id, "no material shift, prediction unchanged");
            return Ok(Some(existing.clone()));
        }

        let evaluation = self
            .pool
            .evaluate_threshold(target_id, Some(threshold_config))
            .await?;
        if !evaluation.meets_threshold {
            return Ok(None);
        }

        self.generate_fresh(ctx, &target, &evaluation, threshold_config)
            .await
    }

    async fn run_forks(
        &self,
        target: &Target,
        predictors: &[Predictor],
        evaluation: &ThresholdEvaluation,
    ) -> Result<ThreeWayForkResult> {
        let market = self.target_snapshots.latest(&target.id).await?;
        let context = build_generation_context(predictors, evaluation, market.as_ref());
        let input = EnsembleInput::new(target.id.clone(), context)
            .with_direction(evaluation.dominant_direction);
        self.engine
            .run_three_way_fork_ensemble(target, &input, &self.ensemble_options, "tier3.generate")
            .await
    }

    async fn entry_price(&self, target: &Target) -> Result<Option<f64>> {
        if let Some(snapshot) = self.target_snapshots.latest(&target.id).await? {
            return Ok(Some(snapshot.price));
        }
        self.price_source
            .latest_price(target.production_symbol(), &target.universe_id)
            .await
    }

    fn timeframe_hours(&self, predictors: &[Predictor], now: DateTime<Utc>) -> i64 {
        predictors
            .iter()
            .map(|p| {
                let minutes = (p.expires_at - now).num_minutes();
                ((minutes as f64 / 60.0).round() as i64).max(1)
            })
            .min()
            .unwrap_or(self.config.default_timeframe_hours)
    }

    async fn capture_context_versions(
        &self,
        target: &Target,
    ) -> Result<crate::domain::ContextVersionIds> {
        let analysts = self.registry.get_active_analysts(&target.id).await?;
        let versions = self
            .registry
            .get_all_current_context_versions(ForkType::User)
            .await?;
        let mut ids = crate::domain::ContextVersionIds::default();
        for analyst in &analysts {
            if let Some(version) = versions.get(&analyst.id) {
                ids.analysts.insert(analyst.slug.clone(), version.id.clone());
            }
        }
        Ok(ids)
    }

    async fn generate_fresh(
        &self,
        ctx: &GenerationContext,
        target: &Target,
        evaluation: &ThresholdEvaluation,
        threshold_config: &ThresholdConfig,
    ) -> Result<Option<Prediction>> {
        let mut timeline = vec![TimelineEvent {
            timestamp: evaluation.evaluated_at,
            event_type: "threshold_evaluated".to_string(),
            details: format!(
                "strength {:.0}, consensus {:.2}",
                evaluation.combined_strength, evaluation.direction_consensus
            ),
        }];

        let predictors = self.pool.get_active_predictors(&target.id).await?;
        let forks = self.run_forks(target, &predictors, evaluation).await?;
        timeline.push(TimelineEvent {
            timestamp: self.clock.now(),
            event_type: "ensemble_completed".to_string(),
            details: format!(
                "{} assessments across three forks",
                forks.user.assessments.len()
                    + forks.ai.assessments.len()
                    + forks.arbitrator.assessments.len()
            ),
        });

        let eligible = eligible_analysts(&forks);
        if eligible.is_empty() {
            info!(target = %target.id, "all analysts flat on user and ai forks, no prediction");
            return Ok(None);
        }

        let now = self.clock.now();
        let timeframe_hours = self.timeframe_hours(&predictors, now);
        let context_versions = self.capture_context_versions(target).await?;
        let llm_ensemble = build_llm_ensemble(
            &forks
                .user
                .assessments
                .iter()
                .chain(forks.ai.assessments.iter())
                .chain(forks.arbitrator.assessments.iter())
                .cloned()
                .collect::<Vec<_>>(),
        );

        // Arbitrator row: canonical. Confidence is the max among arbitrator
        // assessments agreeing with the dominant direction, falling back to
        // the fork's aggregated confidence.
        let direction = evaluation.dominant_direction.to_trend();
        let agreeing_max = forks
            .arbitrator
            .assessments
            .iter()
            .filter(|a| !a.is_paper_only && a.direction == evaluation.dominant_direction)
            .map(|a| a.confidence)
            .fold(f64::NAN, f64::max);
        let confidence = if agreeing_max.is_nan() {
            forks.arbitrator.aggregated.confidence
        } else {
            agreeing_max
        };
        let magnitude_percent = confidence * 5.0;

        let reasoning = self.compose_arbitrator_reasoning(evaluation, &forks, &eligible);
        let mut primary = Prediction::new(
            target.id.clone(),
            ARBITRATOR_SLUG,
            direction,
            Magnitude::from_percent(magnitude_percent),
            confidence,
            timeframe_hours,
            reasoning,
            now,
        )
        .with_analyst_ensemble(Value::Object(base_analyst_ensemble(
            evaluation, &forks, &eligible,
        )))
        .with_llm_ensemble(llm_ensemble)
        .with_context_versions(context_versions.clone());
        primary.is_test = target.is_test();

        match self.predictions.create(&primary).await {
            Ok(()) => {}
            Err(Error::Conflict(_)) => {
                // A concurrent attempt won; observe its row.
                let winners = self
                    .predictions
                    .find_by_target(
                        &target.id,
                        Some(PredictionStatus::Active),
                        &Self::query_options(target),
                    )
                    .await?;
                return Ok(winners.into_iter().find(|p| p.is_arbitrator));
            }
            Err(error) => return Err(error),
        }
        timeline.push(TimelineEvent {
            timestamp: now,
            event_type: "prediction_created".to_string(),
            details: primary.id.clone(),
        });

        // Per-analyst rows. Failures are logged and never block siblings.
        let entry_price = self.entry_price(target).await?;
        for slug in &eligible {
            if let Err(error) = self
                .create_analyst_row(
                    ctx,
                    target,
                    &forks,
                    slug,
                    timeframe_hours,
                    entry_price,
                    &context_versions,
                    &primary,
                )
                .await
            {
                warn!(target = %target.id, analyst = %slug, %error, "per-analyst row failed");
            }
        }

        let consumed = self.pool.consume_predictors(&target.id, &primary.id).await?;
        timeline.push(TimelineEvent {
            timestamp: self.clock.now(),
            event_type: "predictors_consumed".to_string(),
            details: format!("{consumed} predictors"),
        });

        // The snapshot failing is the one fatal outcome for this tier.
        self.snapshot_writer
            .write(SnapshotContext {
                prediction: &primary,
                predictors: &predictors,
                threshold: evaluation,
                threshold_config,
                forks: &forks,
                timeline,
            })
            .await?;

        self.request_positions(ctx, target, &forks, &eligible, &primary, entry_price)
            .await;

        self.events
            .emit(
                PipelineEventType::PredictionCreated,
                &target.id,
                "tier3.generate",
                format!(
                    "{} prediction for {} ({} predictors consumed)",
                    primary.direction, target.symbol, consumed
                ),
                json!({
                    "prediction_id": primary.id,
                    "direction": primary.direction,
                    "confidence": primary.confidence,
                    "magnitude": primary.magnitude,
                    "timeframe_hours": primary.timeframe_hours,
                    "predictor_count": evaluation.active_count,
                }),
            )
            .await;

        Ok(Some(primary))
    }

    fn compose_arbitrator_reasoning(
        &self,
        evaluation: &ThresholdEvaluation,
        forks: &ThreeWayForkResult,
        eligible: &[String],
    ) -> String {
        let mut out = format!(
            "Consensus {} from {} active predictors (combined strength {:.0}, consensus {:.2}).",
            evaluation.dominant_direction,
            evaluation.active_count,
            evaluation.combined_strength,
            evaluation.direction_consensus
        );
        for slug in eligible {
            if let Some(assessment) = forks.arbitrator.assessment_for(slug) {
                out.push_str(&format!(
                    "\n{}: {} ({:.2}) - {}",
                    slug, assessment.direction, assessment.confidence, assessment.reasoning
                ));
            }
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_analyst_row(
        &self,
        ctx: &GenerationContext,
        target: &Target,
        forks: &ThreeWayForkResult,
        slug: &str,
        timeframe_hours: i64,
        entry_price: Option<f64>,
        context_versions: &crate::domain::ContextVersionIds,
        primary: &Prediction,
    ) -> Result<()> {
        // The arbitrator-fork assessment is the analyst's authoritative
        // verdict; user then ai stand in when it is missing.
        let assessment = forks
            .arbitrator
            .assessment_for(slug)
            .or_else(|| forks.user.assessment_for(slug))
            .or_else(|| forks.ai.assessment_for(slug))
            .ok_or_else(|| Error::Internal(format!("no assessment for analyst {slug}")))?;

        let direction = assessment.direction.to_trend();
        let confidence = assessment.confidence;
        let magnitude_percent = confidence * 5.0;
        let sizing = recommended_quantity(
            target,
            &ctx.user,
            self.config.portfolio_balance,
            entry_price,
            confidence,
            magnitude_percent,
        );

        let mut ensemble = Map::new();
        ensemble.insert("primary_prediction_id".into(), json!(primary.id));
        for (name, result) in [
            ("user", &forks.user),
            ("ai", &forks.ai),
            ("arbitrator", &forks.arbitrator),
        ] {
            if let Some(a) = result.assessment_for(slug) {
                ensemble.insert(name.into(), assessment_digest(a));
            }
        }
        ensemble.insert(
            "recommended_quantity".into(),
            json!(sizing.quantity),
        );
        if let Some(reason) = &sizing.reason {
            ensemble.insert("sizing_reason".into(), json!(reason));
        }

        let mut row = Prediction::new(
            target.id.clone(),
            slug.to_string(),
            direction,
            Magnitude::from_percent(magnitude_percent),
            confidence,
            timeframe_hours,
            assessment.reasoning.clone(),
            self.clock.now(),
        )
        .with_analyst_ensemble(Value::Object(ensemble))
        .with_context_versions(context_versions.clone());
        row.is_test = target.is_test();

        match self.predictions.create(&row).await {
            Ok(()) => Ok(()),
            // An active row for this analyst already exists: idempotent.
            Err(Error::Conflict(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Request positions for every (analyst × fork) with a non-flat
    /// direction. Skipped silently when no entry price is available.
    async fn request_positions(
        &self,
        ctx: &GenerationContext,
        target: &Target,
        forks: &ThreeWayForkResult,
        eligible: &[String],
        primary: &Prediction,
        entry_price: Option<f64>,
    ) {
        let Some(positions) = &self.positions else {
            return;
        };
        let Some(entry) = entry_price else {
            debug!(target = %target.id, "entry price unavailable, skipping positions");
            return;
        };

        let mut requested = 0usize;
        for (fork, result) in [
            (ForkType::User, &forks.user),
            (ForkType::Ai, &forks.ai),
            (ForkType::Arbitrator, &forks.arbitrator),
        ] {
            for assessment in &result.assessments {
                if assessment.is_paper_only
                    || assessment.direction.is_neutral()
                    || !eligible.contains(&assessment.analyst)
                {
                    continue;
                }
                let sizing = recommended_quantity(
                    target,
                    &ctx.user,
                    self.config.portfolio_balance,
                    Some(entry),
                    assessment.confidence,
                    assessment.confidence * 5.0,
                );
                let request = PositionRequest {
                    target_id: target.id.clone(),
                    prediction_id: primary.id.clone(),
                    analyst_slug: assessment.analyst.clone(),
                    fork,
                    direction: assessment.direction.to_trend(),
                    quantity: sizing.quantity,
                    entry_price: entry,
                };
                if let Err(error) = positions.create_position(request).await {
                    warn!(target = %target.id, analyst = %assessment.analyst, %error, "position request failed");
                } else {
                    requested += 1;
                }
            }
        }

        if requested > 0 {
            self.events
                .emit(
                    PipelineEventType::PositionsCreated,
                    &target.id,
                    "tier3.positions",
                    format!("{requested} positions requested"),
                    json!({
                        "prediction_id": primary.id,
                        "count": requested,
                        "entry_price": entry,
                    }),
                )
                .await;
        }
    }

    /// Refresh an existing arbitrator row in place. Predictors are NOT
    /// consumed on refresh.
    async fn refresh_prediction(
        &self,
        target: &Target,
        existing: &Prediction,
        evaluation: &ThresholdEvaluation,
    ) -> Result<Prediction> {
        let predictors = self.pool.get_active_predictors(&target.id).await?;
        let forks = self.run_forks(target, &predictors, evaluation).await?;
        let eligible = eligible_analysts(&forks);

        let now = self.clock.now();
        let direction = evaluation.dominant_direction.to_trend();
        let confidence =
            0.6 * evaluation.direction_consensus + 0.4 * evaluation.avg_confidence;
        let magnitude = Magnitude::from_percent(confidence * 5.0);
        let reasoning = self.compose_arbitrator_reasoning(evaluation, &forks, &eligible);

        // Version history entry captures the superseded values.
        let version_entry = json!({
            "timestamp": existing.updated_at,
            "direction": existing.direction,
            "confidence": existing.confidence,
            "magnitude": existing.magnitude,
            "predictor_count": existing.ensemble_f64("predictor_count").unwrap_or(0.0),
        });

        let mut ensemble = base_analyst_ensemble(evaluation, &forks, &eligible);
        let mut versions = existing
            .analyst_ensemble
            .get("versions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        versions.push(version_entry);
        ensemble.insert("versions".into(), Value::Array(versions));
        ensemble.insert("last_refresh".into(), json!(now));

        let patch = PredictionPatch::new()
            .direction(direction)
            .magnitude(magnitude)
            .confidence(confidence)
            .reasoning(reasoning)
            .updated_at(now);
        self.predictions.update(&existing.id, &patch).await?;
        self.predictions
            .update_analyst_ensemble(&existing.id, &Value::Object(ensemble))
            .await?;

        self.events
            .emit(
                PipelineEventType::PredictionRefreshed,
                &target.id,
                "tier3.refresh",
                format!(
                    "prediction {} refreshed to {} (confidence {:.2})",
                    existing.id, direction, confidence
                ),
                json!({
                    "prediction_id": existing.id,
                    "previous_direction": existing.direction,
                    "direction": direction,
                    "confidence": confidence,
                }),
            )
            .await;

        info!(
            target = %target.id,
            prediction = %existing.id,
            %direction,
            "refreshed prediction in place"
        );
        self.predictions.find_by_id(&existing.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TrendDirection;
    use crate::ensemble::{AggregatedOutcome, EnsembleResult, ForkAgreement};
    use crate::llm::{ModelTier, ProviderKind};
    use chrono::TimeZone;

    fn evaluation(direction: Direction, consensus: f64, avg_confidence: f64) -> ThresholdEvaluation {
        ThresholdEvaluation {
            meets_threshold: true,
            active_count: 3,
            combined_strength: 19.0,
            dominant_direction: direction,
            direction_consensus: consensus,
            avg_confidence,
            bullish_weight: 0.0,
            bearish_weight: 0.0,
            neutral_weight: 0.0,
            evaluated_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    fn prediction(direction: TrendDirection, confidence: f64) -> Prediction {
        Prediction::new(
            "t-1",
            ARBITRATOR_SLUG,
            direction,
            Magnitude::Medium,
            confidence,
            24,
            "r",
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_should_refresh_on_direction_change() {
        let existing = prediction(TrendDirection::Up, 0.72);
        // Estimator matches stored confidence, but the direction flipped.
        assert!(should_refresh(&existing, &evaluation(Direction::Bearish, 0.8, 0.6), 0.15));
    }

    #[test]
    fn test_should_refresh_on_confidence_shift() {
        let existing = prediction(TrendDirection::Up, 0.72);
        // 0.6×0.75 + 0.4×0.7 = 0.73: inside the 0.15 band, no refresh.
        assert!(!should_refresh(&existing, &evaluation(Direction::Bullish, 0.75, 0.7), 0.15));
        // 0.6×0.95 + 0.4×0.9 = 0.93: |0.72 − 0.93| > 0.15.
        assert!(should_refresh(&existing, &evaluation(Direction::Bullish, 0.95, 0.9), 0.15));
    }

    fn assessment(slug: &str, fork: ForkType, direction: Direction) -> Assessment {
        Assessment {
            analyst: slug.to_string(),
            tier: ModelTier::Silver,
            direction,
            confidence: 0.7,
            reasoning: "r".to_string(),
            key_factors: Vec::new(),
            risks: Vec::new(),
            learnings_applied: Vec::new(),
            fork_type: fork,
            context_version_id: None,
            is_paper_only: false,
            effective_weight: 1.0,
            provider: ProviderKind::Local,
            model: "m".to_string(),
            used_fallback: false,
        }
    }

    fn fork_result(assessments: Vec<Assessment>) -> EnsembleResult {
        EnsembleResult {
            target_id: "t-1".to_string(),
            assessments,
            aggregated: AggregatedOutcome::empty(),
            errors: Vec::new(),
        }
    }

    fn three_way(
        user: Vec<Assessment>,
        ai: Vec<Assessment>,
        arbitrator: Vec<Assessment>,
    ) -> ThreeWayForkResult {
        ThreeWayForkResult {
            user: fork_result(user),
            ai: fork_result(ai),
            arbitrator: fork_result(arbitrator),
            metadata: ForkAgreement {
                user_vs_ai_agreement: 0.0,
                arbitrator_agrees_with_user: 0.0,
                arbitrator_agrees_with_ai: 0.0,
            },
        }
    }

    #[test]
    fn test_flat_only_filter_drops_double_neutral_analysts() {
        let forks = three_way(
            vec![
                assessment("tech", ForkType::User, Direction::Neutral),
                assessment("macro", ForkType::User, Direction::Bullish),
            ],
            vec![
                assessment("tech", ForkType::Ai, Direction::Neutral),
                assessment("macro", ForkType::Ai, Direction::Neutral),
            ],
            vec![
                assessment("tech", ForkType::Arbitrator, Direction::Bullish),
                assessment("macro", ForkType::Arbitrator, Direction::Bullish),
            ],
        );
        // tech is neutral on BOTH user and ai forks: dropped even though its
        // arbitrator fork leans bullish. macro survives via its user fork.
        assert_eq!(eligible_analysts(&forks), vec!["macro".to_string()]);
    }

    #[test]
    fn test_flat_only_filter_empty_when_everyone_flat() {
        let forks = three_way(
            vec![assessment("tech", ForkType::User, Direction::Neutral)],
            vec![assessment("tech", ForkType::Ai, Direction::Neutral)],
            vec![assessment("tech", ForkType::Arbitrator, Direction::Bullish)],
        );
        assert!(eligible_analysts(&forks).is_empty());
    }

    #[test]
    fn test_generation_context_mentions_everything() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let predictors = vec![Predictor::new(
            "t-1", "a-1", "tech", Direction::Bullish, 8, 0.8, "breakout", now, 48,
        )];
        let market = TargetSnapshot::new("t-1", 187.5, now).with_change_24h(2.1);
        let context =
            build_generation_context(&predictors, &evaluation(Direction::Bullish, 0.75, 0.72), Some(&market));

        assert!(context.contains("Active predictors (1):"));
        assert!(context.contains("bullish strength 8 confidence 0.80 (tech): breakout"));
        assert!(context.contains("dominant bullish with consensus 0.75"));
        assert!(context.contains("Market: price 187.5000"));
    }
}
