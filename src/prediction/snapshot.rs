//! Snapshot writer: assembles the immutable audit record for a prediction.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::ThresholdConfig;
use crate::domain::{
    Direction, Prediction, PredictionSnapshot, Predictor, PredictorCapture, TimelineEvent,
};
use crate::ensemble::{Assessment, ThreeWayForkResult};
use crate::error::Result;
use crate::pool::ThresholdEvaluation;
use crate::repo::SnapshotRepository;

/// Per-tier LLM usage summary: `{tiers_used, tier_results, agreement_level}`.
///
/// Each tier's result is the majority direction, mean confidence and the
/// model/provider that served it; agreement is the fraction of voting
/// assessments matching the modal direction.
pub fn build_llm_ensemble(assessments: &[Assessment]) -> Value {
    let voting: Vec<&Assessment> = assessments.iter().filter(|a| !a.is_paper_only).collect();
    if voting.is_empty() {
        return json!({
            "tiers_used": [],
            "tier_results": {},
            "agreement_level": 0.0,
        });
    }

    let mut by_tier: BTreeMap<String, Vec<&Assessment>> = BTreeMap::new();
    for assessment in &voting {
        by_tier
            .entry(assessment.tier.to_string())
            .or_default()
            .push(assessment);
    }

    let mut tier_results = serde_json::Map::new();
    for (tier, rows) in &by_tier {
        let direction = modal_direction(rows);
        let confidence =
            rows.iter().map(|a| a.confidence).sum::<f64>() / rows.len() as f64;
        tier_results.insert(
            tier.clone(),
            json!({
                "direction": direction,
                "confidence": confidence,
                "model": rows[0].model,
                "provider": rows[0].provider,
            }),
        );
    }

    let modal = modal_direction(&voting);
    let agreement = voting.iter().filter(|a| a.direction == modal).count() as f64
        / voting.len() as f64;

    json!({
        "tiers_used": by_tier.keys().collect::<Vec<_>>(),
        "tier_results": Value::Object(tier_results),
        "agreement_level": agreement,
    })
}

fn modal_direction(rows: &[&Assessment]) -> Direction {
    let mut counts = [(Direction::Bullish, 0usize), (Direction::Bearish, 0), (Direction::Neutral, 0)];
    for row in rows {
        for entry in counts.iter_mut() {
            if entry.0 == row.direction {
                entry.1 += 1;
            }
        }
    }
    let mut modal = Direction::Neutral;
    let mut best = 0usize;
    for (direction, count) in counts {
        if count > best {
            modal = direction;
            best = count;
        }
    }
    modal
}

/// Everything the writer captures for one prediction.
pub struct SnapshotContext<'a> {
    pub prediction: &'a Prediction,
    pub predictors: &'a [Predictor],
    pub threshold: &'a ThresholdEvaluation,
    pub threshold_config: &'a ThresholdConfig,
    pub forks: &'a ThreeWayForkResult,
    pub timeline: Vec<TimelineEvent>,
}

/// Writes the one-to-one immutable audit record.
pub struct SnapshotWriter {
    snapshots: Arc<dyn SnapshotRepository>,
    clock: Arc<dyn Clock>,
}

impl SnapshotWriter {
    pub fn new(snapshots: Arc<dyn SnapshotRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { snapshots, clock }
    }

    /// Assemble and persist the snapshot. Write-once: a second write for
    /// the same prediction fails with a conflict.
    pub async fn write(&self, ctx: SnapshotContext<'_>) -> Result<PredictionSnapshot> {
        let all_assessments: Vec<&Assessment> = ctx
            .forks
            .user
            .assessments
            .iter()
            .chain(ctx.forks.ai.assessments.iter())
            .chain(ctx.forks.arbitrator.assessments.iter())
            .collect();

        let mut learnings: Vec<String> = all_assessments
            .iter()
            .flat_map(|a| a.learnings_applied.iter().cloned())
            .collect();
        learnings.sort();
        learnings.dedup();

        let owned: Vec<Assessment> = all_assessments.iter().map(|a| (*a).clone()).collect();

        let mut snapshot = PredictionSnapshot::new(
            ctx.prediction.id.clone(),
            self.clock.now(),
        );
        snapshot.predictors = ctx
            .predictors
            .iter()
            .map(|p| PredictorCapture {
                id: p.id.clone(),
                content: p.reasoning.clone(),
                direction: p.direction,
                strength: p.strength,
                confidence: p.confidence,
                analyst_slug: p.analyst_slug.clone(),
                created_at: p.created_at,
            })
            .collect();
        snapshot.analyst_assessments = serde_json::to_value(&owned)?;
        snapshot.llm_ensemble = build_llm_ensemble(&owned);
        snapshot.learnings_applied = learnings;
        snapshot.threshold_evaluation = ctx.threshold.audit_record(ctx.threshold_config);
        snapshot.timeline = ctx.timeline;

        self.snapshots.create(&snapshot).await?;
        Ok(snapshot)
    }
}
