//! Configuration recognized by the pipeline core.
//!
//! Every knob the spec names lives here, grouped by the tier that consumes
//! it, with builder-style setters and strategy presets.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::analysts::ForkType;
use crate::llm::ModelTier;
use crate::resilience::RetryConfig;

/// How per-analyst assessments combine into one ensemble outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    WeightedMajority,
    WeightedAverage,
    /// Majority when its consensus is strong, average otherwise.
    WeightedEnsemble,
}

impl Default for AggregationMethod {
    fn default() -> Self {
        Self::WeightedEnsemble
    }
}

/// Tier gate override for ensemble runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierPreference {
    Bronze,
    Silver,
    Gold,
    Platinum,
    /// Use each analyst's own tier.
    Ensemble,
}

impl Default for TierPreference {
    fn default() -> Self {
        Self::Ensemble
    }
}

impl TierPreference {
    /// Tier to use for an analyst whose own tier is `own`.
    pub fn tier_for(&self, own: ModelTier) -> ModelTier {
        match self {
            Self::Bronze => ModelTier::Bronze,
            Self::Silver => ModelTier::Silver,
            Self::Gold => ModelTier::Gold,
            Self::Platinum => ModelTier::Platinum,
            Self::Ensemble => own,
        }
    }
}

/// Tier-2 threshold configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub min_predictors: usize,
    pub min_combined_strength: f64,
    pub min_direction_consensus: f64,
    pub predictor_ttl_hours: i64,
    /// Exponential decay per hour for consensus weighting; 0 = uniform.
    pub time_decay_rate: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl ThresholdConfig {
    /// Balanced strategy defaults.
    pub fn balanced() -> Self {
        Self {
            min_predictors: 3,
            min_combined_strength: 15.0,
            min_direction_consensus: 0.6,
            predictor_ttl_hours: 48,
            time_decay_rate: 0.05,
        }
    }

    /// Demands a broader, fresher pool before predicting.
    pub fn conservative() -> Self {
        Self {
            min_predictors: 5,
            min_combined_strength: 25.0,
            min_direction_consensus: 0.7,
            predictor_ttl_hours: 24,
            time_decay_rate: 0.1,
        }
    }

    /// Fires earlier on thinner evidence.
    pub fn aggressive() -> Self {
        Self {
            min_predictors: 2,
            min_combined_strength: 10.0,
            min_direction_consensus: 0.55,
            predictor_ttl_hours: 72,
            time_decay_rate: 0.02,
        }
    }

    pub fn with_min_predictors(mut self, n: usize) -> Self {
        self.min_predictors = n;
        self
    }

    pub fn with_min_combined_strength(mut self, strength: f64) -> Self {
        self.min_combined_strength = strength;
        self
    }

    pub fn with_min_direction_consensus(mut self, consensus: f64) -> Self {
        self.min_direction_consensus = consensus;
        self
    }

    pub fn with_predictor_ttl_hours(mut self, hours: i64) -> Self {
        self.predictor_ttl_hours = hours;
        self
    }

    pub fn with_time_decay_rate(mut self, rate: f64) -> Self {
        self.time_decay_rate = rate;
        self
    }
}

/// Ensemble run options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleOptions {
    pub aggregation_method: AggregationMethod,
    pub tier_preference: TierPreference,
    /// Per-slug weight overrides applied before the motivation rule.
    #[serde(default)]
    pub analyst_weights: HashMap<String, f64>,
    /// Run user + ai forks even on single-fork entry points.
    pub enable_dual_fork: bool,
    /// Forks to run when not using the three-way entry point.
    pub fork_types: Vec<ForkType>,
    /// Bounded fan-out width across analyst × fork jobs.
    pub max_parallel: usize,
}

impl Default for EnsembleOptions {
    fn default() -> Self {
        Self {
            aggregation_method: AggregationMethod::default(),
            tier_preference: TierPreference::default(),
            analyst_weights: HashMap::new(),
            enable_dual_fork: false,
            fork_types: vec![ForkType::User],
            max_parallel: 5,
        }
    }
}

impl EnsembleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aggregation_method(mut self, method: AggregationMethod) -> Self {
        self.aggregation_method = method;
        self
    }

    pub fn with_tier_preference(mut self, preference: TierPreference) -> Self {
        self.tier_preference = preference;
        self
    }

    pub fn with_analyst_weight(mut self, slug: impl Into<String>, weight: f64) -> Self {
        self.analyst_weights.insert(slug.into(), weight);
        self
    }

    pub fn with_dual_fork(mut self, enabled: bool) -> Self {
        self.enable_dual_fork = enabled;
        if enabled {
            self.fork_types = vec![ForkType::User, ForkType::Ai];
        }
        self
    }

    pub fn with_fork_types(mut self, forks: Vec<ForkType>) -> Self {
        self.fork_types = forks;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    /// Effective weight for an analyst slug before the motivation rule.
    pub fn weight_for(&self, slug: &str, default_weight: f64) -> f64 {
        self.analyst_weights.get(slug).copied().unwrap_or(default_weight)
    }
}

/// Tier-1 ingestion options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Minimum aggregated confidence to create a predictor.
    pub min_confidence: f64,
    /// Minimum consensus strength to create a predictor.
    pub min_consensus: f64,
    /// Article fetch cap when neither caller nor subscription sets one.
    pub default_limit: usize,
    pub predictor_ttl_hours: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_consensus: 0.5,
            default_limit: 25,
            predictor_ttl_hours: 48,
        }
    }
}

impl IngestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = confidence;
        self
    }

    pub fn with_min_consensus(mut self, consensus: f64) -> Self {
        self.min_consensus = consensus;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    pub fn with_predictor_ttl_hours(mut self, hours: i64) -> Self {
        self.predictor_ttl_hours = hours;
        self
    }
}

/// Tier-3 generation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Confidence shift that triggers a refresh.
    pub refresh_confidence_delta: f64,
    /// Horizon when no predictor expiry bounds it.
    pub default_timeframe_hours: i64,
    /// Portfolio balance used for position sizing, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_balance: Option<f64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            refresh_confidence_delta: 0.15,
            default_timeframe_hours: 24,
            portfolio_balance: None,
        }
    }
}

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refresh_confidence_delta(mut self, delta: f64) -> Self {
        self.refresh_confidence_delta = delta;
        self
    }

    pub fn with_default_timeframe_hours(mut self, hours: i64) -> Self {
        self.default_timeframe_hours = hours.max(1);
        self
    }

    pub fn with_portfolio_balance(mut self, balance: f64) -> Self {
        self.portfolio_balance = Some(balance);
        self
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub threshold: ThresholdConfig,
    pub ensemble: EnsembleOptions,
    pub ingest: IngestConfig,
    pub generation: GenerationConfig,
    pub retry: RetryConfig,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: ThresholdConfig) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_ensemble(mut self, ensemble: EnsembleOptions) -> Self {
        self.ensemble = ensemble;
        self
    }

    pub fn with_ingest(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_defaults() {
        let config = ThresholdConfig::default();
        assert_eq!(config.min_predictors, 3);
        assert_eq!(config.min_combined_strength, 15.0);
        assert_eq!(config.min_direction_consensus, 0.6);
        assert_eq!(config.predictor_ttl_hours, 48);
        assert_eq!(config.time_decay_rate, 0.05);
    }

    #[test]
    fn test_tier_preference_gate() {
        assert_eq!(TierPreference::Ensemble.tier_for(ModelTier::Gold), ModelTier::Gold);
        assert_eq!(TierPreference::Bronze.tier_for(ModelTier::Gold), ModelTier::Bronze);
        assert_eq!(TierPreference::Platinum.tier_for(ModelTier::Bronze), ModelTier::Platinum);
    }

    #[test]
    fn test_weight_override() {
        let options = EnsembleOptions::new().with_analyst_weight("macro-analyst", 2.0);
        assert_eq!(options.weight_for("macro-analyst", 1.0), 2.0);
        assert_eq!(options.weight_for("technical-analyst", 1.3), 1.3);
    }

    #[test]
    fn test_dual_fork_sets_fork_types() {
        let options = EnsembleOptions::new().with_dual_fork(true);
        assert!(options.enable_dual_fork);
        assert_eq!(options.fork_types, vec![ForkType::User, ForkType::Ai]);
    }
}
