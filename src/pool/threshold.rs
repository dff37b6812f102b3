//! Time-decay weighted threshold evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ThresholdConfig;
use crate::domain::{Direction, Predictor};

/// Time-decay weight for a predictor aged `hours_old` hours:
/// `exp(−decay_rate × hours_old)`. Rate 0 degenerates to uniform.
pub fn decay_weight(hours_old: f64, decay_rate: f64) -> f64 {
    (-decay_rate * hours_old).exp()
}

/// Result of evaluating the active set against a threshold config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEvaluation {
    pub meets_threshold: bool,
    pub active_count: usize,
    /// Unweighted sum of predictor strengths.
    pub combined_strength: f64,
    pub dominant_direction: Direction,
    /// Weighted share of the dominant direction, in [0,1].
    pub direction_consensus: f64,
    /// Unweighted mean confidence of the active set.
    pub avg_confidence: f64,
    pub bullish_weight: f64,
    pub bearish_weight: f64,
    pub neutral_weight: f64,
    pub evaluated_at: DateTime<Utc>,
}

impl ThresholdEvaluation {
    /// Evaluation of an empty pool.
    pub fn empty(evaluated_at: DateTime<Utc>) -> Self {
        Self {
            meets_threshold: false,
            active_count: 0,
            combined_strength: 0.0,
            dominant_direction: Direction::Neutral,
            direction_consensus: 0.0,
            avg_confidence: 0.0,
            bullish_weight: 0.0,
            bearish_weight: 0.0,
            neutral_weight: 0.0,
            evaluated_at,
        }
    }

    /// Serializable summary for snapshots: config, actuals and verdict.
    pub fn audit_record(&self, config: &ThresholdConfig) -> serde_json::Value {
        serde_json::json!({
            "config": config,
            "actuals": {
                "active_count": self.active_count,
                "combined_strength": self.combined_strength,
                "dominant_direction": self.dominant_direction,
                "direction_consensus": self.direction_consensus,
                "avg_confidence": self.avg_confidence,
            },
            "passed": self.meets_threshold,
        })
    }
}

/// Evaluate the active predictor set at `now`.
///
/// Weighted votes decide the dominant direction and its consensus share;
/// combined strength stays unweighted so stale-but-strong pools still pass
/// the strength gate.
pub fn evaluate(
    predictors: &[Predictor],
    config: &ThresholdConfig,
    now: DateTime<Utc>,
) -> ThresholdEvaluation {
    if predictors.is_empty() {
        return ThresholdEvaluation::empty(now);
    }

    let mut bullish_weight = 0.0;
    let mut bearish_weight = 0.0;
    let mut neutral_weight = 0.0;
    let mut combined_strength = 0.0;
    let mut confidence_sum = 0.0;

    for predictor in predictors {
        let weight = decay_weight(predictor.hours_old(now), config.time_decay_rate);
        match predictor.direction {
            Direction::Bullish => bullish_weight += weight,
            Direction::Bearish => bearish_weight += weight,
            Direction::Neutral => neutral_weight += weight,
        }
        combined_strength += predictor.strength as f64;
        confidence_sum += predictor.confidence;
    }

    let total_weight = bullish_weight + bearish_weight + neutral_weight;
    let (dominant_direction, dominant_weight) = {
        let mut dominant = (Direction::Bullish, bullish_weight);
        if bearish_weight > dominant.1 {
            dominant = (Direction::Bearish, bearish_weight);
        }
        if neutral_weight > dominant.1 {
            dominant = (Direction::Neutral, neutral_weight);
        }
        dominant
    };

    let direction_consensus = if total_weight > 0.0 {
        dominant_weight / total_weight
    } else {
        0.0
    };
    let avg_confidence = confidence_sum / predictors.len() as f64;

    let meets_threshold = predictors.len() >= config.min_predictors
        && combined_strength >= config.min_combined_strength
        && direction_consensus >= config.min_direction_consensus;

    ThresholdEvaluation {
        meets_threshold,
        active_count: predictors.len(),
        combined_strength,
        dominant_direction,
        direction_consensus,
        avg_confidence,
        bullish_weight,
        bearish_weight,
        neutral_weight,
        evaluated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn predictor(direction: Direction, strength: u8, confidence: f64, age_hours: i64, now: DateTime<Utc>) -> Predictor {
        Predictor::new(
            "t-1",
            "a-1",
            "analyst",
            direction,
            strength,
            confidence,
            "r",
            now - Duration::hours(age_hours),
            48,
        )
    }

    #[test]
    fn test_bullish_crossing_scenario() {
        // Scenario S1 pool: bullish 8/0.80 @1h, bullish 7/0.75 @3h,
        // bearish 4/0.60 @10h, balanced config.
        let now = Utc::now();
        let pool = vec![
            predictor(Direction::Bullish, 8, 0.80, 1, now),
            predictor(Direction::Bullish, 7, 0.75, 3, now),
            predictor(Direction::Bearish, 4, 0.60, 10, now),
        ];
        let eval = evaluate(&pool, &ThresholdConfig::balanced(), now);

        assert!(eval.meets_threshold);
        assert_eq!(eval.active_count, 3);
        assert_eq!(eval.combined_strength, 19.0);
        assert_eq!(eval.dominant_direction, Direction::Bullish);

        // exp(-0.05) + exp(-0.15) vs exp(-0.5).
        let bull = (-0.05f64).exp() + (-0.15f64).exp();
        let bear = (-0.5f64).exp();
        assert!((eval.direction_consensus - bull / (bull + bear)).abs() < 1e-9);
        assert!(eval.direction_consensus > 0.7);
        assert!((eval.avg_confidence - (0.80 + 0.75 + 0.60) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_near_miss_even_split() {
        // Scenario S2: 2 bullish / 2 bearish of equal strength fails the
        // consensus gate.
        let now = Utc::now();
        let pool = vec![
            predictor(Direction::Bullish, 8, 0.8, 1, now),
            predictor(Direction::Bullish, 8, 0.8, 1, now),
            predictor(Direction::Bearish, 8, 0.8, 1, now),
            predictor(Direction::Bearish, 8, 0.8, 1, now),
        ];
        let eval = evaluate(&pool, &ThresholdConfig::balanced(), now);
        assert!(!eval.meets_threshold);
        assert!((eval.direction_consensus - 0.5).abs() < 1e-9);
        assert!(eval.combined_strength >= 15.0);
        assert_eq!(eval.active_count, 4);
    }

    #[test]
    fn test_zero_decay_is_uniform() {
        let now = Utc::now();
        let config = ThresholdConfig::balanced().with_time_decay_rate(0.0);
        let pool = vec![
            predictor(Direction::Bullish, 5, 0.7, 40, now),
            predictor(Direction::Bullish, 5, 0.7, 1, now),
            predictor(Direction::Bearish, 5, 0.7, 0, now),
        ];
        let eval = evaluate(&pool, &config, now);
        assert!((eval.direction_consensus - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_fresh_predictors_outweigh_stale_ones() {
        let now = Utc::now();
        // Heavy decay: two stale bullish vs one fresh bearish.
        let config = ThresholdConfig::balanced().with_time_decay_rate(0.5);
        let pool = vec![
            predictor(Direction::Bullish, 8, 0.8, 20, now),
            predictor(Direction::Bullish, 8, 0.8, 20, now),
            predictor(Direction::Bearish, 8, 0.8, 0, now),
        ];
        let eval = evaluate(&pool, &config, now);
        assert_eq!(eval.dominant_direction, Direction::Bearish);
    }

    #[test]
    fn test_empty_pool() {
        let now = Utc::now();
        let eval = evaluate(&[], &ThresholdConfig::balanced(), now);
        assert_eq!(eval, ThresholdEvaluation::empty(now));
    }

    #[test]
    fn test_count_gate() {
        let now = Utc::now();
        let pool = vec![
            predictor(Direction::Bullish, 10, 0.9, 1, now),
            predictor(Direction::Bullish, 10, 0.9, 1, now),
        ];
        let eval = evaluate(&pool, &ThresholdConfig::balanced(), now);
        // Strength 20 and consensus 1.0 pass, but 2 < min_predictors.
        assert!(!eval.meets_threshold);
    }

    proptest! {
        // Threshold round-trip: the evaluation matches an independently
        // computed reference for arbitrary pools.
        #[test]
        fn prop_threshold_matches_reference(
            dirs in prop::collection::vec(0u8..3, 1..20),
            strengths in prop::collection::vec(1u8..=10, 20),
            confidences in prop::collection::vec(0.0f64..=1.0, 20),
            ages in prop::collection::vec(0i64..47, 20),
            decay in 0.0f64..0.3,
        ) {
            let now = Utc::now();
            let config = ThresholdConfig::balanced().with_time_decay_rate(decay);
            let pool: Vec<Predictor> = dirs
                .iter()
                .enumerate()
                .map(|(i, d)| {
                    let direction = match d {
                        0 => Direction::Bullish,
                        1 => Direction::Bearish,
                        _ => Direction::Neutral,
                    };
                    predictor(direction, strengths[i], confidences[i], ages[i], now)
                })
                .collect();

            let eval = evaluate(&pool, &config, now);

            // Reference computation, written independently of evaluate().
            let mut weights = [0.0f64; 3];
            let mut strength_sum = 0.0;
            for p in &pool {
                let hours = (now - p.created_at).num_milliseconds() as f64 / 3_600_000.0;
                let w = (-decay * hours).exp();
                let idx = match p.direction {
                    Direction::Bullish => 0,
                    Direction::Bearish => 1,
                    Direction::Neutral => 2,
                };
                weights[idx] += w;
                strength_sum += p.strength as f64;
            }
            let total: f64 = weights.iter().sum();
            let dominant = weights.iter().cloned().fold(f64::MIN, f64::max);

            prop_assert!((eval.combined_strength - strength_sum).abs() < 1e-9);
            prop_assert!((eval.direction_consensus - dominant / total).abs() < 1e-9);
            let expected_met = pool.len() >= config.min_predictors
                && strength_sum >= config.min_combined_strength
                && dominant / total >= config.min_direction_consensus;
            prop_assert_eq!(eval.meets_threshold, expected_met);
        }
    }
}
