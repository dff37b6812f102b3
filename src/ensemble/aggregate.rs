//! Aggregation of analyst votes into one ensemble verdict.

use crate::config::AggregationMethod;
use crate::domain::Direction;

use super::types::{AggregatedOutcome, Assessment};

/// One vote: a direction with an effective weight and a confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedVote {
    pub direction: Direction,
    pub weight: f64,
    pub confidence: f64,
}

impl From<&Assessment> for WeightedVote {
    fn from(assessment: &Assessment) -> Self {
        Self {
            direction: assessment.direction,
            weight: assessment.effective_weight,
            confidence: assessment.confidence,
        }
    }
}

/// Aggregate votes with the configured method. Zero-weight and empty vote
/// sets produce the neutral empty outcome.
pub fn aggregate(method: AggregationMethod, votes: &[WeightedVote]) -> AggregatedOutcome {
    let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
    if votes.is_empty() || total_weight <= 0.0 {
        return AggregatedOutcome::empty();
    }
    match method {
        AggregationMethod::WeightedMajority => weighted_majority(votes, total_weight),
        AggregationMethod::WeightedAverage => weighted_average(votes, total_weight),
        AggregationMethod::WeightedEnsemble => weighted_ensemble(votes, total_weight),
    }
}

fn weight_by_direction(votes: &[WeightedVote]) -> [(Direction, f64); 3] {
    let mut totals = [
        (Direction::Bullish, 0.0),
        (Direction::Bearish, 0.0),
        (Direction::Neutral, 0.0),
    ];
    for vote in votes {
        for entry in totals.iter_mut() {
            if entry.0 == vote.direction {
                entry.1 += vote.weight;
            }
        }
    }
    totals
}

fn weighted_majority(votes: &[WeightedVote], total_weight: f64) -> AggregatedOutcome {
    let totals = weight_by_direction(votes);
    // Stable winner on ties: bullish, bearish, neutral order.
    let mut winner = Direction::Neutral;
    let mut winning_weight = f64::NEG_INFINITY;
    for (direction, weight) in totals {
        if weight > winning_weight {
            winner = direction;
            winning_weight = weight;
        }
    }

    let winning_votes: Vec<&WeightedVote> =
        votes.iter().filter(|v| v.direction == winner).collect();
    let confidence = if winning_votes.is_empty() {
        0.0
    } else {
        winning_votes.iter().map(|v| v.confidence).sum::<f64>() / winning_votes.len() as f64
    };

    let consensus_strength = winning_weight / total_weight;
    AggregatedOutcome {
        direction: winner,
        confidence,
        consensus_strength,
        reasoning: format!(
            "weighted majority: {} carries {:.2} of {:.2} vote mass across {} votes",
            winner,
            winning_weight,
            total_weight,
            votes.len()
        ),
    }
}

fn weighted_average(votes: &[WeightedVote], total_weight: f64) -> AggregatedOutcome {
    let value: f64 = votes
        .iter()
        .map(|v| v.direction.signed() * v.weight * v.confidence)
        .sum::<f64>()
        / total_weight;

    let direction = if value > 0.15 {
        Direction::Bullish
    } else if value < -0.15 {
        Direction::Bearish
    } else {
        Direction::Neutral
    };

    // Weighted variance of the signed direction values; tight clusters give
    // consensus near 1, a full split gives 0.
    let mean: f64 = votes
        .iter()
        .map(|v| v.direction.signed() * v.weight)
        .sum::<f64>()
        / total_weight;
    let variance: f64 = votes
        .iter()
        .map(|v| v.weight * (v.direction.signed() - mean).powi(2))
        .sum::<f64>()
        / total_weight;
    let consensus_strength = (1.0 - variance.sqrt()).max(0.0);

    let confidence = votes
        .iter()
        .map(|v| v.weight * v.confidence)
        .sum::<f64>()
        / total_weight;

    AggregatedOutcome {
        direction,
        confidence,
        consensus_strength,
        reasoning: format!(
            "weighted average: signed value {:.3} over {} votes",
            value,
            votes.len()
        ),
    }
}

fn weighted_ensemble(votes: &[WeightedVote], total_weight: f64) -> AggregatedOutcome {
    let majority = weighted_majority(votes, total_weight);
    let average = weighted_average(votes, total_weight);

    let direction = if majority.consensus_strength > 0.6 {
        majority.direction
    } else {
        average.direction
    };
    let confidence = (majority.confidence + average.confidence) / 2.0;
    let consensus_strength = (majority.consensus_strength + average.consensus_strength) / 2.0;

    AggregatedOutcome {
        direction,
        confidence,
        consensus_strength,
        reasoning: format!(
            "weighted ensemble: majority says {} (consensus {:.2}), average says {}",
            majority.direction, majority.consensus_strength, average.direction
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vote(direction: Direction, weight: f64, confidence: f64) -> WeightedVote {
        WeightedVote {
            direction,
            weight,
            confidence,
        }
    }

    #[test]
    fn test_majority_share_and_confidence() {
        let votes = [
            vote(Direction::Bullish, 2.0, 0.8),
            vote(Direction::Bullish, 1.0, 0.6),
            vote(Direction::Bearish, 1.0, 0.9),
        ];
        let outcome = aggregate(AggregationMethod::WeightedMajority, &votes);
        assert_eq!(outcome.direction, Direction::Bullish);
        assert!((outcome.consensus_strength - 0.75).abs() < 1e-9);
        // Mean confidence of the winning subset only.
        assert!((outcome.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_average_buckets() {
        // Strong bullish lean.
        let votes = [
            vote(Direction::Bullish, 1.0, 0.9),
            vote(Direction::Neutral, 1.0, 0.5),
        ];
        let outcome = aggregate(AggregationMethod::WeightedAverage, &votes);
        assert_eq!(outcome.direction, Direction::Bullish);

        // Mild lean inside the dead zone stays neutral.
        let votes = [
            vote(Direction::Bullish, 1.0, 0.2),
            vote(Direction::Neutral, 1.0, 0.9),
        ];
        let outcome = aggregate(AggregationMethod::WeightedAverage, &votes);
        assert_eq!(outcome.direction, Direction::Neutral);

        // Bearish mirror.
        let votes = [
            vote(Direction::Bearish, 2.0, 0.8),
            vote(Direction::Bullish, 1.0, 0.3),
        ];
        let outcome = aggregate(AggregationMethod::WeightedAverage, &votes);
        assert_eq!(outcome.direction, Direction::Bearish);
    }

    #[test]
    fn test_average_consensus_from_variance() {
        // Unanimous: zero variance, consensus 1.
        let votes = [
            vote(Direction::Bullish, 1.0, 0.8),
            vote(Direction::Bullish, 1.0, 0.6),
        ];
        let outcome = aggregate(AggregationMethod::WeightedAverage, &votes);
        assert!((outcome.consensus_strength - 1.0).abs() < 1e-9);

        // Full split: variance 1, consensus 0.
        let votes = [
            vote(Direction::Bullish, 1.0, 0.8),
            vote(Direction::Bearish, 1.0, 0.8),
        ];
        let outcome = aggregate(AggregationMethod::WeightedAverage, &votes);
        assert!(outcome.consensus_strength.abs() < 1e-9);
    }

    #[test]
    fn test_ensemble_takes_majority_when_strong() {
        let votes = [
            vote(Direction::Bullish, 3.0, 0.8),
            vote(Direction::Bearish, 1.0, 0.7),
        ];
        let majority = aggregate(AggregationMethod::WeightedMajority, &votes);
        assert!(majority.consensus_strength > 0.6);

        let outcome = aggregate(AggregationMethod::WeightedEnsemble, &votes);
        assert_eq!(outcome.direction, Direction::Bullish);

        let average = aggregate(AggregationMethod::WeightedAverage, &votes);
        assert!((outcome.confidence - (majority.confidence + average.confidence) / 2.0).abs() < 1e-9);
        assert!(
            (outcome.consensus_strength
                - (majority.consensus_strength + average.consensus_strength) / 2.0)
                .abs()
                < 1e-9
        );
    }

    #[test]
    fn test_ensemble_falls_back_to_average_on_weak_majority() {
        // Majority winner holds only half the mass; the average decides.
        let votes = [
            vote(Direction::Bullish, 1.0, 0.9),
            vote(Direction::Bearish, 1.0, 0.2),
        ];
        let majority = aggregate(AggregationMethod::WeightedMajority, &votes);
        assert!(majority.consensus_strength <= 0.6);

        let average = aggregate(AggregationMethod::WeightedAverage, &votes);
        let outcome = aggregate(AggregationMethod::WeightedEnsemble, &votes);
        assert_eq!(outcome.direction, average.direction);
    }

    #[test]
    fn test_empty_votes_yield_empty_outcome() {
        let outcome = aggregate(AggregationMethod::WeightedEnsemble, &[]);
        assert_eq!(outcome, AggregatedOutcome::empty());
    }
}
