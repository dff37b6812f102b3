//! Directional enums and synonym normalization.
//!
//! LLM output and upstream feeds use many spellings (`up`, `buy`, `long`,
//! …). Everything normalizes to the closed enums here at ingress; the rest
//! of the pipeline never sees a loose string.

use serde::{Deserialize, Serialize};

/// Direction of a signal or predictor opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl Direction {
    pub const ALL: [Direction; 3] = [Direction::Bullish, Direction::Bearish, Direction::Neutral];

    /// Normalize a loose direction string.
    ///
    /// `bullish/up/buy/long → Bullish`, `bearish/down/sell/short → Bearish`,
    /// anything else → Neutral.
    pub fn from_loose(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "bullish" | "up" | "buy" | "long" => Self::Bullish,
            "bearish" | "down" | "sell" | "short" => Self::Bearish,
            _ => Self::Neutral,
        }
    }

    /// Signed value for weighted-average aggregation.
    pub fn signed(&self) -> f64 {
        match self {
            Self::Bullish => 1.0,
            Self::Bearish => -1.0,
            Self::Neutral => 0.0,
        }
    }

    /// Map onto the prediction trend axis.
    pub fn to_trend(&self) -> TrendDirection {
        match self {
            Self::Bullish => TrendDirection::Up,
            Self::Bearish => TrendDirection::Down,
            Self::Neutral => TrendDirection::Flat,
        }
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Self::Neutral)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Direction of a Tier-3 prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl TrendDirection {
    pub fn is_flat(&self) -> bool {
        matches!(self, Self::Flat)
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

/// Expected move size of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnitude {
    Small,
    Medium,
    Large,
}

impl Magnitude {
    /// Bucket a percentage move: `<2.5 small, <6 medium, else large`.
    pub fn from_percent(percent: f64) -> Self {
        if percent < 2.5 {
            Self::Small
        } else if percent < 6.0 {
            Self::Medium
        } else {
            Self::Large
        }
    }
}

impl std::fmt::Display for Magnitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loose_normalization() {
        assert_eq!(Direction::from_loose("bullish"), Direction::Bullish);
        assert_eq!(Direction::from_loose("UP"), Direction::Bullish);
        assert_eq!(Direction::from_loose(" buy "), Direction::Bullish);
        assert_eq!(Direction::from_loose("long"), Direction::Bullish);
        assert_eq!(Direction::from_loose("bearish"), Direction::Bearish);
        assert_eq!(Direction::from_loose("Sell"), Direction::Bearish);
        assert_eq!(Direction::from_loose("short"), Direction::Bearish);
        assert_eq!(Direction::from_loose("down"), Direction::Bearish);
        assert_eq!(Direction::from_loose("sideways"), Direction::Neutral);
        assert_eq!(Direction::from_loose(""), Direction::Neutral);
    }

    #[test]
    fn test_trend_mapping() {
        assert_eq!(Direction::Bullish.to_trend(), TrendDirection::Up);
        assert_eq!(Direction::Bearish.to_trend(), TrendDirection::Down);
        assert_eq!(Direction::Neutral.to_trend(), TrendDirection::Flat);
    }

    #[test]
    fn test_magnitude_buckets() {
        assert_eq!(Magnitude::from_percent(0.0), Magnitude::Small);
        assert_eq!(Magnitude::from_percent(2.49), Magnitude::Small);
        assert_eq!(Magnitude::from_percent(2.5), Magnitude::Medium);
        assert_eq!(Magnitude::from_percent(5.99), Magnitude::Medium);
        assert_eq!(Magnitude::from_percent(6.0), Magnitude::Large);
        assert_eq!(Magnitude::from_percent(12.0), Magnitude::Large);
    }

    #[test]
    fn test_signed_values() {
        assert_eq!(Direction::Bullish.signed(), 1.0);
        assert_eq!(Direction::Bearish.signed(), -1.0);
        assert_eq!(Direction::Neutral.signed(), 0.0);
    }
}
