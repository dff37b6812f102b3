//! Position sizing for per-analyst predictions.

use serde::{Deserialize, Serialize};

use crate::domain::Target;

/// Synthetic user attached to scheduler-driven generation runs.
pub const SYSTEM_USER: &str = "system";

/// Risk fraction of the portfolio, scaled by confidence.
pub fn risk_fraction(confidence: f64) -> f64 {
    if confidence >= 0.8 {
        0.02
    } else if confidence >= 0.7 {
        0.015
    } else if confidence >= 0.6 {
        0.01
    } else {
        0.005
    }
}

/// Stop distance as a fraction of entry, scaled by expected move size.
pub fn stop_distance(magnitude_percent: f64) -> f64 {
    if magnitude_percent >= 6.0 {
        0.05
    } else if magnitude_percent >= 2.5 {
        0.03
    } else {
        0.02
    }
}

/// Sizing outcome: a quantity, or zero with the reason it stayed flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizing {
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PositionSizing {
    fn r#unsized(reason: impl Into<String>) -> Self {
        Self {
            quantity: 0.0,
            reason: Some(reason.into()),
        }
    }
}

/// `floor((balance × risk%) / (entry × stop%))`, rounded to whole shares
/// for stocks and 1e-8 precision for crypto-style symbols.
pub fn recommended_quantity(
    target: &Target,
    context_user: &str,
    portfolio_balance: Option<f64>,
    entry_price: Option<f64>,
    confidence: f64,
    magnitude_percent: f64,
) -> PositionSizing {
    if context_user == SYSTEM_USER {
        return PositionSizing::r#unsized("position sizing skipped for system-generated run");
    }
    let Some(balance) = portfolio_balance else {
        return PositionSizing::r#unsized("portfolio balance unavailable");
    };
    let Some(entry) = entry_price.filter(|p| *p > 0.0) else {
        return PositionSizing::r#unsized("price unavailable");
    };

    let risk = risk_fraction(confidence);
    let stop = stop_distance(magnitude_percent);
    let raw = (balance * risk) / (entry * stop);

    let quantity = if target.has_crypto_symbol() {
        (raw * 1e8).floor() / 1e8
    } else {
        raw.floor()
    };

    if quantity <= 0.0 {
        return PositionSizing::r#unsized("risk budget below one unit");
    }
    PositionSizing {
        quantity,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TargetType;

    fn stock() -> Target {
        Target::new("u-1", "AAPL", "Apple Inc.", TargetType::Equity)
    }

    fn crypto() -> Target {
        Target::new("u-1", "BTC-USD", "Bitcoin", TargetType::Crypto)
    }

    #[test]
    fn test_risk_fraction_bands() {
        assert_eq!(risk_fraction(0.85), 0.02);
        assert_eq!(risk_fraction(0.8), 0.02);
        assert_eq!(risk_fraction(0.75), 0.015);
        assert_eq!(risk_fraction(0.65), 0.01);
        assert_eq!(risk_fraction(0.59), 0.005);
    }

    #[test]
    fn test_stop_distance_bands() {
        assert_eq!(stop_distance(7.0), 0.05);
        assert_eq!(stop_distance(6.0), 0.05);
        assert_eq!(stop_distance(3.0), 0.03);
        assert_eq!(stop_distance(2.5), 0.03);
        assert_eq!(stop_distance(1.0), 0.02);
    }

    #[test]
    fn test_stock_quantity_floors_to_whole_shares() {
        // 10_000 × 0.02 / (150 × 0.03) = 44.44 → 44 shares.
        let sizing = recommended_quantity(&stock(), "alice", Some(10_000.0), Some(150.0), 0.85, 4.25);
        assert_eq!(sizing.quantity, 44.0);
        assert!(sizing.reason.is_none());
    }

    #[test]
    fn test_crypto_quantity_keeps_satoshi_precision() {
        // 10_000 × 0.02 / (60_000 × 0.05) = 0.0666...
        let sizing =
            recommended_quantity(&crypto(), "alice", Some(10_000.0), Some(60_000.0), 0.9, 6.0);
        assert!(sizing.quantity > 0.0);
        assert!(sizing.quantity < 1.0);
        // Exactly 8 decimal places survive.
        let scaled = sizing.quantity * 1e8;
        assert!((scaled - scaled.floor()).abs() < 1e-6);
    }

    #[test]
    fn test_system_user_never_sizes() {
        let sizing =
            recommended_quantity(&stock(), SYSTEM_USER, Some(10_000.0), Some(150.0), 0.9, 4.0);
        assert_eq!(sizing.quantity, 0.0);
        assert!(sizing.reason.unwrap().contains("system"));
    }

    #[test]
    fn test_unpriced_and_unfunded_report_reasons() {
        let sizing = recommended_quantity(&stock(), "alice", None, Some(150.0), 0.9, 4.0);
        assert_eq!(sizing.reason.as_deref(), Some("portfolio balance unavailable"));

        let sizing = recommended_quantity(&stock(), "alice", Some(10_000.0), None, 0.9, 4.0);
        assert_eq!(sizing.reason.as_deref(), Some("price unavailable"));
    }

    #[test]
    fn test_tiny_budget_stays_flat() {
        // 100 × 0.005 / (5_000 × 0.02) = 0.005 → floors to zero shares.
        let sizing = recommended_quantity(&stock(), "alice", Some(100.0), Some(5_000.0), 0.5, 1.0);
        assert_eq!(sizing.quantity, 0.0);
        assert!(sizing.reason.is_some());
    }
}
