//! Market snapshots: the latest price record for a target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest observed market state for a target. Feeds the generation context
/// string and position sizing; absence is always tolerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub target_id: String,
    pub price: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<f64>,
    /// Percent change over the trailing 24h.
    pub change_24h_pct: Option<f64>,
    pub price_at: DateTime<Utc>,
}

impl TargetSnapshot {
    pub fn new(target_id: impl Into<String>, price: f64, price_at: DateTime<Utc>) -> Self {
        Self {
            target_id: target_id.into(),
            price,
            open: None,
            high: None,
            low: None,
            volume: None,
            change_24h_pct: None,
            price_at,
        }
    }

    pub fn with_ohlv(mut self, open: f64, high: f64, low: f64, volume: f64) -> Self {
        self.open = Some(open);
        self.high = Some(high);
        self.low = Some(low);
        self.volume = Some(volume);
        self
    }

    pub fn with_change_24h(mut self, pct: f64) -> Self {
        self.change_24h_pct = Some(pct);
        self
    }

    /// One-line rendering for the generation context.
    pub fn summary_line(&self) -> String {
        let mut parts = vec![format!("price {:.4}", self.price)];
        if let (Some(open), Some(high), Some(low)) = (self.open, self.high, self.low) {
            parts.push(format!("open {:.4} high {:.4} low {:.4}", open, high, low));
        }
        if let Some(volume) = self.volume {
            parts.push(format!("volume {:.0}", volume));
        }
        if let Some(change) = self.change_24h_pct {
            parts.push(format!("24h change {:+.2}%", change));
        }
        parts.push(format!("as of {}", self.price_at.to_rfc3339()));
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_line_mentions_fields() {
        let snap = TargetSnapshot::new("t-1", 187.5, Utc::now())
            .with_ohlv(186.0, 189.2, 185.1, 1_000_000.0)
            .with_change_24h(-1.25);
        let line = snap.summary_line();
        assert!(line.contains("price 187.5000"));
        assert!(line.contains("high 189.2000"));
        assert!(line.contains("24h change -1.25%"));
    }
}
