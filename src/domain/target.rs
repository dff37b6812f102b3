//! Predictable targets.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::TierOverrides;

/// Prefix that marks a test target. Signals derived from test articles may
/// only route here; the production pipeline never consumes these rows.
pub const TEST_SYMBOL_PREFIX: &str = "T_";

/// Asset class of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TargetType {
    Equity,
    Crypto,
    Forex,
    Commodity,
    Other,
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equity => write!(f, "equity"),
            Self::Crypto => write!(f, "crypto"),
            Self::Forex => write!(f, "forex"),
            Self::Commodity => write!(f, "commodity"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A predictable entity (ticker, symbol) within a universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub universe_id: String,
    pub symbol: String,
    pub name: String,
    pub target_type: TargetType,
    pub is_active: bool,
    /// Per-target LLM tier override, highest resolution precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_overrides: Option<TierOverrides>,
}

impl Target {
    pub fn new(
        universe_id: impl Into<String>,
        symbol: impl Into<String>,
        name: impl Into<String>,
        target_type: TargetType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            universe_id: universe_id.into(),
            symbol: symbol.into(),
            name: name.into(),
            target_type,
            is_active: true,
            llm_overrides: None,
        }
    }

    pub fn with_llm_overrides(mut self, overrides: TierOverrides) -> Self {
        self.llm_overrides = Some(overrides);
        self
    }

    /// Test targets carry the `T_` symbol prefix.
    pub fn is_test(&self) -> bool {
        self.symbol.starts_with(TEST_SYMBOL_PREFIX)
    }

    /// Symbol without the test prefix, for price-mirror lookups.
    pub fn production_symbol(&self) -> &str {
        self.symbol
            .strip_prefix(TEST_SYMBOL_PREFIX)
            .unwrap_or(&self.symbol)
    }

    /// Crypto-style symbols size positions at 1e-8 precision instead of
    /// whole shares.
    pub fn has_crypto_symbol(&self) -> bool {
        let symbol = self.production_symbol();
        symbol.ends_with("USD")
            || symbol.ends_with("USDT")
            || symbol.ends_with("BTC")
            || symbol.ends_with("ETH")
            || symbol.contains('-')
            || symbol.contains('/')
    }
}
