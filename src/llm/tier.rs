//! Model tiers and tier-to-model resolution.
//!
//! A tier is a quality/cost class. Resolution walks the override chain
//! target → universe → agent → built-in default and returns the
//! `{provider, model}` assignment for the requested tier.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment variable naming the local fallback model.
pub const DEFAULT_LLM_MODEL_ENV: &str = "DEFAULT_LLM_MODEL";

/// Compiled-in local model when the environment does not override it.
pub const BUILTIN_LOCAL_MODEL: &str = "llama3.1:8b";

/// Quality/cost class for LLM calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheapest, lowest quality
    Bronze,
    /// Balanced default
    Silver,
    /// High quality
    Gold,
    /// Most capable, highest cost
    Platinum,
}

impl ModelTier {
    pub const ALL: [ModelTier; 4] = [
        ModelTier::Bronze,
        ModelTier::Silver,
        ModelTier::Gold,
        ModelTier::Platinum,
    ];
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bronze => write!(f, "bronze"),
            Self::Silver => write!(f, "silver"),
            Self::Gold => write!(f, "gold"),
            Self::Platinum => write!(f, "platinum"),
        }
    }
}

/// LLM provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
    /// Self-hosted OpenAI-compatible endpoint; excluded from usage accounting.
    Local,
}

impl ProviderKind {
    /// Local calls bypass the usage limiter and its accounting.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAI => write!(f, "openai"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// A resolved `{provider, model}` pair for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmAssignment {
    pub provider: ProviderKind,
    pub model: String,
}

impl LlmAssignment {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// The local fallback assignment, honoring `DEFAULT_LLM_MODEL`.
    pub fn local_fallback() -> Self {
        let model = std::env::var(DEFAULT_LLM_MODEL_ENV)
            .unwrap_or_else(|_| BUILTIN_LOCAL_MODEL.to_string());
        Self::new(ProviderKind::Local, model)
    }
}

/// Per-scope tier override table (target, universe or agent level).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierOverrides {
    #[serde(default)]
    pub tiers: HashMap<ModelTier, LlmAssignment>,
}

impl TierOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tier(mut self, tier: ModelTier, assignment: LlmAssignment) -> Self {
        self.tiers.insert(tier, assignment);
        self
    }

    pub fn get(&self, tier: ModelTier) -> Option<&LlmAssignment> {
        self.tiers.get(&tier)
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

/// Built-in default assignment for a tier.
pub fn builtin_default(tier: ModelTier) -> LlmAssignment {
    match tier {
        ModelTier::Bronze => LlmAssignment::new(ProviderKind::OpenAI, "gpt-4o-mini"),
        ModelTier::Silver => LlmAssignment::new(ProviderKind::Anthropic, "claude-3-5-haiku-20241022"),
        ModelTier::Gold => LlmAssignment::new(ProviderKind::Anthropic, "claude-3-5-sonnet-20241022"),
        ModelTier::Platinum => LlmAssignment::new(ProviderKind::Anthropic, "claude-3-opus-20240229"),
    }
}

/// Resolves tiers through the target → universe → agent → default chain.
#[derive(Debug, Clone, Default)]
pub struct TierResolver {
    universe_overrides: HashMap<String, TierOverrides>,
    agent_overrides: TierOverrides,
}

/// Where a resolution came from, for audit trails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Target,
    Universe,
    Agent,
    Default,
}

/// A resolved tier with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResolution {
    pub tier: ModelTier,
    pub assignment: LlmAssignment,
    pub source: ResolutionSource,
}

impl TierResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_universe_overrides(
        mut self,
        universe_id: impl Into<String>,
        overrides: TierOverrides,
    ) -> Self {
        self.universe_overrides.insert(universe_id.into(), overrides);
        self
    }

    pub fn with_agent_overrides(mut self, overrides: TierOverrides) -> Self {
        self.agent_overrides = overrides;
        self
    }

    /// Resolve a tier. First non-null wins:
    /// target override, universe override, agent override, built-in default.
    pub fn resolve(
        &self,
        tier: ModelTier,
        target_overrides: Option<&TierOverrides>,
        universe_id: &str,
    ) -> TierResolution {
        if let Some(assignment) = target_overrides.and_then(|o| o.get(tier)) {
            return TierResolution {
                tier,
                assignment: assignment.clone(),
                source: ResolutionSource::Target,
            };
        }
        if let Some(assignment) = self
            .universe_overrides
            .get(universe_id)
            .and_then(|o| o.get(tier))
        {
            return TierResolution {
                tier,
                assignment: assignment.clone(),
                source: ResolutionSource::Universe,
            };
        }
        if let Some(assignment) = self.agent_overrides.get(tier) {
            return TierResolution {
                tier,
                assignment: assignment.clone(),
                source: ResolutionSource::Agent,
            };
        }
        TierResolution {
            tier,
            assignment: builtin_default(tier),
            source: ResolutionSource::Default,
        }
    }
}
