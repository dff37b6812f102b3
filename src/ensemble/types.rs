//! Ensemble inputs, per-analyst assessments and aggregated outcomes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysts::ForkType;
use crate::domain::Direction;
use crate::llm::{ModelTier, ProviderKind};

/// Input to one ensemble run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleInput {
    pub target_id: String,
    /// Text under assessment (article body, predictor digest, …).
    pub content: String,
    /// Opaque context for prompt building (headline, key phrases, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Pre-extracted direction hint, when the caller has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

impl EnsembleInput {
    pub fn new(target_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            content: content.into(),
            metadata: None,
            direction: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }
}

/// One analyst's assessment under one fork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub analyst: String,
    pub tier: ModelTier,
    pub direction: Direction,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub key_factors: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub learnings_applied: Vec<String>,
    pub fork_type: ForkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_version_id: Option<String>,
    /// Suspended analysts still run for observability but are excluded
    /// from aggregation.
    pub is_paper_only: bool,
    /// Weight after per-slug overrides and the motivation rule.
    pub effective_weight: f64,
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub used_fallback: bool,
}

/// Aggregated ensemble verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedOutcome {
    pub direction: Direction,
    pub confidence: f64,
    /// Fraction of weighted vote mass agreeing with the direction, in [0,1].
    pub consensus_strength: f64,
    pub reasoning: String,
}

impl AggregatedOutcome {
    /// Outcome when no votes were cast.
    pub fn empty() -> Self {
        Self {
            direction: Direction::Neutral,
            confidence: 0.0,
            consensus_strength: 0.0,
            reasoning: "no assessments".to_string(),
        }
    }
}

/// Result of one ensemble run over a single fork set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub target_id: String,
    pub assessments: Vec<Assessment>,
    pub aggregated: AggregatedOutcome,
    /// Per-analyst failures that were skipped.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl EnsembleResult {
    /// Assessments that participate in aggregation.
    pub fn voting_assessments(&self) -> impl Iterator<Item = &Assessment> {
        self.assessments.iter().filter(|a| !a.is_paper_only)
    }

    /// Assessment for one analyst slug, if present.
    pub fn assessment_for(&self, slug: &str) -> Option<&Assessment> {
        self.assessments.iter().find(|a| a.analyst == slug)
    }
}

/// Cross-fork agreement metadata for a three-way run. Each value is the
/// fraction of analysts present on BOTH sides whose directions match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkAgreement {
    pub user_vs_ai_agreement: f64,
    pub arbitrator_agrees_with_user: f64,
    pub arbitrator_agrees_with_ai: f64,
}

/// Result of a three-way fork run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreeWayForkResult {
    pub user: EnsembleResult,
    pub ai: EnsembleResult,
    pub arbitrator: EnsembleResult,
    pub metadata: ForkAgreement,
}

impl ThreeWayForkResult {
    pub fn fork(&self, fork: ForkType) -> &EnsembleResult {
        match fork {
            ForkType::User => &self.user,
            ForkType::Ai => &self.ai,
            ForkType::Arbitrator => &self.arbitrator,
        }
    }
}
