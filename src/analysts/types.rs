//! Analyst roles, forks and context versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::llm::ModelTier;

/// Which maintained context a prompt is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkType {
    User,
    Ai,
    Arbitrator,
}

impl ForkType {
    pub const ALL: [ForkType; 3] = [ForkType::User, ForkType::Ai, ForkType::Arbitrator];

    /// Learnings apply to user and arbitrator prompts; the ai fork runs
    /// without them so its drift stays observable.
    pub fn uses_learnings(&self) -> bool {
        matches!(self, Self::User | Self::Arbitrator)
    }

    /// The motivation rule (paper-only / probation weight reduction) only
    /// applies to ai and arbitrator runs.
    pub fn applies_motivation(&self) -> bool {
        matches!(self, Self::Ai | Self::Arbitrator)
    }
}

impl std::fmt::Display for ForkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Ai => write!(f, "ai"),
            Self::Arbitrator => write!(f, "arbitrator"),
        }
    }
}

/// Performance standing of an analyst, set by the (external) evaluation
/// loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceStatus {
    Active,
    Probation,
    Suspended,
}

impl PerformanceStatus {
    /// Weight multiplier applied on ai/arbitrator runs.
    pub fn motivation_factor(&self) -> f64 {
        match self {
            Self::Active => 1.0,
            Self::Probation => 0.5,
            Self::Suspended => 0.0,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended)
    }
}

/// A named analyst role with a perspective prompt, weight and tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analyst {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub perspective: String,
    pub default_weight: f64,
    pub tier: ModelTier,
    pub performance_status: PerformanceStatus,
    pub is_active: bool,
}

impl Analyst {
    pub fn new(
        slug: impl Into<String>,
        name: impl Into<String>,
        perspective: impl Into<String>,
        default_weight: f64,
        tier: ModelTier,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            slug: slug.into(),
            name: name.into(),
            perspective: perspective.into(),
            default_weight,
            tier,
            performance_status: PerformanceStatus::Active,
            is_active: true,
        }
    }

    pub fn with_performance_status(mut self, status: PerformanceStatus) -> Self {
        self.performance_status = status;
        self
    }
}

/// Fork-scoped prompt parameters for one analyst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystContextVersion {
    pub id: String,
    pub analyst_id: String,
    pub fork_type: ForkType,
    pub perspective: String,
    /// Tier-specific instruction text appended to the prompt.
    #[serde(default)]
    pub tier_instructions: HashMap<ModelTier, String>,
    pub default_weight: f64,
    pub version_number: u32,
    pub is_current: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_journal: Option<String>,
    pub changed_by: String,
    pub created_at: DateTime<Utc>,
}

impl AnalystContextVersion {
    pub fn new(
        analyst_id: impl Into<String>,
        fork_type: ForkType,
        perspective: impl Into<String>,
        default_weight: f64,
        version_number: u32,
        changed_by: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            analyst_id: analyst_id.into(),
            fork_type,
            perspective: perspective.into(),
            tier_instructions: HashMap::new(),
            default_weight,
            version_number,
            is_current: true,
            agent_journal: None,
            changed_by: changed_by.into(),
            created_at,
        }
    }

    pub fn with_tier_instruction(mut self, tier: ModelTier, text: impl Into<String>) -> Self {
        self.tier_instructions.insert(tier, text.into());
        self
    }

    pub fn with_agent_journal(mut self, journal: impl Into<String>) -> Self {
        self.agent_journal = Some(journal.into());
        self
    }
}

/// A performance learning applied to user/arbitrator prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    pub analyst_id: String,
    /// Scoped to one target when set, otherwise analyst-global.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Learning {
    pub fn new(
        analyst_id: impl Into<String>,
        target_id: Option<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            analyst_id: analyst_id.into(),
            target_id,
            content: content.into(),
            created_at,
        }
    }
}
