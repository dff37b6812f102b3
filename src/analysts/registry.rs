//! Analyst registry: active analyst sets and fork-scoped context versions.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::llm::ModelTier;
use crate::repo::AnalystRepository;

use super::types::{Analyst, AnalystContextVersion, ForkType};

/// Marker recorded on synthesized versions.
const SYSTEM_ACTOR: &str = "system";

/// Registry over the analyst repository. Arbitrator context versions are
/// never stored; they are synthesized deterministically from the user and
/// ai versions on every read.
pub struct AnalystRegistry {
    repo: Arc<dyn AnalystRepository>,
}

impl AnalystRegistry {
    pub fn new(repo: Arc<dyn AnalystRepository>) -> Self {
        Self { repo }
    }

    /// Active analysts assigned to a target.
    pub async fn get_active_analysts(&self, target_id: &str) -> Result<Vec<Analyst>> {
        self.repo.find_active_for_target(target_id).await
    }

    /// Current context version for one `(analyst, fork)`.
    pub async fn get_current_context_version(
        &self,
        analyst_id: &str,
        fork: ForkType,
    ) -> Result<Option<AnalystContextVersion>> {
        match fork {
            ForkType::User | ForkType::Ai => self.repo.current_context_version(analyst_id, fork).await,
            ForkType::Arbitrator => {
                let user = self
                    .repo
                    .current_context_version(analyst_id, ForkType::User)
                    .await?;
                let ai = self
                    .repo
                    .current_context_version(analyst_id, ForkType::Ai)
                    .await?;
                Ok(synthesize_arbitrator_version(user, ai))
            }
        }
    }

    /// Current context versions for every analyst under one fork.
    pub async fn get_all_current_context_versions(
        &self,
        fork: ForkType,
    ) -> Result<HashMap<String, AnalystContextVersion>> {
        match fork {
            ForkType::User | ForkType::Ai => self.repo.all_current_context_versions(fork).await,
            ForkType::Arbitrator => {
                let mut users = self.repo.all_current_context_versions(ForkType::User).await?;
                let mut ais = self.repo.all_current_context_versions(ForkType::Ai).await?;

                let mut analyst_ids: Vec<String> = users.keys().cloned().collect();
                for id in ais.keys() {
                    if !users.contains_key(id) {
                        analyst_ids.push(id.clone());
                    }
                }

                let mut merged = HashMap::new();
                for id in analyst_ids {
                    if let Some(version) =
                        synthesize_arbitrator_version(users.remove(&id), ais.remove(&id))
                    {
                        merged.insert(id, version);
                    }
                }
                Ok(merged)
            }
        }
    }

    /// Persist a new current version, superseding the previous one for the
    /// same `(analyst_id, fork_type)`.
    pub async fn create_context_version(&self, version: &AnalystContextVersion) -> Result<()> {
        self.repo.create_context_version(version).await
    }
}

/// Deterministic arbitrator synthesis from the user and ai versions.
///
/// Both sides present: the perspective and tier instructions concatenate
/// under section markers, the weight and version number take the max, and
/// the journal comes from the ai side. One side present: that version is
/// returned unchanged. Neither: absent.
pub fn synthesize_arbitrator_version(
    user: Option<AnalystContextVersion>,
    ai: Option<AnalystContextVersion>,
) -> Option<AnalystContextVersion> {
    let (user, ai) = match (user, ai) {
        (Some(user), Some(ai)) => (user, ai),
        (Some(user), None) => return Some(user),
        (None, Some(ai)) => return Some(ai),
        (None, None) => return None,
    };

    let perspective = format!(
        "## User-Maintained Context\n{}\n\n## AI-Maintained Context\n{}",
        user.perspective, ai.perspective
    );

    let mut tier_instructions = HashMap::new();
    for tier in ModelTier::ALL {
        if let Some(text) =
            merge_tier_instruction(user.tier_instructions.get(&tier), ai.tier_instructions.get(&tier))
        {
            tier_instructions.insert(tier, text);
        }
    }

    let created_at: DateTime<Utc> = user.created_at.max(ai.created_at);
    let mut version = AnalystContextVersion::new(
        user.analyst_id.clone(),
        ForkType::Arbitrator,
        perspective,
        user.default_weight.max(ai.default_weight),
        user.version_number.max(ai.version_number),
        SYSTEM_ACTOR,
        created_at,
    );
    version.tier_instructions = tier_instructions;
    version.agent_journal = ai.agent_journal;
    Some(version)
}

fn merge_tier_instruction(user: Option<&String>, ai: Option<&String>) -> Option<String> {
    match (user, ai) {
        (Some(user), Some(ai)) => Some(format!(
            "## User Instructions\n{}\n\n## AI Instructions\n{}",
            user, ai
        )),
        (Some(user), None) => Some(format!("## User Instructions\n{}", user)),
        (None, Some(ai)) => Some(format!("## AI Instructions\n{}", ai)),
        (None, None) => None,
    }
}
