//! Ensemble engine: fans analyst × fork jobs out through the gateway and
//! aggregates the surviving assessments.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::analysts::{Analyst, AnalystRegistry, ForkType};
use crate::config::EnsembleOptions;
use crate::domain::Target;
use crate::error::{Error, Result};
use crate::llm::{GatewayRequest, LlmGateway};
use crate::repo::LearningRepository;

use super::aggregate::{aggregate, WeightedVote};
use super::parse::parse_assessment;
use super::prompt::build_prompt;
use super::types::{
    Assessment, EnsembleInput, EnsembleResult, ForkAgreement, ThreeWayForkResult,
};

/// Runs analyst ensembles over one or more forks.
pub struct EnsembleEngine {
    gateway: Arc<LlmGateway>,
    registry: Arc<AnalystRegistry>,
    learnings: Arc<dyn LearningRepository>,
}

impl EnsembleEngine {
    pub fn new(
        gateway: Arc<LlmGateway>,
        registry: Arc<AnalystRegistry>,
        learnings: Arc<dyn LearningRepository>,
    ) -> Self {
        Self {
            gateway,
            registry,
            learnings,
        }
    }

    /// Run the ensemble over the forks configured in `options`
    /// (single `user` fork by default).
    ///
    /// Individual analyst failures are logged and skipped; the run fails
    /// only when every analyst fails or no analyst is active.
    pub async fn run_ensemble(
        &self,
        target: &Target,
        input: &EnsembleInput,
        options: &EnsembleOptions,
        operation: &str,
    ) -> Result<EnsembleResult> {
        let analysts = self.registry.get_active_analysts(&target.id).await?;
        if analysts.is_empty() {
            return Err(Error::validation(format!(
                "no active analysts for target {}",
                target.id
            )));
        }

        let forks: Vec<ForkType> = if options.fork_types.is_empty() {
            vec![ForkType::User]
        } else {
            options.fork_types.clone()
        };

        let (assessments, errors) = self
            .assess_all(target, input, options, &analysts, &forks, operation)
            .await;
        if assessments.is_empty() {
            return Err(Error::service(
                "ensemble",
                format!("all analysts failed: {}", errors.join("; ")),
            ));
        }

        let votes: Vec<WeightedVote> = assessments
            .iter()
            .filter(|a| !a.is_paper_only)
            .map(WeightedVote::from)
            .collect();
        let aggregated = aggregate(options.aggregation_method, &votes);

        Ok(EnsembleResult {
            target_id: target.id.clone(),
            assessments,
            aggregated,
            errors,
        })
    }

    /// Run every analyst under the user, ai and arbitrator forks and report
    /// cross-fork agreement.
    pub async fn run_three_way_fork_ensemble(
        &self,
        target: &Target,
        input: &EnsembleInput,
        options: &EnsembleOptions,
        operation: &str,
    ) -> Result<ThreeWayForkResult> {
        let analysts = self.registry.get_active_analysts(&target.id).await?;
        if analysts.is_empty() {
            return Err(Error::validation(format!(
                "no active analysts for target {}",
                target.id
            )));
        }

        let (assessments, errors) = self
            .assess_all(target, input, options, &analysts, &ForkType::ALL, operation)
            .await;
        if assessments.is_empty() {
            return Err(Error::service(
                "ensemble",
                format!("all analysts failed: {}", errors.join("; ")),
            ));
        }

        let user = self.fork_result(target, &assessments, &errors, options, ForkType::User);
        let ai = self.fork_result(target, &assessments, &errors, options, ForkType::Ai);
        let arbitrator =
            self.fork_result(target, &assessments, &errors, options, ForkType::Arbitrator);

        let metadata = ForkAgreement {
            user_vs_ai_agreement: agreement_fraction(&user.assessments, &ai.assessments),
            arbitrator_agrees_with_user: agreement_fraction(
                &arbitrator.assessments,
                &user.assessments,
            ),
            arbitrator_agrees_with_ai: agreement_fraction(&arbitrator.assessments, &ai.assessments),
        };

        Ok(ThreeWayForkResult {
            user,
            ai,
            arbitrator,
            metadata,
        })
    }

    fn fork_result(
        &self,
        target: &Target,
        assessments: &[Assessment],
        errors: &[String],
        options: &EnsembleOptions,
        fork: ForkType,
    ) -> EnsembleResult {
        let fork_assessments: Vec<Assessment> = assessments
            .iter()
            .filter(|a| a.fork_type == fork)
            .cloned()
            .collect();
        let votes: Vec<WeightedVote> = fork_assessments
            .iter()
            .filter(|a| !a.is_paper_only)
            .map(WeightedVote::from)
            .collect();
        let aggregated = aggregate(options.aggregation_method, &votes);
        let fork_tag = format!("[{}]", fork);
        EnsembleResult {
            target_id: target.id.clone(),
            assessments: fork_assessments,
            aggregated,
            errors: errors
                .iter()
                .filter(|e| e.contains(&fork_tag))
                .cloned()
                .collect(),
        }
    }

    /// Bounded fan-out over analyst × fork jobs. Results keep job order;
    /// failures collapse into error strings without short-circuiting.
    async fn assess_all(
        &self,
        target: &Target,
        input: &EnsembleInput,
        options: &EnsembleOptions,
        analysts: &[Analyst],
        forks: &[ForkType],
        operation: &str,
    ) -> (Vec<Assessment>, Vec<String>) {
        let semaphore = Arc::new(Semaphore::new(options.max_parallel));

        let jobs = analysts.iter().flat_map(|analyst| {
            forks.iter().map(move |fork| (analyst, *fork))
        });

        let futures = jobs.map(|(analyst, fork)| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.assess_one(target, input, options, analyst, fork, operation)
                    .await
                    .map_err(|error| {
                        warn!(
                            analyst = %analyst.slug,
                            %fork,
                            %error,
                            "analyst assessment failed, skipping"
                        );
                        format!("{} [{}]: {}", analyst.slug, fork, error)
                    })
            }
        });

        let mut assessments = Vec::new();
        let mut errors = Vec::new();
        for outcome in join_all(futures).await {
            match outcome {
                Ok(assessment) => assessments.push(assessment),
                Err(error) => errors.push(error),
            }
        }
        (assessments, errors)
    }

    async fn assess_one(
        &self,
        target: &Target,
        input: &EnsembleInput,
        options: &EnsembleOptions,
        analyst: &Analyst,
        fork: ForkType,
        operation: &str,
    ) -> Result<Assessment> {
        let context = self
            .registry
            .get_current_context_version(&analyst.id, fork)
            .await?;

        let learnings = if fork.uses_learnings() {
            self.learnings
                .find_for_analyst(&analyst.id, Some(&target.id))
                .await?
        } else {
            Vec::new()
        };

        let base_weight = options.weight_for(
            &analyst.slug,
            context
                .as_ref()
                .map(|c| c.default_weight)
                .unwrap_or(analyst.default_weight),
        );

        let mut effective_weight = base_weight;
        let mut is_paper_only = false;
        if fork.applies_motivation() {
            if analyst.performance_status.is_suspended() {
                is_paper_only = true;
            } else {
                effective_weight *= analyst.performance_status.motivation_factor();
            }
        }

        let tier = options.tier_preference.tier_for(analyst.tier);
        let prompts = build_prompt(analyst, context.as_ref(), tier, &learnings, target, input);

        let response = self
            .gateway
            .generate(GatewayRequest {
                system_prompt: &prompts.system,
                user_prompt: &prompts.user,
                tier,
                target_overrides: target.llm_overrides.as_ref(),
                universe_id: &target.universe_id,
                operation,
                analyst_slug: &analyst.slug,
                fork,
            })
            .await?;

        let parsed = parse_assessment(&response.content);
        if !parsed.parsed {
            debug!(analyst = %analyst.slug, %fork, "unparseable response, degraded to neutral");
        }

        Ok(Assessment {
            analyst: analyst.slug.clone(),
            tier,
            direction: parsed.direction,
            confidence: parsed.confidence,
            reasoning: parsed.reasoning,
            key_factors: parsed.key_factors,
            risks: parsed.risks,
            learnings_applied: learnings.iter().map(|l| l.id.clone()).collect(),
            fork_type: fork,
            context_version_id: context.map(|c| c.id),
            is_paper_only,
            effective_weight,
            provider: response.provider,
            model: response.model,
            used_fallback: response.used_fallback,
        })
    }
}

/// Fraction of analysts present in BOTH sets whose directions match.
/// No overlap yields 0.
pub fn agreement_fraction(left: &[Assessment], right: &[Assessment]) -> f64 {
    let mut shared = 0usize;
    let mut matching = 0usize;
    for a in left {
        if let Some(b) = right.iter().find(|b| b.analyst == a.analyst) {
            shared += 1;
            if a.direction == b.direction {
                matching += 1;
            }
        }
    }
    if shared == 0 {
        0.0
    } else {
        matching as f64 / shared as f64
    }
}
