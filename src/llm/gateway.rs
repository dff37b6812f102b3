//! LLM gateway: tier resolution, spend gating, dispatch and accounting.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::analysts::ForkType;
use crate::error::{Error, Result};
use crate::resilience::{Retrier, RetryConfig};

use super::limiter::{estimate_tokens, estimated_output_tokens, UsageLimiter};
use super::provider::{ExecutionContext, LlmProvider, LlmResponse};
use super::tier::{LlmAssignment, ModelTier, ProviderKind, TierOverrides, TierResolver};

/// One gateway call.
#[derive(Debug, Clone)]
pub struct GatewayRequest<'a> {
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub tier: ModelTier,
    /// Per-target override table, highest precedence.
    pub target_overrides: Option<&'a TierOverrides>,
    pub universe_id: &'a str,
    /// Operation name for attribution (`tier1.scan`, `tier3.generate`, …).
    pub operation: &'a str,
    pub analyst_slug: &'a str,
    pub fork: ForkType,
}

/// Gateway result with attribution details for the audit trail.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub content: String,
    pub provider: ProviderKind,
    pub model: String,
    pub tier: ModelTier,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
    /// True when the quota gate swapped the call to the local provider.
    pub used_fallback: bool,
}

/// Dispatches prompts to the resolved provider, behind the resilience layer
/// and the usage limiter.
pub struct LlmGateway {
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
    resolver: TierResolver,
    limiter: Arc<dyn UsageLimiter>,
    retrier: Retrier,
    retry_config: RetryConfig,
}

impl LlmGateway {
    pub fn new(
        resolver: TierResolver,
        limiter: Arc<dyn UsageLimiter>,
        retrier: Retrier,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            providers: HashMap::new(),
            resolver,
            limiter,
            retrier,
            retry_config,
        }
    }

    /// Register a provider implementation.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn limiter(&self) -> &Arc<dyn UsageLimiter> {
        &self.limiter
    }

    /// Resolve, gate, dispatch and account for one prompt.
    ///
    /// A quota denial for a non-local provider silently swaps the call to
    /// the local fallback; the caller sees an ordinary response. Local
    /// calls are excluded from usage accounting.
    pub async fn generate(&self, request: GatewayRequest<'_>) -> Result<GatewayResponse> {
        let resolution = self.resolver.resolve(
            request.tier,
            request.target_overrides,
            request.universe_id,
        );
        let estimated_input = estimate_tokens(request.system_prompt, request.user_prompt);

        let mut assignment = resolution.assignment;
        let mut used_fallback = false;
        if !assignment.provider.is_local() {
            let decision =
                self.limiter
                    .can_use_tokens(request.universe_id, estimated_input, assignment.provider);
            if !decision.allowed {
                debug!(
                    universe = request.universe_id,
                    provider = %assignment.provider,
                    reason = decision.reason.as_deref().unwrap_or(""),
                    "usage limit reached, falling back to local provider"
                );
                assignment = LlmAssignment::local_fallback();
                used_fallback = true;
            }
        }

        let provider = self.providers.get(&assignment.provider).ok_or_else(|| {
            Error::Config(format!("no provider registered for '{}'", assignment.provider))
        })?;

        let label = format!(
            "{}:{}:{}",
            request.operation, request.analyst_slug, request.fork
        );
        let ctx = ExecutionContext::new(assignment.model.clone(), label.clone());
        let service = format!("llm:{}", assignment.provider);

        let response: LlmResponse = self
            .retrier
            .execute_with_retry(&service, &self.retry_config, || {
                provider.generate_response(request.system_prompt, request.user_prompt, &ctx)
            })
            .await?;

        let estimated_output = estimated_output_tokens(estimated_input);
        self.limiter.record_usage(
            request.universe_id,
            &label,
            assignment.provider,
            estimated_input,
            estimated_output,
        );

        Ok(GatewayResponse {
            content: response.content,
            provider: assignment.provider,
            model: response.model,
            tier: request.tier,
            estimated_input_tokens: estimated_input,
            estimated_output_tokens: estimated_output,
            used_fallback,
        })
    }
}
