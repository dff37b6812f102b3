//! LLM gateway: tier resolution, provider dispatch, spend gating.
//!
//! Tier resolution walks target → universe → agent → built-in default and
//! yields a `{provider, model}` assignment. The usage limiter gates every
//! non-local call; denials fall back to the local provider silently, so
//! quota pressure degrades cost and quality but never availability.

mod gateway;
mod limiter;
mod provider;
mod tier;

pub use gateway::{GatewayRequest, GatewayResponse, LlmGateway};
pub use limiter::{
    estimate_tokens, estimated_output_tokens, TokenBudgetLimiter, UnlimitedUsage, UsageDecision,
    UsageLimiter, UsageReport, UsageTally,
};
pub use provider::{
    ExecutionContext, LlmProvider, LlmResponse, LocalHttpProvider, LocalProviderConfig,
    ScriptedProvider,
};
pub use tier::{
    builtin_default, LlmAssignment, ModelTier, ProviderKind, ResolutionSource, TierOverrides,
    TierResolution, TierResolver, BUILTIN_LOCAL_MODEL, DEFAULT_LLM_MODEL_ENV,
};
