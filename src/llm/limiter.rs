//! Usage limiting and labeled token accounting.
//!
//! The limiter gates spend per universe before a call goes out; the gateway
//! falls back to the local provider on denial instead of failing. Local
//! calls never count toward budgets or tallies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use super::tier::ProviderKind;

/// Estimate input tokens for a prompt pair: `ceil(chars / 4)`.
pub fn estimate_tokens(system_prompt: &str, user_prompt: &str) -> u64 {
    let chars = (system_prompt.len() + user_prompt.len()) as u64;
    chars.div_ceil(4)
}

/// Accounting assumption: output is 50% of input.
pub fn estimated_output_tokens(input_tokens: u64) -> u64 {
    input_tokens / 2
}

/// Verdict from the limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDecision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UsageDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Running tally for one attribution label, provider or universe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTally {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub request_count: u64,
}

impl UsageTally {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    fn add(&mut self, input: u64, output: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
        self.request_count += 1;
    }
}

/// Aggregated usage report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub total: UsageTally,
    pub by_label: HashMap<String, UsageTally>,
    pub by_provider: HashMap<String, UsageTally>,
    pub by_universe: HashMap<String, UsageTally>,
}

/// Gate + accounting contract consulted by the gateway.
pub trait UsageLimiter: Send + Sync {
    /// May this universe spend `estimated_tokens` against `provider`?
    fn can_use_tokens(
        &self,
        universe_id: &str,
        estimated_tokens: u64,
        provider: ProviderKind,
    ) -> UsageDecision;

    /// Record a completed call under `{operation}:{analyst_slug}:{fork}`.
    /// Implementations ignore local-provider calls.
    fn record_usage(
        &self,
        universe_id: &str,
        label: &str,
        provider: ProviderKind,
        input_tokens: u64,
        output_tokens: u64,
    );

    /// Current usage report.
    fn report(&self) -> UsageReport;
}

/// Token-budget limiter with a per-universe ceiling.
pub struct TokenBudgetLimiter {
    default_budget: u64,
    universe_budgets: HashMap<String, u64>,
    state: Mutex<LimiterState>,
}

#[derive(Default)]
struct LimiterState {
    spent_by_universe: HashMap<String, u64>,
    report: UsageReport,
}

impl TokenBudgetLimiter {
    /// Budget is total (input + assumed output) tokens per universe.
    pub fn new(default_budget: u64) -> Self {
        Self {
            default_budget,
            universe_budgets: HashMap::new(),
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn with_universe_budget(mut self, universe_id: impl Into<String>, budget: u64) -> Self {
        self.universe_budgets.insert(universe_id.into(), budget);
        self
    }

    fn budget_for(&self, universe_id: &str) -> u64 {
        self.universe_budgets
            .get(universe_id)
            .copied()
            .unwrap_or(self.default_budget)
    }
}

impl UsageLimiter for TokenBudgetLimiter {
    fn can_use_tokens(
        &self,
        universe_id: &str,
        estimated_tokens: u64,
        provider: ProviderKind,
    ) -> UsageDecision {
        if provider.is_local() {
            return UsageDecision::allow();
        }

        let budget = self.budget_for(universe_id);
        let projected = estimated_tokens + estimated_output_tokens(estimated_tokens);
        let spent = {
            let state = self.state.lock().unwrap();
            state
                .spent_by_universe
                .get(universe_id)
                .copied()
                .unwrap_or(0)
        };

        if spent + projected > budget {
            UsageDecision::deny(format!(
                "universe {} over budget: spent {} + projected {} > {}",
                universe_id, spent, projected, budget
            ))
        } else {
            UsageDecision::allow()
        }
    }

    fn record_usage(
        &self,
        universe_id: &str,
        label: &str,
        provider: ProviderKind,
        input_tokens: u64,
        output_tokens: u64,
    ) {
        // Local calls are free and invisible to accounting.
        if provider.is_local() {
            return;
        }

        let mut state = self.state.lock().unwrap();
        *state
            .spent_by_universe
            .entry(universe_id.to_string())
            .or_insert(0) += input_tokens + output_tokens;

        state.report.total.add(input_tokens, output_tokens);
        state
            .report
            .by_label
            .entry(label.to_string())
            .or_default()
            .add(input_tokens, output_tokens);
        state
            .report
            .by_provider
            .entry(provider.to_string())
            .or_default()
            .add(input_tokens, output_tokens);
        state
            .report
            .by_universe
            .entry(universe_id.to_string())
            .or_default()
            .add(input_tokens, output_tokens);
    }

    fn report(&self) -> UsageReport {
        self.state.lock().unwrap().report.clone()
    }
}

/// Limiter that never denies. Still keeps the labeled tally.
pub struct UnlimitedUsage {
    state: Mutex<UsageReport>,
}

impl UnlimitedUsage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(UsageReport::default()),
        }
    }
}

impl Default for UnlimitedUsage {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageLimiter for UnlimitedUsage {
    fn can_use_tokens(
        &self,
        _universe_id: &str,
        _estimated_tokens: u64,
        _provider: ProviderKind,
    ) -> UsageDecision {
        UsageDecision::allow()
    }

    fn record_usage(
        &self,
        universe_id: &str,
        label: &str,
        provider: ProviderKind,
        input_tokens: u64,
        output_tokens: u64,
    ) {
        if provider.is_local() {
            return;
        }
        let mut report = self.state.lock().unwrap();
        report.total.add(input_tokens, output_tokens);
        report
            .by_label
            .entry(label.to_string())
            .or_default()
            .add(input_tokens, output_tokens);
        report
            .by_provider
            .entry(provider.to_string())
            .or_default()
            .add(input_tokens, output_tokens);
        report
            .by_universe
            .entry(universe_id.to_string())
            .or_default()
            .add(input_tokens, output_tokens);
    }

    fn report(&self) -> UsageReport {
        self.state.lock().unwrap().clone()
    }
}
