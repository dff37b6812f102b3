//! Deterministic prompt assembly per analyst × fork × tier.

use crate::analysts::{Analyst, AnalystContextVersion, Learning};
use crate::domain::Target;
use crate::llm::ModelTier;

use super::types::EnsembleInput;

/// A system + user prompt pair, ready for the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

const RESPONSE_CONTRACT: &str = "Respond with a single JSON object and nothing else:\n\
{\n\
  \"direction\": \"bullish\" | \"bearish\" | \"neutral\",\n\
  \"confidence\": <number between 0 and 1>,\n\
  \"reasoning\": \"<concise justification>\",\n\
  \"key_factors\": [\"...\"],\n\
  \"risks\": [\"...\"]\n\
}";

/// Build the prompt pair for one assessment. Pure: identical inputs always
/// produce identical prompts.
pub fn build_prompt(
    analyst: &Analyst,
    context: Option<&AnalystContextVersion>,
    tier: ModelTier,
    learnings: &[Learning],
    target: &Target,
    input: &EnsembleInput,
) -> PromptPair {
    let perspective = context
        .map(|c| c.perspective.as_str())
        .unwrap_or(analyst.perspective.as_str());

    let mut system = String::new();
    system.push_str(&format!(
        "You are {}, a financial analyst assessing {} ({}).\n\n{}\n",
        analyst.name, target.name, target.symbol, perspective
    ));

    if let Some(instruction) = context.and_then(|c| c.tier_instructions.get(&tier)) {
        system.push_str(&format!("\n{}\n", instruction));
    }

    if !learnings.is_empty() {
        system.push_str("\n## Learnings from past performance\n");
        for learning in learnings {
            system.push_str(&format!("- {}\n", learning.content));
        }
    }

    system.push_str(&format!("\n{}", RESPONSE_CONTRACT));

    let mut user = format!("Target: {} ({})\n", target.name, target.symbol);
    if let Some(direction) = input.direction {
        user.push_str(&format!("Upstream direction hint: {}\n", direction));
    }
    if let Some(metadata) = &input.metadata {
        if let Some(headline) = metadata.get("headline").and_then(|v| v.as_str()) {
            user.push_str(&format!("Headline: {}\n", headline));
        }
        if let Some(phrases) = metadata.get("key_phrases").and_then(|v| v.as_array()) {
            let joined: Vec<&str> = phrases.iter().filter_map(|p| p.as_str()).collect();
            if !joined.is_empty() {
                user.push_str(&format!("Key phrases: {}\n", joined.join(", ")));
            }
        }
    }
    user.push_str(&format!("\n{}\n", input.content));

    PromptPair { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysts::ForkType;
    use crate::domain::{Direction, TargetType};
    use chrono::Utc;
    use serde_json::json;

    fn fixtures() -> (Analyst, Target, EnsembleInput) {
        let analyst = Analyst::new(
            "technical-analyst",
            "Technical Analyst",
            "You read price action and momentum.",
            1.0,
            ModelTier::Silver,
        );
        let target = Target::new("u-1", "AAPL", "Apple Inc.", TargetType::Equity);
        let input = EnsembleInput::new(target.id.clone(), "Apple beat earnings estimates.")
            .with_metadata(json!({
                "headline": "Apple beats estimates",
                "key_phrases": ["earnings", "beat"],
            }))
            .with_direction(Direction::Bullish);
        (analyst, target, input)
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let (analyst, target, input) = fixtures();
        let one = build_prompt(&analyst, None, ModelTier::Silver, &[], &target, &input);
        let two = build_prompt(&analyst, None, ModelTier::Silver, &[], &target, &input);
        assert_eq!(one, two);
    }

    #[test]
    fn test_context_version_overrides_perspective() {
        let (analyst, target, input) = fixtures();
        let context = AnalystContextVersion::new(
            analyst.id.clone(),
            ForkType::Ai,
            "Evolved perspective: weight options flow heavily.",
            1.0,
            2,
            "agent",
            Utc::now(),
        )
        .with_tier_instruction(ModelTier::Gold, "Quote exact figures.");

        let pair = build_prompt(&analyst, Some(&context), ModelTier::Gold, &[], &target, &input);
        assert!(pair.system.contains("Evolved perspective"));
        assert!(!pair.system.contains("price action and momentum"));
        assert!(pair.system.contains("Quote exact figures."));

        // Instructions for a different tier stay out.
        let pair = build_prompt(&analyst, Some(&context), ModelTier::Silver, &[], &target, &input);
        assert!(!pair.system.contains("Quote exact figures."));
    }

    #[test]
    fn test_learnings_section() {
        let (analyst, target, input) = fixtures();
        let learnings = vec![Learning::new(
            analyst.id.clone(),
            None,
            "Discount single-source rumors.",
            Utc::now(),
        )];
        let pair = build_prompt(&analyst, None, ModelTier::Silver, &learnings, &target, &input);
        assert!(pair.system.contains("## Learnings from past performance"));
        assert!(pair.system.contains("- Discount single-source rumors."));

        let pair = build_prompt(&analyst, None, ModelTier::Silver, &[], &target, &input);
        assert!(!pair.system.contains("## Learnings"));
    }

    #[test]
    fn test_user_prompt_carries_metadata_and_hint() {
        let (analyst, target, input) = fixtures();
        let pair = build_prompt(&analyst, None, ModelTier::Silver, &[], &target, &input);
        assert!(pair.user.contains("Headline: Apple beats estimates"));
        assert!(pair.user.contains("Key phrases: earnings, beat"));
        assert!(pair.user.contains("Upstream direction hint: bullish"));
        assert!(pair.user.contains("Apple beat earnings estimates."));
        assert!(pair.system.contains(RESPONSE_CONTRACT));
    }
}
