//! Keyword and relevance filtering for Tier-1 ingestion.

use regex::Regex;

use crate::domain::{Article, Target};

/// Apply the subscription keyword filter over title + body,
/// case-insensitively. Exclusions win over inclusions; a non-empty include
/// list requires at least one match.
pub fn passes_keyword_filter(article: &Article, include: &[String], exclude: &[String]) -> bool {
    let haystack = format!("{}\n{}", article.title, article.body()).to_lowercase();

    if exclude
        .iter()
        .any(|kw| !kw.is_empty() && haystack.contains(&kw.to_lowercase()))
    {
        return false;
    }
    if !include.is_empty() {
        return include
            .iter()
            .any(|kw| !kw.is_empty() && haystack.contains(&kw.to_lowercase()));
    }
    true
}

/// Test articles route only to test targets, and test targets only ingest
/// test articles.
pub fn passes_test_routing(article: &Article, target: &Target) -> bool {
    article.is_test == target.is_test()
}

fn symbol_mentioned(symbol: &str, text: &str) -> bool {
    if symbol.is_empty() {
        return false;
    }
    // Token-bounded match so AAPL does not fire on AAPLX.
    let pattern = format!(
        "(^|[^A-Za-z0-9]){}([^A-Za-z0-9]|$)",
        regex::escape(symbol)
    );
    Regex::new(&pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Relevance: the symbol (token-bounded) or the target name
/// (case-insensitive) appears in title or content.
pub fn is_relevant(article: &Article, target: &Target) -> bool {
    let text = format!("{}\n{}", article.title, article.body());

    if symbol_mentioned(&target.symbol, &text)
        || symbol_mentioned(target.production_symbol(), &text)
    {
        return true;
    }

    if !target.name.is_empty() {
        let lowered = text.to_lowercase();
        if lowered.contains(&target.name.to_lowercase()) {
            return true;
        }
    }
    false
}
