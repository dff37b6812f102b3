//! Tolerant parsing of analyst LLM output.
//!
//! Analysts are asked for a JSON object but routinely wrap it in prose or
//! fences. The parser extracts the first balanced `{…}` substring and
//! recognizes the contracted keys; anything unparseable degrades to a
//! neutral assessment carrying the raw text as reasoning.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::Direction;

/// Structured fields recovered from one analyst response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAssessment {
    pub direction: Direction,
    pub confidence: f64,
    pub reasoning: String,
    pub key_factors: Vec<String>,
    pub risks: Vec<String>,
    /// False when the degrade path produced the default.
    pub parsed: bool,
}

#[derive(Debug, Deserialize)]
struct RawAssessment {
    direction: Option<Value>,
    confidence: Option<Value>,
    reasoning: Option<String>,
    #[serde(default)]
    key_factors: Vec<String>,
    #[serde(default)]
    risks: Vec<String>,
}

/// Extract the first balanced `{…}` substring, string-literal aware.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse one analyst response, degrading to `{neutral, 0.5, raw}` on any
/// failure.
pub fn parse_assessment(raw: &str) -> ParsedAssessment {
    let fallback = || ParsedAssessment {
        direction: Direction::Neutral,
        confidence: 0.5,
        reasoning: raw.trim().to_string(),
        key_factors: Vec::new(),
        risks: Vec::new(),
        parsed: false,
    };

    let Some(json) = extract_json_object(raw) else {
        return fallback();
    };
    let Ok(parsed) = serde_json::from_str::<RawAssessment>(json) else {
        return fallback();
    };

    let direction = match &parsed.direction {
        Some(Value::String(s)) => Direction::from_loose(s),
        _ => Direction::Neutral,
    };

    let confidence = match &parsed.confidence {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.5),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.5),
        _ => 0.5,
    }
    .clamp(0.0, 1.0);

    let reasoning = parsed
        .reasoning
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| raw.trim().to_string());

    ParsedAssessment {
        direction,
        confidence,
        reasoning,
        key_factors: parsed.key_factors,
        risks: parsed.risks,
        parsed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extracts_object_from_prose() {
        let raw = r#"Here is my take:
```json
{"direction": "bullish", "confidence": 0.82, "reasoning": "strong beat"}
```
Hope that helps."#;
        let parsed = parse_assessment(raw);
        assert!(parsed.parsed);
        assert_eq!(parsed.direction, Direction::Bullish);
        assert_eq!(parsed.confidence, 0.82);
        assert_eq!(parsed.reasoning, "strong beat");
    }

    #[test]
    fn test_nested_braces_and_strings() {
        let raw = r#"{"direction": "down", "confidence": 0.6, "reasoning": "watch the {macro} backdrop \"closely\"", "key_factors": ["rates"], "risks": ["reversal"]}"#;
        let parsed = parse_assessment(raw);
        assert!(parsed.parsed);
        assert_eq!(parsed.direction, Direction::Bearish);
        assert_eq!(parsed.key_factors, vec!["rates"]);
        assert_eq!(parsed.risks, vec!["reversal"]);
    }

    #[test]
    fn test_confidence_clamped() {
        let parsed = parse_assessment(r#"{"direction": "up", "confidence": 1.8, "reasoning": "x"}"#);
        assert_eq!(parsed.confidence, 1.0);

        let parsed = parse_assessment(r#"{"direction": "up", "confidence": -2, "reasoning": "x"}"#);
        assert_eq!(parsed.confidence, 0.0);
    }

    #[test]
    fn test_confidence_as_string() {
        let parsed = parse_assessment(r#"{"direction": "up", "confidence": "0.7", "reasoning": "x"}"#);
        assert_eq!(parsed.confidence, 0.7);
    }

    #[test]
    fn test_degrades_on_no_json() {
        let parsed = parse_assessment("I cannot assess this article.");
        assert!(!parsed.parsed);
        assert_eq!(parsed.direction, Direction::Neutral);
        assert_eq!(parsed.confidence, 0.5);
        assert_eq!(parsed.reasoning, "I cannot assess this article.");
    }

    #[test]
    fn test_degrades_on_unbalanced_json() {
        let parsed = parse_assessment(r#"{"direction": "bullish", "confidence": 0.9"#);
        assert!(!parsed.parsed);
        assert_eq!(parsed.direction, Direction::Neutral);
    }

    #[test]
    fn test_missing_keys_default() {
        let parsed = parse_assessment(r#"{"note": "unrelated"}"#);
        assert!(parsed.parsed);
        assert_eq!(parsed.direction, Direction::Neutral);
        assert_eq!(parsed.confidence, 0.5);
    }

    #[test]
    fn test_synonym_normalization_at_ingress() {
        for (raw, expected) in [
            ("buy", Direction::Bullish),
            ("LONG", Direction::Bullish),
            ("sell", Direction::Bearish),
            ("short", Direction::Bearish),
            ("hold", Direction::Neutral),
        ] {
            let parsed = parse_assessment(&format!(
                r#"{{"direction": "{raw}", "confidence": 0.5, "reasoning": "x"}}"#
            ));
            assert_eq!(parsed.direction, expected, "raw direction {raw}");
        }
    }
}
