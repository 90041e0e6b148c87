//! Typed data contracts for structured generation output.
//!
//! A structured result is deserialized into its contract type and then checked
//! with [`Contract::check`]. Anything that fails is rejected as malformed
//! output; nothing is coerced.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

use super::error::LlmError;

/// Expected shape of a structured generation result.
pub trait Contract: DeserializeOwned {
    /// Human-readable name used in prompts and errors.
    const NAME: &'static str;

    /// Semantic checks beyond what deserialization enforces.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid regex"))
}

/// Pull the JSON object out of a model response.
///
/// Accepts bare JSON, fenced code blocks, or JSON surrounded by prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    if let Some(inner) = fence_regex().captures(trimmed).and_then(|c| c.get(1)) {
        let inner = inner.as_str().trim();
        if inner.starts_with('{') {
            return Some(inner);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Parse and check a structured response.
pub(crate) fn parse_contract<T: Contract>(text: &str) -> Result<T, LlmError> {
    let json = extract_json(text)
        .ok_or_else(|| LlmError::malformed(format!("{}: no JSON object in response", T::NAME)))?;
    let value: T = serde_json::from_str(json)
        .map_err(|e| LlmError::malformed(format!("{}: {}", T::NAME, e)))?;
    value
        .check()
        .map_err(|reason| LlmError::malformed(format!("{}: {}", T::NAME, reason)))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmErrorKind;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Score {
        value: f64,
    }

    impl Contract for Score {
        const NAME: &'static str = "Score";

        fn check(&self) -> Result<(), String> {
            if (0.0..=1.0).contains(&self.value) {
                Ok(())
            } else {
                Err(format!("value {} outside [0, 1]", self.value))
            }
        }
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json(r#"{"a":1}"#), Some(r#"{"a":1}"#));
        assert_eq!(
            extract_json("```json\n{\"a\": 1}\n```"),
            Some("{\"a\": 1}")
        );
        assert_eq!(
            extract_json("Here you go: {\"a\": 1} hope it helps"),
            Some("{\"a\": 1}")
        );
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_contract_rejects_out_of_range() {
        let err = parse_contract::<Score>(r#"{"value": 1.4}"#).unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Malformed);

        let ok = parse_contract::<Score>(r#"{"value": 0.4}"#).unwrap();
        assert!((ok.value - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_contract_rejects_missing_fields() {
        let err = parse_contract::<Score>(r#"{"other": 1}"#).unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Malformed);
    }
}
