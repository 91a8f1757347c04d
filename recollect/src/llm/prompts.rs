//! Prompt templates for the importance broker
//!
//! Templates use plain `format!()` interpolation so a missing variable is a
//! compile-time error.

/// System prompt describing the three retention tiers and the JSON contract.
pub const IMPORTANCE_SYSTEM_PROMPT: &str = r#"You analyze conversation statements and decide how long an assistant should remember them.

Retention tiers:
1. long_term: must be remembered permanently. Medical conditions, allergies, safety concerns, identity, relationships, major life events, trauma, phobias, defining preferences.
2. short_term: useful for the next few turns. Current tasks, plans, temporary states, recent events.
3. immediate: no lasting value. Greetings, small talk, acknowledgements, filler.

Respond with a single JSON object:
{
  "retention_level": "long_term" | "short_term" | "immediate",
  "importance_boost": integer 0-20,
  "categories": ["medical", "safety_concern", "identity", ...],
  "reasoning": "one sentence",
  "confidence": number 0.0-1.0
}

When unsure, prefer the longer retention for information that could matter later."#;

/// Build the user prompt for one statement.
///
/// `context` is rendered as pretty JSON when it carries any keys.
///
/// # Example
/// ```
/// use recollect::llm::prompts::importance_analysis_prompt;
///
/// let prompt = importance_analysis_prompt("I am terrified of flying", &serde_json::json!({}));
/// assert!(prompt.contains("terrified of flying"));
/// assert!(!prompt.contains("Context:"));
/// ```
pub fn importance_analysis_prompt(statement: &str, context: &serde_json::Value) -> String {
    let has_context = context.as_object().map(|m| !m.is_empty()).unwrap_or(false);
    let context_block = if has_context {
        format!(
            "\nContext:\n{}\n",
            serde_json::to_string_pretty(context).unwrap_or_default()
        )
    } else {
        String::new()
    };

    format!(
        r#"Analyze this conversation statement:

Statement: "{statement}"
{context_block}
Respond with valid JSON only."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_includes_context() {
        let prompt = importance_analysis_prompt(
            "My son has asthma",
            &json!({"importance": 8.0, "turn": 3}),
        );
        assert!(prompt.contains("My son has asthma"));
        assert!(prompt.contains("Context:"));
        assert!(prompt.contains("\"turn\": 3"));
    }

    #[test]
    fn test_system_prompt_names_every_tier() {
        for tier in ["long_term", "short_term", "immediate"] {
            assert!(IMPORTANCE_SYSTEM_PROMPT.contains(tier));
        }
        assert!(IMPORTANCE_SYSTEM_PROMPT.contains("importance_boost"));
    }
}
