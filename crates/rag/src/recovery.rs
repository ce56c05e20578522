use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use project_brain_core::DoorSchedule;

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json|JSON)?").expect("valid regex"));
static OUTER_OBJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// Ways of reading JSON out of model text, tried in [`ParseStrategy::CHAIN`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// The whole cleaned text is one JSON document.
    Strict,
    /// The greedy first-`{` to last-`}` span is one JSON document.
    OutermostBraces,
}

impl ParseStrategy {
    pub const CHAIN: [ParseStrategy; 2] = [ParseStrategy::Strict, ParseStrategy::OutermostBraces];

    pub fn name(&self) -> &'static str {
        match self {
            ParseStrategy::Strict => "strict",
            ParseStrategy::OutermostBraces => "outermost_braces",
        }
    }

    pub fn attempt(&self, cleaned: &str) -> Option<Value> {
        match self {
            ParseStrategy::Strict => serde_json::from_str(cleaned).ok(),
            ParseStrategy::OutermostBraces => OUTER_OBJECT_RE
                .find(cleaned)
                .and_then(|span| serde_json::from_str(span.as_str()).ok()),
        }
    }
}

/// Removes Markdown code-fence markers and surrounding whitespace.
pub fn strip_code_fences(raw: &str) -> String {
    FENCE_RE.replace_all(raw, "").trim().to_string()
}

/// First successful strategy and its value, or `None` when nothing parses.
pub fn recover_json(raw: &str) -> Option<(ParseStrategy, Value)> {
    let cleaned = strip_code_fences(raw);
    ParseStrategy::CHAIN
        .iter()
        .find_map(|strategy| strategy.attempt(&cleaned).map(|value| (*strategy, value)))
}

/// Reads a door schedule out of untrusted model output. Never fails: anything that cannot be
/// recovered becomes the empty schedule.
pub fn recover_schedule(raw: &str) -> DoorSchedule {
    match recover_json(raw) {
        Some((strategy, value)) => {
            debug!(strategy = strategy.name(), "recovered json from model output");
            DoorSchedule::from_value(&value)
        }
        None => {
            warn!(
                preview = %preview(raw, 120),
                "model output is not json, returning empty schedule"
            );
            DoorSchedule::empty()
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use project_brain_core::DoorRecord;
    use serde_json::json;

    #[test]
    fn clean_empty_schedule_is_unchanged() {
        let schedule = recover_schedule(r#"{"doors": []}"#);
        assert_eq!(schedule, DoorSchedule::empty());
        assert_eq!(
            serde_json::to_value(&schedule).unwrap(),
            json!({"doors": []})
        );
    }

    #[test]
    fn fenced_output_is_unwrapped() {
        let raw = "```json\n{\"doors\": [{\"mark\":\"D-101\"}]}\n```";
        let schedule = recover_schedule(raw);
        assert_eq!(schedule.doors, vec![DoorRecord::with_mark("D-101")]);
        assert_eq!(
            recover_json(raw).map(|(strategy, _)| strategy),
            Some(ParseStrategy::Strict)
        );
    }

    #[test]
    fn plain_text_degrades_to_empty() {
        assert!(recover_json("not json at all").is_none());
        assert_eq!(recover_schedule("not json at all"), DoorSchedule::empty());
        assert_eq!(recover_schedule(""), DoorSchedule::empty());
    }

    #[test]
    fn embedded_object_is_extracted_from_chatter() {
        let raw = r#"Here is the result: {"doors": [{"mark":"D-200"}]} Thanks!"#;
        let (strategy, _) = recover_json(raw).unwrap();
        assert_eq!(strategy, ParseStrategy::OutermostBraces);
        let schedule = recover_schedule(raw);
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.doors[0].mark.as_deref(), Some("D-200"));
    }

    #[test]
    fn missing_doors_key_is_empty() {
        assert!(recover_schedule(r#"{"rows": [{"mark": "D-1"}]}"#).is_empty());
    }

    #[test]
    fn unbalanced_braces_degrade_to_empty() {
        let raw = r#"Result: {"doors": [{"mark": "D-300"}"#;
        assert!(recover_json(raw).is_none());
        assert!(recover_schedule(raw).is_empty());
    }

    #[test]
    fn fence_with_prose_uses_brace_span() {
        let raw = "Sure!\n```json\n{\"doors\": [{\"mark\": \"D-401\", \"fire_rating\": \"1 HR\"}]}\n```\nLet me know.";
        let schedule = recover_schedule(raw);
        assert_eq!(schedule.doors[0].fire_rating.as_deref(), Some("1 HR"));
    }
}
