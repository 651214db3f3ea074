//! Complexity classifier: heuristic scoring of a message list into
//! `{simple, moderate, complex}`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dialect::types::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

static CODE_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)```|\bfunction\b|\bclass\b|\bconst\b|\blet\b|\bimport\b").unwrap());
static ANALYTICAL_VERB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(analyze|compare|evaluate|assess|review|audit)\b").unwrap());
static COMPUTATIONAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(calculate|compute|solve|equation|prove|derive)\b").unwrap());
static STEPWISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfirst\b.*\bthen\b|\bstep\s+\d+\b|\b\d\)\s*.*\b\d\)|\bphase\s+\d+\b").unwrap()
});
static ARTIFACT_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bwrite a (story|essay|article|report)\b|\bcreate a\b|\bdesign a\b|\bbuild a\b").unwrap()
});

/// Scores the concatenation of every message's text content.
pub fn classify(messages: &[Message]) -> Complexity {
    let combined: String = messages
        .iter()
        .map(|m| m.text_content())
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();

    let mut score = 0;

    if CODE_KEYWORD.is_match(&combined) {
        score += 2;
    }
    if ANALYTICAL_VERB.is_match(&combined) {
        score += 1;
    }
    if COMPUTATIONAL.is_match(&combined) {
        score += 2;
    }
    if STEPWISE.is_match(&combined) {
        score += 1;
    }

    let len = combined.len();
    let len_units = len.div_ceil(4);
    if len_units > 2000 {
        score += 1;
    }
    if len_units > 5000 {
        score += 1;
    }

    if ARTIFACT_VERB.is_match(&combined) {
        score += 1;
    }

    if score >= 4 {
        Complexity::Complex
    } else if score >= 2 {
        Complexity::Moderate
    } else {
        Complexity::Simple
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::types::{Message, Role};

    fn msg(text: &str) -> Message {
        Message::text(Role::User, text)
    }

    #[test]
    fn plain_question_is_simple() {
        assert_eq!(classify(&[msg("What time is it?")]), Complexity::Simple);
    }

    #[test]
    fn code_and_analysis_is_moderate_or_complex() {
        let c = classify(&[msg("Please analyze this ```function foo() {}``` and compare it to the spec")]);
        assert!(matches!(c, Complexity::Moderate | Complexity::Complex));
    }

    #[test]
    fn long_stepwise_computation_is_complex() {
        let long_text = "calculate and derive the equation. ".repeat(400);
        let text = format!("First do this, then step 1) compute, step 2) solve. {long_text}");
        assert_eq!(classify(&[msg(&text)]), Complexity::Complex);
    }

    #[test]
    fn artifact_creation_adds_weight() {
        let c = classify(&[msg("Write a story about a dragon and also analyze its themes")]);
        assert!(matches!(c, Complexity::Moderate | Complexity::Complex));
    }
}
