//! Mention classification. Pure functions, no I/O.

use std::sync::OnceLock;

use regex::Regex;

use super::{normalize_user_id, MentionType};

/// Phrases that request a token (English and Russian).
const TOKEN_CREATION_KEYWORDS: &[&str] = &[
    "create token",
    "create a token",
    "create bot",
    "create a bot",
    "create agent",
    "create an agent",
    "create virtual",
    "launch token",
    "создай токен",
    "создать токен",
    "создай бота",
    "создать бота",
    "создай агента",
    "создать агента",
    "создай виртуала",
    "создать виртуала",
];

const AFFIRMATIVE: &[&str] = &[
    "yes",
    "y",
    "yeah",
    "yep",
    "ok",
    "okay",
    "sure",
    "confirm",
    "confirmed",
    "go",
    "да",
    "ага",
    "подтверждаю",
    "давай",
];

const NEGATIVE: &[&str] = &[
    "no", "n", "nope", "cancel", "reject", "stop", "нет", "отмена", "отменить",
];

/// A yes/no answer to a pending proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Affirmative,
    Negative,
}

fn handle_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([A-Za-z0-9_]{1,32})").expect("static regex"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Remove every `@agent_handle` occurrence and collapse whitespace.
pub fn strip_handle(text: &str, agent_handle: &str) -> String {
    let agent = normalize_user_id(agent_handle);
    let stripped = handle_regex().replace_all(text, |caps: &regex::Captures| {
        if caps[1].to_lowercase() == agent {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    whitespace_regex()
        .replace_all(stripped.trim(), " ")
        .into_owned()
}

/// Classify handle-stripped mention text. Total: every input maps to a type.
pub fn classify(stripped: &str) -> MentionType {
    let text = stripped.trim();
    if text.is_empty() {
        return MentionType::Empty;
    }
    let lower = text.to_lowercase();
    if TOKEN_CREATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        MentionType::TokenCreation
    } else {
        MentionType::Question
    }
}

/// Interpret the whole text as a yes/no reply.
pub fn parse_reply(stripped: &str) -> Option<Reply> {
    let word = stripped
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c == '…')
        .trim()
        .to_lowercase();
    if AFFIRMATIVE.contains(&word.as_str()) {
        Some(Reply::Affirmative)
    } else if NEGATIVE.contains(&word.as_str()) {
        Some(Reply::Negative)
    } else {
        None
    }
}

/// First handle in `stripped` other than the author's, normalized.
pub fn extract_target(stripped: &str, author: &str, agent_handle: &str) -> Option<String> {
    let author = normalize_user_id(author);
    let agent = normalize_user_id(agent_handle);
    handle_regex()
        .captures_iter(stripped)
        .map(|caps| normalize_user_id(&caps[1]))
        .find(|h| *h != author && *h != agent)
}
