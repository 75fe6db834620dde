//! Inbound mentions and their classification.

mod classifier;

pub use classifier::{classify, extract_target, parse_reply, strip_handle, Reply};

use serde::{Deserialize, Serialize};

/// One inbound message addressed to the agent. Consumed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionEvent {
    pub source_user_id: String,
    pub mention_text: String,
    /// Unique per inbound message
    pub correlation_id: String,
    /// Address credited as token creator and charged for paid analyses
    pub creator_address: String,
}

impl MentionEvent {
    pub fn new(
        source_user_id: impl Into<String>,
        mention_text: impl Into<String>,
        correlation_id: impl Into<String>,
        creator_address: impl Into<String>,
    ) -> Self {
        Self {
            source_user_id: source_user_id.into(),
            mention_text: mention_text.into(),
            correlation_id: correlation_id.into(),
            creator_address: creator_address.into(),
        }
    }
}

/// What a mention asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MentionType {
    TokenCreation,
    Question,
    Empty,
}

impl std::fmt::Display for MentionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenCreation => write!(f, "token_creation"),
            Self::Question => write!(f, "question"),
            Self::Empty => write!(f, "empty"),
        }
    }
}

/// Normalize a user id or handle for keying: trimmed, no `@`, lower-case.
pub fn normalize_user_id(id: &str) -> String {
    id.trim().trim_start_matches('@').to_lowercase()
}
