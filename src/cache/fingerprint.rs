//! Deterministic keys for cacheable (and possibly billable) computations.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::mention::normalize_user_id;

/// Kind of analysis a fingerprint identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Analysis of the mentioning user alone. Never billed.
    Personal,
    /// Compatibility between the mentioning user and a target. Quota-gated.
    Matching,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Matching => "matching",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key derived from (user, kind, target?, empty-tag?).
///
/// `raw` is the readable form; `key` is its hex SHA-256 and is what gets stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    kind: AnalysisKind,
    raw: String,
    key: String,
}

impl Fingerprint {
    pub fn new(
        user_id: &str,
        kind: AnalysisKind,
        target_id: Option<&str>,
        empty_tag: Option<&str>,
    ) -> Self {
        let target = target_id.map(normalize_user_id);
        let raw = format!(
            "{}|{}|{}|{}",
            kind,
            normalize_user_id(user_id),
            target.as_deref().unwrap_or("-"),
            empty_tag.map(|t| format!("empty:{}", t)).as_deref().unwrap_or("-"),
        );
        let key = hex::encode(Sha256::digest(raw.as_bytes()));
        Self { kind, raw, key }
    }

    /// Personal analysis for a non-empty question.
    pub fn personal(user_id: &str) -> Self {
        Self::new(user_id, AnalysisKind::Personal, None, None)
    }

    /// Directed matching analysis `user_id -> target_id`.
    pub fn matching(user_id: &str, target_id: &str) -> Self {
        Self::new(user_id, AnalysisKind::Matching, Some(target_id), None)
    }

    /// Empty mention, namespaced by correlation id so every message gets its own entry.
    pub fn empty(user_id: &str, correlation_id: &str) -> Self {
        Self::new(user_id, AnalysisKind::Personal, None, Some(correlation_id))
    }

    pub fn kind(&self) -> AnalysisKind {
        self.kind
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key[..12])
    }
}
