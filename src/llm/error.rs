//! LLM error classification.

use thiserror::Error;

/// Broad category of an LLM failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    RateLimit,
    Timeout,
    Network,
    Authentication,
    /// Prompt or completion exceeded the model's context window
    ContextLength,
    /// The provider answered but the content was unusable
    InvalidResponse,
    Server,
    Other,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Map an HTTP status (and body) from the provider to an error kind.
pub fn classify_http_status(status: u16, body: &str) -> LlmErrorKind {
    let lower = body.to_lowercase();
    match status {
        429 => LlmErrorKind::RateLimit,
        401 | 403 => LlmErrorKind::Authentication,
        408 | 504 => LlmErrorKind::Timeout,
        413 => LlmErrorKind::ContextLength,
        400 if lower.contains("context length") || lower.contains("maximum context") => {
            LlmErrorKind::ContextLength
        }
        500..=599 => LlmErrorKind::Server,
        _ => LlmErrorKind::Other,
    }
}
