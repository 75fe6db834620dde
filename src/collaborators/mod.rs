//! External collaborators the orchestrator depends on.
//!
//! Production wiring plugs in the LLM-backed generators from [`crate::llm`]
//! and the HTTP token issuer; tests plug in fakes.

mod http_issuer;

pub use http_issuer::HttpTokenIssuer;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cache::AnalysisKind;
use crate::error::ErrorCode;
use crate::llm::{LlmError, LlmErrorKind};

/// Failure reported by a collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Token limit exceeded: {0}")]
    TokenLimit(String),

    #[error("Unusable response: {0}")]
    InvalidResponse(String),

    #[error("Token issuance failed: {0}")]
    Issuance(String),

    #[error("{0}")]
    Other(String),
}

impl CollaboratorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RateLimited(_) => ErrorCode::RateLimitExceeded,
            Self::Timeout(_) => ErrorCode::NetworkError,
            Self::Authentication(_) => ErrorCode::AuthenticationError,
            Self::TokenLimit(_) => ErrorCode::TokenLimitExceeded,
            Self::InvalidResponse(_) | Self::Other(_) => ErrorCode::AnalysisError,
            Self::Issuance(_) => ErrorCode::ContractError,
        }
    }
}

impl From<LlmError> for CollaboratorError {
    fn from(e: LlmError) -> Self {
        let msg = e.to_string();
        match e.kind {
            LlmErrorKind::RateLimit => Self::RateLimited(msg),
            LlmErrorKind::Timeout | LlmErrorKind::Network => Self::Timeout(msg),
            LlmErrorKind::Authentication => Self::Authentication(msg),
            LlmErrorKind::ContextLength => Self::TokenLimit(msg),
            LlmErrorKind::InvalidResponse => Self::InvalidResponse(msg),
            LlmErrorKind::Server | LlmErrorKind::Other => Self::Other(msg),
        }
    }
}

/// What a generator knows about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectData {
    pub user_id: String,
    /// What the user wrote, handle stripped
    pub text: String,
}

impl SubjectData {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
        }
    }
}

/// A proposed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub description: String,
}

/// Addresses produced by a token issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub contract_address: String,
    pub pool_address: String,
    pub transaction_ref: String,
}

/// Produces personal and matching analyses.
#[async_trait]
pub trait AnalysisGenerator: Send + Sync {
    async fn generate(
        &self,
        kind: AnalysisKind,
        subject: &SubjectData,
        target: Option<&SubjectData>,
    ) -> Result<Value, CollaboratorError>;
}

/// Proposes token name/symbol/description for a user.
#[async_trait]
pub trait TokenMetadataGenerator: Send + Sync {
    async fn propose(&self, subject: &SubjectData) -> Result<TokenMetadata, CollaboratorError>;
}

/// Deploys and funds a token.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(
        &self,
        metadata: &TokenMetadata,
        creator_address: &str,
    ) -> Result<IssuedToken, CollaboratorError>;
}

pub type AnalysisGeneratorRef = Arc<dyn AnalysisGenerator>;
pub type TokenMetadataGeneratorRef = Arc<dyn TokenMetadataGenerator>;
pub type TokenIssuerRef = Arc<dyn TokenIssuer>;

/// Stand-in for a collaborator whose service is not configured. Every call
/// fails with a message naming the missing setting.
#[derive(Debug, Clone)]
pub struct Unconfigured {
    setting: &'static str,
}

impl Unconfigured {
    pub fn new(setting: &'static str) -> Self {
        Self { setting }
    }

    fn message(&self) -> String {
        format!("{} is not set", self.setting)
    }
}

#[async_trait]
impl AnalysisGenerator for Unconfigured {
    async fn generate(
        &self,
        _kind: AnalysisKind,
        _subject: &SubjectData,
        _target: Option<&SubjectData>,
    ) -> Result<Value, CollaboratorError> {
        Err(CollaboratorError::Authentication(self.message()))
    }
}

#[async_trait]
impl TokenMetadataGenerator for Unconfigured {
    async fn propose(&self, _subject: &SubjectData) -> Result<TokenMetadata, CollaboratorError> {
        Err(CollaboratorError::Authentication(self.message()))
    }
}

#[async_trait]
impl TokenIssuer for Unconfigured {
    async fn issue(
        &self,
        _metadata: &TokenMetadata,
        _creator_address: &str,
    ) -> Result<IssuedToken, CollaboratorError> {
        Err(CollaboratorError::Issuance(self.message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CollaboratorError::RateLimited("429".into()).code(),
            ErrorCode::RateLimitExceeded
        );
        assert_eq!(
            CollaboratorError::TokenLimit("ctx".into()).code(),
            ErrorCode::TokenLimitExceeded
        );
        assert_eq!(
            CollaboratorError::Other("boom".into()).code(),
            ErrorCode::AnalysisError
        );
    }

    #[tokio::test]
    async fn test_unconfigured_names_setting() {
        let missing = Unconfigured::new("TOKEN_ISSUER_URL");
        let metadata = TokenMetadata {
            name: "x".into(),
            symbol: "X".into(),
            description: String::new(),
        };
        let err = missing.issue(&metadata, "0xa").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ContractError);
        assert!(err.to_string().contains("TOKEN_ISSUER_URL"));
    }

    #[test]
    fn test_from_llm_error() {
        let err: CollaboratorError = LlmError::new(LlmErrorKind::Authentication, "bad key").into();
        assert_eq!(err.code(), ErrorCode::AuthenticationError);
    }
}
