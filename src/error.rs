//! Error codes reported to the request layer.

use serde::{Deserialize, Serialize};

/// Every failure the gate can report, serialized in SCREAMING_SNAKE_CASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InsufficientBalance,
    InsufficientAllowance,
    NetworkError,
    TransactionFailed,
    ContractError,
    AnalysisError,
    RateLimitExceeded,
    TokenLimitExceeded,
    AuthenticationError,
    PaymentError,
    SystemError,
    TokenConfirmationTimeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::InsufficientAllowance => "INSUFFICIENT_ALLOWANCE",
            Self::NetworkError => "NETWORK_ERROR",
            Self::TransactionFailed => "TRANSACTION_FAILED",
            Self::ContractError => "CONTRACT_ERROR",
            Self::AnalysisError => "ANALYSIS_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::TokenLimitExceeded => "TOKEN_LIMIT_EXCEEDED",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::PaymentError => "PAYMENT_ERROR",
            Self::SystemError => "SYSTEM_ERROR",
            Self::TokenConfirmationTimeout => "TOKEN_CONFIRMATION_TIMEOUT",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried in a response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::TokenConfirmationTimeout).unwrap();
        assert_eq!(json, "\"TOKEN_CONFIRMATION_TIMEOUT\"");

        let code: ErrorCode = serde_json::from_str("\"INSUFFICIENT_ALLOWANCE\"").unwrap();
        assert_eq!(code, ErrorCode::InsufficientAllowance);
    }

    #[test]
    fn test_display_matches_wire_name() {
        for code in [
            ErrorCode::NetworkError,
            ErrorCode::SystemError,
            ErrorCode::RateLimitExceeded,
        ] {
            let wire = serde_json::to_string(&code).unwrap();
            assert_eq!(wire.trim_matches('"'), code.to_string());
        }
    }
}
