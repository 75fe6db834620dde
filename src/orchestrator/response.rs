//! Response returned for every processed mention.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collaborators::{IssuedToken, TokenMetadata};
use crate::error::{ErrorBody, ErrorCode};
use crate::mention::MentionType;
use crate::payment::ApprovalRequest;

/// Payload of a [`MentionResponse`]. Quota and cache fields are always present,
/// even on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionData {
    #[serde(rename = "type")]
    pub mention_type: MentionType,

    /// Personal (or empty-mention) analysis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,

    /// Matching analysis between the author and a target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_result: Option<Value>,

    /// Issued token, once confirmed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<IssuedToken>,

    /// Proposed token awaiting a yes/no
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_proposal: Option<TokenMetadata>,

    /// `true` while a proposal awaits confirmation, `false` once it is resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_confirmation: Option<bool>,

    pub hits: u64,
    pub cached: bool,
    pub free_uses_left: u32,
    pub payment_required: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,

    /// Allowance the payer must grant before a paid request can go through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,
}

impl MentionData {
    pub fn new(mention_type: MentionType, free_uses_left: u32) -> Self {
        Self {
            mention_type,
            analysis: None,
            match_result: None,
            token: None,
            token_proposal: None,
            pending_confirmation: None,
            hits: 0,
            cached: false,
            free_uses_left,
            payment_required: false,
            transaction_ref: None,
            approval: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionResponse {
    pub success: bool,
    pub data: MentionData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl MentionResponse {
    pub fn ok(data: MentionData) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn fail(data: MentionData, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data,
            error: Some(ErrorBody::new(code, message)),
        }
    }

    /// A served result. A store failure met along the way rides along as a
    /// non-fatal SYSTEM_ERROR; the payload is still delivered.
    pub fn served(data: MentionData, store_failure: Option<String>) -> Self {
        Self {
            success: true,
            data,
            error: store_failure.map(|m| ErrorBody::new(ErrorCode::SystemError, m)),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}
