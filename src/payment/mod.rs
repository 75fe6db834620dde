//! Payment gate - charges for paid analyses once free credit is gone.
//!
//! # Flow
//! ```text
//! 1. balance_of(payer)          -> INSUFFICIENT_BALANCE if short
//! 2. allowance(payer, spender)  -> INSUFFICIENT_ALLOWANCE (+ approval data) if short
//! 3. transfer(payer, spender)   -> transaction ref once confirmed
//! ```
//! Every ledger call is retried on transient failure. Failures come back as a
//! [`PaymentOutcome`], never as an error.

mod http;
mod ledger;
mod retry;

pub use http::HttpLedgerClient;
pub use ledger::{InMemoryLedger, LedgerClient, LedgerError};
pub use retry::RetryPolicy;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::AnalysisKind;
use crate::config::PaymentConfig;
use crate::error::ErrorCode;

/// Serialize `u128` amounts as decimal strings.
mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// What the payer must approve before the transfer can go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub spender: String,
    #[serde(with = "amount_string")]
    pub amount: u128,
    #[serde(with = "amount_string")]
    pub current_allowance: u128,
}

/// Result of one payment attempt. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub requires_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_data: Option<ApprovalRequest>,
}

impl PaymentOutcome {
    fn paid(transaction_ref: Option<String>) -> Self {
        Self {
            success: true,
            transaction_ref,
            error_kind: None,
            message: None,
            requires_approval: false,
            approval_data: None,
        }
    }

    fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_ref: None,
            error_kind: Some(code),
            message: Some(message.into()),
            requires_approval: false,
            approval_data: None,
        }
    }

    fn needs_approval(approval: ApprovalRequest) -> Self {
        Self {
            requires_approval: true,
            approval_data: Some(approval),
            ..Self::failed(
                ErrorCode::InsufficientAllowance,
                "Spending allowance too low, approval required",
            )
        }
    }
}

/// Validates and executes value transfers for paid analyses.
pub struct PaymentGate {
    ledger: Arc<dyn LedgerClient>,
    spender: String,
    matching_cost: u128,
    retry: RetryPolicy,
}

impl PaymentGate {
    pub fn new(ledger: Arc<dyn LedgerClient>, config: &PaymentConfig) -> Self {
        Self {
            ledger,
            spender: config.spender.clone(),
            matching_cost: config.matching_cost,
            retry: RetryPolicy::new(config.retry_attempts, config.retry_backoff),
        }
    }

    /// Price of one paid analysis of `kind`. Personal analysis is free.
    pub fn cost_of(&self, kind: AnalysisKind) -> u128 {
        match kind {
            AnalysisKind::Personal => 0,
            AnalysisKind::Matching => self.matching_cost,
        }
    }

    /// Charge `payer` `cost`. A successful outcome means exactly one transfer happened.
    pub async fn validate_and_process_payment(
        &self,
        payer: &str,
        cost: u128,
        kind: AnalysisKind,
    ) -> PaymentOutcome {
        if cost == 0 {
            return PaymentOutcome::paid(None);
        }

        let balance = match self
            .retry
            .run("balance_of", || self.ledger.balance_of(payer))
            .await
        {
            Ok(b) => b,
            Err(e) => return PaymentOutcome::failed(e.code(), e.to_string()),
        };
        if balance < cost {
            info!(payer = %payer, %balance, %cost, "Payment rejected: insufficient balance");
            return PaymentOutcome::failed(
                ErrorCode::InsufficientBalance,
                format!("Balance {} is below the required {}", balance, cost),
            );
        }

        let allowance = match self
            .retry
            .run("allowance", || self.ledger.allowance(payer, &self.spender))
            .await
        {
            Ok(a) => a,
            Err(e) => return PaymentOutcome::failed(e.code(), e.to_string()),
        };
        if allowance < cost {
            info!(payer = %payer, %allowance, %cost, "Payment needs approval");
            return PaymentOutcome::needs_approval(ApprovalRequest {
                spender: self.spender.clone(),
                amount: cost,
                current_allowance: allowance,
            });
        }

        // A timed-out transfer may have gone through; only retry when the
        // request never reached the ledger.
        match self
            .retry
            .run_while("transfer", LedgerError::is_unapplied, || {
                self.ledger.transfer(payer, &self.spender, cost)
            })
            .await
        {
            Ok(tx) => {
                info!(payer = %payer, kind = %kind, transaction_ref = %tx, "Payment confirmed");
                PaymentOutcome::paid(Some(tx))
            }
            Err(e) => {
                warn!(payer = %payer, kind = %kind, error = %e, "Payment transfer failed");
                PaymentOutcome::failed(e.code(), e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config(cost: u128) -> PaymentConfig {
        PaymentConfig {
            matching_cost: cost,
            spender: "treasury".to_string(),
            retry_attempts: 3,
            retry_backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_successful_payment() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_balance("alice", 10);
        ledger.approve("alice", "treasury", 10);
        let gate = PaymentGate::new(ledger.clone(), &config(4));

        let outcome = gate
            .validate_and_process_payment("alice", gate.cost_of(AnalysisKind::Matching), AnalysisKind::Matching)
            .await;
        assert!(outcome.success);
        assert!(outcome.transaction_ref.is_some());
        assert_eq!(ledger.balance("alice"), 6);
        assert_eq!(ledger.balance("treasury"), 4);
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_balance("alice", 1);
        let gate = PaymentGate::new(ledger, &config(4));

        let outcome = gate
            .validate_and_process_payment("alice", 4, AnalysisKind::Matching)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorCode::InsufficientBalance));
        assert!(!outcome.requires_approval);
    }

    #[tokio::test]
    async fn test_insufficient_allowance_returns_approval_data() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_balance("alice", 10);
        ledger.approve("alice", "treasury", 1);
        let gate = PaymentGate::new(ledger.clone(), &config(4));

        let outcome = gate
            .validate_and_process_payment("alice", 4, AnalysisKind::Matching)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorCode::InsufficientAllowance));
        assert!(outcome.requires_approval);
        assert_eq!(
            outcome.approval_data,
            Some(ApprovalRequest {
                spender: "treasury".to_string(),
                amount: 4,
                current_allowance: 1,
            })
        );
        assert_eq!(ledger.balance("alice"), 10);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["approvalData"]["amount"], "4");
    }

    #[tokio::test]
    async fn test_personal_is_free() {
        let gate = PaymentGate::new(Arc::new(InMemoryLedger::new()), &config(4));
        assert_eq!(gate.cost_of(AnalysisKind::Personal), 0);
        let outcome = gate
            .validate_and_process_payment("alice", 0, AnalysisKind::Personal)
            .await;
        assert!(outcome.success);
        assert!(outcome.transaction_ref.is_none());
    }

    struct FlakyLedger {
        balance_calls: AtomicU32,
        failures_before_success: u32,
        transfer_error: Option<LedgerError>,
        transfer_calls: AtomicU32,
    }

    #[async_trait]
    impl LedgerClient for FlakyLedger {
        async fn balance_of(&self, _address: &str) -> Result<u128, LedgerError> {
            let n = self.balance_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(LedgerError::Network("connection reset".into()))
            } else {
                Ok(100)
            }
        }

        async fn allowance(&self, _owner: &str, _spender: &str) -> Result<u128, LedgerError> {
            Ok(100)
        }

        async fn transfer(&self, _: &str, _: &str, _: u128) -> Result<String, LedgerError> {
            self.transfer_calls.fetch_add(1, Ordering::SeqCst);
            match &self.transfer_error {
                Some(e) => Err(e.clone()),
                None => Ok("0x1".to_string()),
            }
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let ledger = Arc::new(FlakyLedger {
            balance_calls: AtomicU32::new(0),
            failures_before_success: 2,
            transfer_error: None,
            transfer_calls: AtomicU32::new(0),
        });
        let gate = PaymentGate::new(ledger.clone(), &config(4));
        let outcome = gate
            .validate_and_process_payment("alice", 4, AnalysisKind::Matching)
            .await;
        assert!(outcome.success);
        assert_eq!(ledger.balance_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_classified_as_network_error() {
        let ledger = Arc::new(FlakyLedger {
            balance_calls: AtomicU32::new(0),
            failures_before_success: 10,
            transfer_error: None,
            transfer_calls: AtomicU32::new(0),
        });
        let gate = PaymentGate::new(ledger.clone(), &config(4));
        let outcome = gate
            .validate_and_process_payment("alice", 4, AnalysisKind::Matching)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorCode::NetworkError));
        assert_eq!(ledger.balance_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reverted_transfer_is_transaction_failed() {
        let ledger = Arc::new(FlakyLedger {
            balance_calls: AtomicU32::new(0),
            failures_before_success: 0,
            transfer_error: Some(LedgerError::Reverted("out of gas".into())),
            transfer_calls: AtomicU32::new(0),
        });
        let gate = PaymentGate::new(ledger, &config(4));
        let outcome = gate
            .validate_and_process_payment("alice", 4, AnalysisKind::Matching)
            .await;
        assert_eq!(outcome.error_kind, Some(ErrorCode::TransactionFailed));
    }

    #[tokio::test]
    async fn test_timed_out_transfer_is_not_retried() {
        let ledger = Arc::new(FlakyLedger {
            balance_calls: AtomicU32::new(0),
            failures_before_success: 0,
            transfer_error: Some(LedgerError::Timeout),
            transfer_calls: AtomicU32::new(0),
        });
        let gate = PaymentGate::new(ledger.clone(), &config(4));
        let outcome = gate
            .validate_and_process_payment("alice", 4, AnalysisKind::Matching)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorCode::NetworkError));
        assert_eq!(ledger.transfer_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_ledger_transfer_is_retried() {
        let ledger = Arc::new(FlakyLedger {
            balance_calls: AtomicU32::new(0),
            failures_before_success: 0,
            transfer_error: Some(LedgerError::Network("connection refused".into())),
            transfer_calls: AtomicU32::new(0),
        });
        let gate = PaymentGate::new(ledger.clone(), &config(4));
        let outcome = gate
            .validate_and_process_payment("alice", 4, AnalysisKind::Matching)
            .await;
        assert!(!outcome.success);
        assert_eq!(ledger.transfer_calls.load(Ordering::SeqCst), 3);
    }
}
