//! Ledger client abstraction and an in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorCode;

/// Errors from a ledger backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Could not reach the ledger.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Ledger request timed out")]
    Timeout,

    /// The transfer was submitted and rejected.
    #[error("Transaction reverted: {0}")]
    Reverted(String),

    /// The ledger answered with something we cannot use.
    #[error("Contract error: {0}")]
    Contract(String),
}

impl LedgerError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }

    /// Failures that leave no doubt the call never took effect. A timeout
    /// does not qualify: the ledger may have applied it.
    pub fn is_unapplied(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Network(_) | Self::Timeout => ErrorCode::NetworkError,
            Self::Reverted(_) => ErrorCode::TransactionFailed,
            Self::Contract(_) => ErrorCode::ContractError,
        }
    }
}

/// Token ledger used to charge for paid analyses.
///
/// Amounts are in the ledger's smallest unit.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn balance_of(&self, address: &str) -> Result<u128, LedgerError>;

    /// How much `spender` may move out of `owner`'s balance.
    async fn allowance(&self, owner: &str, spender: &str) -> Result<u128, LedgerError>;

    /// Move `amount` from `from` to `spender` against the allowance.
    /// Returns the transaction reference once the transfer is confirmed.
    async fn transfer(&self, from: &str, spender: &str, amount: u128)
        -> Result<String, LedgerError>;
}

#[derive(Default)]
struct Books {
    balances: HashMap<String, u128>,
    allowances: HashMap<(String, String), u128>,
}

/// Balances and allowances held in memory.
#[derive(Default)]
pub struct InMemoryLedger {
    books: Mutex<Books>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, address: &str, amount: u128) {
        let mut books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        books.balances.insert(address.to_string(), amount);
    }

    /// Grant `spender` an allowance over `owner`'s balance.
    pub fn approve(&self, owner: &str, spender: &str, amount: u128) {
        let mut books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        books
            .allowances
            .insert((owner.to_string(), spender.to_string()), amount);
    }

    pub fn balance(&self, address: &str) -> u128 {
        let books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        books.balances.get(address).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn balance_of(&self, address: &str) -> Result<u128, LedgerError> {
        Ok(self.balance(address))
    }

    async fn allowance(&self, owner: &str, spender: &str) -> Result<u128, LedgerError> {
        let books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        Ok(books
            .allowances
            .get(&(owner.to_string(), spender.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn transfer(
        &self,
        from: &str,
        spender: &str,
        amount: u128,
    ) -> Result<String, LedgerError> {
        let mut books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        let allowance_key = (from.to_string(), spender.to_string());

        let balance = books.balances.get(from).copied().unwrap_or(0);
        let allowance = books.allowances.get(&allowance_key).copied().unwrap_or(0);
        if balance < amount {
            return Err(LedgerError::Reverted("transfer amount exceeds balance".to_string()));
        }
        if allowance < amount {
            return Err(LedgerError::Reverted("insufficient allowance".to_string()));
        }

        books.balances.insert(from.to_string(), balance - amount);
        books.allowances.insert(allowance_key, allowance - amount);
        *books.balances.entry(spender.to_string()).or_insert(0) += amount;

        Ok(format!("0x{}", Uuid::new_v4().simple()))
    }
}
