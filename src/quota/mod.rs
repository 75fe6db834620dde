//! Quota ledger - per-user free credits with an audit trail.
//!
//! # Invariants
//! - `free_uses_left` never goes below zero
//! - Only matching analyses consume credit; personal analyses are recorded but free
//! - A credit is consumed under a per-user lock, so two concurrent requests
//!   cannot both spend the last one
//! - A successful payment is recorded without touching `free_uses_left`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::AnalysisKind;
use crate::clock::ClockRef;
use crate::config::QuotaConfig;
use crate::mention::normalize_user_id;
use crate::store::{decode, encode, KeyedLocks, StoreError, StoreRef};

const KEY_PREFIX: &str = "quota:";

/// One audited analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub kind: AnalysisKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
    pub used_free_credit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
    pub at: DateTime<Utc>,
}

/// Quota state for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuota {
    pub user_id: String,
    pub free_uses_left: u32,
    pub total_consumed: u64,
    /// Most recent entries last
    pub history: Vec<UsageRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserQuota {
    fn push(&mut self, record: UsageRecord, limit: usize) {
        self.updated_at = record.at;
        self.history.push(record);
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }
}

/// Outcome of [`QuotaLedger::record_analysis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    /// The analysis may proceed without payment
    pub success: bool,
    pub payment_required: bool,
    pub free_uses_left: u32,
}

/// Per-user credit ledger over a [`KvStore`](crate::store::KvStore).
pub struct QuotaLedger {
    store: StoreRef,
    clock: ClockRef,
    locks: KeyedLocks,
    free_uses: u32,
    history_limit: usize,
}

impl QuotaLedger {
    pub fn new(store: StoreRef, clock: ClockRef, config: &QuotaConfig) -> Self {
        Self {
            store,
            clock,
            locks: KeyedLocks::new(),
            free_uses: config.free_uses,
            history_limit: config.history_limit.max(1),
        }
    }

    /// Credits a brand-new user starts with.
    pub fn default_free_uses(&self) -> u32 {
        self.free_uses
    }

    fn store_key(user_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, user_id)
    }

    /// Load or initialize. Caller holds the user lock.
    async fn load(&self, user_id: &str) -> Result<UserQuota, StoreError> {
        let key = Self::store_key(user_id);
        if let Some(raw) = self.store.get(&key).await? {
            return decode(&key, &raw);
        }
        let now = self.clock.now();
        let quota = UserQuota {
            user_id: user_id.to_string(),
            free_uses_left: self.free_uses,
            total_consumed: 0,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.save(&quota).await?;
        debug!(user_id = %user_id, free_uses = self.free_uses, "Quota initialized");
        Ok(quota)
    }

    async fn save(&self, quota: &UserQuota) -> Result<(), StoreError> {
        let key = Self::store_key(&quota.user_id);
        self.store.set(&key, &encode(&key, quota)?, None).await
    }

    /// Current quota, creating it with the default credit on first sight.
    pub async fn get_or_create(&self, user_id: &str) -> Result<UserQuota, StoreError> {
        let user_id = normalize_user_id(user_id);
        let _guard = self.locks.lock(&user_id).await;
        self.load(&user_id).await
    }

    /// Record a newly computed analysis.
    ///
    /// Personal analyses are always allowed and never consume credit. Matching
    /// analyses consume one credit if any is left; otherwise payment is
    /// required and nothing is mutated.
    pub async fn record_analysis(
        &self,
        user_id: &str,
        kind: AnalysisKind,
        target_user_id: Option<&str>,
    ) -> Result<QuotaDecision, StoreError> {
        let user_id = normalize_user_id(user_id);
        let _guard = self.locks.lock(&user_id).await;
        let mut quota = self.load(&user_id).await?;

        let used_free_credit = match kind {
            AnalysisKind::Personal => false,
            AnalysisKind::Matching if quota.free_uses_left > 0 => {
                quota.free_uses_left -= 1;
                true
            }
            AnalysisKind::Matching => {
                debug!(user_id = %user_id, "No free matching uses left, payment required");
                return Ok(QuotaDecision {
                    success: false,
                    payment_required: true,
                    free_uses_left: 0,
                });
            }
        };

        quota.total_consumed += 1;
        let record = UsageRecord {
            kind,
            target_user_id: target_user_id.map(normalize_user_id),
            used_free_credit,
            transaction_ref: None,
            at: self.clock.now(),
        };
        quota.push(record, self.history_limit);
        self.save(&quota).await?;

        if used_free_credit {
            info!(
                user_id = %user_id,
                free_uses_left = quota.free_uses_left,
                "Free matching credit consumed"
            );
        }

        Ok(QuotaDecision {
            success: true,
            payment_required: false,
            free_uses_left: quota.free_uses_left,
        })
    }

    /// Record a paid matching analysis. Never touches `free_uses_left`.
    pub async fn record_successful_payment(
        &self,
        user_id: &str,
        target_user_id: &str,
        transaction_ref: Option<&str>,
    ) -> Result<UserQuota, StoreError> {
        let user_id = normalize_user_id(user_id);
        let _guard = self.locks.lock(&user_id).await;
        let mut quota = self.load(&user_id).await?;

        quota.total_consumed += 1;
        let record = UsageRecord {
            kind: AnalysisKind::Matching,
            target_user_id: Some(normalize_user_id(target_user_id)),
            used_free_credit: false,
            transaction_ref: transaction_ref.map(str::to_string),
            at: self.clock.now(),
        };
        quota.push(record, self.history_limit);
        self.save(&quota).await?;

        info!(
            user_id = %user_id,
            transaction_ref = transaction_ref.unwrap_or("-"),
            "Paid matching analysis recorded"
        );
        Ok(quota)
    }

    /// Add free credits (top-up or admin grant).
    pub async fn grant_free_uses(&self, user_id: &str, amount: u32) -> Result<UserQuota, StoreError> {
        let user_id = normalize_user_id(user_id);
        let _guard = self.locks.lock(&user_id).await;
        let mut quota = self.load(&user_id).await?;
        quota.free_uses_left = quota.free_uses_left.saturating_add(amount);
        quota.updated_at = self.clock.now();
        self.save(&quota).await?;
        info!(user_id = %user_id, amount, free_uses_left = quota.free_uses_left, "Free uses granted");
        Ok(quota)
    }
}
