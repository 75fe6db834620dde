//! Confirmation register - token proposals awaiting a yes/no.
//!
//! # States (per user)
//! ```text
//! NONE --propose--> PENDING --claim (before deadline)--> CONFIRMED (caller issues)
//!                      |  \---reject-----------------> REJECTED
//!                      \-----any access at/after deadline--> EXPIRED
//! ```
//! At most one proposal per user; proposing again replaces it. Expiry is
//! detected on access; `sweep` only reclaims space.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{deadline, ClockRef};
use crate::collaborators::TokenMetadata;
use crate::mention::normalize_user_id;
use crate::store::{decode, encode, KeyedLocks, StoreError, StoreRef};

const KEY_PREFIX: &str = "confirmation:";

/// How long an expired proposal stays observable as expired before the store drops it.
const EXPIRED_RETENTION: Duration = Duration::from_secs(60 * 60);

/// A token proposal waiting for the user's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingConfirmation {
    pub user_id: String,
    pub proposed_metadata: TokenMetadata,
    pub creator_address: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingConfirmation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What the register holds for a user at the moment of access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    None,
    /// Live proposal
    Pending(PendingConfirmation),
    /// Proposal whose window has closed; it has been removed
    Expired(PendingConfirmation),
}

/// Per-user pending proposals over a [`KvStore`](crate::store::KvStore).
pub struct ConfirmationRegister {
    store: StoreRef,
    clock: ClockRef,
    locks: KeyedLocks,
    timeout: Duration,
}

impl ConfirmationRegister {
    pub fn new(store: StoreRef, clock: ClockRef, timeout: Duration) -> Self {
        Self {
            store,
            clock,
            locks: KeyedLocks::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn store_key(user_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, user_id)
    }

    async fn write(&self, pending: &PendingConfirmation) -> Result<(), StoreError> {
        let key = Self::store_key(&pending.user_id);
        let ttl = (pending.expires_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            + EXPIRED_RETENTION;
        self.store.set(&key, &encode(&key, pending)?, Some(ttl)).await
    }

    /// Read and classify. Expired entries are deleted. Caller holds the user lock.
    async fn read(&self, user_id: &str) -> Result<Lookup, StoreError> {
        let key = Self::store_key(user_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(Lookup::None);
        };
        let pending: PendingConfirmation = decode(&key, &raw)?;
        if pending.is_expired(self.clock.now()) {
            self.store.delete(&key).await?;
            info!(user_id = %user_id, "Token proposal expired");
            return Ok(Lookup::Expired(pending));
        }
        Ok(Lookup::Pending(pending))
    }

    /// NONE/PENDING -> PENDING. Replaces any earlier proposal.
    pub async fn propose(
        &self,
        user_id: &str,
        metadata: TokenMetadata,
        creator_address: &str,
    ) -> Result<PendingConfirmation, StoreError> {
        let user_id = normalize_user_id(user_id);
        let _guard = self.locks.lock(&user_id).await;

        let now = self.clock.now();
        let pending = PendingConfirmation {
            user_id: user_id.clone(),
            proposed_metadata: metadata,
            creator_address: creator_address.to_string(),
            created_at: now,
            expires_at: deadline(now, self.timeout),
        };
        self.write(&pending).await?;
        info!(
            user_id = %user_id,
            symbol = %pending.proposed_metadata.symbol,
            "Token proposal pending confirmation"
        );
        Ok(pending)
    }

    /// Current state without changing a live proposal.
    pub async fn lookup(&self, user_id: &str) -> Result<Lookup, StoreError> {
        let user_id = normalize_user_id(user_id);
        let _guard = self.locks.lock(&user_id).await;
        self.read(&user_id).await
    }

    /// PENDING -> CONFIRMED. Removes and returns the live proposal so exactly
    /// one caller gets to issue it. Use [`restore`](Self::restore) if issuance fails.
    pub async fn claim(&self, user_id: &str) -> Result<Lookup, StoreError> {
        let user_id = normalize_user_id(user_id);
        let _guard = self.locks.lock(&user_id).await;
        let lookup = self.read(&user_id).await?;
        if let Lookup::Pending(_) = &lookup {
            self.store.delete(&Self::store_key(&user_id)).await?;
            debug!(user_id = %user_id, "Token proposal claimed for issuance");
        }
        Ok(lookup)
    }

    /// PENDING -> REJECTED.
    pub async fn reject(&self, user_id: &str) -> Result<Lookup, StoreError> {
        let user_id = normalize_user_id(user_id);
        let _guard = self.locks.lock(&user_id).await;
        let lookup = self.read(&user_id).await?;
        if let Lookup::Pending(_) = &lookup {
            self.store.delete(&Self::store_key(&user_id)).await?;
            info!(user_id = %user_id, "Token proposal rejected");
        }
        Ok(lookup)
    }

    /// Put a claimed proposal back after a failed issuance. Does nothing if the
    /// window has closed or a newer proposal took its place.
    pub async fn restore(&self, pending: PendingConfirmation) -> Result<bool, StoreError> {
        let _guard = self.locks.lock(&pending.user_id).await;
        if pending.is_expired(self.clock.now()) {
            return Ok(false);
        }
        if !matches!(self.read(&pending.user_id).await?, Lookup::None) {
            return Ok(false);
        }
        self.write(&pending).await?;
        debug!(user_id = %pending.user_id, "Token proposal restored");
        Ok(true)
    }

    /// Drop proposals whose window has closed. Idempotent.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut removed = 0;
        for (key, raw) in self.store.scan_prefix(KEY_PREFIX).await? {
            let expired = decode::<PendingConfirmation>(&key, &raw)
                .map(|p| p.is_expired(now))
                .unwrap_or(true);
            if expired && self.store.delete(&key).await? {
                removed += 1;
            }
        }
        removed += self.store.purge_expired(KEY_PREFIX).await?;
        self.locks.prune();
        Ok(removed)
    }
}
