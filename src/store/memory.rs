//! In-process store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{KvStore, StoreError};
use crate::clock::{deadline, ClockRef};

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// `HashMap`-backed [`KvStore`] reading time from an injected clock.
pub struct MemoryStore {
    slots: RwLock<HashMap<String, Slot>>,
    clock: ClockRef,
}

impl MemoryStore {
    pub fn new(clock: ClockRef) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of slots held, expired ones included.
    pub async fn raw_len(&self) -> usize {
        self.slots.read().await.len()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let slots = self.slots.read().await;
        Ok(slots
            .get(key)
            .filter(|s| s.is_live(now))
            .map(|s| s.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.clock.now();
        let slot = Slot {
            value: value.to_string(),
            expires_at: ttl.map(|t| deadline(now, t)),
        };
        self.slots.write().await.insert(key.to_string(), slot);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut slots = self.slots.write().await;
        match slots.get_mut(key).filter(|s| s.is_live(now)) {
            Some(slot) => {
                let current: i64 = slot.value.parse().map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                })?;
                let next = current.saturating_add(1);
                slot.value = next.to_string();
                Ok(next)
            }
            None => {
                slots.insert(
                    key.to_string(),
                    Slot {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut slots = self.slots.write().await;
        match slots.get_mut(key).filter(|s| s.is_live(now)) {
            Some(slot) => {
                slot.expires_at = Some(deadline(now, ttl));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.clock.now();
        let slots = self.slots.read().await;
        Ok(slots
            .get(key)
            .filter(|s| s.is_live(now))
            .and_then(|s| s.expires_at)
            .and_then(|at| (at - now).to_std().ok()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let removed = self.slots.write().await.remove(key);
        Ok(removed.map_or(false, |s| s.is_live(now)))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let now = self.clock.now();
        let slots = self.slots.read().await;
        Ok(slots
            .iter()
            .filter(|(k, s)| k.starts_with(prefix) && s.is_live(now))
            .map(|(k, s)| (k.clone(), s.value.clone()))
            .collect())
    }

    async fn purge_expired(&self, prefix: &str) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|k, s| !k.starts_with(prefix) || s.is_live(now));
        Ok(before - slots.len())
    }
}
