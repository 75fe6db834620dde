//! SQLite-backed store.
//!
//! One table, `kv(key, value, expires_at)`, with `expires_at` in epoch
//! milliseconds. Every call runs on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::{KvStore, StoreError};
use crate::clock::{deadline, ClockRef};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv(expires_at);
"#;

/// [`KvStore`] persisted in a SQLite file.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    clock: ClockRef,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: &Path, clock: ClockRef) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, clock)
    }

    /// Private in-memory database.
    pub fn open_in_memory(clock: ClockRef) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, clock)
    }

    fn with_connection(conn: Connection, clock: ClockRef) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn deadline_ms(&self, ttl: Duration) -> i64 {
        deadline(self.clock.now(), ttl).timestamp_millis()
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection poisoned".to_string()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {}", e)))?
    }
}

const LIVE: &str = "(expires_at IS NULL OR expires_at > ?2)";

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        let now = self.now_ms();
        self.run(move |conn| {
            let sql = format!("SELECT value FROM kv WHERE key = ?1 AND {}", LIVE);
            Ok(conn
                .query_row(&sql, params![key, now], |row| row.get(0))
                .optional()?)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        let expires_at = ttl.map(|t| self.deadline_ms(t));
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let key = key.to_string();
        let now = self.now_ms();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let sql = format!("SELECT value FROM kv WHERE key = ?1 AND {}", LIVE);
            let current: Option<String> = tx
                .query_row(&sql, params![key, now], |row| row.get(0))
                .optional()?;
            let next = match current {
                Some(raw) => {
                    let n: i64 = raw
                        .parse()
                        .map_err(|_| StoreError::NotAnInteger { key: key.clone() })?;
                    let next = n.saturating_add(1);
                    tx.execute(
                        "UPDATE kv SET value = ?2 WHERE key = ?1",
                        params![key, next.to_string()],
                    )?;
                    next
                }
                None => {
                    tx.execute(
                        "INSERT OR REPLACE INTO kv (key, value, expires_at) VALUES (?1, '1', NULL)",
                        params![key],
                    )?;
                    1
                }
            };
            tx.commit()?;
            Ok(next)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let key = key.to_string();
        let now = self.now_ms();
        let expires_at = self.deadline_ms(ttl);
        self.run(move |conn| {
            let sql = format!("UPDATE kv SET expires_at = ?3 WHERE key = ?1 AND {}", LIVE);
            let changed = conn.execute(&sql, params![key, now, expires_at])?;
            Ok(changed > 0)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let key = key.to_string();
        let now = self.now_ms();
        self.run(move |conn| {
            let sql = format!("SELECT expires_at FROM kv WHERE key = ?1 AND {}", LIVE);
            let expires_at: Option<Option<i64>> = conn
                .query_row(&sql, params![key, now], |row| row.get(0))
                .optional()?;
            Ok(expires_at
                .flatten()
                .map(|at| Duration::from_millis((at - now).max(0) as u64)))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        let now = self.now_ms();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let sql = format!("SELECT COUNT(*) FROM kv WHERE key = ?1 AND {}", LIVE);
            let live: i64 = tx.query_row(&sql, params![key, now], |row| row.get(0))?;
            tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            tx.commit()?;
            Ok(live > 0)
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let prefix = prefix.to_string();
        let now = self.now_ms();
        self.run(move |conn| {
            let sql = format!(
                "SELECT key, value FROM kv WHERE substr(key, 1, length(?1)) = ?1 AND {}",
                LIVE
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![prefix, now], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<(String, String)>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn purge_expired(&self, prefix: &str) -> Result<usize, StoreError> {
        let prefix = prefix.to_string();
        let now = self.now_ms();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM kv WHERE substr(key, 1, length(?1)) = ?1 \
                 AND expires_at IS NOT NULL AND expires_at <= ?2",
                params![prefix, now],
            )?;
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tempfile::NamedTempFile;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_roundtrip_with_expiry() {
        let clock = ManualClock::starting_now();
        let store = SqliteStore::open_in_memory(Arc::new(clock.clone())).unwrap();

        store
            .set("quota:u1", "{}", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(store.get("quota:u1").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(
            store.ttl("quota:u1").await.unwrap(),
            Some(Duration::from_secs(30))
        );

        clock.advance(Duration::from_secs(31));
        assert_eq!(store.get("quota:u1").await.unwrap(), None);
        assert!(!store.delete("quota:u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_and_purge() {
        let clock = ManualClock::starting_now();
        let store = SqliteStore::open_in_memory(Arc::new(clock.clone())).unwrap();

        assert_eq!(store.incr("hits").await.unwrap(), 1);
        assert_eq!(store.incr("hits").await.unwrap(), 2);
        assert!(store.expire("hits", Duration::from_secs(1)).await.unwrap());

        store.set("keep", "1", None).await.unwrap();
        store.set("label", "abc", None).await.unwrap();
        assert_err!(store.incr("label").await);
        store
            .set("other:1", "x", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired("hits").await.unwrap(), 1);
        assert_eq!(store.purge_expired("other:").await.unwrap(), 1);
        assert_eq!(store.get("keep").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_scan_prefix_and_persistence() {
        let file = NamedTempFile::new().unwrap();
        let clock: ClockRef = Arc::new(ManualClock::starting_now());
        {
            let store = SqliteStore::open(file.path(), Arc::clone(&clock)).unwrap();
            assert_ok!(store.set("pending:a", "1", None).await);
            assert_ok!(store.set("pending:b", "2", None).await);
            assert_ok!(store.set("other", "3", None).await);
        }

        let store = SqliteStore::open(file.path(), clock).unwrap();
        let mut found = store.scan_prefix("pending:").await.unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![
                ("pending:a".to_string(), "1".to_string()),
                ("pending:b".to_string(), "2".to_string()),
            ]
        );
    }
}
