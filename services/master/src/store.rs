//! Persistence for interview snapshots.
//!
//! The store is a key-value document sink keyed by stable domain identifiers
//! (`{session}/{round}/{topic}/{subtopic}` and `{session}/final`), so
//! at-least-once retries safely overwrite instead of duplicating. Writes are
//! advisory: the in-memory tracker stays authoritative and the control loop
//! never blocks on a failed write.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;

/// A write to the external store failed.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceFailure {
    #[error("persistence backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Key-value document store consumed by the orchestration loop.
#[async_trait]
pub trait InterviewStore: Send + Sync {
    /// Writes (or overwrites) the payload under the given key.
    async fn append_json(&self, key: &str, payload: &Value) -> Result<(), PersistenceFailure>;
    /// Reads a payload back; `None` when the key was never written.
    async fn get_json(&self, key: &str) -> Result<Option<Value>, PersistenceFailure>;
}

/// In-memory store used in development and tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InterviewStore for MemoryStore {
    async fn append_json(&self, key: &str, payload: &Value) -> Result<(), PersistenceFailure> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), payload.clone());
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Option<Value>, PersistenceFailure> {
        Ok(self.entries.lock().await.get(key).cloned())
    }
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl InterviewStore for PgStore {
    async fn append_json(&self, key: &str, payload: &Value) -> Result<(), PersistenceFailure> {
        sqlx::query(
            r#"
            INSERT INTO interview_snapshots (key, payload)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE
            SET payload = EXCLUDED.payload, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(payload)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write snapshot '{key}'"))?;
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Option<Value>, PersistenceFailure> {
        let row = sqlx::query("SELECT payload FROM interview_snapshots WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read snapshot '{key}'"))?;
        match row {
            Some(row) => {
                let payload: Value = row
                    .try_get("payload")
                    .context("snapshot row without payload column")?;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }
}

const WRITE_ATTEMPTS: usize = 3;

/// Writes with a small fixed retry budget, then logs and gives up. Stable
/// keys make every retry an overwrite, never a duplicate.
pub async fn persist_with_retry(store: &dyn InterviewStore, key: &str, payload: &Value) {
    for attempt in 1..=WRITE_ATTEMPTS {
        match store.append_json(key, payload).await {
            Ok(()) => return,
            Err(error) => {
                warn!(key, attempt, %error, "snapshot write failed");
            }
        }
    }
    warn!(
        key,
        "giving up after {WRITE_ATTEMPTS} attempts; in-memory state remains authoritative"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn memory_store_overwrites_on_stable_keys() {
        let store = MemoryStore::new();
        let key = "session/ROUND_ONE/Background/Education";
        store.append_json(key, &json!({"turns": 1})).await.unwrap();
        store.append_json(key, &json!({"turns": 2})).await.unwrap();

        assert_eq!(store.get_json(key).await.unwrap(), Some(json!({"turns": 2})));
        assert_eq!(store.get_json("missing").await.unwrap(), None);
    }

    /// Fails a configurable number of writes before succeeding.
    struct FlakyStore {
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
        inner: MemoryStore,
    }

    impl FlakyStore {
        fn failing(n: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(n),
                attempts: AtomicUsize::new(0),
                inner: MemoryStore::new(),
            }
        }
    }

    #[async_trait]
    impl InterviewStore for FlakyStore {
        async fn append_json(&self, key: &str, payload: &Value) -> Result<(), PersistenceFailure> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PersistenceFailure::Backend(anyhow!("transient outage")));
            }
            self.inner.append_json(key, payload).await
        }

        async fn get_json(&self, key: &str) -> Result<Option<Value>, PersistenceFailure> {
            self.inner.get_json(key).await
        }
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let store = FlakyStore::failing(2);
        persist_with_retry(&store, "k", &json!({"ok": true})).await;
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.get_json("k").await.unwrap(), Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn retry_gives_up_after_fixed_budget() {
        let store = FlakyStore::failing(10);
        persist_with_retry(&store, "k", &json!({"ok": true})).await;
        assert_eq!(store.attempts.load(Ordering::SeqCst), WRITE_ATTEMPTS);
        assert_eq!(store.get_json("k").await.unwrap(), None);
    }
}
