//! Key-value stores backing the intent cache

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

use crate::error::CatalystError;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns `None` for missing or expired keys.
    async fn get(&self, key: &str) -> crate::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<()>;
}

#[derive(Default)]
pub struct InMemoryKvStore {
    entries: Arc<RwLock<HashMap<String, (String, DateTime<Utc>)>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> crate::Result<Option<String>> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some((value, expires_at)) if *expires_at > now => {
                    return Ok(Some(value.clone()))
                }
                Some(_) => {}
            }
        }
        // A `set` may have refreshed the key since the read lock was dropped.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|(_, expires_at)| *expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<()> {
        let now = Utc::now();
        let expires_at = expiry(ttl)?;
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }
}

/// Postgres-backed store. The table is created on first use.
pub struct PgKvStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgKvStore {
    pub fn connect_lazy(database_url: &str) -> crate::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| CatalystError::Database(e.to_string()))?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> crate::Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS intent_cache (
                      cache_key TEXT PRIMARY KEY,
                      value TEXT NOT NULL,
                      expires_at TIMESTAMPTZ NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await
                .map_err(|e| CatalystError::Database(e.to_string()))?;
                Ok::<(), CatalystError>(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn get(&self, key: &str) -> crate::Result<Option<String>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT value FROM intent_cache WHERE cache_key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CatalystError::Database(e.to_string()))?;

        row.map(|r| r.try_get::<String, _>("value"))
            .transpose()
            .map_err(|e| CatalystError::Database(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO intent_cache (cache_key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (cache_key)
            DO UPDATE SET value = EXCLUDED.value,
                          expires_at = EXCLUDED.expires_at,
                          updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry(ttl)?)
        .execute(&self.pool)
        .await
        .map_err(|e| CatalystError::Database(e.to_string()))?;
        Ok(())
    }
}

fn expiry(ttl: Duration) -> crate::Result<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| CatalystError::Configuration(format!("invalid TTL: {}", e)))?;
    Ok(Utc::now() + ttl)
}

/// Postgres when a database URL is configured, in-memory otherwise.
pub fn build_kv_store(database_url: Option<&str>) -> Arc<dyn KvStore> {
    if let Some(url) = database_url {
        match PgKvStore::connect_lazy(url) {
            Ok(store) => {
                info!("Intent cache backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres intent cache, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Intent cache backend: in-memory");
    Arc::new(InMemoryKvStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryKvStore::new();
        store.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_in_memory_expiry() {
        let store = InMemoryKvStore::new();
        store.set("k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_sweeps_expired_entries() {
        let store = InMemoryKvStore::new();
        store.set("stale-1", "v", Duration::ZERO).await.unwrap();
        store.set("stale-2", "v", Duration::ZERO).await.unwrap();
        store.set("fresh", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_refreshed_key_survives_expired_read() {
        let store = InMemoryKvStore::new();
        store.set("k", "old", Duration::ZERO).await.unwrap();
        store.set("k", "new", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));

        // Concurrent readers of an expired key never remove a fresh value.
        store.set("j", "old", Duration::ZERO).await.unwrap();
        let (a, b, _) = tokio::join!(
            store.get("j"),
            store.get("j"),
            store.set("j", "new", Duration::from_secs(60))
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(store.get("j").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_no_url_builds_in_memory_store() {
        let store = build_kv_store(None);
        store.set("a", "1", Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }
}
