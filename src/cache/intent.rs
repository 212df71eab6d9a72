//! L0 intent cache
//!
//! A cheap exact-match cache keyed by a fingerprint of the request's core
//! entities. Every failure here degrades to a miss.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::key::digest_str;
use super::kv::KvStore;
use crate::model::Task;
use crate::models::JobResultReference;
use crate::prompts;
use crate::resilience::{OutputSchema, ResilientInvoker, StructuredOutput};

const KEY_PREFIX: &str = "l0_cache:intent:";

/// Core entities extracted from a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IntentEntities {
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub garment_type: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub year: Option<serde_json::Value>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub key_attributes: Vec<String>,
}

impl StructuredOutput for IntentEntities {
    const SCHEMA: OutputSchema = OutputSchema {
        name: "intent",
        required: &[],
        lists: &["key_attributes"],
        numbers: &[],
    };
}

impl IntentEntities {
    /// Canonical `key:value|...` form with sorted keys and lowercased values.
    /// `None` when no entity was extracted.
    pub fn canonical(&self) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();

        let mut push = |key: &str, value: Option<String>| {
            if let Some(v) = value
                .map(|v| crate::models::normalize_text(&v))
                .filter(|v| !v.is_empty() && v != "null" && v != "auto")
            {
                parts.push(format!("{}:{}", key, v));
            }
        };

        push("brand", self.brand.clone());
        push("garment_type", self.garment_type.clone());
        push("region", self.region.clone());
        push("season", self.season.clone());
        push("target_audience", self.target_audience.clone());
        push("theme", self.theme.clone());
        push(
            "year",
            self.year.as_ref().and_then(|y| match y {
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::String(s) => Some(s.clone()),
                _ => None,
            }),
        );

        let mut attributes: Vec<String> = self
            .key_attributes
            .iter()
            .map(|a| crate::models::normalize_text(a))
            .filter(|a| !a.is_empty())
            .collect();
        attributes.sort();
        attributes.dedup();
        if !attributes.is_empty() {
            parts.push(format!("key_attributes:{}", attributes.join(",")));
        }

        parts.sort();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("|"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntentKey(String);

impl IntentKey {
    pub fn from_entities(entities: &IntentEntities) -> Option<Self> {
        entities
            .canonical()
            .map(|canonical| IntentKey(format!("{}{}", KEY_PREFIX, digest_str(&canonical))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub struct IntentCache {
    invoker: Arc<ResilientInvoker>,
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl IntentCache {
    pub fn new(invoker: Arc<ResilientInvoker>, store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            invoker,
            store,
            ttl,
        }
    }

    /// Extract entities and derive the key. `None` on any failure or when
    /// the request has no recognisable entities.
    pub async fn fingerprint(&self, request: &str) -> Option<IntentKey> {
        match self
            .invoker
            .invoke_as::<IntentEntities>(Task::Intent, prompts::intent(request))
            .await
        {
            Ok(entities) => {
                let key = IntentKey::from_entities(&entities);
                if key.is_none() {
                    debug!("No intent entities extracted; L0 disabled for this request");
                }
                key
            }
            Err(e) => {
                warn!("Intent fingerprint failed, treating as miss: {}", e);
                None
            }
        }
    }

    pub async fn lookup(&self, request: &str) -> Option<JobResultReference> {
        let key = self.fingerprint(request).await?;
        self.lookup_with_key(&key).await
    }

    pub async fn lookup_with_key(&self, key: &IntentKey) -> Option<JobResultReference> {
        let raw = match self.store.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = key.as_str(), "L0 lookup failed, treating as miss: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<JobResultReference>(&raw) {
            Ok(reference) => match reference.report.validate() {
                Ok(()) => {
                    info!(key = key.as_str(), run_id = %reference.run_id, "L0 hit");
                    Some(reference)
                }
                Err(e) => {
                    warn!(key = key.as_str(), "L0 entry holds an invalid report: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!(key = key.as_str(), "L0 entry could not be decoded: {}", e);
                None
            }
        }
    }

    pub async fn store(&self, request: &str, reference: &JobResultReference) {
        if let Some(key) = self.fingerprint(request).await {
            self.store_with_key(&key, reference).await;
        }
    }

    pub async fn store_with_key(&self, key: &IntentKey, reference: &JobResultReference) {
        let raw = match serde_json::to_string(reference) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("L0 entry could not be encoded, skipping store: {}", e);
                return;
            }
        };

        match self.store.set(key.as_str(), &raw, self.ttl).await {
            Ok(()) => debug!(key = key.as_str(), "L0 entry stored"),
            Err(e) => warn!(key = key.as_str(), "L0 store failed, skipping: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::kv::InMemoryKvStore;
    use crate::error::CatalystError;
    use crate::model::ScriptedModel;
    use crate::models::fixtures;
    use crate::resilience::RetryPolicy;
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    fn cache_with(model: ScriptedModel, store: Arc<dyn KvStore>) -> IntentCache {
        let invoker = Arc::new(ResilientInvoker::new(
            Arc::new(model),
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
        ));
        IntentCache::new(invoker, store, Duration::from_secs(60))
    }

    fn reference() -> JobResultReference {
        JobResultReference {
            run_id: Uuid::new_v4(),
            report: fixtures::report("Gothic pastoral"),
            assets: vec![],
            results_dir: None,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_canonical_form_is_order_and_case_insensitive() {
        let a = IntentEntities {
            theme: Some("Gothic Pastoral".into()),
            season: Some("FW".into()),
            key_attributes: vec!["Lace".into(), "linen".into()],
            ..Default::default()
        };
        let b = IntentEntities {
            theme: Some("gothic  pastoral".into()),
            season: Some("fw".into()),
            key_attributes: vec!["linen".into(), "lace".into()],
            ..Default::default()
        };
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(IntentKey::from_entities(&a), IntentKey::from_entities(&b));
        assert!(IntentKey::from_entities(&a)
            .unwrap()
            .as_str()
            .starts_with("l0_cache:intent:"));
    }

    #[test]
    fn test_no_entities_no_key() {
        let empty = IntentEntities {
            year: Some(serde_json::json!("auto")),
            ..Default::default()
        };
        assert_eq!(empty.canonical(), None);
        assert!(IntentKey::from_entities(&empty).is_none());
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let cache = cache_with(ScriptedModel::offline(), Arc::new(InMemoryKvStore::new()));
        assert!(cache.lookup("gothic pastoral").await.is_none());

        let reference = reference();
        cache.store("gothic pastoral", &reference).await;
        let hit = cache.lookup("gothic pastoral").await.unwrap();
        assert_eq!(hit.run_id, reference.run_id);
    }

    #[tokio::test]
    async fn test_storing_twice_keeps_one_entry() {
        let store = Arc::new(InMemoryKvStore::new());
        let cache = cache_with(ScriptedModel::offline(), store.clone());
        let key = cache.fingerprint("gothic pastoral").await.unwrap();

        let first = reference();
        let second = reference();
        cache.store_with_key(&key, &first).await;
        cache.store_with_key(&key, &second).await;

        assert_eq!(store.len().await, 1);
        let hit = cache.lookup_with_key(&key).await.unwrap();
        assert_eq!(hit.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_empty_entities_never_stored() {
        let model = ScriptedModel::new(|_, _| Ok("{}".to_string()));
        let store = Arc::new(InMemoryKvStore::new());
        let cache = cache_with(model, store.clone());
        cache.store("hello", &reference()).await;
        assert_eq!(store.len().await, 0);
    }

    struct BrokenStore;

    #[async_trait]
    impl KvStore for BrokenStore {
        async fn get(&self, _key: &str) -> crate::Result<Option<String>> {
            Err(CatalystError::Database("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> crate::Result<()> {
            Err(CatalystError::Database("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failures_degrade_to_miss() {
        let cache = cache_with(ScriptedModel::offline(), Arc::new(BrokenStore));
        cache.store("gothic pastoral", &reference()).await;
        assert!(cache.lookup("gothic pastoral").await.is_none());
    }
}
