//! Vector index for the semantic cache

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub key: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub key: String,
    pub distance: f32,
    pub metadata: Value,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn get(&self, key: &str) -> crate::Result<Option<IndexEntry>>;

    async fn upsert(&self, entry: IndexEntry) -> crate::Result<()>;

    /// Conditional write. Returns `false` without modifying the index when
    /// the key is already present.
    async fn insert_if_absent(&self, entry: IndexEntry) -> crate::Result<bool>;

    /// Up to `k` nearest entries, closest first.
    async fn query(&self, vector: &[f32], k: usize) -> crate::Result<Vec<Neighbor>>;

    async fn remove(&self, key: &str) -> crate::Result<()>;
}

/// Cosine distance in `[0, 2]`. Zero vectors are maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 2.0)
}

#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: Arc<RwLock<HashMap<String, IndexEntry>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn get(&self, key: &str) -> crate::Result<Option<IndexEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn upsert(&self, entry: IndexEntry) -> crate::Result<()> {
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn insert_if_absent(&self, entry: IndexEntry) -> crate::Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.key) {
            return Ok(false);
        }
        entries.insert(entry.key.clone(), entry);
        Ok(true)
    }

    async fn query(&self, vector: &[f32], k: usize) -> crate::Result<Vec<Neighbor>> {
        let entries = self.entries.read().await;
        let mut neighbors: Vec<Neighbor> = entries
            .values()
            .map(|entry| Neighbor {
                key: entry.key.clone(),
                distance: cosine_distance(vector, &entry.vector),
                metadata: entry.metadata.clone(),
            })
            .collect();

        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(k);
        Ok(neighbors)
    }

    async fn remove(&self, key: &str) -> crate::Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
