//! L1 semantic cache
//!
//! Nearest-neighbor lookup over embedded stable briefs, with artifacts
//! written transactionally: stage, claim the index entry, promote. An
//! entry becomes a hit only once all of its artifacts are in place, and
//! any failure during `put` rolls back everything the write created.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::artifacts::ArtifactStore;
use super::key::CacheKey;
use super::vector::{IndexEntry, Neighbor, VectorIndex};
use crate::error::CatalystError;
use crate::model::Embedder;
use crate::models::{Artifact, Report, StableBrief};

pub const REPORT_ARTIFACT: &str = "report.json";

/// Neighbors examined per lookup, so an incomplete closest entry does not
/// hide a complete one behind it.
const FIND_CANDIDATES: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMetadata {
    artifacts: Vec<String>,
    stable: StableBrief,
}

#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub key: String,
    pub distance: f32,
    pub report: Report,
    /// Artifact names and their locations.
    pub artifacts: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// An equivalent entry already exists or is being written.
    Duplicate,
}

pub struct SemanticCache {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    artifacts: Arc<dyn ArtifactStore>,
    threshold: f32,
}

impl SemanticCache {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        artifacts: Arc<dyn ArtifactStore>,
        threshold: f32,
    ) -> Self {
        Self {
            embedder,
            index,
            artifacts,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Closest neighbor strictly under the distance threshold whose
    /// artifacts are all present and whose report still validates.
    pub async fn find(&self, stable: &StableBrief) -> crate::Result<Option<SemanticHit>> {
        let vector = self.embedder.embed(&stable.embedding_text()).await?;
        self.nearest_complete(&vector).await
    }

    async fn nearest_complete(&self, vector: &[f32]) -> crate::Result<Option<SemanticHit>> {
        for candidate in self.index.query(vector, FIND_CANDIDATES).await? {
            if candidate.distance >= self.threshold {
                debug!(
                    distance = candidate.distance,
                    threshold = self.threshold,
                    "L1 nearest neighbor too far"
                );
                break;
            }
            if let Some(hit) = self.load(candidate).await? {
                info!(key = %hit.key, distance = hit.distance, "L1 hit");
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    /// `None` when the entry is unreadable or not fully written.
    async fn load(&self, candidate: Neighbor) -> crate::Result<Option<SemanticHit>> {
        let metadata: EntryMetadata = match serde_json::from_value(candidate.metadata) {
            Ok(m) => m,
            Err(e) => {
                warn!(key = %candidate.key, "L1 entry metadata unreadable: {}", e);
                return Ok(None);
            }
        };

        if !self.artifacts.exists(&candidate.key, &metadata.artifacts).await? {
            debug!(key = %candidate.key, "L1 entry incomplete, skipping");
            return Ok(None);
        }

        let report = match self
            .artifacts
            .read(&candidate.key, REPORT_ARTIFACT)
            .await
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(CatalystError::from))
            .and_then(Report::from_json)
        {
            Ok(report) => report,
            Err(e) => {
                warn!(key = %candidate.key, "L1 report invalid, skipping: {}", e);
                return Ok(None);
            }
        };

        let artifacts = metadata
            .artifacts
            .iter()
            .map(|name| (name.clone(), self.artifacts.locate(&candidate.key, name)))
            .collect();

        Ok(Some(SemanticHit {
            key: candidate.key,
            distance: candidate.distance,
            report,
            artifacts,
        }))
    }

    /// Store a report and its artifacts. A brief that `find` already
    /// resolves is a `Duplicate`. Partial writes are rolled back and
    /// reported as `CacheTransaction`.
    pub async fn put(
        &self,
        stable: &StableBrief,
        report: &Report,
        artifacts: &[Artifact],
    ) -> crate::Result<PutOutcome> {
        let key = CacheKey::from_stable(stable)?;
        let key = key.as_str();

        let vector = self
            .embedder
            .embed(&stable.embedding_text())
            .await
            .map_err(|e| CatalystError::CacheTransaction(format!("embedding failed: {}", e)))?;

        let existing = self
            .nearest_complete(&vector)
            .await
            .map_err(|e| CatalystError::CacheTransaction(format!("re-check failed: {}", e)))?;
        if let Some(hit) = existing {
            debug!(key, existing = %hit.key, distance = hit.distance, "Equivalent L1 entry present");
            return Ok(PutOutcome::Duplicate);
        }
        if self.index.get(key).await?.is_some() {
            debug!(key, "L1 entry already present");
            return Ok(PutOutcome::Duplicate);
        }

        let mut files = Vec::with_capacity(artifacts.len() + 1);
        files.push(Artifact::new(REPORT_ARTIFACT, serde_json::to_vec_pretty(report)?));
        files.extend(artifacts.iter().filter(|a| a.name != REPORT_ARTIFACT).cloned());
        let names: Vec<String> = files.iter().map(|a| a.name.clone()).collect();

        let metadata = serde_json::to_value(EntryMetadata {
            artifacts: names.clone(),
            stable: stable.clone(),
        })?;

        let txn = Uuid::new_v4().to_string();

        if let Err(e) = self.artifacts.write_staged(&txn, &files).await {
            self.discard(&txn).await;
            return Err(CatalystError::CacheTransaction(format!(
                "staging failed: {}",
                e
            )));
        }

        let claimed = match self
            .index
            .insert_if_absent(IndexEntry {
                key: key.to_string(),
                vector,
                metadata,
            })
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                self.discard(&txn).await;
                return Err(CatalystError::CacheTransaction(format!(
                    "index write failed: {}",
                    e
                )));
            }
        };

        if !claimed {
            debug!(key, "Lost L1 write race, discarding staged artifacts");
            self.discard(&txn).await;
            return Ok(PutOutcome::Duplicate);
        }

        // Rollback below only ever touches what this transaction created:
        // its staging folder and the index entry it claimed.
        match self.artifacts.promote(&txn, key).await {
            Ok(true) => {
                info!(key, "L1 entry stored");
                Ok(PutOutcome::Stored)
            }
            Ok(false) => {
                // Another writer sharing the artifact store committed first.
                self.discard(&txn).await;
                match self.artifacts.exists(key, &names).await {
                    Ok(true) => debug!(key, "Indexed artifacts committed by another writer"),
                    _ => {
                        debug!(key, "Committed artifacts differ, releasing index entry");
                        self.release(key).await;
                    }
                }
                Ok(PutOutcome::Duplicate)
            }
            Err(e) => {
                warn!(key, "L1 promote failed, rolling back: {}", e);
                self.discard(&txn).await;
                self.release(key).await;
                Err(CatalystError::CacheTransaction(format!(
                    "promote failed: {}",
                    e
                )))
            }
        }
    }

    async fn release(&self, key: &str) {
        if let Err(e) = self.index.remove(key).await {
            warn!(key, "Rollback could not remove index entry: {}", e);
        }
    }

    async fn discard(&self, txn: &str) {
        if let Err(e) = self.artifacts.discard_staged(txn).await {
            warn!(txn, "Could not discard staged artifacts: {}", e);
        }
    }
}
