//! Artifact storage for semantic cache entries
//!
//! Writes go to a per-transaction staging area first and become visible
//! only when promoted under their cache key.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::CatalystError;
use crate::models::Artifact;

pub const STAGING_DIR: &str = ".staging";

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write_staged(&self, txn: &str, artifacts: &[Artifact]) -> crate::Result<()>;

    /// Make staged artifacts visible under `key`. Returns `false`, leaving
    /// the staged files in place, when `key` already holds artifacts.
    async fn promote(&self, txn: &str, key: &str) -> crate::Result<bool>;

    async fn discard_staged(&self, txn: &str) -> crate::Result<()>;

    async fn delete(&self, key: &str) -> crate::Result<()>;

    /// True only if every named artifact is present under `key`.
    async fn exists(&self, key: &str, names: &[String]) -> crate::Result<bool>;

    async fn read(&self, key: &str, name: &str) -> crate::Result<Vec<u8>>;

    /// Caller-facing location of a promoted artifact.
    fn locate(&self, key: &str, name: &str) -> String;
}

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_path(&self, txn: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(txn)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

/// Artifact names are flat file names.
fn checked_name(name: &str) -> crate::Result<&str> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(CatalystError::Storage(format!(
            "invalid artifact name '{}'",
            name
        )));
    }
    Ok(name)
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write_staged(&self, txn: &str, artifacts: &[Artifact]) -> crate::Result<()> {
        let dir = self.staging_path(txn);
        tokio::fs::create_dir_all(&dir).await?;

        for artifact in artifacts {
            let path = dir.join(checked_name(&artifact.name)?);
            tokio::fs::write(&path, &artifact.bytes).await?;
        }
        debug!(txn, count = artifacts.len(), "Artifacts staged");
        Ok(())
    }

    async fn promote(&self, txn: &str, key: &str) -> crate::Result<bool> {
        let staged = self.staging_path(txn);
        let target = self.entry_path(key);

        if tokio::fs::try_exists(&target).await? {
            debug!(txn, key, "Artifacts already present, not promoting");
            return Ok(false);
        }
        // Renaming onto a non-empty directory fails, so a writer that slips
        // in between the check and the rename still loses cleanly.
        if let Err(e) = tokio::fs::rename(&staged, &target).await {
            if tokio::fs::try_exists(&target).await.unwrap_or(false) {
                debug!(txn, key, "Lost promote race: {}", e);
                return Ok(false);
            }
            return Err(e.into());
        }
        debug!(txn, key, "Artifacts promoted");
        Ok(true)
    }

    async fn discard_staged(&self, txn: &str) -> crate::Result<()> {
        remove_dir_if_present(&self.staging_path(txn)).await
    }

    async fn delete(&self, key: &str) -> crate::Result<()> {
        remove_dir_if_present(&self.entry_path(key)).await
    }

    async fn exists(&self, key: &str, names: &[String]) -> crate::Result<bool> {
        let dir = self.entry_path(key);
        for name in names {
            if !tokio::fs::try_exists(dir.join(checked_name(name)?)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn read(&self, key: &str, name: &str) -> crate::Result<Vec<u8>> {
        let path = self.entry_path(key).join(checked_name(name)?);
        Ok(tokio::fs::read(path).await?)
    }

    fn locate(&self, key: &str, name: &str) -> String {
        self.entry_path(key).join(name).display().to_string()
    }
}

async fn remove_dir_if_present(path: &Path) -> crate::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts() -> Vec<Artifact> {
        vec![
            Artifact::new("report.json", b"{}".to_vec()),
            Artifact::new("prompts.json", b"[]".to_vec()),
        ]
    }

    fn names() -> Vec<String> {
        vec!["report.json".to_string(), "prompts.json".to_string()]
    }

    #[tokio::test]
    async fn test_staged_artifacts_invisible_until_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        store.write_staged("txn-1", &artifacts()).await.unwrap();
        assert!(!store.exists("key-1", &names()).await.unwrap());

        assert!(store.promote("txn-1", "key-1").await.unwrap());
        assert!(store.exists("key-1", &names()).await.unwrap());
        assert_eq!(store.read("key-1", "report.json").await.unwrap(), b"{}");
        assert!(!dir.path().join(STAGING_DIR).join("txn-1").exists());
    }

    #[tokio::test]
    async fn test_promote_refuses_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        store.write_staged("a", &artifacts()).await.unwrap();
        assert!(store.promote("a", "key").await.unwrap());
        store
            .write_staged("b", &[Artifact::new("report.json", b"{\"b\":1}".to_vec())])
            .await
            .unwrap();
        assert!(!store.promote("b", "key").await.unwrap());
        assert_eq!(store.read("key", "report.json").await.unwrap(), b"{}");

        store.discard_staged("b").await.unwrap();
        store.delete("key").await.unwrap();
        assert!(!store.exists("key", &names()).await.unwrap());
        // Deleting twice is fine.
        store.delete("key").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let bad = vec![Artifact::new("../escape", vec![])];
        assert!(store.write_staged("t", &bad).await.is_err());
    }
}
