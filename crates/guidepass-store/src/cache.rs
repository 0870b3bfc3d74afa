//! On-device snapshot cache.
//!
//! The cache holds one value per user: the last `EntitlementSnapshot` read
//! from the remote ledger. Writes replace the value wholesale; there is no
//! field-level merge. It only shortens first paint, so a stale or missing
//! entry is never a correctness problem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use guidepass_core::{EntitlementSnapshot, UserId};

use crate::error::Result;

/// Persisted local cache of the last-known snapshot.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// Load the cached snapshot for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache exists but cannot be read or decoded.
    async fn load(&self, user_id: &UserId) -> Result<Option<EntitlementSnapshot>>;

    /// Replace the cached snapshot for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be written.
    async fn store(&self, user_id: &UserId, snapshot: &EntitlementSnapshot) -> Result<()>;

    /// Drop the cached snapshot for a user (sign-out).
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be written.
    async fn clear(&self, user_id: &UserId) -> Result<()>;
}

/// In-memory snapshot cache.
#[derive(Debug, Default)]
pub struct MemorySnapshotCache {
    entries: RwLock<HashMap<UserId, EntitlementSnapshot>>,
}

impl MemorySnapshotCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotCache for MemorySnapshotCache {
    async fn load(&self, user_id: &UserId) -> Result<Option<EntitlementSnapshot>> {
        Ok(self.entries.read().await.get(user_id).cloned())
    }

    async fn store(&self, user_id: &UserId, snapshot: &EntitlementSnapshot) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(*user_id, snapshot.clone());
        Ok(())
    }

    async fn clear(&self, user_id: &UserId) -> Result<()> {
        self.entries.write().await.remove(user_id);
        Ok(())
    }
}

/// Snapshot cache storing one JSON file per user under a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotCache {
    dir: PathBuf,
}

impl FileSnapshotCache {
    /// Cache rooted at `dir`; the directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the cache files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, user_id: &UserId) -> PathBuf {
        self.dir.join(format!("entitlements-{user_id}.json"))
    }
}

#[async_trait]
impl SnapshotCache for FileSnapshotCache {
    async fn load(&self, user_id: &UserId) -> Result<Option<EntitlementSnapshot>> {
        let path = self.path_for(user_id);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    async fn store(&self, user_id: &UserId, snapshot: &EntitlementSnapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(user_id);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_vec(snapshot)?;

        // Readers never see a partial file
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(user_id = %user_id, path = %path.display(), "Snapshot cached");
        Ok(())
    }

    async fn clear(&self, user_id: &UserId) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(user_id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
