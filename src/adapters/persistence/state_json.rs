//! Durable JSON mirror of in-progress `/batch` runs (C10). Tracks which users
//! have a batch in flight, so a restart can detect (not resume) orphaned runs
//! and tell the user to retry.

use crate::domain::{ActiveBatch, BotError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Default, Serialize, Deserialize)]
struct MirrorData {
    batches: HashMap<i64, ActiveBatch>,
}

/// JSON file-backed mirror of `active_users.json`. Cheap enough to rewrite in
/// full on every mutation; batch counts are tiny compared to file contents.
pub struct ActiveBatchMirror {
    path: std::path::PathBuf,
    cache: tokio::sync::RwLock<MirrorData>,
}

impl ActiveBatchMirror {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: tokio::sync::RwLock::new(MirrorData::default()),
        }
    }

    pub async fn load(&self) -> Result<(), BotError> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(s) => serde_json::from_str(&s).unwrap_or_default(),
            Err(_) => MirrorData::default(),
        };
        *self.cache.write().await = data;
        Ok(())
    }

    /// Atomic write-replace: write to a temp file, fsync, then rename. Avoids
    /// a half-written `active_users.json` on crash mid-save.
    async fn save(&self) -> Result<(), BotError> {
        let data = self.cache.read().await;
        let json = serde_json::to_string_pretty(&*data)
            .map_err(|e| BotError::Other(e.to_string()))?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| BotError::Other(format!("create temp file: {e}")))?;
        f.write_all(json.as_bytes())
            .await
            .map_err(|e| BotError::Other(format!("write temp file: {e}")))?;
        f.sync_all()
            .await
            .map_err(|e| BotError::Other(format!("sync temp file: {e}")))?;
        drop(f);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| BotError::Other(format!("atomic rename failed: {e}")))?;
        Ok(())
    }

    /// Registers (or replaces) a running batch for `user_id` and persists it.
    pub async fn start(&self, batch: ActiveBatch) -> Result<(), BotError> {
        {
            let mut cache = self.cache.write().await;
            cache.batches.insert(batch.user_id, batch);
        }
        self.save().await
    }

    /// Updates the in-flight counters for `user_id`, if present.
    pub async fn update(
        &self,
        user_id: i64,
        current: u32,
        success: u32,
    ) -> Result<(), BotError> {
        {
            let mut cache = self.cache.write().await;
            if let Some(b) = cache.batches.get_mut(&user_id) {
                b.current = current;
                b.success = success;
            }
        }
        self.save().await
    }

    pub async fn request_cancel(&self, user_id: i64) -> Result<bool, BotError> {
        let found = {
            let mut cache = self.cache.write().await;
            match cache.batches.get_mut(&user_id) {
                Some(b) => {
                    b.cancel_requested = true;
                    true
                }
                None => false,
            }
        };
        if found {
            self.save().await?;
        }
        Ok(found)
    }

    pub async fn is_cancelled(&self, user_id: i64) -> bool {
        self.cache
            .read()
            .await
            .batches
            .get(&user_id)
            .map(|b| b.cancel_requested)
            .unwrap_or(false)
    }

    pub async fn is_running(&self, user_id: i64) -> bool {
        self.cache.read().await.batches.contains_key(&user_id)
    }

    pub async fn finish(&self, user_id: i64) -> Result<(), BotError> {
        {
            let mut cache = self.cache.write().await;
            cache.batches.remove(&user_id);
        }
        self.save().await
    }

    /// Batches left registered from a prior process lifetime — orphaned by a
    /// restart, since in-memory worker tasks don't survive it.
    pub async fn orphaned_on_startup(&self) -> Vec<ActiveBatch> {
        self.cache.read().await.batches.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("active_users_test_{}.json", std::process::id()));
        p
    }

    #[tokio::test]
    async fn start_then_finish_round_trips() {
        let path = temp_path();
        let mirror = ActiveBatchMirror::new(&path);
        mirror
            .start(ActiveBatch {
                user_id: 42,
                total: 10,
                current: 0,
                success: 0,
                cancel_requested: false,
            })
            .await
            .unwrap();
        assert!(mirror.is_running(42).await);
        mirror.request_cancel(42).await.unwrap();
        assert!(mirror.is_cancelled(42).await);
        mirror.finish(42).await.unwrap();
        assert!(!mirror.is_running(42).await);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
