//! Durable metadata backend seam
//!
//! The coordinator persists changefeed metadata through this trait; the
//! production implementation is CRUD over the cluster's key-value store.
//! [`MemoryBackend`] backs tests and standalone deployments.

use crate::changefeed::{ChangefeedId, ChangefeedInfo, ChangefeedMeta, ChangefeedStatus, Progress};
use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// CRUD over persisted changefeed metadata
#[async_trait]
pub trait MetadataBackend: Send + Sync {
    /// Load every persisted changefeed
    async fn get_all_changefeeds(&self) -> Result<HashMap<ChangefeedId, ChangefeedMeta>>;

    /// Persist a new changefeed
    async fn create_changefeed(&self, info: &ChangefeedInfo) -> Result<()>;

    /// Persist a pause: declared state becomes Stopped
    async fn pause_changefeed(&self, id: ChangefeedId) -> Result<()>;

    /// Persist a resume at the given checkpoint: declared state becomes Normal
    async fn resume_changefeed(&self, id: ChangefeedId, new_checkpoint_ts: u64) -> Result<()>;

    /// Persist an info update together with the current checkpoint and progress
    async fn update_changefeed(
        &self,
        info: &ChangefeedInfo,
        checkpoint_ts: u64,
        progress: Progress,
    ) -> Result<()>;

    /// Persist only the lifecycle progress marker
    async fn set_changefeed_progress(&self, id: ChangefeedId, progress: Progress) -> Result<()>;
}

/// In-memory metadata backend
#[derive(Default)]
pub struct MemoryBackend {
    changefeeds: RwLock<HashMap<ChangefeedId, ChangefeedMeta>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a persisted changefeed, for bootstrap tests
    pub fn seed(&self, meta: ChangefeedMeta) {
        self.changefeeds.write().insert(meta.info.id, meta);
    }

    fn with_meta<F>(&self, id: ChangefeedId, f: F) -> Result<()>
    where
        F: FnOnce(&mut ChangefeedMeta),
    {
        let mut changefeeds = self.changefeeds.write();
        let meta = changefeeds
            .get_mut(&id)
            .ok_or_else(|| CoordinatorError::ChangefeedNotFound(id.to_string()))?;
        f(meta);
        Ok(())
    }
}

#[async_trait]
impl MetadataBackend for MemoryBackend {
    async fn get_all_changefeeds(&self) -> Result<HashMap<ChangefeedId, ChangefeedMeta>> {
        Ok(self.changefeeds.read().clone())
    }

    async fn create_changefeed(&self, info: &ChangefeedInfo) -> Result<()> {
        let mut changefeeds = self.changefeeds.write();
        if changefeeds.contains_key(&info.id) {
            return Err(CoordinatorError::ChangefeedAlreadyExists(
                info.display_name.to_string(),
            ));
        }
        changefeeds.insert(
            info.id,
            ChangefeedMeta {
                info: info.clone(),
                status: ChangefeedStatus::new(info.start_ts),
            },
        );
        Ok(())
    }

    async fn pause_changefeed(&self, id: ChangefeedId) -> Result<()> {
        self.with_meta(id, |meta| {
            meta.info.state = crate::changefeed::FeedState::Stopped;
            meta.status.progress = Progress::Stopping;
        })
    }

    async fn resume_changefeed(&self, id: ChangefeedId, new_checkpoint_ts: u64) -> Result<()> {
        self.with_meta(id, |meta| {
            meta.info.state = crate::changefeed::FeedState::Normal;
            meta.status.checkpoint_ts = new_checkpoint_ts;
            meta.status.progress = Progress::Normal;
        })
    }

    async fn update_changefeed(
        &self,
        info: &ChangefeedInfo,
        checkpoint_ts: u64,
        progress: Progress,
    ) -> Result<()> {
        self.with_meta(info.id, |meta| {
            meta.info = info.clone();
            meta.status.checkpoint_ts = checkpoint_ts;
            meta.status.progress = progress;
        })
    }

    async fn set_changefeed_progress(&self, id: ChangefeedId, progress: Progress) -> Result<()> {
        self.with_meta(id, |meta| meta.status.progress = progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changefeed::{DisplayName, FeedState};

    fn info(name: &str) -> ChangefeedInfo {
        ChangefeedInfo::new(DisplayName::new("default", name), 100, "kafka://sink")
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let backend = MemoryBackend::new();
        let info = info("orders");
        backend.create_changefeed(&info).await.unwrap();

        let all = backend.get_all_changefeeds().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&info.id].status.checkpoint_ts, 100);

        // duplicate id rejected
        assert!(backend.create_changefeed(&info).await.is_err());
    }

    #[tokio::test]
    async fn test_pause_resume_progression() {
        let backend = MemoryBackend::new();
        let info = info("orders");
        backend.create_changefeed(&info).await.unwrap();

        backend.pause_changefeed(info.id).await.unwrap();
        let all = backend.get_all_changefeeds().await.unwrap();
        assert_eq!(all[&info.id].info.state, FeedState::Stopped);
        assert_eq!(all[&info.id].status.progress, Progress::Stopping);

        backend.resume_changefeed(info.id, 200).await.unwrap();
        let all = backend.get_all_changefeeds().await.unwrap();
        assert_eq!(all[&info.id].info.state, FeedState::Normal);
        assert_eq!(all[&info.id].status.checkpoint_ts, 200);
        assert_eq!(all[&info.id].status.progress, Progress::Normal);
    }

    #[tokio::test]
    async fn test_unknown_changefeed_errors() {
        let backend = MemoryBackend::new();
        let err = backend
            .set_changefeed_progress(uuid::Uuid::new_v4(), Progress::Removing)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::ChangefeedNotFound(_)));
    }
}
