//! Persistence backend trait and the in-memory implementation

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use super::record::ImageRecord;
use crate::error::CoreResult;

/// Durable home for image records
///
/// `save` must be atomic per record: after a crash the backend holds either
/// the previous or the new record, never a mix.
#[async_trait]
pub trait MaskBackend: Send + Sync {
    /// Load every persisted record
    async fn load_all(&self) -> CoreResult<Vec<ImageRecord>>;

    /// Create or replace one record
    async fn save(&self, record: &ImageRecord) -> CoreResult<()>;

    /// Remove one record; removing an absent record succeeds
    async fn remove(&self, image_id: &str) -> CoreResult<()>;

    /// Short backend name for logs and health output
    fn name(&self) -> &'static str;
}

/// Process-local backend, keeps records in insertion order
#[derive(Default)]
pub struct MemoryBackend {
    records: RwLock<IndexMap<String, ImageRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MaskBackend for MemoryBackend {
    async fn load_all(&self) -> CoreResult<Vec<ImageRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn save(&self, record: &ImageRecord) -> CoreResult<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, image_id: &str) -> CoreResult<()> {
        self.records.write().await.shift_remove(image_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
