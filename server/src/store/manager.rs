//! MaskStore: the consistent home for images and their mask batches
//!
//! Each image lives in its own slot guarded by a `RwLock<Option<Arc<ImageSnapshot>>>`.
//! Writers hold the slot's write lock across persist + swap; readers clone the
//! `Arc` under a short read lock. Slots for different images never contend.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, histogram};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backend::{MaskBackend, MemoryBackend};
use super::record::ImageRecord;
use super::types::{Image, ImageId, ImageSnapshot, ImageSummary, Mask, RawMask};
use crate::codec::{self, MaskId};
use crate::error::{CoreError, CoreResult};

/// First id handed out on a fresh image
const FIRST_MASK_ID: MaskId = 1;

#[derive(Default)]
struct ImageSlot {
    state: RwLock<Option<Arc<ImageSnapshot>>>,
}

pub struct MaskStore {
    slots: DashMap<ImageId, Arc<ImageSlot>>,
    backend: Arc<dyn MaskBackend>,
    revision: AtomicU64,
}

impl MaskStore {
    /// Open a store over `backend`, loading every persisted image
    ///
    /// Records that fail invariant checks are skipped with a warning.
    pub async fn open(backend: Arc<dyn MaskBackend>) -> CoreResult<Self> {
        let store = Self {
            slots: DashMap::new(),
            backend,
            revision: AtomicU64::new(0),
        };

        let records = store.backend.load_all().await?;
        let total = records.len();
        for record in records {
            let id = record.id.clone();
            let revision = store.next_revision();
            let decoded = tokio::task::spawn_blocking(move || record.into_snapshot(revision))
                .await
                .map_err(|e| CoreError::Storage(format!("load task failed: {}", e)))?;

            match decoded {
                Ok(snapshot) => {
                    store.slots.insert(
                        id,
                        Arc::new(ImageSlot {
                            state: RwLock::new(Some(Arc::new(snapshot))),
                        }),
                    );
                }
                Err(e) => warn!("Skipping invalid record {}: {}", id, e),
            }
        }

        info!(
            "Opened mask store ({} backend): {}/{} images loaded",
            store.backend.name(),
            store.slots.len(),
            total
        );
        Ok(store)
    }

    /// Empty store over a fresh in-memory backend
    pub fn in_memory() -> Self {
        Self {
            slots: DashMap::new(),
            backend: Arc::new(MemoryBackend::new()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Register an uploaded image with zero masks
    pub async fn create_image(&self, pixel_bytes: Bytes) -> CoreResult<ImageId> {
        let decode_bytes = pixel_bytes.clone();
        let (width, height) = tokio::task::spawn_blocking(move || {
            codec::decode_image(&decode_bytes).map(|img| (img.width(), img.height()))
        })
        .await
        .map_err(|e| CoreError::Storage(format!("decode task failed: {}", e)))??;

        // Reserve a fresh id with its slot already write-locked, so nobody can
        // observe the image before it is durable
        let slot = Arc::new(ImageSlot::default());
        let mut guard = slot
            .state
            .try_write()
            .map_err(|_| CoreError::Storage("fresh slot unexpectedly locked".into()))?;
        let id = loop {
            let candidate = generate_image_id();
            if let Entry::Vacant(v) = self.slots.entry(candidate.clone()) {
                v.insert(Arc::clone(&slot));
                break candidate;
            }
        };

        let image = Image {
            id: id.clone(),
            width,
            height,
            created_at: Utc::now(),
            original: pixel_bytes,
        };
        let snapshot = ImageSnapshot::new(image, Vec::new(), FIRST_MASK_ID, self.next_revision());

        if let Err(e) = self.persist(&snapshot).await {
            drop(guard);
            self.slots.remove(&id);
            return Err(e);
        }

        *guard = Some(Arc::new(snapshot));
        counter!("segmask_images_created_total").increment(1);
        info!("Created image {} ({}x{})", id, width, height);
        Ok(id)
    }

    /// Replace the image's mask batch atomically
    ///
    /// Ids continue from the image's first free id, so ids from an earlier
    /// batch are never reused for different masks.
    pub async fn store_masks(&self, image_id: &str, raw: Vec<RawMask>) -> CoreResult<Vec<MaskId>> {
        let start = Instant::now();
        let slot = self.slot(image_id)?;
        let mut guard = slot.state.write().await;
        let current = guard
            .as_ref()
            .cloned()
            .ok_or_else(|| CoreError::image_not_found(image_id))?;

        let (width, height) = current.dimensions();
        for (i, mask) in raw.iter().enumerate() {
            if mask.bitmap.dimensions() != (width, height) {
                counter!("segmask_mask_batches_rejected_total").increment(1);
                return Err(CoreError::validation(
                    format!("masks[{}]", i),
                    format!(
                        "bitmap is {}x{}, image is {}x{}",
                        mask.bitmap.width(),
                        mask.bitmap.height(),
                        width,
                        height
                    ),
                ));
            }
        }

        let first = current.next_mask_id();
        let count = raw.len() as MaskId;
        let ids: Vec<MaskId> = (first..first + count).collect();
        let revision = self.next_revision();

        let image = current.image().clone();
        let assign_ids = ids.clone();
        let next = tokio::task::spawn_blocking(move || {
            let masks = raw
                .into_iter()
                .zip(assign_ids)
                .map(|(m, id)| Mask::new(id, m.bitmap, m.score))
                .collect();
            ImageSnapshot::new(image, masks, first + count, revision)
        })
        .await
        .map_err(|e| CoreError::Storage(format!("mask build task failed: {}", e)))?;

        self.persist(&next).await?;
        *guard = Some(Arc::new(next));

        counter!("segmask_masks_stored_total").increment(ids.len() as u64);
        histogram!("segmask_store_masks_duration_seconds").record(start.elapsed());
        info!(
            "Stored {} masks for image {} (ids {:?}..={:?})",
            ids.len(),
            image_id,
            ids.first(),
            ids.last()
        );
        Ok(ids)
    }

    /// Consistent read-only view of one image
    pub async fn snapshot(&self, image_id: &str) -> CoreResult<Arc<ImageSnapshot>> {
        let slot = self.slot(image_id)?;
        let state = slot.state.read().await;
        state
            .as_ref()
            .cloned()
            .ok_or_else(|| CoreError::image_not_found(image_id))
    }

    pub async fn get_image(&self, image_id: &str) -> CoreResult<Image> {
        Ok(self.snapshot(image_id).await?.image().clone())
    }

    pub async fn get_mask(&self, image_id: &str, mask_id: MaskId) -> CoreResult<Mask> {
        self.snapshot(image_id)
            .await?
            .mask(mask_id)
            .cloned()
            .ok_or_else(|| CoreError::MaskNotFound {
                image_id: image_id.to_string(),
                mask_id,
            })
    }

    /// Uploaded bytes of an image
    pub async fn original_bytes(&self, image_id: &str) -> CoreResult<Bytes> {
        Ok(self.snapshot(image_id).await?.image().original.clone())
    }

    /// All images, oldest first (ties broken by id)
    pub async fn list_images(&self) -> Vec<ImageSummary> {
        let slots: Vec<Arc<ImageSlot>> = self.slots.iter().map(|e| Arc::clone(e.value())).collect();

        let mut summaries = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(snapshot) = slot.state.read().await.as_ref() {
                summaries.push(snapshot.summary());
            }
        }
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Delete an image and all of its masks
    ///
    /// Deleting an absent image is `ImageNotFound`, so a second delete fails.
    pub async fn delete_image(&self, image_id: &str) -> CoreResult<()> {
        let slot = self.slot(image_id)?;
        let mut guard = slot.state.write().await;
        if guard.is_none() {
            return Err(CoreError::image_not_found(image_id));
        }

        self.remove_persisted(image_id).await?;
        *guard = None;
        drop(guard);

        self.slots
            .remove_if(image_id, |_, s| Arc::ptr_eq(s, &slot));
        counter!("segmask_images_deleted_total").increment(1);
        info!("Deleted image {}", image_id);
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, image_id: &str) -> CoreResult<Arc<ImageSlot>> {
        self.slots
            .get(image_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| CoreError::image_not_found(image_id))
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Persist a snapshot, retrying a failed write once
    async fn persist(&self, snapshot: &ImageSnapshot) -> CoreResult<()> {
        let owned = snapshot.clone();
        let record = tokio::task::spawn_blocking(move || ImageRecord::from_snapshot(&owned))
            .await
            .map_err(|e| CoreError::Storage(format!("encode task failed: {}", e)))??;

        match self.backend.save(&record).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("Persisting image {} failed, retrying once: {}", record.id, first);
                counter!("segmask_storage_retries_total").increment(1);
                self.backend.save(&record).await.map_err(|e| {
                    error!("Persisting image {} failed after retry: {}", record.id, e);
                    counter!("segmask_storage_errors_total").increment(1);
                    e
                })
            }
        }
    }

    async fn remove_persisted(&self, image_id: &str) -> CoreResult<()> {
        match self.backend.remove(image_id).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("Removing image {} failed, retrying once: {}", image_id, first);
                counter!("segmask_storage_retries_total").increment(1);
                self.backend.remove(image_id).await.map_err(|e| {
                    error!("Removing image {} failed after retry: {}", image_id, e);
                    counter!("segmask_storage_errors_total").increment(1);
                    e
                })
            }
        }
    }
}

/// `img_<yyyymmdd_HHMMSS>_<8 hex chars>`
fn generate_image_id() -> ImageId {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    let id = format!("img_{}_{}", timestamp, &suffix[..8]);
    debug!("Generated image id {}", id);
    id
}
