//! MaskGenerator: background mask generation through the segmentation service
//!
//! The external call runs without any image lock held. Only the final
//! `store_masks` commit takes the image's write lock, and once a task has
//! reached its commit it can no longer be cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use super::client::SegmentationClient;
use crate::codec::MaskId;
use crate::error::{CoreError, CoreResult};
use crate::store::{ImageId, MaskStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationStatus {
    /// No generation has been requested for this image
    Idle,
    Running { started_at: DateTime<Utc> },
    Completed { mask_count: usize },
    Failed { reason: String },
    Cancelled,
}

impl GenerationStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, GenerationStatus::Running { .. })
    }
}

struct GenerationTask {
    epoch: u64,
    status: GenerationStatus,
    abort: Option<AbortHandle>,
    /// Set once the task has begun its commit
    committing: bool,
}

pub struct MaskGenerator {
    store: Arc<MaskStore>,
    client: Option<Arc<dyn SegmentationClient>>,
    timeout: Duration,
    tasks: Arc<DashMap<ImageId, GenerationTask>>,
    epochs: AtomicU64,
}

impl MaskGenerator {
    /// `client` is `None` when no segmentation service is configured; every
    /// generation request then fails with `ServiceUnavailable`.
    pub fn new(
        store: Arc<MaskStore>,
        client: Option<Arc<dyn SegmentationClient>>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            client,
            timeout,
            tasks: Arc::new(DashMap::new()),
            epochs: AtomicU64::new(0),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    /// Start generation in the background
    ///
    /// While a task for the image is running, its status is returned instead
    /// of starting a second one.
    pub async fn start(&self, image_id: &str) -> CoreResult<GenerationStatus> {
        let client = self.client()?;
        // Existence check only; the task reads its own snapshot
        self.store.snapshot(image_id).await?;

        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        let status = GenerationStatus::Running {
            started_at: Utc::now(),
        };
        {
            let mut entry = self
                .tasks
                .entry(image_id.to_string())
                .or_insert_with(|| GenerationTask {
                    epoch: 0,
                    status: GenerationStatus::Idle,
                    abort: None,
                    committing: false,
                });
            if entry.status.is_running() {
                return Ok(entry.status.clone());
            }
            *entry = GenerationTask {
                epoch,
                status: status.clone(),
                abort: None,
                committing: false,
            };
        }

        let store = Arc::clone(&self.store);
        let tasks = Arc::clone(&self.tasks);
        let timeout = self.timeout;
        let id = image_id.to_string();

        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let outcome = async {
                let masks = segment_with_timeout(&store, client.as_ref(), &id, timeout).await?;

                // Claim the commit; a cancel that got here first wins
                let claimed = match tasks.get_mut(&id) {
                    Some(mut task) if task.epoch == epoch && task.status.is_running() => {
                        task.committing = true;
                        true
                    }
                    _ => false,
                };
                if !claimed {
                    return Ok(None);
                }
                store.store_masks(&id, masks).await.map(Some)
            }
            .await;

            let next = match outcome {
                Ok(Some(ids)) => {
                    counter!("segmask_generations_total", "outcome" => "completed").increment(1);
                    info!("Generated {} masks for image {}", ids.len(), id);
                    GenerationStatus::Completed {
                        mask_count: ids.len(),
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    counter!("segmask_generations_total", "outcome" => "failed").increment(1);
                    warn!("Mask generation for image {} failed: {}", id, e);
                    GenerationStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            histogram!("segmask_generation_duration_seconds").record(start.elapsed());

            if let Some(mut task) = tasks.get_mut(&id)
                && task.epoch == epoch
            {
                task.status = next;
                task.abort = None;
                task.committing = false;
            }
        });

        if let Some(mut task) = self.tasks.get_mut(image_id)
            && task.epoch == epoch
            && task.status.is_running()
        {
            task.abort = Some(handle.abort_handle());
        }

        info!("Started mask generation for image {}", image_id);
        Ok(status)
    }

    pub async fn status(&self, image_id: &str) -> CoreResult<GenerationStatus> {
        if let Some(task) = self.tasks.get(image_id) {
            return Ok(task.status.clone());
        }
        self.store.snapshot(image_id).await?;
        Ok(GenerationStatus::Idle)
    }

    /// Abort a running generation
    ///
    /// The image keeps its previous masks. A task that already reached its
    /// commit finishes normally and its `Running` status is returned.
    pub async fn cancel(&self, image_id: &str) -> CoreResult<GenerationStatus> {
        if let Some(status) = self.cancel_task(image_id) {
            return Ok(status);
        }
        self.store.snapshot(image_id).await?;
        Ok(GenerationStatus::Idle)
    }

    fn cancel_task(&self, image_id: &str) -> Option<GenerationStatus> {
        let mut task = self.tasks.get_mut(image_id)?;
        if !task.status.is_running() || task.committing {
            return Some(task.status.clone());
        }

        if let Some(abort) = task.abort.take() {
            abort.abort();
        }
        task.status = GenerationStatus::Cancelled;
        counter!("segmask_generations_total", "outcome" => "cancelled").increment(1);
        info!("Cancelled mask generation for image {}", image_id);
        Some(GenerationStatus::Cancelled)
    }

    /// Run generation inline and return the committed mask ids
    pub async fn generate(&self, image_id: &str) -> CoreResult<Vec<MaskId>> {
        let client = self.client()?;
        let masks = segment_with_timeout(&self.store, client.as_ref(), image_id, self.timeout).await?;
        self.store.store_masks(image_id, masks).await
    }

    /// Drop all state for a deleted image, aborting any running task
    pub fn forget(&self, image_id: &str) {
        if let Some((_, task)) = self.tasks.remove(image_id)
            && !task.committing
            && let Some(abort) = task.abort
        {
            abort.abort();
        }
    }

    fn client(&self) -> CoreResult<Arc<dyn SegmentationClient>> {
        self.client.clone().ok_or_else(|| {
            CoreError::ServiceUnavailable("no segmentation service is configured".into())
        })
    }
}

async fn segment_with_timeout(
    store: &MaskStore,
    client: &dyn SegmentationClient,
    image_id: &str,
    timeout: Duration,
) -> CoreResult<Vec<crate::store::RawMask>> {
    let original = store.original_bytes(image_id).await?;
    match tokio::time::timeout(timeout, client.segment(original)).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::ServiceUnavailable(format!(
            "segmentation timed out after {}s",
            timeout.as_secs_f32()
        ))),
    }
}
