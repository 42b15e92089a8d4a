//! PointResolver: which masks cover a pixel
//!
//! Ordering policy: covering masks are returned by ascending area, ties broken
//! by ascending mask id. The smallest covering mask is usually the most
//! specific region (a window inside a wall). Callers wanting a different
//! priority can re-sort using `mask_ids`, which lists every mask in id order.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use tracing::debug;

use super::index::MaskIndex;
use crate::codec::MaskId;
use crate::error::{CoreError, CoreResult};
use crate::store::{ImageId, ImageSnapshot, MaskStore};

/// Result of a point query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointQuery {
    pub x: u32,
    pub y: u32,
    /// Covering masks, most specific first
    pub mask_ids: Vec<MaskId>,
    /// Number of masks on the image at query time
    pub total_masks_checked: usize,
}

impl PointQuery {
    /// The most specific covering mask, if any
    pub fn best(&self) -> Option<MaskId> {
        self.mask_ids.first().copied()
    }
}

struct CachedIndex {
    revision: u64,
    index: Arc<MaskIndex>,
}

pub struct PointResolver {
    store: Arc<MaskStore>,
    /// image id -> index built for a specific store revision
    indexes: DashMap<ImageId, CachedIndex>,
}

impl PointResolver {
    pub fn new(store: Arc<MaskStore>) -> Self {
        Self {
            store,
            indexes: DashMap::new(),
        }
    }

    /// Ids of every mask covering (x, y), most specific first
    pub async fn find_masks_at(&self, image_id: &str, x: i64, y: i64) -> CoreResult<Vec<MaskId>> {
        Ok(self.query(image_id, x, y).await?.mask_ids)
    }

    /// Point query with the bookkeeping the HTTP layer reports
    pub async fn query(&self, image_id: &str, x: i64, y: i64) -> CoreResult<PointQuery> {
        counter!("segmask_point_queries_total").increment(1);
        let snapshot = self.store.snapshot(image_id).await?;
        let (px, py) = check_bounds(&snapshot, x, y)?;

        let index = self.index_for(&snapshot);
        let mask_ids = resolve(&snapshot, &index, px, py);

        debug!(
            "Point ({}, {}) on {} covered by {} of {} masks",
            px,
            py,
            image_id,
            mask_ids.len(),
            snapshot.masks().len()
        );

        Ok(PointQuery {
            x: px,
            y: py,
            mask_ids,
            total_masks_checked: snapshot.masks().len(),
        })
    }

    /// Every mask id on the image in ascending id (draw) order
    pub async fn mask_ids(&self, image_id: &str) -> CoreResult<Vec<MaskId>> {
        let snapshot = self.store.snapshot(image_id).await?;
        Ok(snapshot.masks().iter().map(|m| m.id()).collect())
    }

    /// Drop the cached index of a deleted image
    pub fn forget(&self, image_id: &str) {
        self.indexes.remove(image_id);
    }

    fn index_for(&self, snapshot: &ImageSnapshot) -> Arc<MaskIndex> {
        if let Some(cached) = self.indexes.get(snapshot.id())
            && cached.revision == snapshot.revision()
        {
            return Arc::clone(&cached.index);
        }

        let index = Arc::new(MaskIndex::build(snapshot));
        // A concurrent newer snapshot may already have stored its index
        let mut entry = self
            .indexes
            .entry(snapshot.id().to_string())
            .or_insert_with(|| CachedIndex {
                revision: snapshot.revision(),
                index: Arc::clone(&index),
            });
        if entry.revision < snapshot.revision() {
            *entry = CachedIndex {
                revision: snapshot.revision(),
                index: Arc::clone(&index),
            };
        }
        index
    }
}

fn check_bounds(snapshot: &ImageSnapshot, x: i64, y: i64) -> CoreResult<(u32, u32)> {
    let (width, height) = snapshot.dimensions();
    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
        return Err(CoreError::OutOfRange {
            x,
            y,
            width,
            height,
        });
    }
    Ok((x as u32, y as u32))
}

/// Covering masks of (x, y), ordered by ascending area then id
pub fn resolve(snapshot: &ImageSnapshot, index: &MaskIndex, x: u32, y: u32) -> Vec<MaskId> {
    let masks = snapshot.masks();
    let mut hits: Vec<(u64, MaskId)> = index
        .candidates(x, y)
        .map(|i| &masks[i])
        .filter(|m| m.bitmap().get(x, y))
        .map(|m| (m.area(), m.id()))
        .collect();
    hits.sort_unstable();
    hits.into_iter().map(|(_, id)| id).collect()
}
