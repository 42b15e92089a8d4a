//! Image and mask types held by the store

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{BBox, MaskBitmap, MaskId};

/// Image identifier, globally unique
pub type ImageId = String;

/// An uploaded image and its original encoded bytes
#[derive(Debug, Clone)]
pub struct Image {
    pub id: ImageId,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
    /// Original upload, as received
    pub original: Bytes,
}

/// A stored mask. Geometry is derived from the bitmap at construction and
/// cannot be set independently.
#[derive(Debug, Clone)]
pub struct Mask {
    id: MaskId,
    bitmap: Arc<MaskBitmap>,
    bbox: BBox,
    area: u64,
    score: Option<f32>,
}

impl Mask {
    pub(crate) fn new(id: MaskId, bitmap: MaskBitmap, score: Option<f32>) -> Self {
        let bbox = bitmap.bbox();
        let area = bitmap.area();
        Self {
            id,
            bitmap: Arc::new(bitmap),
            bbox,
            area,
            score,
        }
    }

    pub fn id(&self) -> MaskId {
        self.id
    }

    pub fn bitmap(&self) -> &MaskBitmap {
        &self.bitmap
    }

    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    pub fn area(&self) -> u64 {
        self.area
    }

    pub fn score(&self) -> Option<f32> {
        self.score
    }

    /// Whether the mask covers pixel (x, y)
    pub fn covers(&self, x: u32, y: u32) -> bool {
        self.bbox.contains(x, y) && self.bitmap.get(x, y)
    }
}

/// Raw mask input for a batch: a bitmap plus its model metadata
#[derive(Debug, Clone)]
pub struct RawMask {
    pub bitmap: MaskBitmap,
    pub score: Option<f32>,
}

impl RawMask {
    pub fn new(bitmap: MaskBitmap) -> Self {
        Self {
            bitmap,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}

/// Listing entry for an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: ImageId,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
    pub mask_count: usize,
}

/// Immutable view of one image and its current mask batch
///
/// Readers hold an `Arc<ImageSnapshot>` and never observe a partial batch.
#[derive(Debug, Clone)]
pub struct ImageSnapshot {
    image: Image,
    /// Sorted by ascending id
    masks: Vec<Mask>,
    next_mask_id: MaskId,
    revision: u64,
}

impl ImageSnapshot {
    pub(crate) fn new(image: Image, masks: Vec<Mask>, next_mask_id: MaskId, revision: u64) -> Self {
        let mut masks = masks;
        masks.sort_by_key(|m| m.id());
        Self {
            image,
            masks,
            next_mask_id,
            revision,
        }
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn id(&self) -> &str {
        &self.image.id
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width, self.image.height)
    }

    pub fn masks(&self) -> &[Mask] {
        &self.masks
    }

    pub fn mask(&self, id: MaskId) -> Option<&Mask> {
        self.masks
            .binary_search_by_key(&id, |m| m.id())
            .ok()
            .map(|i| &self.masks[i])
    }

    pub fn next_mask_id(&self) -> MaskId {
        self.next_mask_id
    }

    /// Store revision at which this snapshot was committed
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            id: self.image.id.clone(),
            width: self.image.width,
            height: self.image.height,
            created_at: self.image.created_at,
            mask_count: self.masks.len(),
        }
    }
}
