//! Persisted record layout
//!
//! One record per image:
//! `{id, width, height, created_at, next_mask_id, original_b64,
//!   masks: [{id, bbox: [x, y, w, h], area, score, bitmap_png_b64}]}`

use std::collections::HashSet;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Image, ImageSnapshot, Mask};
use crate::codec::{self, BBox, MaskId};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
    pub next_mask_id: MaskId,
    pub original_b64: String,
    #[serde(default)]
    pub masks: Vec<MaskRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskRecord {
    pub id: MaskId,
    pub bbox: [u32; 4],
    pub area: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub bitmap_png_b64: String,
}

impl ImageRecord {
    /// Encode a snapshot into its persisted form
    pub fn from_snapshot(snapshot: &ImageSnapshot) -> CoreResult<Self> {
        let image = snapshot.image();
        let masks = snapshot
            .masks()
            .iter()
            .map(|m| {
                Ok(MaskRecord {
                    id: m.id(),
                    bbox: m.bbox().to_array(),
                    area: m.area(),
                    score: m.score(),
                    bitmap_png_b64: codec::encode_base64(&codec::encode_mask_png(m.bitmap())?),
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(Self {
            id: image.id.clone(),
            width: image.width,
            height: image.height,
            created_at: image.created_at,
            next_mask_id: snapshot.next_mask_id(),
            original_b64: codec::encode_base64(&image.original),
            masks,
        })
    }

    /// Decode a persisted record, re-checking every write-time invariant
    pub fn into_snapshot(self, revision: u64) -> CoreResult<ImageSnapshot> {
        if !is_valid_image_id(&self.id) {
            return Err(CoreError::validation("id", format!("invalid image id '{}'", self.id)));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CoreError::validation("dimensions", "image has zero width or height"));
        }

        let mut seen = HashSet::new();
        let mut masks = Vec::with_capacity(self.masks.len());
        for record in self.masks {
            if !seen.insert(record.id) || record.id >= self.next_mask_id {
                return Err(CoreError::validation(
                    "masks",
                    format!("duplicate or out-of-sequence mask id {}", record.id),
                ));
            }

            let bitmap = codec::decode_mask_b64(&record.bitmap_png_b64)?;
            if bitmap.dimensions() != (self.width, self.height) {
                return Err(CoreError::validation(
                    format!("masks[{}].bitmap", record.id),
                    format!(
                        "bitmap is {}x{}, image is {}x{}",
                        bitmap.width(),
                        bitmap.height(),
                        self.width,
                        self.height
                    ),
                ));
            }

            let mask = Mask::new(record.id, bitmap, record.score);
            if mask.area() != record.area || mask.bbox() != BBox::from_array(record.bbox) {
                return Err(CoreError::validation(
                    format!("masks[{}]", record.id),
                    "stored area/bbox disagree with bitmap",
                ));
            }
            masks.push(mask);
        }

        let original = codec::decode_base64("original_b64", &self.original_b64)?;
        let image = Image {
            id: self.id,
            width: self.width,
            height: self.height,
            created_at: self.created_at,
            original: Bytes::from(original),
        };

        Ok(ImageSnapshot::new(image, masks, self.next_mask_id, revision))
    }
}

/// Image ids double as file names, so only `[A-Za-z0-9_-]` is allowed
pub fn is_valid_image_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
