//! Request and response bodies of the HTTP API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::MaskId;
use crate::render::RenderInstruction;
use crate::segment::GenerationStatus;
use crate::store::{ImageSnapshot, ImageSummary, Mask};

/// Response for POST /api/images
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateImageResponse {
    pub image_id: String,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
}

/// Response for GET /api/images
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageListResponse {
    pub images: Vec<ImageSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MaskSummary {
    pub id: MaskId,
    /// `[x, y, w, h]`; all zero for an empty mask
    pub bbox: [u32; 4],
    pub area: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl From<&Mask> for MaskSummary {
    fn from(mask: &Mask) -> Self {
        Self {
            id: mask.id(),
            bbox: mask.bbox().to_array(),
            area: mask.area(),
            score: mask.score(),
        }
    }
}

/// Response for GET /api/images/:id
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageInfoResponse {
    pub image_id: String,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
    pub masks: Vec<MaskSummary>,
}

impl From<&ImageSnapshot> for ImageInfoResponse {
    fn from(snapshot: &ImageSnapshot) -> Self {
        let image = snapshot.image();
        Self {
            image_id: image.id.clone(),
            width: image.width,
            height: image.height,
            created_at: image.created_at,
            masks: snapshot.masks().iter().map(MaskSummary::from).collect(),
        }
    }
}

/// Response for GET /api/images/:id/masks/:mask_id
#[derive(Debug, Serialize, Deserialize)]
pub struct MaskDetailResponse {
    pub image_id: String,
    #[serde(flatten)]
    pub mask: MaskSummary,
    /// Single-channel PNG, 255 where set
    pub mask_b64: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MaskUpload {
    pub mask_b64: String,
    #[serde(default)]
    pub score: Option<f32>,
}

/// Body of PUT /api/images/:id/masks
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreMasksRequest {
    pub masks: Vec<MaskUpload>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreMasksResponse {
    pub image_id: String,
    pub mask_ids: Vec<MaskId>,
    pub mask_count: usize,
}

/// Raw `x`/`y` query values, parsed by the handler so a bad value names its field
#[derive(Debug, Deserialize)]
pub struct PointQueryParams {
    pub x: Option<String>,
    pub y: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// Response for GET /api/images/:id/mask_at_point
#[derive(Debug, Serialize, Deserialize)]
pub struct MaskAtPointResponse {
    pub point: Point,
    /// Most specific covering mask, or null when nothing covers the point
    pub mask_id: Option<MaskId>,
    /// Every covering mask, smallest area first
    pub all_containing_masks: Vec<MaskId>,
    pub total_containing_masks: usize,
    pub total_masks_checked: usize,
}

/// Body of POST /api/images/:id/render
#[derive(Debug, Serialize, Deserialize)]
pub struct RenderRequest {
    pub render_instructions: Vec<RenderInstruction>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenderResponse {
    pub image_id: String,
    /// RGBA PNG, transparent wherever no instruction painted
    pub rendered_image_b64: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteImageResponse {
    pub image_id: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct GenerationResponse {
    pub image_id: String,
    #[serde(flatten)]
    pub status: GenerationStatus,
}
