//! Compositor: paints colored masks onto a transparent canvas

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cache::{RenderCache, RenderCacheConfig, RenderKey};
use crate::codec::{self, MaskId, Rgba, RgbaBuffer};
use crate::error::{CoreError, CoreResult};
use crate::store::{ImageSnapshot, MaskStore};

/// One directive of a render request
///
/// `color` is `[r, g, b, a]` with straight alpha; `None` excludes the mask.
/// Channels arrive as wide integers so out-of-range values can be reported
/// instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderInstruction {
    pub mask_id: MaskId,
    #[serde(default)]
    pub color: Option<[i64; 4]>,
}

impl RenderInstruction {
    pub fn paint(mask_id: MaskId, color: [u8; 4]) -> Self {
        Self {
            mask_id,
            color: Some(color.map(i64::from)),
        }
    }

    pub fn exclude(mask_id: MaskId) -> Self {
        Self {
            mask_id,
            color: None,
        }
    }
}

pub struct Compositor {
    store: Arc<MaskStore>,
    cache: RenderCache,
}

impl Compositor {
    pub fn new(store: Arc<MaskStore>, cache_config: RenderCacheConfig) -> Self {
        Self {
            store,
            cache: RenderCache::new(cache_config),
        }
    }

    /// Composite the instructions, in order, over a transparent canvas
    pub async fn render(
        &self,
        image_id: &str,
        instructions: &[RenderInstruction],
    ) -> CoreResult<RgbaBuffer> {
        let snapshot = self.store.snapshot(image_id).await?;
        let start = Instant::now();
        let buffer = composite(&snapshot, instructions)?;
        histogram!("segmask_render_duration_seconds").record(start.elapsed());
        counter!("segmask_renders_total").increment(1);
        Ok(buffer)
    }

    /// Render and PNG-encode, serving repeated requests from the cache
    pub async fn render_png(
        &self,
        image_id: &str,
        instructions: &[RenderInstruction],
    ) -> CoreResult<Bytes> {
        let snapshot = self.store.snapshot(image_id).await?;
        let key = RenderKey::new(image_id, snapshot.revision(), instructions);

        self.cache
            .get_or_try_insert_with(key, || async {
                let owned = instructions.to_vec();
                let snapshot = Arc::clone(&snapshot);
                let start = Instant::now();
                let png = tokio::task::spawn_blocking(move || {
                    let buffer = composite(&snapshot, &owned)?;
                    codec::encode_rgba_png(&buffer)
                })
                .await
                .map_err(|e| CoreError::Storage(format!("render task failed: {}", e)))??;

                histogram!("segmask_render_duration_seconds").record(start.elapsed());
                counter!("segmask_renders_total").increment(1);
                debug!(
                    "Rendered {} instructions for {} ({} bytes)",
                    instructions.len(),
                    image_id,
                    png.len()
                );
                Ok(Bytes::from(png))
            })
            .await
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }
}

/// Validate every instruction, then paint
///
/// Nothing is painted unless all mask ids exist and all colors are in range.
pub fn composite(
    snapshot: &ImageSnapshot,
    instructions: &[RenderInstruction],
) -> CoreResult<RgbaBuffer> {
    let mut plan = Vec::with_capacity(instructions.len());
    for (i, inst) in instructions.iter().enumerate() {
        let mask = snapshot
            .mask(inst.mask_id)
            .ok_or_else(|| CoreError::MaskNotFound {
                image_id: snapshot.id().to_string(),
                mask_id: inst.mask_id,
            })?;
        let color = match inst.color {
            Some(channels) => Some(Rgba::from_channels(channels).map_err(|e| match e {
                CoreError::Validation { field, message } => CoreError::Validation {
                    field: format!("render_instructions[{}].{}", i, field),
                    message,
                },
                other => other,
            })?),
            None => None,
        };
        if let Some(color) = color {
            plan.push((mask, color));
        }
    }

    let (width, height) = snapshot.dimensions();
    let mut buffer = RgbaBuffer::transparent(width, height);
    for (mask, color) in plan {
        if color.a == 0 {
            continue;
        }
        let bbox = mask.bbox();
        if bbox.is_empty() {
            continue;
        }
        let bitmap = mask.bitmap();
        for y in bbox.y..bbox.y + bbox.h {
            for x in bbox.x..bbox.x + bbox.w {
                if bitmap.get(x, y) {
                    buffer.blend_over(x, y, color);
                }
            }
        }
    }
    Ok(buffer)
}
