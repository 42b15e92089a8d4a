//! Bitmap codec module
//!
//! This module provides:
//! - `MaskBitmap` and `BBox` for single-channel mask data
//! - `RgbaBuffer` and `Rgba` for packed RGBA output with "over" compositing
//! - PNG and base64 helpers used by persistence and the HTTP layer

mod bitmap;
mod png;
mod rgba;

pub use bitmap::{BBox, MaskBitmap, MaskId};
pub use png::{
    MASK_THRESHOLD, decode_base64, decode_image, decode_mask_b64, decode_mask_png, encode_base64,
    encode_mask_png, encode_rgba_png,
};
pub use rgba::{Rgba, RgbaBuffer};
