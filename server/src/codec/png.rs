//! PNG and base64 encoding for masks and rendered buffers

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageEncoder};

use super::bitmap::MaskBitmap;
use super::rgba::RgbaBuffer;
use crate::error::{CoreError, CoreResult};

/// Luma values strictly above this are treated as set mask pixels
pub const MASK_THRESHOLD: u8 = 128;

/// Lenient decoder: accepts padded and unpadded input
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64, tolerating a `data:<mime>;base64,` prefix and whitespace
pub fn decode_base64(field: &str, input: &str) -> CoreResult<Vec<u8>> {
    let payload = match input.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => input,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    LENIENT
        .decode(cleaned.as_bytes())
        .map_err(|e| CoreError::validation(field, format!("invalid base64: {}", e)))
}

/// Decode any supported image format, rejecting empty images
pub fn decode_image(bytes: &[u8]) -> CoreResult<DynamicImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| CoreError::validation("image", format!("cannot decode image: {}", e)))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(CoreError::validation("image", "image has zero width or height"));
    }
    Ok(img)
}

/// Decode a mask image and threshold its luma channel
pub fn decode_mask_png(bytes: &[u8]) -> CoreResult<MaskBitmap> {
    let luma = image::load_from_memory(bytes)
        .map_err(|e| CoreError::validation("mask", format!("cannot decode mask: {}", e)))?
        .into_luma8();

    let (width, height) = luma.dimensions();
    let bits = luma.as_raw().iter().map(|&v| v > MASK_THRESHOLD).collect();
    MaskBitmap::from_bits(width, height, bits)
}

/// Decode a base64 (optionally data-URL) mask PNG
pub fn decode_mask_b64(input: &str) -> CoreResult<MaskBitmap> {
    let bytes = decode_base64("mask_b64", input)?;
    decode_mask_png(&bytes)
}

/// Encode a mask as an 8-bit grayscale PNG (0 = unset, 255 = set)
pub fn encode_mask_png(bitmap: &MaskBitmap) -> CoreResult<Vec<u8>> {
    let pixels: Vec<u8> = bitmap
        .bits()
        .iter()
        .map(|&b| if b { 255 } else { 0 })
        .collect();

    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(
            &pixels,
            bitmap.width(),
            bitmap.height(),
            image::ExtendedColorType::L8,
        )
        .map_err(|e| CoreError::Storage(format!("mask PNG encoding failed: {}", e)))?;

    Ok(buffer)
}

/// Encode a rendered buffer as an RGBA PNG
pub fn encode_rgba_png(buffer: &RgbaBuffer) -> CoreResult<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(
            buffer.as_bytes(),
            buffer.width(),
            buffer.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| CoreError::Storage(format!("RGBA PNG encoding failed: {}", e)))?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Rgba;

    #[test]
    fn test_mask_png_preserves_bits() {
        let bitmap = MaskBitmap::from_fn(7, 5, |x, y| (x * 3 + y) % 4 == 0);
        let png = encode_mask_png(&bitmap).unwrap();
        let decoded = decode_mask_png(&png).unwrap();
        assert_eq!(decoded, bitmap);
    }

    #[test]
    fn test_rgba_mask_thresholds_on_luma() {
        // White-on-transparent RGBA, the shape some model backends emit
        let mut img = image::RgbaImage::new(3, 1);
        img.put_pixel(0, 0, image::Rgba([255, 255, 255, 255]));
        img.put_pixel(1, 0, image::Rgba([0, 0, 0, 0]));
        img.put_pixel(2, 0, image::Rgba([100, 100, 100, 255]));
        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(img.as_raw(), 3, 1, image::ExtendedColorType::Rgba8)
            .unwrap();

        let bitmap = decode_mask_png(&png).unwrap();
        assert_eq!(bitmap.bits(), &[true, false, false]);
    }

    #[test]
    fn test_decode_base64_accepts_data_url_and_missing_padding() {
        let encoded = encode_base64(b"hello");
        assert_eq!(decode_base64("f", &encoded).unwrap(), b"hello");

        let unpadded = encoded.trim_end_matches('=');
        assert_eq!(decode_base64("f", unpadded).unwrap(), b"hello");

        let data_url = format!("data:image/png;base64,{}", encoded);
        assert_eq!(decode_base64("f", &data_url).unwrap(), b"hello");
    }

    #[test]
    fn test_decode_base64_reports_field() {
        let err = decode_base64("mask_b64", "!!!not base64!!!").unwrap_err();
        match err {
            CoreError::Validation { field, .. } => assert_eq!(field, "mask_b64"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        assert!(matches!(
            decode_image(b"not an image"),
            Err(CoreError::Validation { .. })
        ));
    }

    #[test]
    fn test_rgba_png_decodes_to_same_pixels() {
        let mut buf = RgbaBuffer::transparent(2, 1);
        buf.put_pixel(0, 0, Rgba::new(255, 0, 0, 255));
        let png = encode_rgba_png(&buf).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().into_rgba8();
        assert_eq!(decoded.as_raw().as_slice(), buf.as_bytes());
    }
}
