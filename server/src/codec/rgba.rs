//! Packed RGBA buffers and straight-alpha "over" compositing
//!
//! Layout: row-major, 4 bytes per pixel in R, G, B, A order, straight
//! (non-premultiplied) alpha. `data.len() == width * height * 4`.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A single RGBA color with straight alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Validate wire channels, each of which must lie in 0..=255
    pub fn from_channels(channels: [i64; 4]) -> CoreResult<Self> {
        let mut out = [0u8; 4];
        for (i, (&c, slot)) in channels.iter().zip(out.iter_mut()).enumerate() {
            *slot = u8::try_from(c).map_err(|_| {
                CoreError::validation(
                    format!("color[{}]", i),
                    format!("channel value {} is outside 0-255", c),
                )
            })?;
        }
        Ok(Self::from(out))
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Composite `self` over `dst`
    ///
    /// `oa = sa + da(1 - sa)`, `oc = (sc*sa + dc*da*(1 - sa)) / oa`. When `dst`
    /// is opaque this reduces to `src*sa + dst*(1 - sa)`. Integer math with
    /// round-half-up keeps results bit-identical across platforms.
    pub fn over(self, dst: Rgba) -> Rgba {
        let sa = self.a as u32;
        if sa == 255 {
            return self;
        }
        if sa == 0 {
            return dst;
        }

        let da = dst.a as u32;
        let inv = 255 - sa;
        // Output alpha scaled by 255
        let oa_w = sa * 255 + da * inv;

        let channel = |sc: u8, dc: u8| -> u8 {
            let num = sc as u32 * sa * 255 + dc as u32 * da * inv;
            ((num + oa_w / 2) / oa_w) as u8
        };

        Rgba {
            r: channel(self.r, dst.r),
            g: channel(self.g, dst.g),
            b: channel(self.b, dst.b),
            a: ((oa_w + 127) / 255) as u8,
        }
    }
}

impl From<[u8; 4]> for Rgba {
    fn from(c: [u8; 4]) -> Self {
        Rgba::new(c[0], c[1], c[2], c[3])
    }
}

/// Packed RGBA8 image buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RgbaBuffer {
    /// Fully transparent buffer (every byte zero)
    pub fn transparent(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        let i = self.offset(x, y);
        Rgba::new(
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        )
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, color: Rgba) {
        let i = self.offset(x, y);
        self.data[i..i + 4].copy_from_slice(&color.to_array());
    }

    /// Composite `color` over the pixel at (x, y)
    pub fn blend_over(&mut self, x: u32, y: u32, color: Rgba) {
        let blended = color.over(self.pixel(x, y));
        self.put_pixel(x, y, blended);
    }

    /// Whether every pixel has zero alpha
    pub fn is_fully_transparent(&self) -> bool {
        self.data.chunks_exact(4).all(|px| px[3] == 0)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }
}
