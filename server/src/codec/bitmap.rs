//! Single-channel mask bitmaps and their derived geometry

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Mask identifier, unique within its owning image
pub type MaskId = u32;

/// Axis-aligned bounding box in pixel coordinates
///
/// `w == 0 && h == 0` denotes the empty box of a mask with no set pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BBox {
    pub const EMPTY: BBox = BBox {
        x: 0,
        y: 0,
        w: 0,
        h: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        !self.is_empty() && x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    /// `[x, y, w, h]`, the persisted and wire representation
    pub fn to_array(self) -> [u32; 4] {
        [self.x, self.y, self.w, self.h]
    }

    pub fn from_array(a: [u32; 4]) -> Self {
        Self {
            x: a[0],
            y: a[1],
            w: a[2],
            h: a[3],
        }
    }
}

/// Boolean-per-pixel bitmap, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskBitmap {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl MaskBitmap {
    /// Create an all-unset bitmap
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    /// Wrap an existing row-major bit vector
    pub fn from_bits(width: u32, height: u32, bits: Vec<bool>) -> CoreResult<Self> {
        let expected = width as usize * height as usize;
        if bits.len() != expected {
            return Err(CoreError::validation(
                "bitmap",
                format!(
                    "expected {} pixels for {}x{}, got {}",
                    expected,
                    width,
                    height,
                    bits.len()
                ),
            ));
        }
        Ok(Self {
            width,
            height,
            bits,
        })
    }

    /// Build a bitmap by evaluating `f(x, y)` for every pixel
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut bits = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            bits,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    /// Whether the pixel at (x, y) is set; out-of-bounds reads are unset
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.bits[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            let idx = self.index(x, y);
            self.bits[idx] = value;
        }
    }

    /// Number of set pixels
    pub fn area(&self) -> u64 {
        self.bits.iter().filter(|&&b| b).count() as u64
    }

    /// Tight bounding box of all set pixels
    pub fn bbox(&self) -> BBox {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut any = false;

        for (x, y) in self.iter_set() {
            any = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        if !any {
            return BBox::EMPTY;
        }

        BBox {
            x: min_x,
            y: min_y,
            w: max_x - min_x + 1,
            h: max_y - min_y + 1,
        }
    }

    /// Iterate coordinates of set pixels in row-major order
    pub fn iter_set(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let width = self.width.max(1);
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .map(move |(i, _)| ((i as u32) % width, (i as u32) / width))
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}
