//! Render module
//!
//! `Compositor` turns an ordered list of (mask, color) directives into a
//! packed RGBA buffer or PNG; `RenderCache` memoizes encoded PNGs per store
//! revision.

mod cache;
mod compositor;

pub use cache::{RenderCache, RenderCacheConfig, RenderCacheStats, RenderKey};
pub use compositor::{Compositor, RenderInstruction, composite};
