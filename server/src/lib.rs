//! Segmask Server Library
//!
//! Storage, point queries and compositing for per-image segmentation masks.
//! This module exports the server components for use in integration tests
//! and external tooling.

pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod query;
pub mod render;
pub mod segment;
pub mod store;

// Re-export commonly used types
pub use api::{AppState, api_routes};
pub use codec::{MaskBitmap, MaskId, Rgba, RgbaBuffer};
pub use config::Config;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use query::PointResolver;
pub use render::{Compositor, RenderInstruction};
pub use segment::{MaskGenerator, SegmentationClient};
pub use store::{FileBackend, MaskBackend, MaskStore, MemoryBackend, RawMask};
