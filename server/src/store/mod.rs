//! Mask store module
//!
//! This module provides:
//! - `MaskStore`, the per-image-locked home for images and mask batches
//! - `MaskBackend` trait with in-memory and JSON-file implementations
//! - the persisted record layout

mod backend;
mod file;
mod manager;
mod record;
mod types;

pub use backend::{MaskBackend, MemoryBackend};
pub use file::FileBackend;
pub use manager::MaskStore;
pub use record::{ImageRecord, MaskRecord};
pub use types::{Image, ImageId, ImageSnapshot, ImageSummary, Mask, RawMask};
