//! Segmentation module
//!
//! This module provides:
//! - `SegmentationClient` trait and its reqwest implementation
//! - `MaskGenerator`, which runs generation as cancellable background tasks

mod client;
mod generator;

pub use client::{HttpSegmentationClient, SegmentationClient, parse_response};
pub use generator::{GenerationStatus, MaskGenerator};
