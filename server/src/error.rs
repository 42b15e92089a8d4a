//! Error taxonomy shared by the store, resolver, compositor and generator

use thiserror::Error;

use crate::codec::MaskId;

/// Errors surfaced by the mask core
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("Image not found: {image_id}")]
    ImageNotFound { image_id: String },

    #[error("Mask {mask_id} not found on image {image_id}")]
    MaskNotFound { image_id: String, mask_id: MaskId },

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Point ({x}, {y}) is outside image bounds {width}x{height}")]
    OutOfRange {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    },

    #[error("Segmentation service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Coarse class of a [`CoreError`], used by callers to decide on retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    OutOfRange,
    ServiceUnavailable,
    Storage,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation_error",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Storage => "storage_error",
        }
    }
}

impl CoreError {
    pub fn image_not_found(image_id: impl Into<String>) -> Self {
        CoreError::ImageNotFound {
            image_id: image_id.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ImageNotFound { .. } | CoreError::MaskNotFound { .. } => {
                ErrorKind::NotFound
            }
            CoreError::Validation { .. } => ErrorKind::Validation,
            CoreError::OutOfRange { .. } => ErrorKind::OutOfRange,
            CoreError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            CoreError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
