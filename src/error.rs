//! Custom error types for sketch2img.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the sketch2img library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to load a sketch from disk.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to decode in-memory image bytes.
    #[error("failed to decode image bytes: {source}")]
    ImageDecode {
        #[source]
        source: image::ImageError,
    },

    /// Failed to save an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to encode an image in memory.
    #[error("failed to encode image: {source}")]
    ImageEncode {
        #[source]
        source: image::ImageError,
    },

    /// A `data:` URI could not be parsed.
    #[error("malformed data URI: {reason}")]
    DataUri { reason: String },

    /// Bitmap shape violates the `height x width x channels` contract.
    #[error("invalid bitmap shape {height}x{width}x{channels}: {reason}")]
    InvalidShape {
        height: usize,
        width: usize,
        channels: usize,
        reason: String,
    },

    /// Failed to download a model.
    #[error("failed to download model {name}: {source}")]
    ModelDownload {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    /// Failed to load an ONNX model.
    #[error("failed to load ONNX model {name}: {source}")]
    ModelLoad {
        name: String,
        #[source]
        source: ort::Error,
    },

    /// Failed to load or run the prompt tokenizer.
    #[error("tokenizer error: {reason}")]
    Tokenizer { reason: String },

    /// Model inference failed.
    #[error("model inference failed: {source}")]
    Inference {
        #[source]
        source: ort::Error,
    },

    /// Failed to create cache directory.
    #[error("failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

impl Error {
    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for sketch2img operations.
pub type Result<T> = std::result::Result<T, Error>;
