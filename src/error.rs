//! Error types for anovox

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnovoxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PCD error: {0}")]
    Pcd(String),

    #[error("Shape mismatch in {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),
}

impl AnovoxError {
    pub fn shape_mismatch(what: &str, expected: usize, found: usize) -> Self {
        AnovoxError::ShapeMismatch {
            what: what.to_string(),
            expected,
            found,
        }
    }
}

pub type Result<T> = std::result::Result<T, AnovoxError>;
