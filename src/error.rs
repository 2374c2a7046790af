//! Error types for the decision core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown signal class: {0}")]
    UnknownSignalClass(String),

    #[error("confidence out of range: {0} (expected 0.0..=1.0)")]
    InvalidConfidence(f64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
