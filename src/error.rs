//! Error types for the classification pipeline

use std::path::PathBuf;

use thiserror::Error;

use crate::config::{ConfigError, ValidationError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transient network failure after {attempts} attempts: {message}")]
    TransientNetwork { attempts: u32, message: String },

    #[error("Model artifact error at {}: {message}", path.display())]
    ModelArtifact { path: PathBuf, message: String },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Build a [`Error::ModelArtifact`] for `path`
    pub fn artifact(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::ModelArtifact {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the failure came from a retried network operation
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientNetwork { .. } => true,
            Error::Stage { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
