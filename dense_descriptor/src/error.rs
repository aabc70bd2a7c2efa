//! Error types for dense_descriptor.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while configuring or running descriptor training.
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// The training data root does not exist.
    #[error("training data root does not exist: {}", path.display())]
    DataRootMissing {
        /// The configured data root.
        path: PathBuf,
    },

    /// Resuming was requested but no trained model path was given.
    #[error("resume requested but no trained model path was provided")]
    ResumePathRequired,

    /// The checkpoint to resume from does not exist or is incomplete.
    #[error("no trained model found at {}", path.display())]
    CheckpointNotFound {
        /// The checkpoint path that was looked up.
        path: PathBuf,
    },

    /// Checkpoint contents are unusable.
    #[error("checkpoint error: {message}")]
    Checkpoint {
        /// Description of the error.
        message: String,
    },

    /// Invalid or corrupted data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DescriptorError {
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub(crate) fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint {
            message: message.into(),
        }
    }
}

/// Result type for dense_descriptor operations.
pub type Result<T> = std::result::Result<T, DescriptorError>;
