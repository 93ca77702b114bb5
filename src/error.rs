//! Error types for GGUF fake quantization.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for transcoding operations.
pub type Result<T> = std::result::Result<T, FakeQuantError>;

/// Fake quantization error types.
#[derive(Debug, Error)]
pub enum FakeQuantError {
    /// Layer selection argument could not be parsed.
    #[error("invalid layer selection '{input}': {reason} (expected 'all' or e.g. '0' / '0,1,2')")]
    InvalidSelectionSyntax { input: String, reason: String },

    /// Source container does not exist or cannot be read.
    #[error("input file not found or unreadable: {}", path.display())]
    SourceNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single metadata field could not be represented in the destination.
    #[error("metadata field '{key}' not copied: {reason}")]
    MetadataCopyFailure { key: String, reason: String },

    /// Original and truncated arrays disagree in length.
    #[error(
        "shape mismatch analyzing '{tensor}': original has {original} elements, \
         truncated has {transformed}"
    )]
    ShapeMismatch {
        tensor: String,
        original: usize,
        transformed: usize,
    },

    /// Destination container could not be fully written.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source container is malformed.
    #[error("malformed GGUF: {0}")]
    Format(String),

    /// A selected tensor is stored in an encoding that cannot be truncated.
    #[error("tensor '{tensor}' has unsupported element type {dtype} for truncation")]
    UnsupportedTensorType { tensor: String, dtype: String },

    /// Source container holds no tensors.
    #[error("no tensors in {}", path.display())]
    EmptyContainer { path: PathBuf },

    /// Report artifact could not be serialized.
    #[error("failed to serialize report: {0}")]
    Report(#[from] serde_json::Error),
}

impl FakeQuantError {
    /// Create a format error.
    pub fn format(message: impl Into<String>) -> Self {
        FakeQuantError::Format(message.into())
    }

    /// Create a metadata copy failure for `key`.
    pub fn metadata(key: impl Into<String>, reason: impl Into<String>) -> Self {
        FakeQuantError::MetadataCopyFailure {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether the pipeline may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FakeQuantError::MetadataCopyFailure { .. })
    }
}
