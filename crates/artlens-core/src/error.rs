use core::result::Result as CoreResult;
use std::path::PathBuf;

use reqwest::Error as ReqwestError;
use thiserror::Error;
use toml::de::Error as TomlError;

/// Result type for gallery operations.
pub type Result<T> = CoreResult<T, Error>;

/// Errors that can occur while building, persisting or querying a gallery.
#[derive(Debug, Error)]
pub enum Error {
    /// An HTTP request to the embedding service failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] ReqwestError),

    /// TOML deserialization failed.
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] TomlError),

    /// Configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The metadata table is missing or cannot be parsed.
    #[error("Invalid metadata input: {0}")]
    Input(String),

    /// A single image could not be read or decoded.
    #[error("Failed to decode image {path}: {reason}")]
    ItemDecode {
        /// Path of the offending image
        path: String,
        /// Decoder message
        reason: String,
    },

    /// A raw embedding had a norm too close to zero to normalize.
    #[error("Degenerate embedding for {image_path}")]
    DegenerateEmbedding {
        /// Image the embedding was produced for
        image_path: String,
    },

    /// The embedding provider failed for a whole batch.
    #[error("Embedding batch {batch_index} failed: {message}")]
    Encode {
        /// Index of the batch that was discarded
        batch_index: usize,
        /// Description of the last failure
        message: String,
    },

    /// An embedding call exceeded its time limit.
    #[error("Embedding call timed out after {millis}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        millis: u128,
    },

    /// The embedding provider reported an error.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The embedding provider returned a malformed response.
    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    /// Writing or reading the gallery file failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The gallery file does not exist.
    #[error("Gallery not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The gallery file cannot be parsed.
    #[error("Corrupt gallery file: {0}")]
    CorruptFormat(String),

    /// The gallery file was written by an incompatible format version.
    #[error("Unsupported gallery format version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version stored in the file
        found: u32,
        /// Version this build understands
        expected: u32,
    },

    /// Two vectors that must share a dimension do not.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Gallery dimension
        expected: usize,
        /// Offending vector dimension
        actual: usize,
    },

    /// The query embedding has a near-zero norm.
    #[error("Query embedding has near-zero norm")]
    DegenerateQuery,

    /// The build was cancelled between batches.
    #[error("Build cancelled before batch {next_batch}")]
    Cancelled {
        /// Batch the build resumes from
        next_batch: usize,
    },

    /// A general error not covered by other variants.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Determines whether this error may succeed if retried.
    ///
    /// Returns `true` for transient errors like timeouts, network failures or provider errors.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Request(_) | Self::Provider(_) | Self::Timeout { .. }
        )
    }

    /// Whether a build session can continue after this error.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Encode { .. } | Self::Cancelled { .. })
    }
}
