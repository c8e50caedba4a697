//! Embedding producer abstraction.
//!
//! The core never computes embeddings itself. A provider is constructed once, handed to
//! the builder or matcher, and reused for every batch.

mod http;

pub use http::HttpEmbeddingClient;

use std::future::Future;
use std::io::Cursor;
use std::slice;
use std::time::Duration;

use image::{DynamicImage, ImageReader};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::vector::Embedding;

/// Trait for generating embeddings from decoded images
pub trait EmbeddingProvider: Send + Sync {
    /// Ensure the embedding model is reachable and loaded
    ///
    /// # Errors
    /// Returns an error if the model is not available
    fn ensure_model_available(&self) -> impl Future<Output = Result<()>> + Send;

    /// Embed a batch of images, returning one raw vector per image in the same order
    ///
    /// # Errors
    /// Returns an error if the provider call fails
    fn embed_images(
        &self,
        images: &[DynamicImage],
    ) -> impl Future<Output = Result<Vec<Embedding>>> + Send;
}

/// Embed a single query image.
///
/// # Errors
/// Returns an error if the provider fails or returns no vector.
pub async fn embed_query<E: EmbeddingProvider>(client: &E, image: &DynamicImage) -> Result<Embedding> {
    let embeddings = client.embed_images(slice::from_ref(image)).await?;
    let count = embeddings.len();
    let mut iter = embeddings.into_iter();
    match (iter.next(), count) {
        (Some(embedding), 1) => Ok(embedding),
        _ => Err(Error::InvalidResponse(format!(
            "expected 1 embedding for query image, got {count}"
        ))),
    }
}

/// Run a provider call, failing with `Timeout` once `limit` elapses.
///
/// # Errors
/// Returns `Timeout` if the call does not finish in time, otherwise the call's own result.
pub async fn with_timeout<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    timeout(limit, call).await.unwrap_or_else(|_| {
        Err(Error::Timeout {
            millis: limit.as_millis(),
        })
    })
}

/// Decode raw query bytes into an RGB image.
///
/// # Errors
/// Returns `ItemDecode` if the bytes are not a supported image.
pub fn decode_query_image(bytes: &[u8]) -> Result<DynamicImage> {
    let decode_error = |reason: String| Error::ItemDecode {
        path: "<query>".to_owned(),
        reason,
    };
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|error| decode_error(error.to_string()))?
        .decode()
        .map_err(|error| decode_error(error.to_string()))?;
    Ok(DynamicImage::ImageRgb8(image.into_rgb8()))
}
