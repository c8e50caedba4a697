//! Embedding provider backed by an HTTP image-embedding service.

use std::io::Cursor;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{DynamicImage, ImageFormat};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::vector::Embedding;

/// Request body for `POST {endpoint}/embed`
#[derive(Debug, Serialize)]
struct EmbedRequest<'req> {
    model: &'req str,
    images: Vec<String>,
}

/// Response body for `POST {endpoint}/embed`
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Embedding>,
}

/// HTTP embedding client
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    http: Client,
    endpoint: String,
    model: String,
}

impl HttpEmbeddingClient {
    /// Create a client for the given service endpoint and model name.
    ///
    /// Every request, including the health check, fails once `timeout` elapses.
    ///
    /// # Errors
    /// Returns `Request` if the HTTP client cannot be constructed.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint: String = endpoint.into();
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            model: model.into(),
        })
    }

    /// Create a client from the `[embedding]` configuration section
    ///
    /// # Errors
    /// Returns `Request` if the HTTP client cannot be constructed.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(config.endpoint.clone(), config.model.clone(), config.timeout())
    }

    /// Model name sent with every request
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Encode an image as base64 PNG for transport
    fn encode_image(image: &DynamicImage) -> Result<String> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|error| Error::Other(format!("Failed to encode image: {error}")))?;
        Ok(BASE64.encode(bytes))
    }

    /// Map a non-success status to an error; server-side failures are retryable
    fn status_error(status: StatusCode, body: &str) -> Error {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Error::Provider(format!("embedding service returned {status}: {body}"))
        } else {
            Error::InvalidResponse(format!("embedding service returned {status}: {body}"))
        }
    }
}

impl EmbeddingProvider for HttpEmbeddingClient {
    async fn ensure_model_available(&self) -> Result<()> {
        let url = format!("{}/health", self.endpoint);
        let response = self.http.get(&url).send().await.map_err(|error| {
            Error::Provider(format!(
                "Failed to connect to embedding service at {}: {error}",
                self.endpoint
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &body));
        }

        info!(
            "Embedding service at {} is ready (model '{}')",
            self.endpoint, self.model
        );
        Ok(())
    }

    async fn embed_images(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>> {
        if images.is_empty() {
            return Ok(Vec::default());
        }

        let encoded = images
            .iter()
            .map(Self::encode_image)
            .collect::<Result<Vec<_>>>()?;
        let request = EmbedRequest {
            model: &self.model,
            images: encoded,
        };

        debug!("Requesting {} embeddings from {}", images.len(), self.endpoint);
        let response = self
            .http
            .post(format!("{}/embed", self.endpoint))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &body));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|error| Error::InvalidResponse(format!("Malformed embedding response: {error}")))?;

        if parsed.embeddings.len() != images.len() {
            return Err(Error::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                images.len(),
                parsed.embeddings.len()
            )));
        }

        Ok(parsed.embeddings)
    }
}
