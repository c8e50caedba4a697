//! Configuration for the embedding service, gallery builds and matching.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::loader::{DEFAULT_BATCH_SIZE, LoaderOptions};

/// Complete configuration.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtlensConfig {
    /// Embedding service configuration
    pub embedding: EmbeddingConfig,
    /// Gallery build configuration
    pub build: BuildConfig,
    /// Query configuration
    pub matching: MatchingConfig,
    /// Gallery file location
    pub gallery: GalleryConfig,
}

/// Embedding service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding service
    pub endpoint: String,
    /// Model name sent with each request
    pub model: String,
    /// Timeout in seconds for one embedding call
    pub timeout_seconds: u64,
    /// Additional attempts after a retryable failure
    pub max_retries: usize,
    /// Delay between attempts in milliseconds
    pub retry_backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_owned(),
            model: "openai/clip-vit-base-patch32".to_owned(),
            timeout_seconds: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl EmbeddingConfig {
    /// Timeout for one embedding call
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Delay between attempts
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Gallery build configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Images per embedding call
    pub batch_size: usize,
    /// Metadata field delimiter
    pub delimiter: char,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delimiter: ',',
        }
    }
}

impl BuildConfig {
    /// Loader options for this configuration
    ///
    /// # Errors
    /// Returns an error if the delimiter is not an ASCII character
    pub fn loader_options(&self) -> Result<LoaderOptions> {
        let delimiter = u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                Error::Config(format!(
                    "delimiter must be an ASCII character, got {:?}",
                    self.delimiter
                ))
            })?;
        Ok(LoaderOptions {
            batch_size: self.batch_size,
            delimiter,
        })
    }
}

/// Query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Number of results to report
    pub top_k: usize,
    /// Best matches scoring below this are reported as no match
    pub min_score: Option<f32>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            top_k: 1,
            min_score: None,
        }
    }
}

/// Gallery file location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    /// Path of the gallery file
    pub path: PathBuf,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("gallery.artl"),
        }
    }
}

impl ArtlensConfig {
    /// Load config from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self> {
        use toml::from_str;
        let contents = fs::read_to_string(path)
            .map_err(|error| Error::Config(format!("Failed to read config: {error}")))?;
        let config: Self = from_str(&contents)?;
        debug!(
            "Loaded config from {}: endpoint={}, batch_size={}",
            path.display(),
            config.embedding.endpoint,
            config.build.batch_size
        );
        Ok(config)
    }

    /// Load config from `path` if given, else defaults; then apply environment overrides
    ///
    /// # Errors
    /// Returns an error if a given file cannot be read or parsed
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(config_path) => Self::load_from_file(config_path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save config to a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        use toml::to_string_pretty;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                Error::Config(format!("Failed to create config directory: {error}"))
            })?;
        }

        let contents = to_string_pretty(self)
            .map_err(|error| Error::Config(format!("Failed to serialize config: {error}")))?;

        let header = "# artlens configuration\n\n";
        fs::write(path, format!("{header}{contents}"))
            .map_err(|error| Error::Config(format!("Failed to write config: {error}")))?;

        Ok(())
    }

    /// Override settings from `ARTLENS_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = env::var("ARTLENS_EMBEDDING_ENDPOINT") {
            self.embedding.endpoint = endpoint;
        }
        if let Ok(model) = env::var("ARTLENS_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(gallery) = env::var("ARTLENS_GALLERY") {
            self.gallery.path = PathBuf::from(gallery);
        }
    }
}
