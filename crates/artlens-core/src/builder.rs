//! Gallery build pipeline: load batch, embed batch, normalize and append.
//!
//! The next batch is decoded on the blocking pool while the current one is being embedded.
//! Every embedding call runs under a timeout with a bounded number of retries. A batch whose
//! embedding call ultimately fails is discarded as a whole; the session keeps everything
//! appended before it and resumes at that batch on the next [`GalleryBuilder::run`].

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use image::DynamicImage;
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingProvider, with_timeout};
use crate::error::{Error, Result};
use crate::gallery::{ArtworkRecord, Gallery, OpenGallery};
use crate::loader::{BatchLoader, LoadedBatch, LoaderOptions};
use crate::vector::{Embedding, normalize};

/// Progress callback: `(stage, current, total)`
pub type ProgressCallback = Arc<dyn Fn(&str, u64, Option<u64>) + Send + Sync>;

/// Timeout and retry policy for one embedding call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Time limit for a single attempt
    pub timeout: Duration,
    /// Additional attempts after a retryable failure
    pub max_retries: usize,
    /// Delay between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&EmbeddingConfig::default())
    }
}

impl From<&EmbeddingConfig> for RetryPolicy {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
        }
    }
}

/// Cooperative cancellation signal, checked between batches
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters describing a build run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Rows read from the metadata table
    pub rows_read: usize,
    /// Rows excluded because their image file is missing
    pub rows_excluded: usize,
    /// Images decoded in committed batches
    pub items_decoded: usize,
    /// Images that failed to decode
    pub decode_failures: usize,
    /// Embeddings dropped for near-zero norm
    pub degenerate_embeddings: usize,
    /// Batches sent to the embedding provider and committed
    pub batches_embedded: usize,
    /// Batches discarded after the provider failed them
    pub batches_failed: usize,
    /// Batches skipped because no image decoded
    pub empty_batches_skipped: usize,
    /// Embedding attempts repeated after a retryable failure
    pub encode_retries: usize,
    /// Records appended to the gallery
    pub records_appended: usize,
}

impl BuildStats {
    /// Items dropped after passing the existence filter
    pub fn items_dropped(&self) -> usize {
        self.decode_failures + self.degenerate_embeddings
    }
}

/// Resumable state of a gallery build
#[derive(Debug, Default)]
pub struct BuildSession {
    gallery: OpenGallery,
    next_batch: usize,
    stats: BuildStats,
}

impl BuildSession {
    /// Start an empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the next batch to process
    pub fn next_batch(&self) -> usize {
        self.next_batch
    }

    /// Counters so far
    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    /// Records appended so far
    pub fn len(&self) -> usize {
        self.gallery.len()
    }

    /// Check if no record has been appended
    pub fn is_empty(&self) -> bool {
        self.gallery.is_empty()
    }

    /// Give up on the batch at `next_batch` and move past it
    pub fn skip_batch(&mut self) {
        self.next_batch += 1;
        self.stats.batches_failed += 1;
    }

    /// Seal the gallery and return it with the final counters
    pub fn finish(self) -> (Gallery, BuildStats) {
        (self.gallery.seal(), self.stats)
    }
}

/// Drives the embedding provider over a batch loader
pub struct GalleryBuilder<E: EmbeddingProvider> {
    /// Embedding client, reused for every batch
    client: E,
    /// Timeout and retry policy
    retry: RetryPolicy,
    /// Optional cancellation signal
    cancel: Option<CancelFlag>,
    /// Optional progress callback
    progress_callback: Option<ProgressCallback>,
}

impl<E: EmbeddingProvider> GalleryBuilder<E> {
    /// Create a builder with the default retry policy
    pub fn new(client: E) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            cancel: None,
            progress_callback: None,
        }
    }

    /// Set the timeout and retry policy
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set a cancellation flag checked between batches
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set a progress callback
    #[must_use]
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Embedding client
    pub fn client(&self) -> &E {
        &self.client
    }

    /// Report progress if callback is set
    fn report_progress(&self, stage: &str, current: u64, total: Option<u64>) {
        if let Some(callback) = &self.progress_callback {
            callback(stage, current, total);
        }
    }

    /// Check the provider is ready, bounded by the policy timeout.
    ///
    /// # Errors
    /// Returns the provider's error, or `Timeout` if it does not answer in time.
    pub async fn ensure_model_available(&self) -> Result<()> {
        with_timeout(self.retry.timeout, self.client.ensure_model_available()).await
    }

    /// Build a gallery, skipping any batch the provider fails after all retries.
    ///
    /// Returns the gallery, the counters and the indices of the skipped batches, in order.
    ///
    /// # Errors
    /// Returns any failure other than a failed batch, such as `Cancelled`.
    pub async fn build_skipping_failed(
        &self,
        loader: &BatchLoader,
    ) -> Result<(Gallery, BuildStats, Vec<usize>)> {
        let mut session = BuildSession::new();
        let mut failed = Vec::new();
        loop {
            match self.run(&mut session, loader).await {
                Ok(()) => break,
                Err(Error::Encode {
                    batch_index,
                    message,
                }) => {
                    warn!("Skipping batch {batch_index} after embedding failure: {message}");
                    failed.push(batch_index);
                    session.skip_batch();
                }
                Err(error) => return Err(error),
            }
        }
        let (gallery, stats) = session.finish();
        Ok((gallery, stats, failed))
    }

    /// Build a complete gallery from the first batch.
    ///
    /// # Errors
    /// Returns the first batch-level failure; see [`GalleryBuilder::run`].
    pub async fn build(&self, loader: &BatchLoader) -> Result<(Gallery, BuildStats)> {
        let mut session = BuildSession::new();
        self.run(&mut session, loader).await?;
        Ok(session.finish())
    }

    /// Process batches from `session.next_batch()` to the end.
    ///
    /// # Errors
    /// Returns `Encode` if the provider fails a batch after all retries, or `Cancelled` if
    /// the cancel flag is set. In both cases the session is left at the failed batch; calling
    /// `run` again retries it, and [`BuildSession::skip_batch`] moves past it instead.
    pub async fn run(&self, session: &mut BuildSession, loader: &BatchLoader) -> Result<()> {
        session.stats.rows_read = loader.rows_read();
        session.stats.rows_excluded = loader.rows_excluded();

        let total = loader.batch_count();
        if session.next_batch > 0 {
            info!("Resuming gallery build at batch {}/{total}", session.next_batch);
        } else {
            info!("Building gallery from {} images in {total} batches", loader.len());
        }

        let mut pending = Self::prefetch(loader, session.next_batch, total);
        while session.next_batch < total {
            if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                warn!("Gallery build cancelled before batch {}", session.next_batch);
                return Err(Error::Cancelled {
                    next_batch: session.next_batch,
                });
            }

            let batch = match pending.take() {
                Some(handle) => handle
                    .await
                    .map_err(|error| Error::Other(format!("Task join error: {error}")))?,
                None => None,
            };
            let Some(batch) = batch else {
                break;
            };
            pending = Self::prefetch(loader, batch.index + 1, total);

            let batch_index = batch.index;
            self.process_batch(session, batch).await?;
            session.next_batch = batch_index + 1;
            self.report_progress(
                "Embedding batches",
                session.next_batch as u64,
                Some(total as u64),
            );
        }

        let stats = &session.stats;
        info!(
            "Gallery build finished: {} records, {} items dropped ({} decode failures, {} degenerate embeddings), {} rows excluded, {} retries",
            stats.records_appended,
            stats.items_dropped(),
            stats.decode_failures,
            stats.degenerate_embeddings,
            stats.rows_excluded,
            stats.encode_retries
        );
        Ok(())
    }

    /// Start decoding batch `index` on the blocking pool
    fn prefetch(
        loader: &BatchLoader,
        index: usize,
        total: usize,
    ) -> Option<JoinHandle<Option<LoadedBatch>>> {
        if index >= total {
            return None;
        }
        let loader = loader.clone();
        Some(spawn_blocking(move || loader.load_batch(index)))
    }

    /// Embed one batch and append its surviving items
    async fn process_batch(&self, session: &mut BuildSession, batch: LoadedBatch) -> Result<()> {
        let batch_index = batch.index;
        let decode_failures = batch.dropped.len();

        if batch.is_empty() {
            debug!("Batch {batch_index} has no decodable images, skipping");
            session.stats.decode_failures += decode_failures;
            session.stats.empty_batches_skipped += 1;
            return Ok(());
        }

        let (images, metadata): (Vec<DynamicImage>, Vec<(String, String, String)>) = batch
            .items
            .into_iter()
            .map(|item| (item.image, (item.title, item.artist, item.image_path)))
            .unzip();

        let raw = self
            .embed_with_retry(batch_index, &images, &mut session.stats)
            .await?;
        drop(images);
        if raw.len() != metadata.len() {
            return Err(Error::Encode {
                batch_index,
                message: format!("expected {} embeddings, got {}", metadata.len(), raw.len()),
            });
        }

        let expected = session
            .gallery
            .dimension()
            .or_else(|| raw.first().map(Vec::len));
        if let Some(expected) = expected
            && let Some(vector) = raw.iter().find(|vector| vector.len() != expected)
        {
            return Err(Error::Encode {
                batch_index,
                message: Error::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                }
                .to_string(),
            });
        }

        let mut records = Vec::with_capacity(raw.len());
        let mut degenerate = 0_usize;
        for ((title, artist, image_path), vector) in metadata.into_iter().zip(raw) {
            match normalize(&vector) {
                Some(embedding) => records.push(ArtworkRecord {
                    title,
                    artist,
                    image_path,
                    embedding,
                }),
                None => {
                    warn!("Dropping item: {}", Error::DegenerateEmbedding { image_path });
                    degenerate += 1;
                }
            }
        }

        let appended = records.len();
        for record in records {
            session.gallery.push(record)?;
        }

        let stats = &mut session.stats;
        stats.items_decoded += appended + degenerate;
        stats.decode_failures += decode_failures;
        stats.degenerate_embeddings += degenerate;
        stats.batches_embedded += 1;
        stats.records_appended += appended;
        debug!(
            "Batch {batch_index}: appended {appended}, dropped {} ({decode_failures} decode, {degenerate} degenerate)",
            decode_failures + degenerate
        );
        Ok(())
    }

    /// Call the provider under the timeout, retrying transient failures
    async fn embed_with_retry(
        &self,
        batch_index: usize,
        images: &[DynamicImage],
        stats: &mut BuildStats,
    ) -> Result<Vec<Embedding>> {
        let mut attempt = 0_usize;
        loop {
            let outcome = with_timeout(self.retry.timeout, self.client.embed_images(images)).await;

            match outcome {
                Ok(vectors) => return Ok(vectors),
                Err(error) if error.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    stats.encode_retries += 1;
                    warn!(
                        "Embedding batch {batch_index} failed (attempt {attempt}/{}): {error}; retrying",
                        self.retry.max_retries + 1
                    );
                    sleep(self.retry.backoff).await;
                }
                Err(error) => {
                    warn!("Discarding batch {batch_index}: {error}");
                    return Err(Error::Encode {
                        batch_index,
                        message: error.to_string(),
                    });
                }
            }
        }
    }
}

/// Build a gallery from a metadata file in one pass.
///
/// # Errors
/// Returns `Input` for unreadable metadata, or the first batch-level failure.
pub async fn build_gallery<E: EmbeddingProvider>(
    metadata_path: &Path,
    client: E,
    batch_size: usize,
) -> Result<Gallery> {
    let loader = BatchLoader::from_path(
        metadata_path,
        LoaderOptions {
            batch_size,
            ..LoaderOptions::default()
        },
    )?;
    let builder = GalleryBuilder::new(client);
    builder.ensure_model_available().await?;
    let (gallery, _stats) = builder.build(&loader).await?;
    Ok(gallery)
}
