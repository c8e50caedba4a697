//! Subcommand handlers.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use artlens_core::builder::ProgressCallback;
use artlens_core::{
    ArtlensConfig, BatchLoader, GalleryBuilder, GalleryStore, HttpEmbeddingClient, MatchOptions,
    MatchResult, RetryPolicy, decode_query_image, embed_query, find_top_matches, with_timeout,
};
use tracing::{debug, info, warn};

/// Build a gallery file from a metadata table
///
/// # Errors
/// Returns an error if the metadata cannot be read, the embedding service is unreachable,
/// a batch fails after all retries, or the gallery cannot be written.
pub async fn handle_build(
    config: &ArtlensConfig,
    metadata: &Path,
    output: Option<PathBuf>,
    batch_size: Option<usize>,
) -> Result<()> {
    let mut options = config.build.loader_options()?;
    if let Some(size) = batch_size {
        options.batch_size = size;
    }
    let destination = output.unwrap_or_else(|| config.gallery.path.clone());

    let loader = BatchLoader::from_path(metadata, options)?;
    let client = HttpEmbeddingClient::from_config(&config.embedding)?;
    info!(
        "Using embedding model {} at {}",
        client.model(),
        config.embedding.endpoint
    );

    let progress: ProgressCallback = Arc::new(|stage: &str, current: u64, total: Option<u64>| {
        if let Some(total) = total {
            debug!("{stage}: {current}/{total}");
        }
    });
    let builder = GalleryBuilder::new(client)
        .with_retry_policy(RetryPolicy::from(&config.embedding))
        .with_progress_callback(progress);
    builder
        .ensure_model_available()
        .await
        .context("Embedding service is not available")?;

    let (gallery, stats, failed) = builder.build_skipping_failed(&loader).await?;
    if !failed.is_empty() {
        warn!(
            "{} batches were discarded after embedding failures (batch size {}): {failed:?}",
            failed.len(),
            loader.batch_size()
        );
    }
    if gallery.is_empty() {
        warn!("No artwork could be embedded; writing an empty gallery");
    }

    GalleryStore::new(&destination).save(&gallery)?;
    info!(
        "Wrote {} records (dimension {}) to {}",
        gallery.len(),
        gallery.dimension(),
        destination.display()
    );
    info!(
        "Rows read: {}, excluded: {}, decode failures: {}, degenerate embeddings: {}",
        stats.rows_read, stats.rows_excluded, stats.decode_failures, stats.degenerate_embeddings
    );
    Ok(())
}

/// Identify the artwork in a photograph
///
/// # Errors
/// Returns an error if the gallery or photograph cannot be read, the embedding call fails,
/// or the query is incompatible with the gallery.
pub async fn handle_match(
    config: &ArtlensConfig,
    gallery_path: Option<PathBuf>,
    image: &Path,
    top: Option<usize>,
    min_score: Option<f32>,
) -> Result<()> {
    let gallery_path = gallery_path.unwrap_or_else(|| config.gallery.path.clone());
    let gallery = GalleryStore::new(&gallery_path).load()?;
    if gallery.is_empty() {
        info!("Gallery {} is empty: no match", gallery_path.display());
        return Ok(());
    }

    let bytes = fs::read(image)
        .with_context(|| format!("Failed to read photograph {}", image.display()))?;
    let photo = decode_query_image(&bytes)?;
    let client = HttpEmbeddingClient::from_config(&config.embedding)?;
    let query = with_timeout(config.embedding.timeout(), embed_query(&client, &photo)).await?;

    let limit = top.unwrap_or(config.matching.top_k).max(1);
    let options = MatchOptions {
        min_score: min_score.or(config.matching.min_score),
    };
    let matches = find_top_matches(&query, &gallery, limit)?;

    let Some(best) = matches.first() else {
        info!("No match");
        return Ok(());
    };
    if !options.accepts(best.score) {
        info!(
            "No match: best candidate {} by {} ({}) scored {:.4}",
            best.record.title, best.record.artist, best.record.image_path, best.score
        );
        return Ok(());
    }

    for (rank, result) in matches
        .iter()
        .filter(|result| options.accepts(result.score))
        .enumerate()
    {
        info!("{}", describe_match(rank + 1, result));
    }
    Ok(())
}

/// One line of the match report
fn describe_match(rank: usize, result: &MatchResult<'_>) -> String {
    format!(
        "{rank}. {} by {} (score {:.4}, source image {})",
        result.record.title, result.record.artist, result.score, result.record.image_path
    )
}

/// Summarize a gallery file
///
/// # Errors
/// Returns an error if the gallery cannot be loaded.
pub fn handle_inspect(
    config: &ArtlensConfig,
    gallery_path: Option<PathBuf>,
    limit: usize,
) -> Result<()> {
    let gallery_path = gallery_path.unwrap_or_else(|| config.gallery.path.clone());
    let store = GalleryStore::new(&gallery_path);
    if !store.exists() {
        bail!("No gallery at {}", gallery_path.display());
    }
    let gallery = store.load()?;

    info!("Gallery: {}", gallery_path.display());
    info!("  Records: {}", gallery.len());
    info!("  Dimension: {}", gallery.dimension());
    for record in gallery.iter().take(limit) {
        info!("  - {} by {} ({})", record.title, record.artist, record.image_path);
    }
    if gallery.len() > limit {
        info!("  ... {} more", gallery.len() - limit);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use artlens_core::{ArtworkRecord, Gallery, save_gallery};
    use std::net::TcpListener;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn sample_gallery() -> Gallery {
        Gallery::from_records(vec![
            ArtworkRecord {
                title: "Mona Lisa".to_owned(),
                artist: "Leonardo".to_owned(),
                image_path: "mona.jpg".to_owned(),
                embedding: vec![1.0, 0.0],
            },
            ArtworkRecord {
                title: "Starry Night".to_owned(),
                artist: "Van Gogh".to_owned(),
                image_path: "starry.jpg".to_owned(),
                embedding: vec![0.0, 1.0],
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_inspect_existing_gallery() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("gallery.artl");
        save_gallery(&sample_gallery(), &path).unwrap();

        handle_inspect(&ArtlensConfig::default(), Some(path), 1).unwrap();
    }

    #[test]
    fn test_inspect_missing_gallery_fails() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let result = handle_inspect(
            &ArtlensConfig::default(),
            Some(temp.path().join("absent.artl")),
            5,
        );
        result.unwrap_err();
    }

    #[tokio::test]
    async fn test_match_empty_gallery_skips_embedding() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("empty.artl");
        save_gallery(&Gallery::default(), &path).unwrap();

        // The photograph is never read for an empty gallery.
        handle_match(
            &ArtlensConfig::default(),
            Some(path),
            &temp.path().join("missing.jpg"),
            None,
            None,
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_match_line_names_source_image() {
        let gallery = sample_gallery();
        let result = MatchResult {
            record: &gallery.records()[1],
            score: 0.875,
        };
        let line = describe_match(1, &result);
        assert_eq!(
            line,
            "1. Starry Night by Van Gogh (score 0.8750, source image starry.jpg)"
        );
    }

    #[tokio::test]
    async fn test_build_gives_up_on_silent_service() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let metadata = temp.path().join("metadata.csv");
        fs::write(&metadata, "title,artist,image_path\n").expect("Failed to write metadata");
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");

        let mut config = ArtlensConfig::default();
        config.embedding.endpoint = format!("http://{}", listener.local_addr().expect("address"));
        config.embedding.timeout_seconds = 1;

        let outcome = timeout(
            Duration::from_secs(10),
            handle_build(&config, &metadata, Some(temp.path().join("out.artl")), None),
        )
        .await
        .expect("build must not hang on a silent embedding service");
        outcome.unwrap_err();
        assert!(!temp.path().join("out.artl").exists());
    }

    #[tokio::test]
    async fn test_build_with_missing_metadata_fails() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let result = handle_build(
            &ArtlensConfig::default(),
            &temp.path().join("absent.csv"),
            Some(temp.path().join("out.artl")),
            None,
        )
        .await;
        result.unwrap_err();
        assert!(!temp.path().join("out.artl").exists());
    }
}
