//! End-to-end tests: metadata table to persisted gallery to best match.
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use artlens_core::vector::l2_norm;
use artlens_core::{
    BatchLoader, BuildSession, EmbeddingProvider, Embedding, Error, GalleryBuilder,
    LoaderOptions, build_gallery, embed_query, find_best_match, find_top_matches, load_gallery,
    save_gallery,
};
use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

/// Embeds an image as the mean of its RGB channels
struct MeanColorProvider;

fn mean_color(image: &DynamicImage) -> Embedding {
    let rgb = image.to_rgb8();
    let mut sums = [0.0_f32; 3];
    for pixel in rgb.pixels() {
        for (sum, channel) in sums.iter_mut().zip(pixel.0) {
            *sum += f32::from(channel);
        }
    }
    let count = (rgb.width() * rgb.height()) as f32;
    sums.iter().map(|sum| sum / count).collect()
}

impl EmbeddingProvider for MeanColorProvider {
    async fn ensure_model_available(&self) -> artlens_core::Result<()> {
        Ok(())
    }

    async fn embed_images(&self, images: &[DynamicImage]) -> artlens_core::Result<Vec<Embedding>> {
        Ok(images.iter().map(mean_color).collect())
    }
}

fn write_image(dir: &Path, name: &str, rgb: [u8; 3]) {
    RgbImage::from_pixel(8, 8, Rgb(rgb))
        .save(dir.join(name))
        .expect("Failed to write image");
}

/// Four readable artworks, one missing file and one corrupt file
fn write_collection(dir: &Path) -> PathBuf {
    write_image(dir, "red.png", [200, 10, 10]);
    write_image(dir, "green.png", [10, 200, 10]);
    write_image(dir, "blue.png", [10, 10, 200]);
    write_image(dir, "ochre.png", [180, 140, 20]);
    fs::write(dir.join("torn.png"), b"\x89PNG\r\n\x1a\nnot really").expect("write");

    let csv = "\
title,artist,image_path
Crimson Study,Artist A,red.png
Verdant Field,Artist B,green.png
Missing Piece,Artist C,missing.png
Blue Period,Artist D,blue.png
Torn Canvas,Artist E,torn.png
Ochre Hills,Artist F,ochre.png
";
    let metadata = dir.join("metadata.csv");
    fs::write(&metadata, csv).expect("Failed to write metadata");
    metadata
}

#[tokio::test]
async fn test_build_persist_and_match() -> Result<()> {
    let temp = TempDir::new()?;
    let metadata = write_collection(temp.path());

    let gallery = build_gallery(&metadata, MeanColorProvider, 2).await?;
    let titles: Vec<&str> = gallery.iter().map(|record| record.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Crimson Study", "Verdant Field", "Blue Period", "Ochre Hills"]
    );
    for record in gallery.iter() {
        assert!((l2_norm(&record.embedding) - 1.0).abs() <= 1e-6);
    }

    let destination = temp.path().join("out").join("gallery.artl");
    save_gallery(&gallery, &destination)?;
    let loaded = load_gallery(&destination)?;
    assert_eq!(loaded, gallery);

    // A darker photo of the blue painting still lands on it.
    let photo = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([4, 6, 90])));
    let query = embed_query(&MeanColorProvider, &photo).await?;
    let best = find_best_match(&query, &loaded)?.expect("non-empty gallery");
    assert_eq!(best.record.title, "Blue Period");
    assert_eq!(best.record.artist, "Artist D");
    assert!(best.score > 0.99);

    let top = find_top_matches(&query, &loaded, 10)?;
    assert_eq!(top.len(), 4);
    assert!(top.windows(2).all(|pair| pair[0].score >= pair[1].score));
    Ok(())
}

#[tokio::test]
async fn test_build_stats_account_for_every_row() -> Result<()> {
    let temp = TempDir::new()?;
    let metadata = write_collection(temp.path());
    let loader = BatchLoader::from_path(
        &metadata,
        LoaderOptions {
            batch_size: 4,
            ..LoaderOptions::default()
        },
    )?;

    let (gallery, stats) = GalleryBuilder::new(MeanColorProvider).build(&loader).await?;
    assert_eq!(stats.rows_read, 6);
    assert_eq!(stats.rows_excluded, 1);
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.records_appended, gallery.len());
    assert_eq!(
        stats.rows_read,
        stats.rows_excluded + stats.items_dropped() + stats.records_appended
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_metadata_builds_empty_gallery() -> Result<()> {
    let temp = TempDir::new()?;
    let metadata = temp.path().join("metadata.csv");
    fs::write(&metadata, "title,artist,image_path\n")?;

    let gallery = build_gallery(&metadata, MeanColorProvider, 8).await?;
    assert!(gallery.is_empty());

    let destination = temp.path().join("empty.artl");
    save_gallery(&gallery, &destination)?;
    let loaded = load_gallery(&destination)?;
    assert!(loaded.is_empty());
    assert!(find_best_match(&[1.0, 0.0, 0.0], &loaded)?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_missing_column_is_input_error() -> Result<()> {
    let temp = TempDir::new()?;
    let metadata = temp.path().join("metadata.csv");
    fs::write(&metadata, "title,image_path\nA,a.png\n")?;

    let error = build_gallery(&metadata, MeanColorProvider, 8).await.unwrap_err();
    assert!(matches!(error, Error::Input(_)), "{error}");
    Ok(())
}

#[tokio::test]
async fn test_missing_metadata_file_is_input_error() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let error = build_gallery(&temp.path().join("absent.csv"), MeanColorProvider, 8)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Input(_)), "{error}");
}

#[tokio::test]
async fn test_session_resumes_without_duplicates() -> Result<()> {
    let temp = TempDir::new()?;
    let metadata = write_collection(temp.path());
    let loader = BatchLoader::from_path(
        &metadata,
        LoaderOptions {
            batch_size: 1,
            ..LoaderOptions::default()
        },
    )?;

    let builder = GalleryBuilder::new(MeanColorProvider);
    let mut session = BuildSession::new();
    builder.run(&mut session, &loader).await?;
    let appended = session.len();

    // A second run over a finished session has nothing left to do.
    builder.run(&mut session, &loader).await?;
    assert_eq!(session.len(), appended);
    assert_eq!(session.next_batch(), loader.batch_count());
    Ok(())
}
