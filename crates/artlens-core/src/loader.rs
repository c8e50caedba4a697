//! Metadata reading and lazy image batching.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::{ReaderBuilder, Trim};
use image::{DynamicImage, ImageReader};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default number of images per batch
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Columns every metadata table must provide
const REQUIRED_COLUMNS: [&str; 3] = ["title", "artist", "image_path"];

/// One row of the metadata table; extra columns are ignored
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetadataRow {
    /// Artwork title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Image path, absolute or relative to the metadata file
    pub image_path: String,
}

/// Options controlling how metadata is read and batched
#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    /// Number of rows per batch
    pub batch_size: usize,
    /// Field delimiter of the metadata table
    pub delimiter: u8,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delimiter: b',',
        }
    }
}

/// Decoded image with its metadata
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Decoded RGB image
    pub image: DynamicImage,
    /// Artwork title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Image path as written in the metadata table
    pub image_path: String,
}

/// Item dropped while loading a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedItem {
    /// Image path as written in the metadata table
    pub image_path: String,
    /// Why the item was dropped
    pub reason: String,
}

/// One batch of decoded images, in metadata order
#[derive(Debug, Clone)]
pub struct LoadedBatch {
    /// Zero-based batch index
    pub index: usize,
    /// Successfully decoded items
    pub items: Vec<LoadedImage>,
    /// Items that failed to decode
    pub dropped: Vec<DroppedItem>,
}

impl LoadedBatch {
    /// Check if every item in the batch was dropped
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Row that passed the existence filter
#[derive(Debug)]
struct EligibleRow {
    row: MetadataRow,
    resolved: PathBuf,
}

/// Restartable source of image batches.
///
/// Rows pointing at missing or unreadable files are filtered out up front; images are
/// only decoded when a batch is requested. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct BatchLoader {
    rows: Arc<[EligibleRow]>,
    batch_size: usize,
    rows_read: usize,
}

impl BatchLoader {
    /// Read a metadata file; relative image paths resolve against its directory.
    ///
    /// # Errors
    /// Returns `Input` if the file is missing, unreadable, lacks a required column or has
    /// a malformed row.
    pub fn from_path(metadata_path: &Path, options: LoaderOptions) -> Result<Self> {
        let file = File::open(metadata_path).map_err(|error| {
            Error::Input(format!(
                "Failed to open metadata {}: {error}",
                metadata_path.display()
            ))
        })?;
        let base_dir = metadata_path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_reader(file, base_dir, options)
    }

    /// Read metadata from any reader.
    ///
    /// # Errors
    /// Returns `Input` if the table lacks a required column or has a malformed row.
    pub fn from_reader<R: Read>(reader: R, base_dir: &Path, options: LoaderOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_owned()));
        }

        let mut csv_reader = ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(true)
            .trim(Trim::Headers)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|error| Error::Input(format!("Failed to read metadata header: {error}")))?;
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|header| header == column) {
                return Err(Error::Input(format!(
                    "Metadata is missing required column `{column}`"
                )));
            }
        }

        let mut rows = Vec::new();
        let mut rows_read = 0_usize;
        for (line, record) in csv_reader.deserialize::<MetadataRow>().enumerate() {
            let row = record.map_err(|error| {
                Error::Input(format!("Malformed metadata row {}: {error}", line + 1))
            })?;
            rows_read += 1;

            let resolved = resolve_image_path(base_dir, &row.image_path);
            if is_readable_file(&resolved) {
                rows.push(EligibleRow { row, resolved });
            } else {
                debug!("Skipping row for missing image {}", row.image_path);
            }
        }

        let excluded = rows_read - rows.len();
        if excluded > 0 {
            warn!("Excluded {excluded} of {rows_read} metadata rows with missing images");
        }
        info!(
            "Loaded metadata: {} eligible rows, batch size {}",
            rows.len(),
            options.batch_size
        );

        Ok(Self {
            rows: rows.into(),
            batch_size: options.batch_size,
            rows_read,
        })
    }

    /// Rows per batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches the loader yields
    pub fn batch_count(&self) -> usize {
        self.rows.len().div_ceil(self.batch_size)
    }

    /// Rows that passed the existence filter
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if no row passed the existence filter
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows read from the metadata table
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Rows excluded because their image does not exist
    pub fn rows_excluded(&self) -> usize {
        self.rows_read - self.rows.len()
    }

    /// Eligible metadata rows in table order
    pub fn rows(&self) -> impl Iterator<Item = &MetadataRow> + '_ {
        self.rows.iter().map(|eligible| &eligible.row)
    }

    /// Decode a single batch, or `None` past the last batch.
    ///
    /// Decode failures are dropped from the batch and reported in `dropped`.
    pub fn load_batch(&self, index: usize) -> Option<LoadedBatch> {
        let start = index.checked_mul(self.batch_size)?;
        if start >= self.rows.len() {
            return None;
        }
        let end = (start + self.batch_size).min(self.rows.len());

        let mut items = Vec::with_capacity(end - start);
        let mut dropped = Vec::new();
        for eligible in &self.rows[start..end] {
            match decode_row(eligible) {
                Ok(item) => items.push(item),
                Err(error) => {
                    warn!("Dropping item: {error}");
                    dropped.push(DroppedItem {
                        image_path: eligible.row.image_path.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        Some(LoadedBatch {
            index,
            items,
            dropped,
        })
    }

    /// Iterate over every batch from the start
    pub fn batches(&self) -> Batches {
        self.batches_from(0)
    }

    /// Iterate over batches starting at `start`
    pub fn batches_from(&self, start: usize) -> Batches {
        Batches {
            loader: self.clone(),
            next: start,
        }
    }
}

/// Lazy iterator over a loader's batches
#[derive(Debug)]
pub struct Batches {
    loader: BatchLoader,
    next: usize,
}

impl Iterator for Batches {
    type Item = LoadedBatch;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.loader.load_batch(self.next)?;
        self.next += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.loader.batch_count().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

fn resolve_image_path(base_dir: &Path, image_path: &str) -> PathBuf {
    let path = Path::new(image_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn is_readable_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|metadata| metadata.is_file()) && File::open(path).is_ok()
}

/// Decode one image and convert it to RGB
fn decode_row(eligible: &EligibleRow) -> Result<LoadedImage> {
    let decode_error = |reason: String| Error::ItemDecode {
        path: eligible.row.image_path.clone(),
        reason,
    };

    let image = ImageReader::open(&eligible.resolved)
        .and_then(ImageReader::with_guessed_format)
        .map_err(|error| decode_error(error.to_string()))?
        .decode()
        .map_err(|error| decode_error(error.to_string()))?;

    Ok(LoadedImage {
        image: DynamicImage::ImageRgb8(image.into_rgb8()),
        title: eligible.row.title.clone(),
        artist: eligible.row.artist.clone(),
        image_path: eligible.row.image_path.clone(),
    })
}
