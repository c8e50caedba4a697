//! Gallery persistence.
//!
//! File layout: the 4-byte magic `ARTL`, the format version as a bincode `u32`, then the
//! bincode body `(dimension: u32, records: Vec<ArtworkRecord>)`. The version is decoded on
//! its own first so that a future layout change fails with `UnsupportedVersion` instead of
//! being misread.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::process;

use bincode::config::{Config, standard};
use bincode::error::EncodeError;
use bincode::{decode_from_slice, encode_to_vec};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::gallery::{ArtworkRecord, Gallery};

/// Leading bytes of every gallery file
pub const MAGIC: [u8; 4] = *b"ARTL";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Upper bound on bytes the decoder will allocate (1 GiB)
const DECODE_LIMIT: usize = 1 << 30;

fn bincode_config() -> impl Config {
    standard().with_limit::<DECODE_LIMIT>()
}

/// Gallery file at a fixed location
#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    /// Create a store for the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the gallery file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the gallery file exists
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Atomically replace the gallery file with `gallery`.
    ///
    /// Bytes are written to a temporary file next to the destination, synced, then renamed
    /// over it. A concurrent writer holding `<path>.lock` makes this fail.
    ///
    /// # Errors
    /// Returns `Persistence` if the lock is held or any write step fails; the previous file
    /// is left untouched in that case.
    pub fn save(&self, gallery: &Gallery) -> Result<()> {
        let parent = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|error| {
            Error::Persistence(format!(
                "Failed to create gallery directory {}: {error}",
                parent.display()
            ))
        })?;

        let _lock = WriteLock::acquire(&self.path)?;
        let bytes = encode_gallery(gallery)?;

        let mut temp = NamedTempFile::new_in(&parent).map_err(|error| {
            Error::Persistence(format!("Failed to create temporary gallery file: {error}"))
        })?;
        temp.write_all(&bytes)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|error| {
                Error::Persistence(format!("Failed to write temporary gallery file: {error}"))
            })?;
        temp.persist(&self.path).map_err(|error| {
            Error::Persistence(format!(
                "Failed to move gallery into place at {}: {}",
                self.path.display(),
                error.error
            ))
        })?;

        info!(
            "Saved gallery with {} records (dimension {}) to {} ({} bytes)",
            gallery.len(),
            gallery.dimension(),
            self.path.display(),
            bytes.len()
        );
        Ok(())
    }

    /// Load and validate the gallery file.
    ///
    /// # Errors
    /// Returns `NotFound` if the file does not exist, `CorruptFormat` if it cannot be fully
    /// parsed, `UnsupportedVersion` for another format version, or `Persistence` on I/O
    /// failure.
    pub fn load(&self) -> Result<Gallery> {
        let bytes = fs::read(&self.path).map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                Error::NotFound(self.path.clone())
            } else {
                Error::Persistence(format!(
                    "Failed to read gallery {}: {error}",
                    self.path.display()
                ))
            }
        })?;
        let gallery = decode_gallery(&bytes)?;
        info!(
            "Loaded gallery with {} records (dimension {}) from {}",
            gallery.len(),
            gallery.dimension(),
            self.path.display()
        );
        Ok(gallery)
    }
}

/// Save `gallery` to `destination` atomically.
///
/// # Errors
/// See [`GalleryStore::save`].
pub fn save_gallery(gallery: &Gallery, destination: &Path) -> Result<()> {
    GalleryStore::new(destination).save(gallery)
}

/// Load a gallery from `source`.
///
/// # Errors
/// See [`GalleryStore::load`].
pub fn load_gallery(source: &Path) -> Result<Gallery> {
    GalleryStore::new(source).load()
}

/// Serialize a gallery into the versioned file layout
fn encode_gallery(gallery: &Gallery) -> Result<Vec<u8>> {
    let dimension = u32::try_from(gallery.dimension()).map_err(|_| {
        Error::Persistence(format!("dimension {} too large", gallery.dimension()))
    })?;
    let encode_error =
        |error: EncodeError| Error::Persistence(format!("Failed to serialize gallery: {error}"));

    let mut bytes = MAGIC.to_vec();
    bytes.extend(encode_to_vec(FORMAT_VERSION, bincode_config()).map_err(encode_error)?);
    bytes.extend(encode_to_vec((dimension, gallery.records()), bincode_config()).map_err(encode_error)?);
    check_encoded_size(bytes.len())?;
    Ok(bytes)
}

/// Reject files the decoder would refuse to read back
fn check_encoded_size(len: usize) -> Result<()> {
    if len > DECODE_LIMIT {
        return Err(Error::Persistence(format!(
            "Encoded gallery is {len} bytes, above the {DECODE_LIMIT} byte load limit"
        )));
    }
    Ok(())
}

/// Parse and validate the versioned file layout
fn decode_gallery(bytes: &[u8]) -> Result<Gallery> {
    let body = bytes
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| Error::CorruptFormat("missing ARTL header".to_owned()))?;

    let (version, version_len): (u32, usize) = decode_from_slice(body, bincode_config())
        .map_err(|error| Error::CorruptFormat(format!("unreadable format version: {error}")))?;
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion {
            found: version,
            expected: FORMAT_VERSION,
        });
    }

    let payload = &body[version_len..];
    let ((dimension, records), consumed): ((u32, Vec<ArtworkRecord>), usize) =
        decode_from_slice(payload, bincode_config())
            .map_err(|error| Error::CorruptFormat(format!("unreadable records: {error}")))?;
    if consumed != payload.len() {
        return Err(Error::CorruptFormat(format!(
            "{} trailing bytes after records",
            payload.len() - consumed
        )));
    }

    let dimension = dimension as usize;
    if dimension == 0 && !records.is_empty() {
        return Err(Error::CorruptFormat(
            "zero dimension with non-empty records".to_owned(),
        ));
    }
    if let Some((index, record)) = records
        .iter()
        .enumerate()
        .find(|(_, record)| record.dimension() != dimension)
    {
        return Err(Error::CorruptFormat(format!(
            "record {index} ({}) has dimension {}, expected {dimension}",
            record.title,
            record.dimension()
        )));
    }

    let dimension = if records.is_empty() { 0 } else { dimension };
    Ok(Gallery::from_stored(records, dimension))
}

/// Exclusive `<gallery>.lock` file held for the duration of a save
#[derive(Debug)]
struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    fn acquire(destination: &Path) -> Result<Self> {
        let mut name = OsString::from(destination.as_os_str());
        name.push(".lock");
        let path = PathBuf::from(name);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|error| {
                if error.kind() == ErrorKind::AlreadyExists {
                    let holder = fs::read_to_string(&path).unwrap_or_default();
                    let holder = holder.trim();
                    Error::Persistence(format!(
                        "Gallery {} is locked by another writer (pid {}); if no save is running, remove {} and retry",
                        destination.display(),
                        if holder.is_empty() { "unknown" } else { holder },
                        path.display()
                    ))
                } else {
                    Error::Persistence(format!(
                        "Failed to create lock file {}: {error}",
                        path.display()
                    ))
                }
            })?;
        let lock = Self { path };
        write!(file, "{}", process::id()).map_err(|error| {
            Error::Persistence(format!(
                "Failed to write lock file {}: {error}",
                lock.path.display()
            ))
        })?;
        Ok(lock)
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {}: {error}", self.path.display());
        }
    }
}
