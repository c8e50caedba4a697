//! Gallery data model.
//!
//! A gallery is built through an [`OpenGallery`] (append-only) and then sealed into a
//! read-only [`Gallery`]. Sealing consumes the open gallery, so a writer and a reader
//! never share one instance.

use bincode::{Decode, Encode};

use crate::error::{Error, Result};
use crate::vector::{Embedding, is_unit};

/// One reference artwork with its unit-length embedding
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ArtworkRecord {
    /// Artwork title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Source image path as written in the metadata table
    pub image_path: String,
    /// L2-normalized embedding
    pub embedding: Embedding,
}

impl ArtworkRecord {
    /// Embedding dimension of this record
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// Gallery under construction
#[derive(Debug, Default)]
pub struct OpenGallery {
    records: Vec<ArtworkRecord>,
    dimension: Option<usize>,
}

impl OpenGallery {
    /// Append a record.
    ///
    /// The first record fixes the gallery dimension.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` if the record's dimension differs from earlier records,
    /// or `DegenerateEmbedding` if its embedding is not unit length.
    pub fn push(&mut self, record: ArtworkRecord) -> Result<()> {
        check_record(self.dimension, &record)?;
        self.dimension = Some(record.dimension());
        self.records.push(record);
        Ok(())
    }

    /// Dimension fixed by the first record, if any
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of records appended so far
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if nothing has been appended
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Freeze the gallery for querying and persistence
    pub fn seal(self) -> Gallery {
        Gallery {
            dimension: self.dimension.unwrap_or(0),
            records: self.records,
        }
    }
}

/// Sealed, read-only gallery
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    records: Vec<ArtworkRecord>,
    dimension: usize,
}

impl Gallery {
    /// Build a sealed gallery from complete in-memory records.
    ///
    /// # Errors
    /// Returns an error if the records disagree on dimension or are not unit length.
    pub fn from_records(records: Vec<ArtworkRecord>) -> Result<Self> {
        let mut open = OpenGallery::default();
        for record in records {
            open.push(record)?;
        }
        Ok(open.seal())
    }

    /// Records in insertion order
    pub fn records(&self) -> &[ArtworkRecord] {
        &self.records
    }

    /// Shared embedding dimension (0 for an empty gallery)
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the gallery holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ArtworkRecord> + '_ {
        self.records.iter()
    }

    /// Rebuild a gallery from stored parts without re-checking norms.
    ///
    /// Stored files may predate normalization; the match engine re-normalizes defensively.
    pub(crate) fn from_stored(records: Vec<ArtworkRecord>, dimension: usize) -> Self {
        Self { records, dimension }
    }
}

fn check_record(dimension: Option<usize>, record: &ArtworkRecord) -> Result<()> {
    if let Some(expected) = dimension
        && expected != record.dimension()
    {
        return Err(Error::DimensionMismatch {
            expected,
            actual: record.dimension(),
        });
    }
    if record.embedding.is_empty() || !is_unit(&record.embedding) {
        return Err(Error::DegenerateEmbedding {
            image_path: record.image_path.clone(),
        });
    }
    Ok(())
}
