//! Exhaustive cosine-similarity matching against a sealed gallery.

use std::cmp::Ordering;

use tracing::warn;

use crate::error::{Error, Result};
use crate::gallery::{ArtworkRecord, Gallery};
use crate::vector::{Embedding, NORM_EPSILON, dot, l2_norm, normalize};

/// Best-matching record and its cosine similarity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult<'gallery> {
    /// Matched record
    pub record: &'gallery ArtworkRecord,
    /// Cosine similarity in `[-1, 1]`
    pub score: f32,
}

/// Filters applied on top of the raw ranking
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Matches scoring below this are discarded
    pub min_score: Option<f32>,
}

impl MatchOptions {
    /// Whether a score passes the threshold
    pub fn accepts(&self, score: f32) -> bool {
        self.min_score.is_none_or(|threshold| score >= threshold)
    }
}

/// Find the single closest record by cosine similarity.
///
/// Linear scan in gallery order; on equal scores the earliest record wins. Scores are divided
/// by the stored vector's norm, and a stored vector with zero norm is skipped.
///
/// # Errors
/// Returns `DimensionMismatch` if the query and gallery dimensions differ, or
/// `DegenerateQuery` if the query has near-zero norm. An empty gallery yields `Ok(None)`.
pub fn find_best_match<'gallery>(
    query: &[f32],
    gallery: &'gallery Gallery,
) -> Result<Option<MatchResult<'gallery>>> {
    let Some(query) = prepare_query(query, gallery)? else {
        return Ok(None);
    };

    let mut best: Option<MatchResult<'gallery>> = None;
    for (record, score) in scored_records(&query, gallery) {
        if best.is_none_or(|current| score > current.score) {
            best = Some(MatchResult { record, score });
        }
    }
    Ok(best)
}

/// Rank the `limit` closest records, highest score first, ties in gallery order.
///
/// # Errors
/// Same as [`find_best_match`].
pub fn find_top_matches<'gallery>(
    query: &[f32],
    gallery: &'gallery Gallery,
    limit: usize,
) -> Result<Vec<MatchResult<'gallery>>> {
    let Some(query) = prepare_query(query, gallery)? else {
        return Ok(Vec::new());
    };
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut ranked: Vec<MatchResult<'gallery>> = scored_records(&query, gallery)
        .map(|(record, score)| MatchResult { record, score })
        .collect();
    // Stable sort keeps gallery order among equal scores.
    ranked.sort_by(|first, second| {
        second
            .score
            .partial_cmp(&first.score)
            .unwrap_or(Ordering::Equal)
    });
    ranked.truncate(limit);
    Ok(ranked)
}

/// Apply `options` to the best match
///
/// # Errors
/// Same as [`find_best_match`].
pub fn find_best_match_with<'gallery>(
    query: &[f32],
    gallery: &'gallery Gallery,
    options: MatchOptions,
) -> Result<Option<MatchResult<'gallery>>> {
    Ok(find_best_match(query, gallery)?.filter(|result| options.accepts(result.score)))
}

/// Validate and normalize the query; `None` for an empty gallery
fn prepare_query(query: &[f32], gallery: &Gallery) -> Result<Option<Embedding>> {
    if gallery.is_empty() {
        return Ok(None);
    }
    if query.len() != gallery.dimension() {
        return Err(Error::DimensionMismatch {
            expected: gallery.dimension(),
            actual: query.len(),
        });
    }
    normalize(query).map(Some).ok_or(Error::DegenerateQuery)
}

/// Score every usable record against a unit query, in gallery order
fn scored_records<'query, 'gallery>(
    query: &'query [f32],
    gallery: &'gallery Gallery,
) -> impl Iterator<Item = (&'gallery ArtworkRecord, f32)> + 'query
where
    'gallery: 'query,
{
    gallery.iter().filter_map(move |record| {
        let norm = l2_norm(&record.embedding);
        if !norm.is_finite() || norm < NORM_EPSILON {
            warn!("Skipping gallery record with zero-norm embedding: {}", record.title);
            return None;
        }
        let score = f64::from(dot(query, &record.embedding)) / norm;
        Some((record, (score as f32).clamp(-1.0, 1.0)))
    })
}
