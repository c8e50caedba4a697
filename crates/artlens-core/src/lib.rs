//! Artwork recognition by embedding similarity.
//!
//! A gallery is built offline from a metadata table of artworks: each image is embedded by
//! an external vision model, L2-normalized and stored alongside its title and artist. At
//! query time a photograph is embedded the same way and matched against the gallery by
//! cosine similarity.
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        reason = "Test allows"
    )
)]

/// Batched gallery construction.
pub mod builder;
/// Configuration loading and defaults.
pub mod config;
/// Embedding providers.
pub mod embedding;
/// Error types and result definitions.
pub mod error;
/// Gallery records and containers.
pub mod gallery;
/// Metadata and image loading.
pub mod loader;
/// Nearest-neighbour search.
pub mod matcher;
/// Gallery file format.
pub mod store;
/// Vector math.
pub mod vector;

pub use builder::{BuildSession, BuildStats, CancelFlag, GalleryBuilder, RetryPolicy, build_gallery};
pub use config::ArtlensConfig;
pub use embedding::{
    EmbeddingProvider, HttpEmbeddingClient, decode_query_image, embed_query, with_timeout,
};
pub use error::{Error, Result};
pub use gallery::{ArtworkRecord, Gallery, OpenGallery};
pub use loader::{BatchLoader, LoaderOptions};
pub use matcher::{MatchOptions, MatchResult, find_best_match, find_best_match_with, find_top_matches};
pub use store::{GalleryStore, load_gallery, save_gallery};
pub use vector::Embedding;
