use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for artlens
#[derive(Debug, Parser)]
#[command(name = "artlens")]
#[command(about = "Recognize artworks by embedding similarity", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build a gallery file from a metadata table
    #[command(about = "Embed every artwork in a metadata table and write a gallery file")]
    Build {
        /// Metadata table
        #[arg(short, long, help = "CSV file with title, artist and image_path columns")]
        metadata: PathBuf,

        /// Gallery destination
        #[arg(short, long, help = "Where to write the gallery (defaults to config)")]
        output: Option<PathBuf>,

        /// Images per embedding call
        #[arg(short, long, help = "Images per embedding call (overrides config)")]
        batch_size: Option<usize>,
    },

    /// Identify the artwork in a photograph
    #[command(about = "Find the gallery artwork closest to a photograph")]
    Match {
        /// Gallery file
        #[arg(short, long, help = "Gallery file to search (defaults to config)")]
        gallery: Option<PathBuf>,

        /// Query photograph
        #[arg(short, long, help = "Photograph of the artwork")]
        image: PathBuf,

        /// Number of results
        #[arg(short, long, help = "Number of results to report (overrides config)")]
        top: Option<usize>,

        /// Score threshold
        #[arg(long, help = "Report no match if the best score is below this")]
        min_score: Option<f32>,
    },

    /// Summarize a gallery file
    #[command(about = "Show record count, dimension and the first records of a gallery")]
    Inspect {
        /// Gallery file
        #[arg(short, long, help = "Gallery file to inspect (defaults to config)")]
        gallery: Option<PathBuf>,

        /// Records to list
        #[arg(long, default_value_t = 5, help = "Number of records to list")]
        limit: usize,
    },
}
