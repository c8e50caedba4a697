//! artlens - build artwork galleries and identify photographed artworks
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
        reason = "Allow for tests"
    )
)]

use anyhow::Result;
use clap::Parser as _;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use artlens_core::ArtlensConfig;
use cli::{Cli, Commands};

mod cli;
mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "artlens=info".into()))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ArtlensConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Build {
            metadata,
            output,
            batch_size,
        } => {
            handlers::handle_build(&config, &metadata, output, batch_size).await?;
        }
        Commands::Match {
            gallery,
            image,
            top,
            min_score,
        } => {
            handlers::handle_match(&config, gallery, &image, top, min_score).await?;
        }
        Commands::Inspect { gallery, limit } => {
            handlers::handle_inspect(&config, gallery, limit)?;
        }
    }

    Ok(())
}
