//! Hextiler CLI - build, merge and convert Web Mercator tile pyramids.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use commands::{build, convert, merge};
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "hextiler", version, about = "Tile pyramid generation and merging")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a tile pyramid from a georeferenced raster image
    Build(build::BuildArgs),
    /// Merge several pyramids into one under an explicit policy
    Merge(merge::MergeArgs),
    /// Copy a pyramid between backends and tiling schemes
    Convert(convert::ConvertArgs),
}

fn run(cli: Cli) -> Result<(), CliError> {
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received, finishing in-flight tiles");
        handler_token.cancel();
    })
    .map_err(|e| CliError::Init(format!("signal handler: {e}")))?;

    match cli.command {
        Command::Build(args) => build::run(args, &cancel),
        Command::Merge(args) => merge::run(args, &cancel),
        Command::Convert(args) => convert::run(args, &cancel),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
