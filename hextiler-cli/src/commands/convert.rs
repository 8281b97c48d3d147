//! `hextiler convert` - copy a pyramid between backends and schemes.

use std::path::PathBuf;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use hextiler::convert::convert_store;
use hextiler::RetryPolicy;

use super::common::{job_spinner, open_store, SchemeArg};
use crate::error::CliError;

/// Arguments for the convert command.
#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Source store: a directory, or a .mbtiles/.sqlite/.db file
    pub source: PathBuf,

    /// Target store; the backend is picked from the file extension
    pub target: PathBuf,

    /// Tiling scheme of the source pyramid
    #[arg(long, value_enum, default_value = "tms")]
    pub from_scheme: SchemeArg,

    /// Tiling scheme for the target pyramid
    #[arg(long, value_enum, default_value = "tms")]
    pub to_scheme: SchemeArg,
}

/// Run the convert command.
pub fn run(args: ConvertArgs, cancel: &CancellationToken) -> Result<(), CliError> {
    let source = open_store(&args.source)?;
    let target = open_store(&args.target)?;

    info!(
        source = %args.source.display(),
        target = %args.target.display(),
        "converting pyramid"
    );
    let spinner = job_spinner("converting pyramid");
    let report = convert_store(
        source.as_ref(),
        args.from_scheme.into(),
        target.as_ref(),
        args.to_scheme.into(),
        &RetryPolicy::default(),
        cancel,
    )?;
    spinner.finish_with_message(report.to_string());

    println!("{report}");
    if !report.is_complete() {
        return Err(CliError::Partial(report.to_string()));
    }
    Ok(())
}
