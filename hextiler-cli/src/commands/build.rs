//! `hextiler build` - generate a tile pyramid from a raster image.

use std::path::PathBuf;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use hextiler::pyramid::{BuildConfig, PyramidBuilder};
use hextiler::raster::MemoryRaster;

use super::common::{job_spinner, open_store, parse_bounds, parse_zoom_range, ResamplingArg, SchemeArg};
use crate::error::CliError;

/// Arguments for the build command.
#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Source raster image (any format the image crate decodes)
    pub image: PathBuf,

    /// Target store: a directory, or a .mbtiles/.sqlite/.db file
    pub target: PathBuf,

    /// Georeference of the image as Web Mercator meters: minx,miny,maxx,maxy
    #[arg(long)]
    pub bounds: String,

    /// Tiling scheme of the output pyramid
    #[arg(long, value_enum, default_value = "tms")]
    pub scheme: SchemeArg,

    /// Zoom range MIN:MAX; MAX defaults to the raster's native resolution
    #[arg(long)]
    pub zoom: Option<String>,

    /// Resampling kernel for finest-level reads
    #[arg(long, value_enum, default_value = "bilinear")]
    pub resampling: ResamplingArg,

    /// Worker threads for tile generation (0 = one per core)
    #[arg(long, default_value_t = 0)]
    pub workers: usize,
}

/// Run the build command.
pub fn run(args: BuildArgs, cancel: &CancellationToken) -> Result<(), CliError> {
    let bounds = parse_bounds(&args.bounds)?;
    let (min_zoom, max_zoom) = match &args.zoom {
        Some(range) => {
            let (min, max) = parse_zoom_range(range)?;
            (min, Some(max))
        }
        None => (0, None),
    };

    let raster = MemoryRaster::open(&args.image, bounds, "EPSG:3857")
        .map_err(hextiler::TilerError::from)?;
    let store = open_store(&args.target)?;

    let builder = PyramidBuilder::new(BuildConfig {
        scheme: args.scheme.into(),
        min_zoom,
        max_zoom,
        resampling: args.resampling.into(),
        workers: args.workers,
        ..BuildConfig::default()
    });

    info!(image = %args.image.display(), target = %args.target.display(), "building pyramid");
    let spinner = job_spinner("building pyramid");
    let report = builder.build(&raster, store.as_ref(), cancel)?;
    spinner.finish_with_message(report.to_string());

    println!("{report}");
    if !report.is_complete() {
        return Err(CliError::Partial(report.to_string()));
    }
    Ok(())
}
