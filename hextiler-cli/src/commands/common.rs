//! Shared argument types and helpers for CLI commands.

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};

use hextiler::coord::GeoBox;
use hextiler::merge::MergePolicy;
use hextiler::raster::Resampling;
use hextiler::store::{DirectoryStore, SqliteStore, TileStore};
use hextiler::TilingScheme;

use crate::error::CliError;

/// Tiling scheme selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum SchemeArg {
    /// TMS addressing (row 0 at the south edge)
    Tms,
    /// Google/XYZ addressing (row 0 at the north edge)
    Google,
}

impl From<SchemeArg> for TilingScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Tms => TilingScheme::Tms,
            SchemeArg::Google => TilingScheme::Google,
        }
    }
}

/// Resampling kernel selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ResamplingArg {
    /// Nearest neighbor (fastest, blocky)
    Nearest,
    /// Bilinear interpolation over valid pixels
    Bilinear,
    /// Catmull-Rom cubic (sharpest, falls back to bilinear near no-data)
    Cubic,
    /// Box average over the source footprint (best when downscaling)
    Average,
}

impl From<ResamplingArg> for Resampling {
    fn from(arg: ResamplingArg) -> Self {
        match arg {
            ResamplingArg::Nearest => Resampling::Nearest,
            ResamplingArg::Bilinear => Resampling::Bilinear,
            ResamplingArg::Cubic => Resampling::Cubic,
            ResamplingArg::Average => Resampling::Average,
        }
    }
}

/// Merge policy selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PolicyArg {
    /// Later sources overwrite earlier ones where both have valid pixels
    Overwrite,
    /// Overlapping valid pixels are averaged
    Average,
    /// Earlier sources win; later sources only fill gaps
    FirstWins,
}

impl From<PolicyArg> for MergePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Overwrite => MergePolicy::Overwrite,
            PolicyArg::Average => MergePolicy::Average,
            PolicyArg::FirstWins => MergePolicy::FirstWins,
        }
    }
}

/// Open a tile store at `path`, picking the backend by file extension.
///
/// `.mbtiles`, `.sqlite` and `.db` open a SQLite store; anything else is
/// treated as a tile directory root.
pub fn open_store(path: &Path) -> Result<Box<dyn TileStore>, CliError> {
    let backend = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match backend.as_deref() {
        Some("mbtiles") | Some("sqlite") | Some("db") => {
            Ok(Box::new(SqliteStore::create(path).map_err(|e| {
                CliError::Tiler(hextiler::TilerError::Store(e))
            })?))
        }
        _ => Ok(Box::new(DirectoryStore::create(path).map_err(|e| {
            CliError::Tiler(hextiler::TilerError::Store(e))
        })?)),
    }
}

/// Parse `minx,miny,maxx,maxy` (Web Mercator meters) into a [`GeoBox`].
pub fn parse_bounds(s: &str) -> Result<GeoBox, CliError> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| {
            CliError::Usage(format!("bounds '{}' must be minx,miny,maxx,maxy", s))
        })?;
    if parts.len() != 4 {
        return Err(CliError::Usage(format!(
            "bounds '{}' must have exactly 4 comma-separated values",
            s
        )));
    }
    if parts[0] >= parts[2] || parts[1] >= parts[3] {
        return Err(CliError::Usage(format!(
            "bounds '{}' must satisfy minx < maxx and miny < maxy",
            s
        )));
    }
    Ok(GeoBox::new(parts[0], parts[1], parts[2], parts[3]))
}

/// Parse `MIN:MAX` into a zoom range; a bare `MAX` means `0:MAX`.
pub fn parse_zoom_range(s: &str) -> Result<(u8, u8), CliError> {
    let err = || CliError::Usage(format!("zoom '{}' must be MIN:MAX (e.g. 0:12)", s));
    match s.split_once(':') {
        None => {
            let max = s.trim().parse::<u8>().map_err(|_| err())?;
            Ok((0, max))
        }
        Some((min, max)) => {
            let min = min.trim().parse::<u8>().map_err(|_| err())?;
            let max = max.trim().parse::<u8>().map_err(|_| err())?;
            if min > max {
                return Err(CliError::Usage(format!(
                    "zoom '{}' has MIN greater than MAX",
                    s
                )));
            }
            Ok((min, max))
        }
    }
}

/// Spinner shown while a job runs; tile-level jobs report totals at the end.
pub fn job_spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        bar.set_style(style);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}
