//! Pyramid builder
//!
//! Walks zoom levels from finest to coarsest, turning a raster source into
//! a sparse tile pyramid. The finest level is read from the raster through
//! the adapter; every coarser level is produced by box-downsampling the 2×2
//! child block already written to the store, so the source raster is
//! touched exactly once per pixel regardless of how many zoom levels are
//! built.
//!
//! Levels are strictly sequential (a coarser level depends on the finer one
//! being fully written); tiles within a level share no state and are
//! processed in parallel on a bounded worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coord::{
    child_quadrant, finest_zoom_for, geo_box_for, tile_range_for, CoordError, GeoBox, TileKey,
    TilingScheme, TILE_SIZE,
};
use crate::error::TilerError;
use crate::raster::{RasterError, RasterSource, Resampling, Window};
use crate::retry::{with_deadline, RetryPolicy};
use crate::store::TileStore;
use crate::tile::TileImage;

/// Configuration for one pyramid build job.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    /// Tiling scheme of the target pyramid.
    pub scheme: TilingScheme,
    /// Coarsest zoom level to build (inclusive).
    pub min_zoom: u8,
    /// Finest zoom level to build. Derived from the raster's native
    /// resolution when absent.
    pub max_zoom: Option<u8>,
    /// Resampling kernel for finest-level raster reads.
    pub resampling: Resampling,
    /// Worker thread count for tile-level parallelism. 0 uses the global
    /// rayon pool.
    pub workers: usize,
    /// Retry policy for transient raster/store I/O, per tile.
    pub retry: RetryPolicy,
    /// Deadline for a single raster window read. A read that overruns it
    /// counts as a retryable I/O failure. No deadline when absent.
    pub tile_timeout: Option<Duration>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            scheme: TilingScheme::Tms,
            min_zoom: 0,
            max_zoom: None,
            resampling: Resampling::Bilinear,
            workers: 0,
            retry: RetryPolicy::default(),
            tile_timeout: None,
        }
    }
}

/// Why a level was left incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncompleteCause {
    /// The job's cancellation token was tripped.
    Cancelled,
    /// A tile failed after its retry budget was exhausted.
    Failed,
}

/// The in-progress level of a job that did not run to completion.
#[derive(Debug, Clone)]
pub struct IncompleteLevel {
    /// Zoom level that was being processed.
    pub zoom: u8,
    /// Keys at that level that were not written (failed or never reached).
    pub missing: Vec<TileKey>,
    pub cause: IncompleteCause,
    /// First tile failure, when the cause is [`IncompleteCause::Failed`].
    pub first_error: Option<String>,
}

/// Final report of a pyramid build.
///
/// A build never hides partial completion: `completed_zooms` lists every
/// fully processed level in build order (finest first), and `incomplete`
/// carries the missing keys of the level that was cut short, so a caller
/// can resume rather than rebuild.
#[derive(Debug)]
pub struct BuildReport {
    pub scheme: TilingScheme,
    /// Finest (first-built) zoom level.
    pub finest_zoom: u8,
    /// Coarsest configured zoom level.
    pub coarsest_zoom: u8,
    pub tiles_written: u64,
    /// Tiles skipped because their source window was fully no-data.
    pub tiles_skipped: u64,
    /// Fully processed levels, finest first.
    pub completed_zooms: Vec<u8>,
    /// Set when the job was cancelled or failed mid-level.
    pub incomplete: Option<IncompleteLevel>,
}

impl BuildReport {
    /// True if every configured level was fully processed.
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_none()
    }
}

impl std::fmt::Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tiles written ({} skipped as no-data), zooms {}..={}",
            self.tiles_written, self.tiles_skipped, self.coarsest_zoom, self.finest_zoom
        )?;
        match &self.incomplete {
            None => Ok(()),
            Some(level) => write!(
                f,
                "; INCOMPLETE at zoom {} ({} tiles missing, {:?})",
                level.zoom,
                level.missing.len(),
                level.cause
            ),
        }
    }
}

/// Per-tile outcome inside one level.
enum TileOutcome {
    Written,
    Skipped,
    /// Not attempted (cancellation or a prior failure aborted the level).
    Missed(TileKey),
    Failed(TileKey, String),
}

/// Aggregated outcome of one level.
struct LevelResult {
    written: u64,
    skipped: u64,
    missing: Vec<TileKey>,
    first_error: Option<String>,
    cancelled: bool,
}

impl LevelResult {
    fn from_outcomes(outcomes: Vec<TileOutcome>, cancelled: bool) -> Self {
        let mut result = LevelResult {
            written: 0,
            skipped: 0,
            missing: Vec::new(),
            first_error: None,
            cancelled,
        };
        for outcome in outcomes {
            match outcome {
                TileOutcome::Written => result.written += 1,
                TileOutcome::Skipped => result.skipped += 1,
                TileOutcome::Missed(key) => result.missing.push(key),
                TileOutcome::Failed(key, error) => {
                    if result.first_error.is_none() {
                        result.first_error = Some(format!("{}: {}", key, error));
                    }
                    result.missing.push(key);
                }
            }
        }
        result.missing.sort();
        result
    }

    fn is_clean(&self) -> bool {
        self.missing.is_empty() && !self.cancelled
    }
}

/// Builds sparse tile pyramids from a raster source.
pub struct PyramidBuilder {
    config: BuildConfig,
}

impl PyramidBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build the pyramid into `store`.
    ///
    /// Validation happens before the first write; a validation failure
    /// leaves the store untouched. Cancellation and exhausted retries
    /// return an `Ok` report with [`BuildReport::incomplete`] set rather
    /// than an error, so partial progress is never hidden.
    pub fn build(
        &self,
        source: &dyn RasterSource,
        store: &dyn TileStore,
        cancel: &CancellationToken,
    ) -> Result<BuildReport, TilerError> {
        let footprint = source.footprint();
        let finest = match self.config.max_zoom {
            Some(z) => z,
            None => finest_zoom_for(footprint.resolution)?,
        };
        if self.config.min_zoom > finest {
            return Err(CoordError::InvalidZoomRange {
                min: self.config.min_zoom,
                max: finest,
            }
            .into());
        }
        // A footprint outside the world extent would build nothing; that is
        // an input mistake, not a sparse pyramid.
        if tile_range_for(self.config.scheme, &footprint.extent, finest)?.is_empty() {
            return Err(TilerError::InvalidInput(format!(
                "raster extent {:?} lies outside the world extent",
                footprint.extent
            )));
        }

        info!(
            scheme = %self.config.scheme,
            crs = %footprint.crs,
            resolution = footprint.resolution,
            zoom_range = format!("{}..={}", self.config.min_zoom, finest),
            "starting pyramid build"
        );

        let mut report = BuildReport {
            scheme: self.config.scheme,
            finest_zoom: finest,
            coarsest_zoom: self.config.min_zoom,
            tiles_written: 0,
            tiles_skipped: 0,
            completed_zooms: Vec::new(),
            incomplete: None,
        };

        for zoom in (self.config.min_zoom..=finest).rev() {
            let level = if zoom == finest {
                self.build_base_level(source, store, zoom, cancel)?
            } else {
                self.build_overview_level(store, zoom, cancel)?
            };

            report.tiles_written += level.written;
            report.tiles_skipped += level.skipped;

            if !level.is_clean() {
                let cause = if level.cancelled {
                    IncompleteCause::Cancelled
                } else {
                    IncompleteCause::Failed
                };
                warn!(
                    zoom,
                    missing = level.missing.len(),
                    ?cause,
                    "pyramid build stopped mid-level"
                );
                report.incomplete = Some(IncompleteLevel {
                    zoom,
                    missing: level.missing,
                    cause,
                    first_error: level.first_error,
                });
                return Ok(report);
            }

            info!(zoom, written = level.written, skipped = level.skipped, "level complete");
            report.completed_zooms.push(zoom);
        }

        Ok(report)
    }

    /// Rebuild coarser levels from an already-populated finer level.
    ///
    /// This is the explicit secondary pass for callers that merged pyramids
    /// and want overview levels recomputed from the merged result.
    pub fn coarsen(
        &self,
        store: &dyn TileStore,
        finest: u8,
        cancel: &CancellationToken,
    ) -> Result<BuildReport, TilerError> {
        if self.config.min_zoom > finest {
            return Err(CoordError::InvalidZoomRange {
                min: self.config.min_zoom,
                max: finest,
            }
            .into());
        }

        let mut report = BuildReport {
            scheme: self.config.scheme,
            finest_zoom: finest,
            coarsest_zoom: self.config.min_zoom,
            tiles_written: 0,
            tiles_skipped: 0,
            completed_zooms: vec![finest],
            incomplete: None,
        };

        for zoom in (self.config.min_zoom..finest).rev() {
            let level = self.build_overview_level(store, zoom, cancel)?;
            report.tiles_written += level.written;
            report.tiles_skipped += level.skipped;
            if !level.is_clean() {
                let cause = if level.cancelled {
                    IncompleteCause::Cancelled
                } else {
                    IncompleteCause::Failed
                };
                report.incomplete = Some(IncompleteLevel {
                    zoom,
                    missing: level.missing,
                    cause,
                    first_error: level.first_error,
                });
                return Ok(report);
            }
            report.completed_zooms.push(zoom);
        }
        Ok(report)
    }

    /// One windowed raster read, bounded by the configured deadline.
    fn read_tile_window(
        &self,
        source: &dyn RasterSource,
        geo: &GeoBox,
    ) -> Result<Window, RasterError> {
        let read = || source.read_window(geo, TILE_SIZE, TILE_SIZE, self.config.resampling);
        match self.config.tile_timeout {
            None => read(),
            Some(limit) => with_deadline(limit, read, |elapsed| {
                RasterError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("window read took {:?}, deadline {:?}", elapsed, limit),
                ))
            }),
        }
    }

    /// Run `work` over `keys` with the configured parallelism.
    fn run_level<F>(&self, keys: Vec<TileKey>, work: F) -> Result<Vec<TileOutcome>, TilerError>
    where
        F: Fn(&TileKey) -> TileOutcome + Send + Sync,
    {
        if self.config.workers == 0 {
            return Ok(keys.par_iter().map(&work).collect());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| TilerError::InvalidInput(format!("worker pool: {}", e)))?;
        Ok(pool.install(|| keys.par_iter().map(&work).collect()))
    }

    /// Build the finest level by reading tile windows from the raster.
    fn build_base_level(
        &self,
        source: &dyn RasterSource,
        store: &dyn TileStore,
        zoom: u8,
        cancel: &CancellationToken,
    ) -> Result<LevelResult, TilerError> {
        let range = tile_range_for(self.config.scheme, &source.extent(), zoom)?;
        let keys: Vec<TileKey> = range.iter().collect();
        debug!(zoom, tiles = keys.len(), "building base level");

        let abort = AtomicBool::new(false);
        let outcomes = self.run_level(keys, |key| {
            if cancel.is_cancelled() || abort.load(Ordering::Relaxed) {
                return TileOutcome::Missed(*key);
            }
            let geo = geo_box_for(self.config.scheme, key);
            let window = self
                .config
                .retry
                .run(|| self.read_tile_window(source, &geo), |e| e.is_transient());
            let window = match window {
                Ok(w) => w,
                Err(e) => {
                    abort.store(true, Ordering::Relaxed);
                    return TileOutcome::Failed(*key, e.to_string());
                }
            };
            if window.is_fully_invalid() {
                // Sparse pyramid: never store empty tiles.
                return TileOutcome::Skipped;
            }
            let tile = match TileImage::from_pixels(window.into_pixels()) {
                Ok(t) => t,
                Err(e) => {
                    abort.store(true, Ordering::Relaxed);
                    return TileOutcome::Failed(*key, e.to_string());
                }
            };
            match self
                .config
                .retry
                .run(|| store.put(key, &tile), |e| e.is_transient())
            {
                Ok(()) => TileOutcome::Written,
                Err(e) => {
                    abort.store(true, Ordering::Relaxed);
                    TileOutcome::Failed(*key, e.to_string())
                }
            }
        })?;

        Ok(LevelResult::from_outcomes(outcomes, cancel.is_cancelled()))
    }

    /// Build one overview level by downsampling the 2×2 child blocks
    /// already written at `zoom + 1`.
    fn build_overview_level(
        &self,
        store: &dyn TileStore,
        zoom: u8,
        cancel: &CancellationToken,
    ) -> Result<LevelResult, TilerError> {
        let children = self
            .config
            .retry
            .run(|| store.list_populated(zoom + 1), |e| e.is_transient())?;

        let mut parents: Vec<TileKey> = children
            .iter()
            .filter_map(|child| child.parent())
            .collect();
        parents.sort();
        parents.dedup();
        debug!(zoom, tiles = parents.len(), "building overview level");

        let abort = AtomicBool::new(false);
        let outcomes = self.run_level(parents, |parent| {
            if cancel.is_cancelled() || abort.load(Ordering::Relaxed) {
                return TileOutcome::Missed(*parent);
            }
            let mut tile = TileImage::blank();
            for child in parent.children() {
                let fetched = self
                    .config
                    .retry
                    .run(|| store.get(&child), |e| e.is_transient());
                match fetched {
                    Ok(Some(child_tile)) => {
                        let (qx, qy) = child_quadrant(self.config.scheme, &child);
                        tile.downsample_child_into(&child_tile, qx, qy);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        abort.store(true, Ordering::Relaxed);
                        return TileOutcome::Failed(*parent, e.to_string());
                    }
                }
            }
            if tile.is_blank() {
                return TileOutcome::Skipped;
            }
            match self
                .config
                .retry
                .run(|| store.put(parent, &tile), |e| e.is_transient())
            {
                Ok(()) => TileOutcome::Written,
                Err(e) => {
                    abort.store(true, Ordering::Relaxed);
                    TileOutcome::Failed(*parent, e.to_string())
                }
            }
        })?;

        Ok(LevelResult::from_outcomes(outcomes, cancel.is_cancelled()))
    }
}
