//! Pyramid merging.
//!
//! Combines several tile pyramids into one target store. Source order is
//! significant and every compositing decision is explicit: a tile present
//! in exactly one source is copied verbatim, and a tile present in several
//! sources is composited per-pixel under the job's policy. Merging more
//! than one source without naming a policy is an input error, never a
//! silent default.
//!
//! Merging operates on one zoom level at a time; callers that want coarser
//! levels recomputed from the merged result run a
//! [`PyramidBuilder::coarsen`](crate::pyramid::PyramidBuilder::coarsen)
//! pass afterwards.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coord::TileKey;
use crate::error::TilerError;
use crate::retry::RetryPolicy;
use crate::store::TileStore;
use crate::tile::TileImage;

/// How overlapping valid pixels are resolved during a merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergePolicy {
    /// Later sources take precedence; a valid pixel in a later source
    /// replaces the earlier value.
    Overwrite,
    /// Overlapping valid pixels are averaged per channel.
    Average,
    /// Earlier sources take precedence; later sources only fill gaps.
    FirstWins,
}

impl MergePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            MergePolicy::Overwrite => "overwrite",
            MergePolicy::Average => "average",
            MergePolicy::FirstWins => "first-wins",
        }
    }
}

impl std::fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(MergePolicy::Overwrite),
            "average" => Ok(MergePolicy::Average),
            "first-wins" | "firstwins" => Ok(MergePolicy::FirstWins),
            other => Err(format!(
                "unknown merge policy '{}' (expected overwrite, average or first-wins)",
                other
            )),
        }
    }
}

/// Outcome of a merge job.
#[derive(Debug)]
pub struct MergeReport {
    /// Tiles written to the target, including verbatim copies.
    pub tiles_written: u64,
    /// Tiles that required per-pixel compositing (present in >1 source).
    pub tiles_composited: u64,
    /// Zoom levels that were fully merged.
    pub completed_zooms: Vec<u8>,
    /// True when cancellation stopped the job before all levels finished.
    pub cancelled: bool,
}

impl MergeReport {
    pub fn is_complete(&self) -> bool {
        !self.cancelled
    }
}

impl std::fmt::Display for MergeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tiles written ({} composited) across {} zoom levels",
            self.tiles_written,
            self.tiles_composited,
            self.completed_zooms.len()
        )?;
        if self.cancelled {
            write!(f, "; CANCELLED before completion")?;
        }
        Ok(())
    }
}

/// A configured merge of ordered source pyramids into a target store.
pub struct MergeJob {
    policy: Option<MergePolicy>,
    retry: RetryPolicy,
    workers: usize,
}

impl MergeJob {
    pub fn new(policy: Option<MergePolicy>) -> Self {
        Self {
            policy,
            retry: RetryPolicy::default(),
            workers: 0,
        }
    }

    /// Replaces the retry policy for per-tile store I/O.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Caps tile-level parallelism at `workers` threads. 0 uses the global
    /// rayon pool.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Merge `sources` (in precedence-relevant order) into `target`.
    ///
    /// All sources must use the same tiling scheme as the target; tile keys
    /// pass through unchanged. Returns [`TilerError::PolicyRequired`] when
    /// more than one source is given without an explicit policy.
    ///
    /// # Errors
    ///
    /// Store failures that survive the retry budget abort the job. The
    /// target is left with whatever was already written; re-running the
    /// merge is safe because every write is a full-tile replacement.
    pub fn run(
        &self,
        sources: &[&dyn TileStore],
        target: &dyn TileStore,
        cancel: &CancellationToken,
    ) -> Result<MergeReport, TilerError> {
        if sources.is_empty() {
            return Err(TilerError::InvalidInput(
                "merge requires at least one source pyramid".to_string(),
            ));
        }
        if sources.len() > 1 && self.policy.is_none() {
            return Err(TilerError::PolicyRequired(sources.len()));
        }

        let mut zooms: Vec<u8> = Vec::new();
        for source in sources {
            zooms.extend(self.retry.run(|| source.zoom_levels(), |e| e.is_transient())?);
        }
        zooms.sort_unstable();
        zooms.dedup();

        info!(
            sources = sources.len(),
            policy = self.policy.map(|p| p.name()).unwrap_or("none"),
            zooms = zooms.len(),
            "starting pyramid merge"
        );

        let pool = match self.workers {
            0 => None,
            n => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| TilerError::InvalidInput(format!("worker pool: {}", e)))?,
            ),
        };

        let mut report = MergeReport {
            tiles_written: 0,
            tiles_composited: 0,
            completed_zooms: Vec::new(),
            cancelled: false,
        };

        for zoom in zooms {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }

            let mut keys: Vec<TileKey> = Vec::new();
            for source in sources {
                keys.extend(
                    self.retry
                        .run(|| source.list_populated(zoom), |e| e.is_transient())?,
                );
            }
            keys.sort();
            keys.dedup();
            debug!(zoom, tiles = keys.len(), "merging level");

            let written = AtomicU64::new(0);
            let composited = AtomicU64::new(0);
            let abort = AtomicBool::new(false);
            let first_error: Mutex<Option<TilerError>> = Mutex::new(None);

            let merge_one = |key: &TileKey| {
                if cancel.is_cancelled() || abort.load(Ordering::Relaxed) {
                    return;
                }
                match self.merge_tile(sources, key) {
                    Ok(None) => {}
                    Ok(Some((tile, contributors))) => {
                        let put = self
                            .retry
                            .run(|| target.put(key, &tile), |e| e.is_transient());
                        match put {
                            Ok(()) => {
                                written.fetch_add(1, Ordering::Relaxed);
                                if contributors > 1 {
                                    composited.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            Err(e) => {
                                abort.store(true, Ordering::Relaxed);
                                first_error.lock().get_or_insert(e.into());
                            }
                        }
                    }
                    Err(e) => {
                        abort.store(true, Ordering::Relaxed);
                        first_error.lock().get_or_insert(e);
                    }
                }
            };
            match &pool {
                Some(pool) => pool.install(|| keys.par_iter().for_each(merge_one)),
                None => keys.par_iter().for_each(merge_one),
            }

            if let Some(error) = first_error.into_inner() {
                return Err(error);
            }
            report.tiles_written += written.into_inner();
            report.tiles_composited += composited.into_inner();
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            report.completed_zooms.push(zoom);
        }

        Ok(report)
    }

    /// Produce the merged tile for `key`, along with the contributor count.
    ///
    /// Returns `Ok(None)` when no source holds the tile or the composite
    /// ends up fully no-data (which is never written).
    fn merge_tile(
        &self,
        sources: &[&dyn TileStore],
        key: &TileKey,
    ) -> Result<Option<(TileImage, usize)>, TilerError> {
        let mut contributions: Vec<TileImage> = Vec::new();
        for source in sources {
            let tile = self.retry.run(|| source.get(key), |e| e.is_transient())?;
            if let Some(tile) = tile {
                contributions.push(tile);
            }
        }

        let merged = match contributions.len() {
            0 => return Ok(None),
            1 => contributions.into_iter().next().map(|t| (t, 1)),
            n => {
                let policy = self
                    .policy
                    .ok_or(TilerError::PolicyRequired(sources.len()))?;
                let tile = match policy {
                    MergePolicy::Overwrite => {
                        let mut tile = TileImage::blank();
                        for source_tile in contributions.iter().rev() {
                            tile.fill_invalid_from(source_tile);
                        }
                        tile
                    }
                    MergePolicy::FirstWins => {
                        let mut tile = TileImage::blank();
                        for source_tile in &contributions {
                            tile.fill_invalid_from(source_tile);
                        }
                        tile
                    }
                    MergePolicy::Average => {
                        let refs: Vec<&TileImage> = contributions.iter().collect();
                        TileImage::average(&refs)
                    }
                };
                Some((tile, n))
            }
        };

        match merged {
            Some((tile, _)) if tile.is_blank() => Ok(None),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use image::Rgba;

    /// Tile that is valid everywhere with one uniform color.
    fn solid_tile(color: [u8; 4]) -> TileImage {
        let mut tile = TileImage::blank();
        for p in tile.pixels_mut().pixels_mut() {
            *p = Rgba(color);
        }
        tile
    }

    /// Tile valid only in the left half.
    fn half_tile(color: [u8; 4]) -> TileImage {
        let mut tile = TileImage::blank();
        let width = tile.pixels().width();
        for (x, _, p) in tile.pixels_mut().enumerate_pixels_mut() {
            if x < width / 2 {
                *p = Rgba(color);
            }
        }
        tile
    }

    #[test]
    fn test_two_sources_without_policy_is_rejected() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let target = MemoryStore::new();
        let result = MergeJob::new(None).run(&[&a, &b], &target, &CancellationToken::new());
        assert!(matches!(result, Err(TilerError::PolicyRequired(2))));
        assert!(target.is_empty());
    }

    #[test]
    fn test_single_source_copies_without_policy() {
        let source = MemoryStore::new();
        let key = TileKey::new(4, 3, 2);
        source.put(&key, &solid_tile([1, 2, 3, 255])).unwrap();
        let target = MemoryStore::new();

        let report = MergeJob::new(None)
            .run(&[&source], &target, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.tiles_written, 1);
        assert_eq!(report.tiles_composited, 0);
        assert_eq!(
            target.get(&key).unwrap().unwrap(),
            solid_tile([1, 2, 3, 255])
        );
    }

    #[test]
    fn test_overwrite_later_source_wins() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let key = TileKey::new(3, 1, 1);
        a.put(&key, &solid_tile([10, 10, 10, 255])).unwrap();
        b.put(&key, &half_tile([200, 0, 0, 255])).unwrap();
        let target = MemoryStore::new();

        MergeJob::new(Some(MergePolicy::Overwrite))
            .run(&[&a, &b], &target, &CancellationToken::new())
            .unwrap();

        let merged = target.get(&key).unwrap().unwrap();
        // Left half comes from b (later source), right half from a.
        assert_eq!(merged.pixels().get_pixel(0, 0).0, [200, 0, 0, 255]);
        assert_eq!(merged.pixels().get_pixel(255, 0).0, [10, 10, 10, 255]);
    }

    #[test]
    fn test_first_wins_earlier_source_wins() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let key = TileKey::new(3, 1, 1);
        a.put(&key, &half_tile([0, 200, 0, 255])).unwrap();
        b.put(&key, &solid_tile([10, 10, 10, 255])).unwrap();
        let target = MemoryStore::new();

        MergeJob::new(Some(MergePolicy::FirstWins))
            .run(&[&a, &b], &target, &CancellationToken::new())
            .unwrap();

        let merged = target.get(&key).unwrap().unwrap();
        // Left half keeps a's pixels; b only fills the gap on the right.
        assert_eq!(merged.pixels().get_pixel(0, 0).0, [0, 200, 0, 255]);
        assert_eq!(merged.pixels().get_pixel(255, 0).0, [10, 10, 10, 255]);
    }

    #[test]
    fn test_average_blends_overlap_per_pixel() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let key = TileKey::new(2, 0, 0);
        a.put(&key, &solid_tile([100, 0, 0, 255])).unwrap();
        b.put(&key, &half_tile([200, 0, 0, 255])).unwrap();
        let target = MemoryStore::new();

        MergeJob::new(Some(MergePolicy::Average))
            .run(&[&a, &b], &target, &CancellationToken::new())
            .unwrap();

        let merged = target.get(&key).unwrap().unwrap();
        // Overlap averages; the half only a covers keeps a's value.
        assert_eq!(merged.pixels().get_pixel(0, 0).0[0], 150);
        assert_eq!(merged.pixels().get_pixel(255, 0).0[0], 100);
    }

    #[test]
    fn test_disjoint_footprints_merge_to_exact_union() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let key_a = TileKey::new(5, 1, 1);
        let key_b = TileKey::new(5, 20, 20);
        a.put(&key_a, &solid_tile([1, 1, 1, 255])).unwrap();
        b.put(&key_b, &solid_tile([2, 2, 2, 255])).unwrap();
        let target = MemoryStore::new();

        let report = MergeJob::new(Some(MergePolicy::Overwrite))
            .run(&[&a, &b], &target, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.tiles_written, 2);
        assert_eq!(report.tiles_composited, 0);
        assert_eq!(
            target.get(&key_a).unwrap().unwrap(),
            solid_tile([1, 1, 1, 255])
        );
        assert_eq!(
            target.get(&key_b).unwrap().unwrap(),
            solid_tile([2, 2, 2, 255])
        );
    }

    #[test]
    fn test_merge_spans_all_source_zoom_levels() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        a.put(&TileKey::new(1, 0, 0), &solid_tile([9, 9, 9, 255]))
            .unwrap();
        b.put(&TileKey::new(3, 2, 2), &solid_tile([8, 8, 8, 255]))
            .unwrap();
        let target = MemoryStore::new();

        let report = MergeJob::new(Some(MergePolicy::Overwrite))
            .run(&[&a, &b], &target, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.completed_zooms, vec![1, 3]);
        assert_eq!(report.tiles_written, 2);
    }

    #[test]
    fn test_bounded_worker_pool_merges_identically() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let key = TileKey::new(3, 1, 1);
        a.put(&key, &solid_tile([10, 10, 10, 255])).unwrap();
        b.put(&key, &half_tile([200, 0, 0, 255])).unwrap();
        for x in 0..4u32 {
            a.put(&TileKey::new(4, x, 0), &solid_tile([x as u8, 0, 0, 255]))
                .unwrap();
        }
        let target = MemoryStore::new();

        let report = MergeJob::new(Some(MergePolicy::Overwrite))
            .with_workers(1)
            .run(&[&a, &b], &target, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.tiles_written, 5);
        assert_eq!(report.tiles_composited, 1);
        let merged = target.get(&key).unwrap().unwrap();
        assert_eq!(merged.pixels().get_pixel(0, 0).0, [200, 0, 0, 255]);
        assert_eq!(merged.pixels().get_pixel(255, 0).0, [10, 10, 10, 255]);
    }

    #[test]
    fn test_cancelled_merge_reports_cancellation() {
        let source = MemoryStore::new();
        source
            .put(&TileKey::new(1, 0, 0), &solid_tile([1, 1, 1, 255]))
            .unwrap();
        let target = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = MergeJob::new(None)
            .run(&[&source], &target, &cancel)
            .unwrap();
        assert!(!report.is_complete());
        assert!(report.completed_zooms.is_empty());
    }

    #[test]
    fn test_policy_parses_from_cli_spelling() {
        assert_eq!("overwrite".parse(), Ok(MergePolicy::Overwrite));
        assert_eq!("first-wins".parse(), Ok(MergePolicy::FirstWins));
        assert_eq!("AVERAGE".parse(), Ok(MergePolicy::Average));
        assert!("newest".parse::<MergePolicy>().is_err());
    }
}
