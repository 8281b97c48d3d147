//! Store-to-store pyramid conversion.
//!
//! Copies a pyramid between backends (directory tree, SQLite) and between
//! tiling schemes. Scheme translation is pure key arithmetic (a y-flip per
//! zoom level); pixel data is never resampled or re-encoded beyond the
//! target backend's own serialization.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coord::{convert_key, TilingScheme};
use crate::error::TilerError;
use crate::retry::RetryPolicy;
use crate::store::TileStore;

/// Outcome of a conversion job.
#[derive(Debug)]
pub struct ConvertReport {
    pub tiles_copied: u64,
    /// Zoom levels fully converted.
    pub completed_zooms: Vec<u8>,
    pub cancelled: bool,
}

impl ConvertReport {
    pub fn is_complete(&self) -> bool {
        !self.cancelled
    }
}

impl std::fmt::Display for ConvertReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tiles copied across {} zoom levels",
            self.tiles_copied,
            self.completed_zooms.len()
        )?;
        if self.cancelled {
            write!(f, "; CANCELLED before completion")?;
        }
        Ok(())
    }
}

/// Copy every populated tile of `source` into `target`, re-addressing keys
/// from `source_scheme` to `target_scheme`.
///
/// Identical schemes degrade to a plain backend copy. The copy is
/// idempotent; re-running after an interruption overwrites already-copied
/// tiles with identical content.
pub fn convert_store(
    source: &dyn TileStore,
    source_scheme: TilingScheme,
    target: &dyn TileStore,
    target_scheme: TilingScheme,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<ConvertReport, TilerError> {
    let zooms = retry.run(|| source.zoom_levels(), |e| e.is_transient())?;
    info!(
        from = %source_scheme,
        to = %target_scheme,
        zooms = zooms.len(),
        "starting store conversion"
    );

    let mut report = ConvertReport {
        tiles_copied: 0,
        completed_zooms: Vec::new(),
        cancelled: false,
    };

    for zoom in zooms {
        let keys = retry.run(|| source.list_populated(zoom), |e| e.is_transient())?;
        debug!(zoom, tiles = keys.len(), "converting level");
        for key in keys {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            let tile = retry
                .run(|| source.get(&key), |e| e.is_transient())?
                .ok_or_else(|| {
                    TilerError::InvalidInput(format!(
                        "tile {} listed but missing from source store",
                        key
                    ))
                })?;
            let target_key = convert_key(&key, source_scheme, target_scheme)?;
            retry.run(|| target.put(&target_key, &tile), |e| e.is_transient())?;
            report.tiles_copied += 1;
        }
        report.completed_zooms.push(zoom);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{CoordError, TileKey};
    use crate::store::MemoryStore;
    use crate::tile::TileImage;
    use image::Rgba;

    fn solid_tile(value: u8) -> TileImage {
        let mut tile = TileImage::blank();
        for p in tile.pixels_mut().pixels_mut() {
            *p = Rgba([value, value, value, 255]);
        }
        tile
    }

    #[test]
    fn test_same_scheme_copy_preserves_keys_and_pixels() {
        let source = MemoryStore::new();
        let key = TileKey::new(3, 2, 5);
        source.put(&key, &solid_tile(42)).unwrap();
        let target = MemoryStore::new();

        let report = convert_store(
            &source,
            TilingScheme::Tms,
            &target,
            TilingScheme::Tms,
            &RetryPolicy::None,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(report.tiles_copied, 1);
        assert_eq!(target.get(&key).unwrap().unwrap(), solid_tile(42));
    }

    #[test]
    fn test_scheme_change_flips_y() {
        let source = MemoryStore::new();
        // At zoom 3 there are 8 rows; TMS row 5 is Google row 2.
        source.put(&TileKey::new(3, 2, 5), &solid_tile(9)).unwrap();
        let target = MemoryStore::new();

        convert_store(
            &source,
            TilingScheme::Tms,
            &target,
            TilingScheme::Google,
            &RetryPolicy::None,
            &CancellationToken::new(),
        )
        .unwrap();

        assert!(target.get(&TileKey::new(3, 2, 2)).unwrap().is_some());
        assert!(target.get(&TileKey::new(3, 2, 5)).unwrap().is_none());
    }

    #[test]
    fn test_round_trip_conversion_restores_keys() {
        let source = MemoryStore::new();
        for key in [TileKey::new(2, 0, 0), TileKey::new(2, 3, 1), TileKey::new(4, 7, 9)] {
            source.put(&key, &solid_tile(key.zoom)).unwrap();
        }
        let flipped = MemoryStore::new();
        let restored = MemoryStore::new();
        let cancel = CancellationToken::new();

        convert_store(
            &source,
            TilingScheme::Tms,
            &flipped,
            TilingScheme::Google,
            &RetryPolicy::None,
            &cancel,
        )
        .unwrap();
        convert_store(
            &flipped,
            TilingScheme::Google,
            &restored,
            TilingScheme::Tms,
            &RetryPolicy::None,
            &cancel,
        )
        .unwrap();

        for zoom in [2u8, 4] {
            assert_eq!(
                source.list_populated(zoom).unwrap(),
                restored.list_populated(zoom).unwrap()
            );
        }
    }

    #[test]
    fn test_oversized_zoom_key_is_an_error_not_a_panic() {
        // Stores are user-supplied; a listed key above the supported zoom
        // must surface as InvalidZoom instead of overflowing the y-flip.
        let source = MemoryStore::new();
        source.put(&TileKey::new(40, 0, 0), &solid_tile(1)).unwrap();
        let target = MemoryStore::new();

        let result = convert_store(
            &source,
            TilingScheme::Tms,
            &target,
            TilingScheme::Google,
            &RetryPolicy::None,
            &CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(TilerError::Coord(CoordError::InvalidZoom(40)))
        ));
        assert!(target.is_empty());
    }

    #[test]
    fn test_cancelled_conversion_reports_cancellation() {
        let source = MemoryStore::new();
        source.put(&TileKey::new(1, 0, 0), &solid_tile(1)).unwrap();
        let target = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = convert_store(
            &source,
            TilingScheme::Tms,
            &target,
            TilingScheme::Tms,
            &RetryPolicy::None,
            &cancel,
        )
        .unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.tiles_copied, 0);
    }
}
