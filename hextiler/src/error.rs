//! Top-level error taxonomy.
//!
//! Three families matter to callers: invalid input (fatal, detected before
//! any tile is written), transient I/O (retried per-tile, then escalated),
//! and partial completion (cancelled or retries exhausted mid-level, left
//! visible so a caller can resume instead of re-running from scratch).

use thiserror::Error;

use crate::coord::CoordError;
use crate::raster::RasterError;
use crate::store::StoreError;

/// Errors from pyramid build, merge, and convert jobs.
#[derive(Debug, Error)]
pub enum TilerError {
    /// Tile addressing failure (bad zoom range, bad resolution). Fatal.
    #[error(transparent)]
    Coord(#[from] CoordError),

    /// Raster source failure surfaced after retries.
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// Tile store failure surfaced after retries.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Input validation failure. Fatal, aborts before any write.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// More than one merge source was given without an explicit
    /// compositing policy. Fatal at job start.
    #[error("Merging {0} sources requires an explicit compositing policy")]
    PolicyRequired(usize),
}

impl TilerError {
    /// True if this error classifies as invalid input rather than I/O.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            TilerError::Coord(_)
                | TilerError::InvalidInput(_)
                | TilerError::PolicyRequired(_)
                | TilerError::Raster(RasterError::Decode(_))
                | TilerError::Raster(RasterError::InvalidSource(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_required_display() {
        let err = TilerError::PolicyRequired(3);
        assert!(err.to_string().contains("3 sources"));
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_coord_error_is_invalid_input() {
        let err: TilerError = CoordError::InvalidZoom(99).into();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_store_io_is_not_invalid_input() {
        let err: TilerError =
            StoreError::IoOther(std::io::Error::new(std::io::ErrorKind::Other, "x")).into();
        assert!(!err.is_invalid_input());
    }
}
