//! Tile addressing
//!
//! Pure functions mapping between tile indices, geographic extents, and
//! tiling schemes for the Web Mercator quadtree grid. Zoom 0 covers the
//! world in a single tile; every zoom increment doubles the tile count per
//! axis.

mod types;

pub use types::{
    CoordError, GeoBox, TileKey, TileRange, TileRangeIter, TilingScheme, MAX_ZOOM, TILE_SIZE,
    WORLD_HALF, WORLD_SIZE,
};

/// Edge length of one tile in meters at the given zoom.
#[inline]
pub fn tile_span(zoom: u8) -> f64 {
    WORLD_SIZE / (1u64 << zoom) as f64
}

/// Ground resolution of a tile pixel in meters at the given zoom.
#[inline]
pub fn pixel_resolution(zoom: u8) -> f64 {
    tile_span(zoom) / TILE_SIZE as f64
}

/// Number of tiles per axis at the given zoom.
#[inline]
pub fn tiles_per_axis(zoom: u8) -> u32 {
    1u32 << zoom
}

/// Geographic bounding box of a tile under the given scheme.
pub fn geo_box_for(scheme: TilingScheme, key: &TileKey) -> GeoBox {
    let span = tile_span(key.zoom);
    let min_x = -WORLD_HALF + key.x as f64 * span;
    let (min_y, max_y) = match scheme {
        TilingScheme::Tms => {
            let min_y = -WORLD_HALF + key.y as f64 * span;
            (min_y, min_y + span)
        }
        TilingScheme::Google => {
            let max_y = WORLD_HALF - key.y as f64 * span;
            (max_y - span, max_y)
        }
    };
    GeoBox::new(min_x, min_y, min_x + span, max_y)
}

/// Inclusive range of tile indices intersecting a geographic box at a zoom.
///
/// A box fully outside the world extent yields an empty range. Boxes are
/// clamped to the world before indexing, so oversized extents are safe.
///
/// # Errors
///
/// Returns [`CoordError::InvalidZoom`] for zoom levels above [`MAX_ZOOM`].
pub fn tile_range_for(
    scheme: TilingScheme,
    geo_box: &GeoBox,
    zoom: u8,
) -> Result<TileRange, CoordError> {
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }

    let clipped = match geo_box.intersection(&GeoBox::world()) {
        Some(b) => b,
        None => return Ok(TileRange::empty(zoom)),
    };

    let span = tile_span(zoom);
    let max_index = tiles_per_axis(zoom) - 1;

    // Index of the tile containing a coordinate, with the upper edge of a
    // box excluded so boxes ending exactly on a tile boundary do not pull
    // in the neighbouring column/row.
    let lower = |v: f64| ((v + WORLD_HALF) / span).floor();
    let upper = |v: f64| ((v + WORLD_HALF) / span).ceil() - 1.0;

    let clamp = |v: f64| (v.max(0.0) as u32).min(max_index);

    let x_start = clamp(lower(clipped.min_x));
    let x_last = clamp(upper(clipped.max_x)).max(x_start);

    // TMS rows count from the south edge, Google rows from the north.
    let (y_start, y_last) = match scheme {
        TilingScheme::Tms => {
            let y0 = clamp(lower(clipped.min_y));
            (y0, clamp(upper(clipped.max_y)).max(y0))
        }
        TilingScheme::Google => {
            let y0 = clamp(lower(-clipped.max_y));
            (y0, clamp(upper(-clipped.min_y)).max(y0))
        }
    };

    Ok(TileRange {
        zoom,
        x_start,
        x_end: x_last + 1,
        y_start,
        y_end: y_last + 1,
    })
}

/// Re-derive a tile key under a different scheme at the same zoom.
///
/// The transform is a row flip: `y' = 2^zoom - 1 - y`. Converting between
/// identical schemes is the identity.
///
/// # Errors
///
/// Returns [`CoordError::InvalidZoom`] for zoom levels above [`MAX_ZOOM`].
/// Stores are user-supplied and can list keys at any zoom, so the guard
/// sits here rather than on the caller.
pub fn convert_key(
    key: &TileKey,
    from: TilingScheme,
    to: TilingScheme,
) -> Result<TileKey, CoordError> {
    if key.zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(key.zoom));
    }
    if from == to {
        return Ok(*key);
    }
    let flipped = tiles_per_axis(key.zoom) - 1 - key.y;
    Ok(TileKey::new(key.zoom, key.x, flipped))
}

/// Image-space quadrant a child tile occupies within its parent.
///
/// Returns `(qx, qy)` with `(0, 0)` the top-left quadrant. Column parity is
/// scheme-independent; row parity flips for TMS because its rows count from
/// the south while image rows count from the top.
pub fn child_quadrant(scheme: TilingScheme, child: &TileKey) -> (u32, u32) {
    let qx = child.x & 1;
    let qy = match scheme {
        TilingScheme::Google => child.y & 1,
        TilingScheme::Tms => 1 - (child.y & 1),
    };
    (qx, qy)
}

/// Finest zoom level whose pixel resolution meets or beats a native raster
/// resolution (meters per pixel).
///
/// # Errors
///
/// Returns [`CoordError::InvalidResolution`] for non-positive or non-finite
/// resolutions.
pub fn finest_zoom_for(resolution: f64) -> Result<u8, CoordError> {
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(CoordError::InvalidResolution(resolution));
    }
    for zoom in 0..=MAX_ZOOM {
        if pixel_resolution(zoom) <= resolution {
            return Ok(zoom);
        }
    }
    Ok(MAX_ZOOM)
}
