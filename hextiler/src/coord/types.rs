//! Core addressing types: tiling schemes, tile keys, and geographic boxes.

use thiserror::Error;

/// Tile edge length in pixels.
pub const TILE_SIZE: u32 = 256;

/// Maximum supported zoom level.
///
/// At zoom 24 a Web Mercator tile covers roughly 2.4 m, well past the
/// native resolution of any imagery this tool is pointed at.
pub const MAX_ZOOM: u8 = 24;

/// Half-extent of the Web Mercator (EPSG:3857) world in meters.
pub const WORLD_HALF: f64 = 20_037_508.342_789_244;

/// Full edge length of the Web Mercator world in meters.
pub const WORLD_SIZE: f64 = 2.0 * WORLD_HALF;

/// Errors from tile addressing operations.
#[derive(Debug, Error, PartialEq)]
pub enum CoordError {
    /// Zoom level exceeds [`MAX_ZOOM`].
    #[error("Invalid zoom level {0} (max: {max})", max = MAX_ZOOM)]
    InvalidZoom(u8),

    /// Coarsest zoom is finer than the finest zoom.
    #[error("Invalid zoom range {min}:{max} (min must not exceed max)")]
    InvalidZoomRange { min: u8, max: u8 },

    /// Raster resolution must be a positive, finite number of meters per pixel.
    #[error("Invalid raster resolution {0} m/px")]
    InvalidResolution(f64),
}

/// Grid convention for a tile pyramid.
///
/// Both schemes share tile size, world extent, and X numbering; they differ
/// only in where tile Y counts from. Converting a key between them is a
/// pure y-flip at the same zoom (`y' = 2^z - 1 - y`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TilingScheme {
    /// OSGeo Tile Map Service: Y origin at the bottom-left (south).
    Tms,
    /// Google/XYZ convention: Y origin at the top-left (north).
    Google,
}

impl TilingScheme {
    /// Short lowercase name used in logs and CLI arguments.
    pub fn name(&self) -> &'static str {
        match self {
            TilingScheme::Tms => "tms",
            TilingScheme::Google => "google",
        }
    }
}

impl std::fmt::Display for TilingScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies one tile within one [`TilingScheme`].
///
/// A key is meaningful only relative to a scheme; moving a key between
/// schemes goes through [`convert_key`](crate::coord::convert_key), never by
/// reusing the numeric values directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// Zoom level (0 = coarsest, one world tile).
    pub zoom: u8,
    /// Column index, increasing eastward.
    pub x: u32,
    /// Row index; direction depends on the scheme.
    pub y: u32,
}

impl TileKey {
    /// Create a new tile key.
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// The parent key one zoom level coarser.
    ///
    /// Parent/child index arithmetic is identical for both schemes; only the
    /// image quadrant a child occupies differs (see
    /// [`child_quadrant`](crate::coord::child_quadrant)).
    pub fn parent(&self) -> Option<TileKey> {
        if self.zoom == 0 {
            return None;
        }
        Some(TileKey::new(self.zoom - 1, self.x / 2, self.y / 2))
    }

    /// The four child keys one zoom level finer.
    pub fn children(&self) -> [TileKey; 4] {
        let z = self.zoom + 1;
        let (x, y) = (self.x * 2, self.y * 2);
        [
            TileKey::new(z, x, y),
            TileKey::new(z, x + 1, y),
            TileKey::new(z, x, y + 1),
            TileKey::new(z, x + 1, y + 1),
        ]
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Axis-aligned bounding box in projected (Web Mercator) meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl GeoBox {
    /// Create a new box. Callers are responsible for min <= max.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// The full Web Mercator world extent.
    pub fn world() -> Self {
        Self::new(-WORLD_HALF, -WORLD_HALF, WORLD_HALF, WORLD_HALF)
    }

    /// Width in meters.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height in meters.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True if the two boxes share any area (touching edges do not count).
    pub fn intersects(&self, other: &GeoBox) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// The overlapping region of two boxes, if any.
    pub fn intersection(&self, other: &GeoBox) -> Option<GeoBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(GeoBox::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        ))
    }

    /// The smallest box covering both boxes.
    pub fn union(&self, other: &GeoBox) -> GeoBox {
        GeoBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }
}

/// Inclusive rectangle of tile indices at one zoom level.
///
/// Produced by [`tile_range_for`](crate::coord::tile_range_for). May be
/// empty (a box fully outside the world extent yields an empty range, not
/// an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    /// First column (inclusive).
    pub x_start: u32,
    /// Last column + 1 (exclusive).
    pub x_end: u32,
    /// First row (inclusive).
    pub y_start: u32,
    /// Last row + 1 (exclusive).
    pub y_end: u32,
}

impl TileRange {
    /// An empty range at the given zoom.
    pub fn empty(zoom: u8) -> Self {
        Self {
            zoom,
            x_start: 0,
            x_end: 0,
            y_start: 0,
            y_end: 0,
        }
    }

    /// True if the range contains no tiles.
    pub fn is_empty(&self) -> bool {
        self.x_start >= self.x_end || self.y_start >= self.y_end
    }

    /// Number of tiles in the range.
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        (self.x_end - self.x_start) as u64 * (self.y_end - self.y_start) as u64
    }

    /// True if the key's indices fall inside this range.
    pub fn contains(&self, key: &TileKey) -> bool {
        key.zoom == self.zoom
            && (self.x_start..self.x_end).contains(&key.x)
            && (self.y_start..self.y_end).contains(&key.y)
    }

    /// Iterate all keys in the range in row-major order.
    pub fn iter(&self) -> TileRangeIter {
        TileRangeIter {
            range: *self,
            next_x: self.x_start,
            next_y: self.y_start,
        }
    }
}

impl IntoIterator for TileRange {
    type Item = TileKey;
    type IntoIter = TileRangeIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Row-major iterator over the keys of a [`TileRange`].
pub struct TileRangeIter {
    range: TileRange,
    next_x: u32,
    next_y: u32,
}

impl Iterator for TileRangeIter {
    type Item = TileKey;

    fn next(&mut self) -> Option<TileKey> {
        if self.range.is_empty() || self.next_y >= self.range.y_end {
            return None;
        }
        let key = TileKey::new(self.range.zoom, self.next_x, self.next_y);
        self.next_x += 1;
        if self.next_x >= self.range.x_end {
            self.next_x = self.range.x_start;
            self.next_y += 1;
        }
        Some(key)
    }
}
