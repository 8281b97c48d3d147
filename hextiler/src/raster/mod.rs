//! Raster source adapter
//!
//! The tiling core never reads pixels from disk formats itself; it consumes
//! an abstract [`RasterSource`] that exposes a footprint and a windowed read
//! at an arbitrary output resolution. Reprojection correctness is the
//! adapter's responsibility; the core only selects a resampling kernel per
//! call.

mod memory;

pub use memory::MemoryRaster;

use image::RgbaImage;
use thiserror::Error;

use crate::coord::GeoBox;

/// Pixel-value interpolation method for windowed reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resampling {
    /// Nearest neighbour. Fast, preserves exact source values.
    Nearest,
    /// Bilinear interpolation over the 2×2 neighbourhood.
    #[default]
    Bilinear,
    /// Catmull-Rom bicubic over the 4×4 neighbourhood.
    Cubic,
    /// Box average over the source footprint of each output pixel.
    /// The right choice when downscaling well below native resolution.
    Average,
}

impl Resampling {
    /// Short lowercase name used in logs and CLI arguments.
    pub fn name(&self) -> &'static str {
        match self {
            Resampling::Nearest => "nearest",
            Resampling::Bilinear => "bilinear",
            Resampling::Cubic => "cubic",
            Resampling::Average => "average",
        }
    }
}

impl std::fmt::Display for Resampling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from raster source adapters.
#[derive(Debug, Error)]
pub enum RasterError {
    /// I/O failure reading the underlying raster. Retryable.
    #[error("Raster I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The raster could not be decoded. Fatal.
    #[error("Failed to decode raster: {0}")]
    Decode(#[from] image::ImageError),

    /// A requested window had zero output dimensions.
    #[error("Invalid window: {width}x{height}")]
    InvalidWindow { width: u32, height: u32 },

    /// The raster has no pixels or a degenerate extent. Fatal.
    #[error("Invalid raster source: {0}")]
    InvalidSource(String),
}

impl RasterError {
    /// True if retrying the operation could succeed.
    ///
    /// Geometry and decode failures are deterministic and never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, RasterError::Io(_))
    }
}

/// Footprint metadata of a source raster, derived once and read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterFootprint {
    /// Geographic extent in projected meters.
    pub extent: GeoBox,
    /// Native ground resolution in meters per pixel.
    pub resolution: f64,
    /// Coordinate reference system identifier, e.g. "EPSG:3857".
    pub crs: String,
}

/// A pixel block returned by a windowed read.
///
/// The alpha channel doubles as the per-pixel validity mask: alpha 0 marks
/// no-data, anything else marks a valid sample.
#[derive(Debug, Clone)]
pub struct Window {
    pixels: RgbaImage,
}

impl Window {
    /// Wrap a pixel buffer. Alpha is taken as the validity mask.
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    /// A fully no-data window of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// True if every pixel is no-data.
    pub fn is_fully_invalid(&self) -> bool {
        self.pixels.pixels().all(|p| p.0[3] == 0)
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbaImage {
        self.pixels
    }
}

/// Windowed, resampled read access to a georeferenced raster.
///
/// Implementations must be `Send + Sync`; the pyramid builder issues reads
/// for distinct windows concurrently.
pub trait RasterSource: Send + Sync {
    /// Geographic extent of the raster in projected meters.
    fn extent(&self) -> GeoBox;

    /// Native ground resolution in meters per pixel.
    fn native_resolution(&self) -> f64;

    /// Coordinate reference system identifier.
    fn crs(&self) -> &str;

    /// Read an arbitrary geographic window resampled to `width`×`height`.
    ///
    /// Pixels outside the raster extent come back as no-data; a window
    /// entirely outside the extent is a fully invalid block, not an error.
    fn read_window(
        &self,
        geo_box: &GeoBox,
        width: u32,
        height: u32,
        resampling: Resampling,
    ) -> Result<Window, RasterError>;

    /// Footprint metadata, derived from the accessors above.
    fn footprint(&self) -> RasterFootprint {
        RasterFootprint {
            extent: self.extent(),
            resolution: self.native_resolution(),
            crs: self.crs().to_string(),
        }
    }
}
