//! In-memory raster source.
//!
//! Reference implementation of [`RasterSource`] backed by a decoded RGBA
//! buffer and a caller-supplied extent. Serves as the adapter for plain
//! image files (which carry no georeferencing of their own) and as the test
//! double for the pyramid builder.

use std::path::Path;

use image::{Rgba, RgbaImage};

use super::{RasterError, RasterSource, Resampling, Window};
use crate::coord::GeoBox;

/// Catmull-Rom kernel weight for a sample `d` pixels from the target.
fn cubic_weight(d: f64) -> f64 {
    const A: f64 = -0.5;
    let d = d.abs();
    if d <= 1.0 {
        (A + 2.0) * d * d * d - (A + 3.0) * d * d + 1.0
    } else if d < 2.0 {
        A * d * d * d - 5.0 * A * d * d + 8.0 * A * d - 4.0 * A
    } else {
        0.0
    }
}

/// A georeferenced raster held entirely in memory.
///
/// The alpha channel of the backing buffer is the no-data mask; fully
/// opaque buffers have no no-data pixels.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    pixels: RgbaImage,
    extent: GeoBox,
    resolution: f64,
    crs: String,
}

impl MemoryRaster {
    /// Wrap a pixel buffer with its geographic extent.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::InvalidSource`] for empty buffers or
    /// degenerate extents.
    pub fn new(
        pixels: RgbaImage,
        extent: GeoBox,
        crs: impl Into<String>,
    ) -> Result<Self, RasterError> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(RasterError::InvalidSource("raster has no pixels".into()));
        }
        if extent.width() <= 0.0 || extent.height() <= 0.0 {
            return Err(RasterError::InvalidSource(format!(
                "degenerate extent: {:?}",
                extent
            )));
        }
        let res_x = extent.width() / pixels.width() as f64;
        let res_y = extent.height() / pixels.height() as f64;
        Ok(Self {
            pixels,
            extent,
            resolution: res_x.max(res_y),
            crs: crs.into(),
        })
    }

    /// Decode an image file and wrap it with the given extent.
    ///
    /// Plain image containers carry no georeferencing, so the extent comes
    /// from the caller (typically a CLI `--bounds` argument or a sidecar).
    pub fn open(
        path: impl AsRef<Path>,
        extent: GeoBox,
        crs: impl Into<String>,
    ) -> Result<Self, RasterError> {
        let path = path.as_ref();
        let pixels = image::open(path)
            .map_err(|e| match e {
                image::ImageError::IoError(io) => RasterError::Io(io),
                other => {
                    RasterError::InvalidSource(format!("{}: {}", path.display(), other))
                }
            })?
            .to_rgba8();
        Self::new(pixels, extent, crs)
    }

    /// Continuous source-pixel coordinates of a projected point.
    ///
    /// Pixel centers sit at half-integer coordinates; row 0 is the north
    /// edge of the extent.
    fn source_coords(&self, gx: f64, gy: f64) -> (f64, f64) {
        let sx = (gx - self.extent.min_x) / self.extent.width() * self.pixels.width() as f64;
        let sy = (self.extent.max_y - gy) / self.extent.height() * self.pixels.height() as f64;
        (sx, sy)
    }

    /// Source pixel at integer coordinates, if in bounds and valid.
    fn valid_pixel(&self, ix: i64, iy: i64) -> Option<Rgba<u8>> {
        if ix < 0 || iy < 0 || ix >= self.pixels.width() as i64 || iy >= self.pixels.height() as i64
        {
            return None;
        }
        let p = *self.pixels.get_pixel(ix as u32, iy as u32);
        (p.0[3] > 0).then_some(p)
    }

    fn sample_nearest(&self, sx: f64, sy: f64) -> Rgba<u8> {
        self.valid_pixel(sx.floor() as i64, sy.floor() as i64)
            .unwrap_or(Rgba([0, 0, 0, 0]))
    }

    fn sample_bilinear(&self, sx: f64, sy: f64) -> Rgba<u8> {
        let fx = sx - 0.5;
        let fy = sy - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;

        let mut rgb = [0.0f64; 3];
        let mut total = 0.0f64;
        for (dx, dy, w) in [
            (0, 0, (1.0 - tx) * (1.0 - ty)),
            (1, 0, tx * (1.0 - ty)),
            (0, 1, (1.0 - tx) * ty),
            (1, 1, tx * ty),
        ] {
            if w <= 0.0 {
                continue;
            }
            if let Some(p) = self.valid_pixel(x0 as i64 + dx, y0 as i64 + dy) {
                for (acc, v) in rgb.iter_mut().zip(p.0.iter()) {
                    *acc += w * *v as f64;
                }
                total += w;
            }
        }
        if total <= 0.0 {
            return Rgba([0, 0, 0, 0]);
        }
        Rgba([
            (rgb[0] / total).round() as u8,
            (rgb[1] / total).round() as u8,
            (rgb[2] / total).round() as u8,
            255,
        ])
    }

    fn sample_cubic(&self, sx: f64, sy: f64) -> Rgba<u8> {
        let fx = sx - 0.5;
        let fy = sy - 0.5;
        let x1 = fx.floor() as i64;
        let y1 = fy.floor() as i64;

        // Catmull-Rom needs the full 4x4 neighbourhood; near edges or
        // no-data pixels we degrade to bilinear rather than invent weights.
        let mut neighbourhood = [[Rgba([0, 0, 0, 0]); 4]; 4];
        for (j, row) in neighbourhood.iter_mut().enumerate() {
            for (i, slot) in row.iter_mut().enumerate() {
                match self.valid_pixel(x1 - 1 + i as i64, y1 - 1 + j as i64) {
                    Some(p) => *slot = p,
                    None => return self.sample_bilinear(sx, sy),
                }
            }
        }

        let mut rgb = [0.0f64; 3];
        for (j, row) in neighbourhood.iter().enumerate() {
            let wy = cubic_weight(fy - (y1 - 1 + j as i64) as f64);
            for (i, p) in row.iter().enumerate() {
                let w = wy * cubic_weight(fx - (x1 - 1 + i as i64) as f64);
                for (acc, v) in rgb.iter_mut().zip(p.0.iter()) {
                    *acc += w * *v as f64;
                }
            }
        }
        Rgba([
            rgb[0].round().clamp(0.0, 255.0) as u8,
            rgb[1].round().clamp(0.0, 255.0) as u8,
            rgb[2].round().clamp(0.0, 255.0) as u8,
            255,
        ])
    }

    /// Box average over the half-open source rectangle `[sx0, sx1) × [sy0, sy1)`.
    fn sample_average(&self, sx0: f64, sy0: f64, sx1: f64, sy1: f64) -> Rgba<u8> {
        let ix0 = sx0.floor().max(0.0) as i64;
        let iy0 = sy0.floor().max(0.0) as i64;
        // Cover at least one source pixel even when upscaling.
        let ix1 = (sx1.ceil() as i64).max(ix0 + 1);
        let iy1 = (sy1.ceil() as i64).max(iy0 + 1);

        let mut rgb = [0.0f64; 3];
        let mut count = 0u64;
        for iy in iy0..iy1 {
            for ix in ix0..ix1 {
                if let Some(p) = self.valid_pixel(ix, iy) {
                    for (acc, v) in rgb.iter_mut().zip(p.0.iter()) {
                        *acc += *v as f64;
                    }
                    count += 1;
                }
            }
        }
        if count == 0 {
            return Rgba([0, 0, 0, 0]);
        }
        Rgba([
            (rgb[0] / count as f64).round() as u8,
            (rgb[1] / count as f64).round() as u8,
            (rgb[2] / count as f64).round() as u8,
            255,
        ])
    }
}

impl RasterSource for MemoryRaster {
    fn extent(&self) -> GeoBox {
        self.extent
    }

    fn native_resolution(&self) -> f64 {
        self.resolution
    }

    fn crs(&self) -> &str {
        &self.crs
    }

    fn read_window(
        &self,
        geo_box: &GeoBox,
        width: u32,
        height: u32,
        resampling: Resampling,
    ) -> Result<Window, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::InvalidWindow { width, height });
        }
        if !geo_box.intersects(&self.extent) {
            return Ok(Window::blank(width, height));
        }

        let px_w = geo_box.width() / width as f64;
        let px_h = geo_box.height() / height as f64;

        let mut out = RgbaImage::new(width, height);
        for r in 0..height {
            for c in 0..width {
                let gx = geo_box.min_x + (c as f64 + 0.5) * px_w;
                let gy = geo_box.max_y - (r as f64 + 0.5) * px_h;
                let (sx, sy) = self.source_coords(gx, gy);

                let pixel = match resampling {
                    Resampling::Nearest => self.sample_nearest(sx, sy),
                    Resampling::Bilinear => self.sample_bilinear(sx, sy),
                    Resampling::Cubic => self.sample_cubic(sx, sy),
                    Resampling::Average => {
                        let (sx0, sy0) =
                            self.source_coords(geo_box.min_x + c as f64 * px_w, gy + px_h / 2.0);
                        let (sx1, sy1) = self
                            .source_coords(geo_box.min_x + (c as f64 + 1.0) * px_w, gy - px_h / 2.0);
                        self.sample_average(sx0, sy0, sx1, sy1)
                    }
                };
                out.put_pixel(c, r, pixel);
            }
        }
        Ok(Window::new(out))
    }
}
