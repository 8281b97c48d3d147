//! Tile image type
//!
//! A tile is a fixed 256×256 RGBA buffer whose alpha channel is the
//! per-pixel validity mask (alpha 0 = no-data). Tiles are produced by the
//! pyramid builder or merge engine and owned by the store entry they are
//! written to.

use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgba, RgbaImage};
use thiserror::Error;

pub use crate::coord::TILE_SIZE;

/// Errors from tile encoding and decoding.
#[derive(Debug, Error)]
pub enum TileImageError {
    /// Tile payload could not be decoded as an image.
    #[error("Failed to decode tile image: {0}")]
    Decode(#[from] image::ImageError),

    /// Decoded image has the wrong dimensions.
    #[error("Tile must be {expected}x{expected} px, got {width}x{height}", expected = TILE_SIZE)]
    WrongSize { width: u32, height: u32 },
}

/// A fixed-size tile pixel buffer with a per-pixel validity mask.
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    pixels: RgbaImage,
}

impl TileImage {
    /// A fully no-data tile.
    pub fn blank() -> Self {
        Self {
            pixels: RgbaImage::new(TILE_SIZE, TILE_SIZE),
        }
    }

    /// Wrap an RGBA buffer as a tile.
    ///
    /// # Errors
    ///
    /// Returns [`TileImageError::WrongSize`] unless the buffer is exactly
    /// `TILE_SIZE` square.
    pub fn from_pixels(pixels: RgbaImage) -> Result<Self, TileImageError> {
        if pixels.width() != TILE_SIZE || pixels.height() != TILE_SIZE {
            return Err(TileImageError::WrongSize {
                width: pixels.width(),
                height: pixels.height(),
            });
        }
        Ok(Self { pixels })
    }

    /// Decode a PNG payload into a tile.
    pub fn from_png(data: &[u8]) -> Result<Self, TileImageError> {
        let decoded = image::load_from_memory(data)?.to_rgba8();
        Self::from_pixels(decoded)
    }

    /// Encode the tile as PNG bytes.
    pub fn to_png(&self) -> Result<Vec<u8>, TileImageError> {
        let mut out = Vec::new();
        PngEncoder::new(&mut out).write_image(
            self.pixels.as_raw(),
            TILE_SIZE,
            TILE_SIZE,
            image::ExtendedColorType::Rgba8,
        )?;
        Ok(out)
    }

    /// True if every pixel is no-data. Blank tiles are never stored.
    pub fn is_blank(&self) -> bool {
        self.pixels.pixels().all(|p| p.0[3] == 0)
    }

    /// True if the pixel at (x, y) carries valid data.
    pub fn is_valid_at(&self, x: u32, y: u32) -> bool {
        self.pixels.get_pixel(x, y).0[3] > 0
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut RgbaImage {
        &mut self.pixels
    }

    /// Downsample a child tile 2:1 into one quadrant of this tile.
    ///
    /// `(qx, qy)` select the quadrant in image space, `(0, 0)` top-left.
    /// Each target pixel is the box average of the 2×2 valid source pixels;
    /// a 2×2 block with no valid pixel stays no-data.
    pub fn downsample_child_into(&mut self, child: &TileImage, qx: u32, qy: u32) {
        debug_assert!(qx < 2 && qy < 2);
        let half = TILE_SIZE / 2;
        let off_x = qx * half;
        let off_y = qy * half;

        for ty in 0..half {
            for tx in 0..half {
                let mut rgb = [0u32; 3];
                let mut count = 0u32;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let p = child.pixels.get_pixel(tx * 2 + dx, ty * 2 + dy);
                        if p.0[3] > 0 {
                            rgb[0] += p.0[0] as u32;
                            rgb[1] += p.0[1] as u32;
                            rgb[2] += p.0[2] as u32;
                            count += 1;
                        }
                    }
                }
                let pixel = if count == 0 {
                    Rgba([0, 0, 0, 0])
                } else {
                    Rgba([
                        ((rgb[0] as f64 / count as f64).round()) as u8,
                        ((rgb[1] as f64 / count as f64).round()) as u8,
                        ((rgb[2] as f64 / count as f64).round()) as u8,
                        255,
                    ])
                };
                self.pixels.put_pixel(off_x + tx, off_y + ty, pixel);
            }
        }
    }

    /// Fill no-data pixels of this tile from another tile.
    ///
    /// Valid pixels already present are left untouched; this is the
    /// building block for ordered-precedence compositing.
    pub fn fill_invalid_from(&mut self, other: &TileImage) {
        for (dst, src) in self.pixels.pixels_mut().zip(other.pixels.pixels()) {
            if dst.0[3] == 0 && src.0[3] > 0 {
                *dst = *src;
            }
        }
    }

    /// Per-pixel arithmetic mean of all valid contributors.
    ///
    /// A pixel is valid in the result when at least one contributor is
    /// valid there; a position with no valid contributor stays no-data.
    pub fn average(tiles: &[&TileImage]) -> TileImage {
        let mut out = TileImage::blank();
        let total = (TILE_SIZE * TILE_SIZE) as usize;
        let mut sums = vec![[0u32; 3]; total];
        let mut counts = vec![0u32; total];

        for tile in tiles {
            for (i, p) in tile.pixels.pixels().enumerate() {
                if p.0[3] > 0 {
                    sums[i][0] += p.0[0] as u32;
                    sums[i][1] += p.0[1] as u32;
                    sums[i][2] += p.0[2] as u32;
                    counts[i] += 1;
                }
            }
        }

        for (i, p) in out.pixels.pixels_mut().enumerate() {
            if counts[i] > 0 {
                let n = counts[i] as f64;
                *p = Rgba([
                    (sums[i][0] as f64 / n).round() as u8,
                    (sums[i][1] as f64 / n).round() as u8,
                    (sums[i][2] as f64 / n).round() as u8,
                    255,
                ]);
            }
        }
        out
    }
}

impl Default for TileImage {
    fn default() -> Self {
        Self::blank()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(r: u8, g: u8, b: u8) -> TileImage {
        let mut tile = TileImage::blank();
        for p in tile.pixels_mut().pixels_mut() {
            *p = Rgba([r, g, b, 255]);
        }
        tile
    }

    #[test]
    fn test_blank_is_blank() {
        assert!(TileImage::blank().is_blank());
    }

    #[test]
    fn test_from_pixels_rejects_wrong_size() {
        let result = TileImage::from_pixels(RgbaImage::new(128, 256));
        assert!(matches!(result, Err(TileImageError::WrongSize { .. })));
    }

    #[test]
    fn test_png_round_trip_byte_identical_pixels() {
        let mut tile = uniform(12, 34, 56);
        tile.pixels_mut().put_pixel(7, 9, Rgba([0, 0, 0, 0]));
        let png = tile.to_png().unwrap();
        let decoded = TileImage::from_png(&png).unwrap();
        assert_eq!(decoded, tile);
    }

    #[test]
    fn test_downsample_uniform_children_exact() {
        // Four children of color A produce a parent of exactly color A.
        let child = uniform(90, 120, 30);
        let mut parent = TileImage::blank();
        for (qx, qy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            parent.downsample_child_into(&child, qx, qy);
        }
        assert!(!parent.is_blank());
        for p in parent.pixels().pixels() {
            assert_eq!(p.0, [90, 120, 30, 255]);
        }
    }

    #[test]
    fn test_downsample_mixed_block_is_box_average() {
        // Child with left half A=(100,0,0) and right half B=(0,0,200):
        // 2x2 blocks straddling nothing - each block is uniform, so the
        // downsampled halves stay exact.
        let mut child = TileImage::blank();
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                let p = if x < TILE_SIZE / 2 {
                    Rgba([100, 0, 0, 255])
                } else {
                    Rgba([0, 0, 200, 255])
                };
                child.pixels_mut().put_pixel(x, y, p);
            }
        }
        let mut parent = TileImage::blank();
        parent.downsample_child_into(&child, 0, 0);
        assert_eq!(parent.pixels().get_pixel(0, 0).0, [100, 0, 0, 255]);
        assert_eq!(
            parent.pixels().get_pixel(TILE_SIZE / 2 - 1, 0).0,
            [0, 0, 200, 255]
        );
    }

    #[test]
    fn test_downsample_skips_nodata_in_block() {
        let mut child = uniform(80, 80, 80);
        // Knock out three of the four pixels of the first 2x2 block.
        child.pixels_mut().put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        child.pixels_mut().put_pixel(1, 0, Rgba([0, 0, 0, 0]));
        child.pixels_mut().put_pixel(0, 1, Rgba([0, 0, 0, 0]));
        let mut parent = TileImage::blank();
        parent.downsample_child_into(&child, 0, 0);
        // Average over the single surviving pixel, not diluted by no-data.
        assert_eq!(parent.pixels().get_pixel(0, 0).0, [80, 80, 80, 255]);
    }

    #[test]
    fn test_downsample_fully_nodata_block_stays_nodata() {
        let child = TileImage::blank();
        let mut parent = TileImage::blank();
        parent.downsample_child_into(&child, 1, 1);
        assert!(parent.is_blank());
    }

    #[test]
    fn test_fill_invalid_from_preserves_existing() {
        let mut top = uniform(10, 10, 10);
        top.pixels_mut().put_pixel(3, 3, Rgba([0, 0, 0, 0]));
        let bottom = uniform(200, 200, 200);

        top.fill_invalid_from(&bottom);
        // The hole is filled from below, everything else keeps the top value.
        assert_eq!(top.pixels().get_pixel(3, 3).0, [200, 200, 200, 255]);
        assert_eq!(top.pixels().get_pixel(0, 0).0, [10, 10, 10, 255]);
    }

    #[test]
    fn test_average_of_two_tiles() {
        let a = uniform(100, 0, 50);
        let b = uniform(200, 100, 50);
        let avg = TileImage::average(&[&a, &b]);
        assert_eq!(avg.pixels().get_pixel(128, 128).0, [150, 50, 50, 255]);
    }

    #[test]
    fn test_average_ignores_invalid_contributors() {
        let a = uniform(100, 100, 100);
        let b = TileImage::blank();
        let avg = TileImage::average(&[&a, &b]);
        assert_eq!(avg.pixels().get_pixel(0, 0).0, [100, 100, 100, 255]);
    }

    #[test]
    fn test_average_all_invalid_is_blank() {
        let a = TileImage::blank();
        let b = TileImage::blank();
        assert!(TileImage::average(&[&a, &b]).is_blank());
    }
}
