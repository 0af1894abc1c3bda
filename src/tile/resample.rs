//! Resampler/Reprojector: warp a source window onto the destination grid.
//!
//! Every destination pixel centre is mapped backwards: destination pixel →
//! destination CRS → source CRS → source pixel, and the kernel samples the
//! source there. Output dimensions therefore always equal the destination
//! grid and no gaps can appear.
//!
//! A destination pixel is valid only if the source pixel containing its
//! sample point is valid. Interpolating kernels weigh only valid neighbours
//! and renormalize.

use crate::error::TileError;
use crate::geo::{Affine, CrsTransform};

use super::buffer::{Mask, PixelBuffer};
use super::locator::DestinationGrid;
use super::request::Resampling;

/// Keys cubic convolution parameter.
const CUBIC_A: f64 = -0.5;

/// Weight sums below this fall back to the containing pixel.
const MIN_WEIGHT: f64 = 1e-12;

/// A decoded source window with its validity and pixel grid.
#[derive(Debug, Clone, Copy)]
pub struct SourceWindow<'a> {
    pub pixels: &'a PixelBuffer,
    pub mask: &'a Mask,

    /// Pixel grid of the window in the source CRS
    pub transform: Affine,
}

/// Resample `source` onto `dest`.
///
/// `to_source` maps destination CRS coordinates into the source CRS.
pub fn resample(
    source: SourceWindow<'_>,
    to_source: &CrsTransform,
    dest: &DestinationGrid,
    kernel: Resampling,
) -> Result<(PixelBuffer, Mask), TileError> {
    let bands = source.pixels.bands;
    let mut out = PixelBuffer::new(bands, dest.width, dest.height, source.pixels.dtype);
    let mut mask = Mask::new(dest.width, dest.height, false);

    if source.pixels.width == 0 || source.pixels.height == 0 {
        return Ok((out, mask));
    }

    let inverse = source.transform.inverse().ok_or_else(|| TileError::CorruptMetadata {
        reason: "source window has a degenerate geotransform".to_string(),
    })?;
    let sampler = Sampler {
        source,
        inverse,
        to_source,
        dest,
    };

    let mut values = vec![0.0; bands];
    for row in 0..dest.height {
        for col in 0..dest.width {
            let Some((u, v)) = sampler.source_point(col as f64 + 0.5, row as f64 + 0.5) else {
                continue;
            };
            let valid = match kernel {
                Resampling::Nearest => sampler.nearest(u, v, &mut values),
                Resampling::Bilinear => sampler.interpolate(u, v, 2, bilinear_weight, &mut values),
                Resampling::Cubic => sampler.interpolate(u, v, 4, cubic_weight, &mut values),
                Resampling::Average => sampler.average(col, row, u, v, &mut values),
            };
            if valid {
                mask.set(col, row, true);
                for (band, &value) in values.iter().enumerate() {
                    out.set(band, col, row, out.dtype.saturate(value));
                }
            }
        }
    }
    Ok((out, mask))
}

fn bilinear_weight(t: f64) -> f64 {
    (1.0 - t.abs()).max(0.0)
}

/// Keys cubic convolution kernel.
fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    let a = CUBIC_A;
    if t <= 1.0 {
        ((a + 2.0) * t - (a + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((a * t - 5.0 * a) * t + 8.0 * a) * t - 4.0 * a
    } else {
        0.0
    }
}

struct Sampler<'a> {
    source: SourceWindow<'a>,
    inverse: Affine,
    to_source: &'a CrsTransform,
    dest: &'a DestinationGrid,
}

impl Sampler<'_> {
    /// Fractional source pixel coordinates of a destination pixel position.
    fn source_point(&self, col: f64, row: f64) -> Option<(f64, f64)> {
        let (x, y) = self.dest.transform.apply(col, row);
        let (sx, sy) = self.to_source.apply(x, y)?;
        Some(self.inverse.apply(sx, sy))
    }

    /// Pixel at integer (col, row) if inside the window and valid.
    #[inline]
    fn valid_pixel(&self, col: i64, row: i64) -> Option<(u32, u32)> {
        let (w, h) = (self.source.pixels.width as i64, self.source.pixels.height as i64);
        if col < 0 || row < 0 || col >= w || row >= h {
            return None;
        }
        let (c, r) = (col as u32, row as u32);
        self.source.mask.get(c, r).then_some((c, r))
    }

    fn containing(&self, u: f64, v: f64) -> Option<(u32, u32)> {
        if !u.is_finite() || !v.is_finite() {
            return None;
        }
        self.valid_pixel(u.floor() as i64, v.floor() as i64)
    }

    fn nearest(&self, u: f64, v: f64, values: &mut [f64]) -> bool {
        let Some((c, r)) = self.containing(u, v) else {
            return false;
        };
        for (band, value) in values.iter_mut().enumerate() {
            *value = self.source.pixels.get(band, c, r);
        }
        true
    }

    /// Separable interpolation over `taps × taps` neighbours.
    fn interpolate(
        &self,
        u: f64,
        v: f64,
        taps: i64,
        weight: fn(f64) -> f64,
        values: &mut [f64],
    ) -> bool {
        if self.containing(u, v).is_none() {
            return false;
        }
        // sample positions relative to pixel centres
        let (fx, fy) = (u - 0.5, v - 0.5);
        let (x0, y0) = (fx.floor() as i64, fy.floor() as i64);
        let first = -(taps / 2 - 1);

        values.fill(0.0);
        let mut total = 0.0;
        for j in first..first + taps {
            let row = y0 + j;
            let wy = weight(fy - row as f64);
            if wy == 0.0 {
                continue;
            }
            for i in first..first + taps {
                let col = x0 + i;
                let w = wy * weight(fx - col as f64);
                if w == 0.0 {
                    continue;
                }
                let Some((c, r)) = self.valid_pixel(col, row) else {
                    continue;
                };
                total += w;
                for (band, value) in values.iter_mut().enumerate() {
                    *value += w * self.source.pixels.get(band, c, r);
                }
            }
        }

        if total.abs() < MIN_WEIGHT {
            return self.nearest(u, v, values);
        }
        for value in values.iter_mut() {
            *value /= total;
        }
        true
    }

    /// Mean of the valid source pixels whose centres fall inside the
    /// destination pixel's footprint.
    fn average(&self, col: u32, row: u32, u: f64, v: f64, values: &mut [f64]) -> bool {
        if self.containing(u, v).is_none() {
            return false;
        }
        let corners = [
            self.source_point(col as f64, row as f64),
            self.source_point(col as f64 + 1.0, row as f64),
            self.source_point(col as f64, row as f64 + 1.0),
            self.source_point(col as f64 + 1.0, row as f64 + 1.0),
        ];
        let Some(corners) = corners.into_iter().collect::<Option<Vec<_>>>() else {
            return self.nearest(u, v, values);
        };
        let (mut u0, mut u1, mut v0, mut v1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for (cu, cv) in corners {
            u0 = u0.min(cu);
            u1 = u1.max(cu);
            v0 = v0.min(cv);
            v1 = v1.max(cv);
        }

        // pixel k has its centre at k + 0.5
        let first_col = (u0 - 0.5).ceil() as i64;
        let last_col = (u1 - 0.5).floor() as i64;
        let first_row = (v0 - 0.5).ceil() as i64;
        let last_row = (v1 - 0.5).floor() as i64;

        values.fill(0.0);
        let mut count = 0usize;
        for r in first_row..=last_row {
            for c in first_col..=last_col {
                let Some((c, r)) = self.valid_pixel(c, r) else {
                    continue;
                };
                count += 1;
                for (band, value) in values.iter_mut().enumerate() {
                    *value += self.source.pixels.get(band, c, r);
                }
            }
        }

        if count == 0 {
            return self.nearest(u, v, values);
        }
        for value in values.iter_mut() {
            *value /= count as f64;
        }
        true
    }
}
