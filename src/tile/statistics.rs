//! Per-band raster statistics.
//!
//! Statistics are computed over the valid pixels of one whole overview
//! level, picked so that the read stays small: the coarsest level whose
//! larger side is still at least `max_size` pixels, or full resolution when
//! the raster is smaller than that. Percentiles interpolate linearly between
//! order statistics and histograms use equal-width bins with the last bin
//! closed, matching numpy.

use serde::Serialize;

use crate::error::TileError;
use crate::format::RasterMetadata;

use super::buffer::{Mask, PixelBuffer};

pub const DEFAULT_STATISTICS_MAX_SIZE: u32 = 1024;
pub const DEFAULT_HISTOGRAM_BINS: usize = 10;
pub const DEFAULT_PERCENTILES: [f64; 2] = [2.0, 98.0];

#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsOptions {
    /// Smallest larger-side size of the level read
    pub max_size: u32,
    pub percentiles: Vec<f64>,
    pub bins: usize,
    /// Histogram range; the band's min and max when `None`
    pub range: Option<(f64, f64)>,
    /// 1-based band indexes; all bands when `None`
    pub bands: Option<Vec<usize>>,
    /// Overrides the raster's nodata value
    pub nodata: Option<f64>,
}

impl Default for StatisticsOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_STATISTICS_MAX_SIZE,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            bins: DEFAULT_HISTOGRAM_BINS,
            range: None,
            bands: None,
            nodata: None,
        }
    }
}

impl StatisticsOptions {
    pub fn validate(&self) -> Result<(), TileError> {
        if self.max_size == 0 {
            return Err(TileError::invalid_request("max_size must be positive"));
        }
        if self.bins == 0 {
            return Err(TileError::invalid_request("histogram needs at least one bin"));
        }
        if let Some(p) = self
            .percentiles
            .iter()
            .find(|p| !(0.0..=100.0).contains(*p))
        {
            return Err(TileError::invalid_request(format!(
                "percentile {} is outside 0..=100",
                p
            )));
        }
        if let Some((min, max)) = self.range {
            if !min.is_finite() || !max.is_finite() || min >= max {
                return Err(TileError::invalid_request(format!(
                    "invalid histogram range {},{}",
                    min, max
                )));
            }
        }
        if let Some(bands) = &self.bands {
            if bands.is_empty() || bands.contains(&0) {
                return Err(TileError::render_options("band indexes are 1-based"));
            }
        }
        Ok(())
    }

    /// 0-based bands to summarize.
    pub fn select_bands(&self, metadata: &RasterMetadata) -> Result<Vec<usize>, TileError> {
        match &self.bands {
            Some(bands) => bands
                .iter()
                .map(|&b| {
                    if b == 0 || b > metadata.bands {
                        Err(TileError::render_options(format!(
                            "band {} does not exist, raster has {}",
                            b, metadata.bands
                        )))
                    } else {
                        Ok(b - 1)
                    }
                })
                .collect(),
            None => Ok((0..metadata.bands).collect()),
        }
    }
}

/// Parse `"min,max"`.
pub fn parse_histogram_range(text: &str) -> Result<(f64, f64), TileError> {
    let values: Vec<f64> = text
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| TileError::invalid_request(format!("invalid histogram range '{}'", text)))?;
    match values[..] {
        [min, max] if min < max => Ok((min, max)),
        _ => Err(TileError::invalid_request(format!(
            "histogram range must be 'min,max', got '{}'",
            text
        ))),
    }
}

/// Level to compute statistics from.
pub fn statistics_level(metadata: &RasterMetadata, max_size: u32) -> usize {
    metadata
        .levels
        .iter()
        .rposition(|l| l.width.max(l.height) >= max_size)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Percentile {
    pub percentile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub counts: Vec<u64>,
    /// `counts.len() + 1` bin edges
    pub edges: Vec<f64>,
}

/// Summary of one band. Values are NaN when the band has no valid pixel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandStatistics {
    /// 1-based band index
    pub band: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub valid_pixels: u64,
    pub masked_pixels: u64,
    pub valid_percent: f64,
    pub percentiles: Vec<Percentile>,
    pub histogram: Histogram,
}

/// Summarize the given bands of a buffer.
pub fn compute_statistics(
    pixels: &PixelBuffer,
    mask: &Mask,
    bands: &[usize],
    options: &StatisticsOptions,
) -> Vec<BandStatistics> {
    bands
        .iter()
        .map(|&band| {
            let mut values: Vec<f64> = pixels
                .band(band)
                .iter()
                .zip(mask.as_slice())
                .filter(|(v, &valid)| valid && !v.is_nan())
                .map(|(&v, _)| v)
                .collect();
            values.sort_by(f64::total_cmp);
            summarize(band + 1, &values, pixels.pixels_per_band(), options)
        })
        .collect()
}

fn summarize(band: usize, sorted: &[f64], total: usize, options: &StatisticsOptions) -> BandStatistics {
    let n = sorted.len();
    let valid_percent = if total == 0 {
        0.0
    } else {
        (n as f64 / total as f64 * 10000.0).round() / 100.0
    };

    let (min, max, mean, std) = if n == 0 {
        (f64::NAN, f64::NAN, f64::NAN, f64::NAN)
    } else {
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        (sorted[0], sorted[n - 1], mean, var.sqrt())
    };

    let range = options.range.unwrap_or((min, max));
    BandStatistics {
        band,
        min,
        max,
        mean,
        std,
        median: percentile(sorted, 50.0),
        valid_pixels: n as u64,
        masked_pixels: (total - n) as u64,
        valid_percent,
        percentiles: options
            .percentiles
            .iter()
            .map(|&p| Percentile {
                percentile: p,
                value: percentile(sorted, p),
            })
            .collect(),
        histogram: histogram(sorted, options.bins, range),
    }
}

/// Linear-interpolated percentile of sorted values.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = p / 100.0 * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

/// Equal-width histogram over `range`; values outside it are not counted.
pub fn histogram(values: &[f64], bins: usize, range: (f64, f64)) -> Histogram {
    let (mut lo, mut hi) = range;
    if !lo.is_finite() || !hi.is_finite() {
        lo = 0.0;
        hi = 1.0;
    }
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;
    let edges: Vec<f64> = (0..=bins)
        .map(|i| if i == bins { hi } else { lo + width * i as f64 })
        .collect();

    let mut counts = vec![0u64; bins];
    for &v in values {
        if v < lo || v > hi {
            continue;
        }
        let mut idx = (((v - lo) / width) as usize).min(bins - 1);
        // Keep the computed index consistent with the edges themselves.
        if v < edges[idx] {
            idx -= 1;
        } else if idx + 1 < bins && v >= edges[idx + 1] {
            idx += 1;
        }
        counts[idx] += 1;
    }
    Histogram { counts, edges }
}
