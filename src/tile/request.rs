//! Tile request and render option model.
//!
//! A [`TileRequest`] fully determines the produced tile: two equal requests
//! against the same raster give byte-identical output. Every option is
//! validated by [`TileRequest::validate`] before any I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TileError;
use crate::geo::{TileMatrixSet, BASE_TILE_SIZE, MAX_ZOOM};

use super::colormap::Colormap;

/// Largest `@Nx` tile scale.
pub const MAX_TILE_SCALE: u32 = 4;

/// Default JPEG quality when neither the request nor the pipeline sets one.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

// =============================================================================
// Enumerations
// =============================================================================

/// Encoded output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
    /// NPY data array followed by an NPY mask array
    Raw,
    /// JPEG when every pixel is valid, PNG otherwise
    #[default]
    Auto,
}

impl OutputFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png | OutputFormat::Auto => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Raw => "application/x-binary",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png | OutputFormat::Auto => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
            OutputFormat::Raw => "npy",
        }
    }

    /// Whether masked pixels can be written as transparent.
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, OutputFormat::Jpeg)
    }
}

impl FromStr for OutputFormat {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            "webp" => Ok(OutputFormat::Webp),
            "npy" | "raw" => Ok(OutputFormat::Raw),
            "auto" => Ok(OutputFormat::Auto),
            other => Err(TileError::invalid_request(format!(
                "unknown output format '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Auto => "auto",
            other => other.extension(),
        })
    }
}

/// Resampling kernel. Never substituted for another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    #[default]
    Nearest,
    Bilinear,
    Cubic,
    Average,
}

impl Resampling {
    /// Source pixels needed on each side of a sample point.
    pub fn radius(&self) -> u32 {
        match self {
            Resampling::Nearest => 0,
            Resampling::Bilinear | Resampling::Average => 1,
            Resampling::Cubic => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Resampling::Nearest => "nearest",
            Resampling::Bilinear => "bilinear",
            Resampling::Cubic => "cubic",
            Resampling::Average => "average",
        }
    }
}

impl FromStr for Resampling {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Resampling::Nearest),
            "bilinear" => Ok(Resampling::Bilinear),
            "cubic" => Ok(Resampling::Cubic),
            "average" => Ok(Resampling::Average),
            other => Err(TileError::invalid_request(format!(
                "unknown resampling '{}'",
                other
            ))),
        }
    }
}

/// Whether masked pixels are written through an alpha channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transparency {
    /// Alpha only when the tile has masked pixels
    #[default]
    Auto,
    Always,
    /// Masked pixels get the fill value
    Never,
}

// =============================================================================
// RenderOptions
// =============================================================================

/// How decoded samples become output pixels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOptions {
    /// 1-based band indexes; `None` picks the first RGB or gray bands
    pub bands: Option<Vec<usize>>,

    /// `(min, max)` per band, or one range for all bands
    pub rescale: Vec<(f64, f64)>,

    pub colormap: Option<Colormap>,

    /// Overrides the raster's own nodata value
    pub nodata: Option<f64>,

    /// Value written to masked pixels when there is no alpha channel
    pub fill_value: u8,

    pub transparency: Transparency,

    /// `None` uses the pipeline default
    pub jpeg_quality: Option<u8>,
}

impl RenderOptions {
    /// Check everything that does not depend on the raster.
    pub fn validate(&self) -> Result<(), TileError> {
        if let Some(bands) = &self.bands {
            if bands.is_empty() {
                return Err(TileError::render_options("empty band list"));
            }
            if bands.contains(&0) {
                return Err(TileError::render_options("band indexes start at 1"));
            }
            if !matches!(bands.len(), 1 | 3) {
                return Err(TileError::render_options(format!(
                    "{} bands selected, expected 1 or 3",
                    bands.len()
                )));
            }
            if self.colormap.is_some() && bands.len() != 1 {
                return Err(TileError::render_options(
                    "a colormap applies to exactly one band",
                ));
            }
        }

        for &(min, max) in &self.rescale {
            if !min.is_finite() || !max.is_finite() || min >= max {
                return Err(TileError::render_options(format!(
                    "rescale range ({}, {}) needs finite min < max",
                    min, max
                )));
            }
        }

        if let Some(q) = self.jpeg_quality {
            if !(1..=100).contains(&q) {
                return Err(TileError::render_options(format!(
                    "JPEG quality {} outside 1..=100",
                    q
                )));
            }
        }
        Ok(())
    }

    /// Parse a `bidx`-style list such as `"3,2,1"`.
    pub fn parse_bands(text: &str) -> Result<Vec<usize>, TileError> {
        text.split(',')
            .map(|s| {
                s.trim()
                    .parse::<usize>()
                    .map_err(|_| TileError::render_options(format!("invalid band index '{}'", s)))
            })
            .collect()
    }

    /// Parse rescale ranges: `"0,255"` or `"0,255,10,200,0,1000"`.
    pub fn parse_rescale(text: &str) -> Result<Vec<(f64, f64)>, TileError> {
        let values: Vec<f64> = text
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| TileError::render_options(format!("invalid rescale value '{}'", s)))
            })
            .collect::<Result<_, _>>()?;
        if values.is_empty() || values.len() % 2 != 0 {
            return Err(TileError::render_options(
                "rescale needs min,max pairs",
            ));
        }
        Ok(values.chunks_exact(2).map(|p| (p[0], p[1])).collect())
    }

    /// Rescale range for output band `i`, if any.
    pub fn rescale_for(&self, i: usize) -> Option<(f64, f64)> {
        match self.rescale.as_slice() {
            [] => None,
            [single] => Some(*single),
            ranges => ranges.get(i).or(ranges.first()).copied(),
        }
    }
}

// =============================================================================
// TileRequest
// =============================================================================

/// One web map tile to produce.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub tms: TileMatrixSet,
    pub z: u8,
    pub x: u32,
    pub y: u32,

    /// Output is `256 * scale` pixels square
    pub scale: u32,

    pub format: OutputFormat,
    pub resampling: Resampling,
    pub render: RenderOptions,

    /// Return a fully transparent tile instead of `OutOfBounds`
    pub fill_out_of_bounds: bool,
}

impl TileRequest {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self {
            tms: TileMatrixSet::default(),
            z,
            x,
            y,
            scale: 1,
            format: OutputFormat::Auto,
            resampling: Resampling::Nearest,
            render: RenderOptions::default(),
            fill_out_of_bounds: false,
        }
    }

    pub fn with_tms(mut self, tms: TileMatrixSet) -> Self {
        self.tms = tms;
        self
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = resampling;
        self
    }

    pub fn with_render(mut self, render: RenderOptions) -> Self {
        self.render = render;
        self
    }

    pub fn with_fill_out_of_bounds(mut self, fill: bool) -> Self {
        self.fill_out_of_bounds = fill;
        self
    }

    /// Output edge length in pixels.
    pub fn tile_size(&self) -> u32 {
        BASE_TILE_SIZE * self.scale
    }

    /// Validate coordinates and options; performs no I/O.
    pub fn validate(&self) -> Result<(), TileError> {
        if self.z > MAX_ZOOM {
            return Err(TileError::invalid_request(format!(
                "zoom {} exceeds {}",
                self.z, MAX_ZOOM
            )));
        }
        if !self.tms.contains_tile(self.z, self.x, self.y) {
            let (cols, rows) = self.tms.matrix_size(self.z);
            return Err(TileError::invalid_request(format!(
                "tile {}/{}/{} outside the {}x{} {} matrix",
                self.z, self.x, self.y, cols, rows, self.tms
            )));
        }
        if !(1..=MAX_TILE_SCALE).contains(&self.scale) {
            return Err(TileError::invalid_request(format!(
                "tile scale {} outside 1..={}",
                self.scale, MAX_TILE_SCALE
            )));
        }

        self.render.validate()?;

        if self.render.transparency == Transparency::Always && !self.format.supports_alpha() {
            return Err(TileError::UnsupportedOutputMode {
                reason: format!("{} output has no alpha channel", self.format),
            });
        }
        Ok(())
    }
}
