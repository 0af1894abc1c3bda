//! Renderer: resampled samples to 8-bit output channels.
//!
//! Bands are picked (1-based indexes), each channel is rescaled to 0–255 or
//! clipped there, an optional colormap expands a single band to RGBA, and
//! masked pixels become transparent or take the fill value.

use image::ExtendedColorType;

use crate::error::TileError;
use crate::format::{ColorInterp, RasterMetadata};

use super::buffer::{Mask, PixelBuffer};
use super::colormap::Colormap;
use super::request::{OutputFormat, RenderOptions, Transparency};

/// Channel arrangement of a rendered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
}

impl ChannelLayout {
    pub fn channels(&self) -> usize {
        match self {
            ChannelLayout::Gray => 1,
            ChannelLayout::GrayAlpha => 2,
            ChannelLayout::Rgb => 3,
            ChannelLayout::Rgba => 4,
        }
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self, ChannelLayout::GrayAlpha | ChannelLayout::Rgba)
    }

    pub fn color_type(&self) -> ExtendedColorType {
        match self {
            ChannelLayout::Gray => ExtendedColorType::L8,
            ChannelLayout::GrayAlpha => ExtendedColorType::La8,
            ChannelLayout::Rgb => ExtendedColorType::Rgb8,
            ChannelLayout::Rgba => ExtendedColorType::Rgba8,
        }
    }
}

/// 8-bit interleaved pixels ready for an image encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub width: u32,
    pub height: u32,
    pub layout: ChannelLayout,
    pub data: Vec<u8>,
}

/// Input of an encoder.
#[derive(Debug, Clone)]
pub enum RenderedTile {
    Image(RenderedImage),

    /// Selected bands in their source type, with the validity mask
    Raw { pixels: PixelBuffer, mask: Mask },
}

/// 0-based bands to render.
///
/// Without explicit indexes: the first three non-alpha bands when there
/// are at least three, otherwise the first non-alpha band.
pub fn select_bands(options: &RenderOptions, metadata: &RasterMetadata) -> Result<Vec<usize>, TileError> {
    if let Some(bands) = &options.bands {
        if let Some(&bad) = bands.iter().find(|&&b| b == 0 || b > metadata.bands) {
            return Err(TileError::render_options(format!(
                "band {} out of range, raster has {} band(s)",
                bad, metadata.bands
            )));
        }
        return Ok(bands.iter().map(|b| b - 1).collect());
    }

    let color: Vec<usize> = (0..metadata.bands)
        .filter(|&b| metadata.color_interp.get(b) != Some(&ColorInterp::Alpha))
        .collect();
    let selected = match color.len() {
        0 => vec![0],
        1 | 2 => vec![color[0]],
        _ => color[..3].to_vec(),
    };
    Ok(selected)
}

/// Bands included in raw output: explicit indexes or every band.
pub fn select_raw_bands(options: &RenderOptions, metadata: &RasterMetadata) -> Result<Vec<usize>, TileError> {
    match options.bands {
        Some(_) => select_bands(options, metadata),
        None => Ok((0..metadata.bands).collect()),
    }
}

/// The colormap to apply: the requested one, else the raster's palette
/// when bands were not chosen explicitly.
pub fn effective_colormap(options: &RenderOptions, metadata: &RasterMetadata) -> Option<Colormap> {
    if let Some(cmap) = &options.colormap {
        return Some(cmap.clone());
    }
    match (&options.bands, &metadata.colormap) {
        (None, Some(palette)) => Some(Colormap::from_palette(palette)),
        _ => None,
    }
}

/// Check band indexes and colormap against the raster, before any pixel I/O.
pub fn validate_for_raster(options: &RenderOptions, metadata: &RasterMetadata) -> Result<(), TileError> {
    let bands = select_bands(options, metadata)?;
    if options.colormap.is_some() && bands.len() != 1 {
        return Err(TileError::render_options(format!(
            "a colormap applies to one band, {} selected",
            bands.len()
        )));
    }
    Ok(())
}

/// `Auto` becomes JPEG when every pixel is valid and nothing is
/// transparent, PNG otherwise.
pub fn resolve_format(format: OutputFormat, mask: &Mask, colormap: Option<&Colormap>) -> OutputFormat {
    match format {
        OutputFormat::Auto => {
            let transparent = colormap.is_some_and(|c| c.has_transparency());
            if mask.all_valid() && !transparent {
                OutputFormat::Jpeg
            } else {
                OutputFormat::Png
            }
        }
        other => other,
    }
}

/// Map a sample to 0–255.
#[inline]
fn to_byte(value: f64, rescale: Option<(f64, f64)>) -> u8 {
    let scaled = match rescale {
        Some((min, max)) => (value.clamp(min, max) - min) / (max - min) * 255.0,
        None => value,
    };
    if scaled.is_nan() {
        return 0;
    }
    scaled.round().clamp(0.0, 255.0) as u8
}

/// Render selected bands to 8-bit channels for `format` (not `Auto`).
pub fn render_image(
    pixels: &PixelBuffer,
    mask: &Mask,
    bands: &[usize],
    options: &RenderOptions,
    colormap: Option<&Colormap>,
    format: OutputFormat,
) -> Result<RenderedImage, TileError> {
    if let Some(&bad) = bands.iter().find(|&&b| b >= pixels.bands) {
        return Err(TileError::render_options(format!("band {} out of range", bad + 1)));
    }
    let colormap = match (colormap, bands.len()) {
        (Some(cmap), 1) => Some(cmap),
        (Some(_), n) => {
            return Err(TileError::render_options(format!(
                "a colormap applies to one band, {} selected",
                n
            )))
        }
        (None, _) => None,
    };

    let alpha = match options.transparency {
        Transparency::Always => {
            if !format.supports_alpha() {
                return Err(TileError::UnsupportedOutputMode {
                    reason: format!("{} output has no alpha channel", format),
                });
            }
            true
        }
        Transparency::Never => false,
        Transparency::Auto => {
            format.supports_alpha()
                && (!mask.all_valid() || colormap.is_some_and(|c| c.has_transparency()))
        }
    };

    let layout = match (colormap.is_some() || bands.len() == 3, alpha) {
        (true, true) => ChannelLayout::Rgba,
        (true, false) => ChannelLayout::Rgb,
        (false, true) => ChannelLayout::GrayAlpha,
        (false, false) => ChannelLayout::Gray,
    };

    let pixel_count = pixels.pixels_per_band();
    let channels = layout.channels();
    let mut data = vec![0u8; pixel_count * channels];
    let fill = options.fill_value;
    let rescale: Vec<Option<(f64, f64)>> = (0..bands.len()).map(|i| options.rescale_for(i)).collect();
    let samples: Vec<&[f64]> = bands.iter().map(|&b| pixels.band(b)).collect();

    for (i, (out, &valid)) in data.chunks_exact_mut(channels).zip(mask.as_slice()).enumerate() {
        if !valid {
            if !alpha {
                out.fill(fill);
            }
            // with alpha, masked pixels stay fully transparent black
            continue;
        }

        match colormap {
            Some(cmap) => {
                let rgba = cmap.lookup(to_byte(samples[0][i], rescale[0]));
                out[..3].copy_from_slice(&rgba[..3]);
                if alpha {
                    out[3] = rgba[3];
                }
            }
            None => {
                for (c, band) in samples.iter().enumerate() {
                    out[c] = to_byte(band[i], rescale[c]);
                }
                if alpha {
                    out[channels - 1] = 255;
                }
            }
        }
    }

    Ok(RenderedImage {
        width: pixels.width,
        height: pixels.height,
        layout,
        data,
    })
}

/// Copy the selected bands into a new buffer for raw output.
pub fn raw_bands(pixels: &PixelBuffer, bands: &[usize]) -> PixelBuffer {
    let mut out = PixelBuffer::new(bands.len(), pixels.width, pixels.height, pixels.dtype);
    for (i, &b) in bands.iter().enumerate() {
        out.band_mut(i).copy_from_slice(pixels.band(b));
    }
    out
}
