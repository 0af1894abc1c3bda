//! Tile encoders: PNG, JPEG, WebP and raw NPY.
//!
//! Each output format is one [`Encoder`] implementation, selected by
//! [`encoder_for`]. Image encoders take a [`RenderedImage`]; the raw encoder
//! writes the selected bands in their source type as an NPY array followed
//! by the validity mask as a second NPY array (255 valid, 0 masked).

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::TileError;
use crate::format::DataType;

use super::buffer::{Mask, PixelBuffer};
use super::render::{ChannelLayout, RenderedImage, RenderedTile};
use super::request::OutputFormat;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Final tile bytes with their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTile {
    pub data: Bytes,
    pub format: OutputFormat,
    pub mime_type: &'static str,
}

impl EncodedTile {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One output format.
pub trait Encoder: Send + Sync {
    fn format(&self) -> OutputFormat;

    fn encode(&self, tile: &RenderedTile, quality: u8) -> Result<Bytes, TileError>;
}

struct Png;
struct Jpeg;
struct Webp;
struct Npy;

fn encode_error(format: OutputFormat, err: impl std::fmt::Display) -> TileError {
    TileError::UnsupportedOutputMode {
        reason: format!("{} encoding failed: {}", format, err),
    }
}

fn expect_image(format: OutputFormat, tile: &RenderedTile) -> Result<&RenderedImage, TileError> {
    match tile {
        RenderedTile::Image(image) => Ok(image),
        RenderedTile::Raw { .. } => Err(TileError::UnsupportedOutputMode {
            reason: format!("{} output needs rendered channels", format),
        }),
    }
}

impl Encoder for Png {
    fn format(&self) -> OutputFormat {
        OutputFormat::Png
    }

    fn encode(&self, tile: &RenderedTile, _quality: u8) -> Result<Bytes, TileError> {
        let image = expect_image(self.format(), tile)?;
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(&image.data, image.width, image.height, image.layout.color_type())
            .map_err(|e| encode_error(self.format(), e))?;
        Ok(Bytes::from(out))
    }
}

impl Encoder for Jpeg {
    fn format(&self) -> OutputFormat {
        OutputFormat::Jpeg
    }

    fn encode(&self, tile: &RenderedTile, quality: u8) -> Result<Bytes, TileError> {
        let image = expect_image(self.format(), tile)?;
        if image.layout.has_alpha() {
            return Err(TileError::UnsupportedOutputMode {
                reason: "JPEG output has no alpha channel".to_string(),
            });
        }
        let quality = quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY);
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .write_image(&image.data, image.width, image.height, image.layout.color_type())
            .map_err(|e| encode_error(self.format(), e))?;
        Ok(Bytes::from(out))
    }
}

impl Encoder for Webp {
    fn format(&self) -> OutputFormat {
        OutputFormat::Webp
    }

    /// Lossless; gray layouts are expanded to RGB(A).
    fn encode(&self, tile: &RenderedTile, _quality: u8) -> Result<Bytes, TileError> {
        let image = expect_image(self.format(), tile)?;
        let (data, color) = match image.layout {
            ChannelLayout::Gray => (
                image.data.iter().flat_map(|&v| [v, v, v]).collect(),
                ExtendedColorType::Rgb8,
            ),
            ChannelLayout::GrayAlpha => (
                image
                    .data
                    .chunks_exact(2)
                    .flat_map(|p| [p[0], p[0], p[0], p[1]])
                    .collect(),
                ExtendedColorType::Rgba8,
            ),
            layout => (image.data.clone(), layout.color_type()),
        };
        let mut out = Vec::new();
        WebPEncoder::new_lossless(&mut out)
            .write_image(&data, image.width, image.height, color)
            .map_err(|e| encode_error(self.format(), e))?;
        Ok(Bytes::from(out))
    }
}

impl Encoder for Npy {
    fn format(&self) -> OutputFormat {
        OutputFormat::Raw
    }

    fn encode(&self, tile: &RenderedTile, _quality: u8) -> Result<Bytes, TileError> {
        match tile {
            RenderedTile::Raw { pixels, mask } => Ok(encode_npy(pixels, mask)),
            RenderedTile::Image(_) => Err(TileError::UnsupportedOutputMode {
                reason: "raw output needs source samples".to_string(),
            }),
        }
    }
}

static ENCODERS: &[&dyn Encoder] = &[&Png, &Jpeg, &Webp, &Npy];

/// Look up the encoder for a concrete format.
pub fn encoder_for(format: OutputFormat) -> Result<&'static dyn Encoder, TileError> {
    ENCODERS
        .iter()
        .copied()
        .find(|e| e.format() == format)
        .ok_or_else(|| TileError::UnsupportedOutputMode {
            reason: format!("no encoder for {}", format),
        })
}

/// Encode a rendered tile; `format` must already be resolved from `Auto`.
pub fn encode_tile(tile: &RenderedTile, format: OutputFormat, quality: u8) -> Result<EncodedTile, TileError> {
    let data = encoder_for(format)?.encode(tile, quality)?;
    Ok(EncodedTile {
        data,
        format,
        mime_type: format.mime_type(),
    })
}

// =============================================================================
// NPY
// =============================================================================

fn npy_descr(dtype: DataType) -> &'static str {
    match dtype {
        DataType::U8 => "|u1",
        DataType::I8 => "|i1",
        DataType::U16 => "<u2",
        DataType::I16 => "<i2",
        DataType::U32 => "<u4",
        DataType::I32 => "<i4",
        DataType::F32 => "<f4",
        DataType::F64 => "<f8",
    }
}

/// NPY version 1.0 header, padded so the data starts on a 64-byte boundary.
fn npy_header(out: &mut Vec<u8>, descr: &str, shape: &[usize]) {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape = if dims.len() == 1 {
        format!("({},)", dims[0])
    } else {
        format!("({})", dims.join(", "))
    };
    let mut dict = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        descr, shape
    );

    // magic (6) + version (2) + length (2) + dict + newline
    let unpadded = 10 + dict.len() + 1;
    let pad = (64 - unpadded % 64) % 64;
    dict.push_str(&" ".repeat(pad));
    dict.push('\n');

    out.extend_from_slice(b"\x93NUMPY");
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
}

/// Data array `(bands, height, width)` followed by mask array `(height, width)`.
pub fn encode_npy(pixels: &PixelBuffer, mask: &Mask) -> Bytes {
    let (h, w) = (pixels.height as usize, pixels.width as usize);
    let mut out = Vec::with_capacity(256 + pixels.as_slice().len() * pixels.dtype.size_in_bytes() + h * w);

    npy_header(&mut out, npy_descr(pixels.dtype), &[pixels.bands, h, w]);
    for &v in pixels.as_slice() {
        match pixels.dtype {
            DataType::U8 => out.push(v as u8),
            DataType::I8 => out.push(v as i8 as u8),
            DataType::U16 => out.extend_from_slice(&(v as u16).to_le_bytes()),
            DataType::I16 => out.extend_from_slice(&(v as i16).to_le_bytes()),
            DataType::U32 => out.extend_from_slice(&(v as u32).to_le_bytes()),
            DataType::I32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
            DataType::F32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
            DataType::F64 => out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    npy_header(&mut out, "|u1", &[h, w]);
    out.extend(mask.as_slice().iter().map(|&valid| if valid { 255u8 } else { 0 }));
    Bytes::from(out)
}
