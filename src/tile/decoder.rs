//! Pixel Decoder: compressed internal tiles to typed pixel buffers.
//!
//! Each TIFF compression scheme is one [`Decoder`] implementation, looked up
//! in a table keyed by compression code. After decompression the
//! differencing predictor is reversed and the interleaved samples are
//! converted into a band-major [`PixelBuffer`].
//!
//! Decoding is stateless; independent tiles may be decoded in parallel.

use std::io::Read;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::TileError;
use crate::format::jpeg::prepare_tile_jpeg;
use crate::format::tiff::ByteOrder;
use crate::format::{DataType, OverviewLevel, RasterMetadata};

use super::buffer::PixelBuffer;

const PREDICTOR_NONE: u16 = 1;
const PREDICTOR_HORIZONTAL: u16 = 2;
const PREDICTOR_FLOATING_POINT: u16 = 3;

/// What a decoder needs to know about the tiles of one level.
#[derive(Debug, Clone)]
pub struct TileLayout {
    pub width: u32,
    pub height: u32,
    pub bands: usize,
    pub dtype: DataType,
    pub byte_order: ByteOrder,
    pub compression: u16,
    pub predictor: u16,
    pub jpeg_tables: Option<Bytes>,
}

impl TileLayout {
    pub fn for_level(metadata: &RasterMetadata, level: &OverviewLevel) -> Self {
        Self {
            width: level.tile_width,
            height: level.tile_height,
            bands: metadata.bands,
            dtype: metadata.dtype,
            byte_order: metadata.byte_order,
            compression: level.compression,
            predictor: level.predictor,
            jpeg_tables: level.jpeg_tables.clone(),
        }
    }

    /// Size of a fully decompressed tile.
    pub fn expected_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.bands * self.dtype.size_in_bytes()
    }
}

// =============================================================================
// Decoder trait and codec table
// =============================================================================

/// One compression scheme.
pub trait Decoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decompress one tile into pixel-interleaved sample bytes.
    fn decompress(&self, data: &[u8], layout: &TileLayout) -> Result<Vec<u8>, TileError>;

    /// Whether the output still carries the TIFF predictor.
    fn uses_predictor(&self) -> bool {
        true
    }
}

struct Uncompressed;
struct Lzw;
struct Deflate;
struct PackBits;
struct Jpeg;

impl Decoder for Uncompressed {
    fn name(&self) -> &'static str {
        "none"
    }

    fn decompress(&self, data: &[u8], _layout: &TileLayout) -> Result<Vec<u8>, TileError> {
        Ok(data.to_vec())
    }
}

impl Decoder for Lzw {
    fn name(&self) -> &'static str {
        "lzw"
    }

    fn decompress(&self, data: &[u8], _layout: &TileLayout) -> Result<Vec<u8>, TileError> {
        weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
            .decode(data)
            .map_err(|e| TileError::decode(format!("LZW: {}", e)))
    }
}

impl Decoder for Deflate {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn decompress(&self, data: &[u8], layout: &TileLayout) -> Result<Vec<u8>, TileError> {
        let mut out = Vec::with_capacity(layout.expected_bytes());
        if ZlibDecoder::new(data).read_to_end(&mut out).is_ok() {
            return Ok(out);
        }
        // some writers omit the zlib wrapper
        out.clear();
        DeflateDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| TileError::decode(format!("deflate: {}", e)))?;
        Ok(out)
    }
}

impl Decoder for PackBits {
    fn name(&self) -> &'static str {
        "packbits"
    }

    fn decompress(&self, data: &[u8], layout: &TileLayout) -> Result<Vec<u8>, TileError> {
        let mut out = Vec::with_capacity(layout.expected_bytes());
        let mut i = 0;
        while i < data.len() {
            let n = data[i] as i8;
            i += 1;
            match n {
                0..=127 => {
                    let len = n as usize + 1;
                    let literal = data
                        .get(i..i + len)
                        .ok_or_else(|| TileError::decode("PackBits: literal run past end"))?;
                    out.extend_from_slice(literal);
                    i += len;
                }
                -127..=-1 => {
                    let value = *data
                        .get(i)
                        .ok_or_else(|| TileError::decode("PackBits: repeat run past end"))?;
                    out.resize(out.len() + (1 - n as isize) as usize, value);
                    i += 1;
                }
                // -128 is a no-op
                _ => {}
            }
        }
        Ok(out)
    }
}

impl Decoder for Jpeg {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn decompress(&self, data: &[u8], layout: &TileLayout) -> Result<Vec<u8>, TileError> {
        if layout.dtype != DataType::U8 {
            return Err(TileError::decode(format!(
                "JPEG tiles must be uint8, raster is {}",
                layout.dtype
            )));
        }
        let stream = prepare_tile_jpeg(layout.jpeg_tables.as_deref(), data);
        let image = ImageReader::with_format(std::io::Cursor::new(stream), ImageFormat::Jpeg)
            .decode()
            .map_err(|e| TileError::decode(format!("JPEG: {}", e)))?;

        let (samples, channels) = match image {
            DynamicImage::ImageLuma8(img) => (img.into_raw(), 1),
            DynamicImage::ImageRgb8(img) => (img.into_raw(), 3),
            other => (other.to_rgb8().into_raw(), 3),
        };
        if channels != layout.bands {
            return Err(TileError::decode(format!(
                "JPEG tile has {} channels, raster has {} bands",
                channels, layout.bands
            )));
        }
        Ok(samples)
    }

    fn uses_predictor(&self) -> bool {
        false
    }
}

/// Decoders keyed by TIFF compression code.
static CODECS: &[(u16, &dyn Decoder)] = &[
    (1, &Uncompressed),
    (5, &Lzw),
    (7, &Jpeg),
    (8, &Deflate),
    (32773, &PackBits),
    (32946, &Deflate),
];

/// Look up the decoder for a compression code.
pub fn decoder_for(compression: u16) -> Result<&'static dyn Decoder, TileError> {
    CODECS
        .iter()
        .find(|(code, _)| *code == compression)
        .map(|(_, decoder)| *decoder)
        .ok_or(TileError::UnsupportedCodec { compression })
}

/// Whether tiles with this compression can be decoded.
pub fn is_supported(compression: u16) -> bool {
    decoder_for(compression).is_ok()
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode one internal tile into a full tile-sized buffer.
pub fn decode_tile(data: &[u8], layout: &TileLayout) -> Result<PixelBuffer, TileError> {
    let decoder = decoder_for(layout.compression)?;
    let mut raw = decoder.decompress(data, layout)?;

    let expected = layout.expected_bytes();
    if raw.len() < expected {
        return Err(TileError::decode(format!(
            "{} tile decoded to {} bytes, expected {}",
            decoder.name(),
            raw.len(),
            expected
        )));
    }
    raw.truncate(expected);

    let byte_order = if decoder.uses_predictor() {
        match layout.predictor {
            PREDICTOR_NONE => layout.byte_order,
            PREDICTOR_HORIZONTAL => {
                undo_horizontal_differencing(&mut raw, layout);
                layout.byte_order
            }
            PREDICTOR_FLOATING_POINT => {
                if !layout.dtype.is_float() {
                    return Err(TileError::decode(format!(
                        "floating-point predictor on {} samples",
                        layout.dtype
                    )));
                }
                raw = undo_floating_point_predictor(&raw, layout);
                ByteOrder::BigEndian
            }
            other => {
                return Err(TileError::decode(format!("unknown predictor {}", other)));
            }
        }
    } else {
        layout.byte_order
    };

    Ok(deinterleave(&raw, layout, byte_order))
}

/// Reverse predictor 2: each sample is stored as the difference to the
/// same band of the previous pixel in the row.
fn undo_horizontal_differencing(raw: &mut [u8], layout: &TileLayout) {
    let size = layout.dtype.size_in_bytes();
    let stride = layout.bands;
    let row_samples = layout.width as usize * layout.bands;
    let bo = layout.byte_order;

    macro_rules! accumulate {
        ($read:ident, $ty:ty) => {
            for row in raw.chunks_exact_mut(row_samples * size) {
                for i in stride..row_samples {
                    let prev = bo.$read(&row[(i - stride) * size..]) as $ty;
                    let cur = bo.$read(&row[i * size..]) as $ty;
                    let sum = cur.wrapping_add(prev);
                    let bytes = match bo {
                        ByteOrder::LittleEndian => sum.to_le_bytes(),
                        ByteOrder::BigEndian => sum.to_be_bytes(),
                    };
                    row[i * size..(i + 1) * size].copy_from_slice(&bytes);
                }
            }
        };
    }

    match size {
        1 => {
            for row in raw.chunks_exact_mut(row_samples) {
                for i in stride..row_samples {
                    row[i] = row[i].wrapping_add(row[i - stride]);
                }
            }
        }
        2 => accumulate!(read_u16, u16),
        4 => accumulate!(read_u32, u32),
        _ => accumulate!(read_u64, u64),
    }
}

/// Reverse predictor 3. Each row holds byte planes (plane `k` is byte `k`
/// of every sample in big-endian order) that were differenced bytewise with
/// a stride of one pixel. The result is big-endian sample bytes.
fn undo_floating_point_predictor(raw: &[u8], layout: &TileLayout) -> Vec<u8> {
    let size = layout.dtype.size_in_bytes();
    let stride = layout.bands;
    let row_samples = layout.width as usize * layout.bands;
    let row_bytes = row_samples * size;

    let mut out = vec![0u8; raw.len()];
    let mut planes = vec![0u8; row_bytes];
    for (src, dst) in raw
        .chunks_exact(row_bytes)
        .zip(out.chunks_exact_mut(row_bytes))
    {
        planes.copy_from_slice(src);
        for i in stride..row_bytes {
            planes[i] = planes[i].wrapping_add(planes[i - stride]);
        }
        for sample in 0..row_samples {
            for k in 0..size {
                dst[sample * size + k] = planes[k * row_samples + sample];
            }
        }
    }
    out
}

/// Convert pixel-interleaved sample bytes into a band-major buffer.
fn deinterleave(raw: &[u8], layout: &TileLayout, bo: ByteOrder) -> PixelBuffer {
    let size = layout.dtype.size_in_bytes();
    let bands = layout.bands;
    let mut buffer = PixelBuffer::new(bands, layout.width, layout.height, layout.dtype);
    let pixels = buffer.pixels_per_band();

    for band in 0..bands {
        let out = buffer.band_mut(band);
        for (pixel, value) in out.iter_mut().enumerate().take(pixels) {
            let at = &raw[(pixel * bands + band) * size..];
            *value = match layout.dtype {
                DataType::U8 => at[0] as f64,
                DataType::I8 => at[0] as i8 as f64,
                DataType::U16 => bo.read_u16(at) as f64,
                DataType::I16 => bo.read_i16(at) as f64,
                DataType::U32 => bo.read_u32(at) as f64,
                DataType::I32 => bo.read_i32(at) as f64,
                DataType::F32 => bo.read_f32(at) as f64,
                DataType::F64 => bo.read_f64(at),
            };
        }
    }
    buffer
}
