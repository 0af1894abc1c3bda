//! Raster metadata assembled from a GeoTIFF's directory structures.
//!
//! [`RasterMetadata::parse`] reads only headers and directories: the first
//! [`HEADER_PREFETCH_BYTES`] of the file are fetched once and serve every
//! directory read inside them, so a typical COG is parsed with one or two
//! range requests. Pixel payload is never touched.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{IoError, TiffError};
use crate::geo::{Affine, Bounds, Crs};
use crate::io::RangeReader;

use super::detect::{detect_container, ContainerFormat};
use super::geotiff::{parse_band_descriptions, parse_nodata, read_georeference};
use super::tiff::{
    compression_name, order_levels, read_ifd_chain, ByteOrder, Ifd, IfdRole, OverviewLevel,
    TiffHeader, TiffTag, ValueReader,
};

/// Bytes fetched up front to cover the header and leading directories.
pub const HEADER_PREFETCH_BYTES: u64 = 16 * 1024;

const PHOTOMETRIC_MIN_IS_WHITE: u16 = 0;
const PHOTOMETRIC_MIN_IS_BLACK: u16 = 1;
const PHOTOMETRIC_RGB: u16 = 2;
const PHOTOMETRIC_PALETTE: u16 = 3;
const PHOTOMETRIC_YCBCR: u16 = 6;

const EXTRA_SAMPLE_ASSOCIATED_ALPHA: u16 = 1;
const EXTRA_SAMPLE_UNASSOCIATED_ALPHA: u16 = 2;

// =============================================================================
// Sample types
// =============================================================================

/// Numeric type of one band sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DataType {
    #[serde(rename = "uint8")]
    U8,
    #[serde(rename = "int8")]
    I8,
    #[serde(rename = "uint16")]
    U16,
    #[serde(rename = "int16")]
    I16,
    #[serde(rename = "uint32")]
    U32,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float64")]
    F64,
}

impl DataType {
    /// Map `BitsPerSample` and `SampleFormat` (1 uint, 2 int, 3 float).
    pub fn from_tiff(bits: u16, sample_format: u16) -> Option<Self> {
        Some(match (bits, sample_format) {
            (8, 1) => DataType::U8,
            (8, 2) => DataType::I8,
            (16, 1) => DataType::U16,
            (16, 2) => DataType::I16,
            (32, 1) => DataType::U32,
            (32, 2) => DataType::I32,
            (32, 3) => DataType::F32,
            (64, 3) => DataType::F64,
            _ => return None,
        })
    }

    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// numpy-style name
    pub const fn name(self) -> &'static str {
        match self {
            DataType::U8 => "uint8",
            DataType::I8 => "int8",
            DataType::U16 => "uint16",
            DataType::I16 => "int16",
            DataType::U32 => "uint32",
            DataType::I32 => "int32",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        }
    }

    /// Smallest and largest representable value.
    pub fn range(self) -> (f64, f64) {
        match self {
            DataType::U8 => (0.0, u8::MAX as f64),
            DataType::I8 => (i8::MIN as f64, i8::MAX as f64),
            DataType::U16 => (0.0, u16::MAX as f64),
            DataType::I16 => (i16::MIN as f64, i16::MAX as f64),
            DataType::U32 => (0.0, u32::MAX as f64),
            DataType::I32 => (i32::MIN as f64, i32::MAX as f64),
            DataType::F32 => (f32::MIN as f64, f32::MAX as f64),
            DataType::F64 => (f64::MIN, f64::MAX),
        }
    }

    /// Round and clamp `value` into this type; floats pass through.
    #[inline]
    pub fn saturate(self, value: f64) -> f64 {
        if self.is_float() {
            return value;
        }
        let (lo, hi) = self.range();
        value.round().clamp(lo, hi)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a band is meant to be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorInterp {
    Gray,
    Palette,
    Red,
    Green,
    Blue,
    Alpha,
    Undefined,
}

/// Where per-pixel validity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodataKind {
    None,
    Nodata,
    Alpha,
}

// =============================================================================
// RasterMetadata
// =============================================================================

/// Everything needed to locate and decode internal tiles of one raster.
///
/// Immutable once parsed and shared behind an `Arc` between requests.
#[derive(Debug, Clone)]
pub struct RasterMetadata {
    pub identifier: String,
    pub file_size: u64,
    pub container: ContainerFormat,
    pub byte_order: ByteOrder,

    /// Full-resolution size
    pub width: u32,
    pub height: u32,

    pub bands: usize,
    pub dtype: DataType,
    pub photometric: u16,
    pub color_interp: Vec<ColorInterp>,

    /// RGBA entries for palette images
    pub colormap: Option<Vec<[u8; 4]>>,

    pub nodata: Option<f64>,
    pub crs: Crs,

    /// Full-resolution pixel grid to CRS
    pub transform: Affine,

    /// Finest first; level 0 is full resolution
    pub levels: Vec<OverviewLevel>,

    /// One entry per band, empty when unnamed
    pub band_descriptions: Vec<String>,
}

impl RasterMetadata {
    /// Parse the directory structures of a GeoTIFF.
    pub async fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let file_size = reader.size();
        let prefix_len = HEADER_PREFETCH_BYTES.min(file_size) as usize;
        let prefix = reader.read_exact_at(0, prefix_len).await?;

        let container = detect_container(&prefix)?;
        let header = TiffHeader::parse(&prefix, file_size)?;
        let reader = PrefetchedReader {
            inner: reader,
            prefix,
        };

        let ifds = read_ifd_chain(&reader, &header).await?;
        let values = ValueReader::new(&reader, &header);
        let bo = header.byte_order;

        let mut base = None;
        let mut overviews = Vec::new();
        for (index, ifd) in ifds.iter().enumerate() {
            match (IfdRole::of(ifd, bo), base.is_some()) {
                (IfdRole::FullResolution, false) => base = Some(index),
                (IfdRole::Overview, true) => overviews.push(index),
                (role, _) => debug!(ifd = index, ?role, "skipping IFD"),
            }
        }
        let base = base.ok_or_else(|| {
            TiffError::Unsupported("no full-resolution image in the IFD chain".to_string())
        })?;
        let base_ifd = &ifds[base];

        let bands = samples_per_pixel(base_ifd, bo);
        let dtype = read_data_type(&values, base_ifd).await?;
        let photometric = base_ifd
            .inline_u32(TiffTag::PhotometricInterpretation, bo)
            .unwrap_or(PHOTOMETRIC_MIN_IS_BLACK as u32) as u16;

        let extra_samples = match base_ifd.get_entry_by_tag(TiffTag::ExtraSamples) {
            Some(entry) => values.read_u16_array(entry).await?,
            None => Vec::new(),
        };
        let color_interp = color_interpretation(photometric, bands, &extra_samples)?;

        let colormap = match base_ifd.get_entry_by_tag(TiffTag::ColorMap) {
            Some(entry) if photometric == PHOTOMETRIC_PALETTE => {
                Some(palette_from_colormap(&values.read_u16_array(entry).await?))
            }
            _ => None,
        };

        let nodata = match base_ifd.get_entry_by_tag(TiffTag::GdalNodata) {
            Some(entry) => parse_nodata(&values.read_string(entry).await?),
            None => None,
        };

        let mut band_descriptions = vec![String::new(); bands];
        if let Some(entry) = base_ifd.get_entry_by_tag(TiffTag::GdalMetadata) {
            for (band, text) in parse_band_descriptions(&values.read_string(entry).await?) {
                if let Some(slot) = band_descriptions.get_mut(band) {
                    *slot = text;
                }
            }
        }

        let georef = read_georeference(&values, base_ifd).await?;

        let mut base_level = OverviewLevel::read(&values, base_ifd, base, file_size).await?;
        if base_level.compression == 7 && dtype != DataType::U8 {
            return Err(TiffError::Unsupported(format!("JPEG compression of {} samples", dtype)));
        }
        if photometric == PHOTOMETRIC_YCBCR && base_level.compression != 7 {
            return Err(TiffError::Unsupported(
                "YCbCr samples outside JPEG compression".to_string(),
            ));
        }
        base_level.transform = georef.transform;

        let mut overview_levels = Vec::with_capacity(overviews.len());
        for index in overviews {
            let ifd = &ifds[index];
            let samples = samples_per_pixel(ifd, bo);
            if samples != bands {
                return Err(TiffError::InvalidTagValue {
                    tag: TiffTag::SamplesPerPixel.name(),
                    message: format!(
                        "overview IFD {} has {} bands, full resolution has {}",
                        index, samples, bands
                    ),
                });
            }
            let mut level = OverviewLevel::read(&values, ifd, index, file_size).await?;
            level.georeference(&georef.transform, base_level.width, base_level.height);
            overview_levels.push(level);
        }

        let levels = order_levels(base_level, overview_levels);
        let metadata = RasterMetadata {
            identifier: reader.identifier().to_string(),
            file_size,
            container,
            byte_order: bo,
            width: levels[0].width,
            height: levels[0].height,
            bands,
            dtype,
            photometric,
            color_interp,
            colormap,
            nodata,
            crs: georef.crs,
            transform: georef.transform,
            levels,
            band_descriptions,
        };

        info!(
            source = %metadata.identifier,
            width = metadata.width,
            height = metadata.height,
            bands = metadata.bands,
            dtype = %metadata.dtype,
            levels = metadata.levels.len(),
            crs = %metadata.crs,
            "parsed raster metadata"
        );
        Ok(metadata)
    }

    /// Extent in the raster's CRS.
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }

    pub fn level(&self, index: usize) -> Option<&OverviewLevel> {
        self.levels.get(index)
    }

    /// 0-based index of the alpha band, if any.
    pub fn alpha_band(&self) -> Option<usize> {
        self.color_interp.iter().position(|&c| c == ColorInterp::Alpha)
    }

    pub fn nodata_kind(&self) -> NodataKind {
        if self.alpha_band().is_some() {
            NodataKind::Alpha
        } else if self.nodata.is_some() {
            NodataKind::Nodata
        } else {
            NodataKind::None
        }
    }

    /// Compression name of the full-resolution level.
    pub fn compression(&self) -> String {
        compression_name(self.levels[0].compression)
    }

    /// Integer decimation factor of each overview.
    pub fn overview_factors(&self) -> Vec<u32> {
        self.levels[1..]
            .iter()
            .map(|l| l.decimation.round() as u32)
            .collect()
    }
}

fn samples_per_pixel(ifd: &Ifd, bo: ByteOrder) -> usize {
    ifd.inline_u32(TiffTag::SamplesPerPixel, bo).unwrap_or(1).max(1) as usize
}

async fn read_data_type<R: RangeReader + ?Sized>(
    values: &ValueReader<'_, R>,
    ifd: &Ifd,
) -> Result<DataType, TiffError> {
    let uniform = |values: Vec<u16>, tag: TiffTag, default: u16| -> Result<u16, TiffError> {
        let first = values.first().copied().unwrap_or(default);
        if values.iter().any(|&v| v != first) {
            return Err(TiffError::Unsupported(format!("mixed {} per band", tag.name())));
        }
        Ok(first)
    };

    let bits = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
        Some(entry) => uniform(values.read_u16_array(entry).await?, TiffTag::BitsPerSample, 1)?,
        None => 1,
    };
    let format = match ifd.get_entry_by_tag(TiffTag::SampleFormat) {
        Some(entry) => uniform(values.read_u16_array(entry).await?, TiffTag::SampleFormat, 1)?,
        None => 1,
    };
    DataType::from_tiff(bits, format).ok_or_else(|| {
        TiffError::Unsupported(format!("{}-bit samples with SampleFormat {}", bits, format))
    })
}

/// Per-band color interpretation from photometric interpretation and
/// `ExtraSamples`.
pub fn color_interpretation(
    photometric: u16,
    bands: usize,
    extra_samples: &[u16],
) -> Result<Vec<ColorInterp>, TiffError> {
    let base: &[ColorInterp] = match photometric {
        PHOTOMETRIC_MIN_IS_WHITE | PHOTOMETRIC_MIN_IS_BLACK => &[ColorInterp::Gray],
        PHOTOMETRIC_RGB | PHOTOMETRIC_YCBCR => {
            &[ColorInterp::Red, ColorInterp::Green, ColorInterp::Blue]
        }
        PHOTOMETRIC_PALETTE => &[ColorInterp::Palette],
        _ => &[],
    };
    if bands < base.len() {
        return Err(TiffError::InvalidTagValue {
            tag: TiffTag::SamplesPerPixel.name(),
            message: format!(
                "{} bands cannot hold photometric interpretation {}",
                bands, photometric
            ),
        });
    }

    let mut interp = base.to_vec();
    // ExtraSamples describes the bands after the photometric ones
    let extras = bands - base.len();
    let offset = extra_samples.len().saturating_sub(extras);
    for i in 0..extras {
        let kind = extra_samples.get(offset + i).copied();
        interp.push(match kind {
            Some(EXTRA_SAMPLE_ASSOCIATED_ALPHA) | Some(EXTRA_SAMPLE_UNASSOCIATED_ALPHA) => {
                ColorInterp::Alpha
            }
            _ => ColorInterp::Undefined,
        });
    }
    if interp.iter().filter(|&&c| c == ColorInterp::Alpha).count() > 1 {
        return Err(TiffError::Unsupported("more than one alpha band".to_string()));
    }
    Ok(interp)
}

/// Convert a TIFF `ColorMap` (all reds, all greens, all blues, 16 bits
/// each) into RGBA entries.
pub fn palette_from_colormap(colormap: &[u16]) -> Vec<[u8; 4]> {
    let n = colormap.len() / 3;
    let scale = |v: u16| ((v as u32 * 255 + 32767) / 65535) as u8;
    (0..n)
        .map(|i| {
            [
                scale(colormap[i]),
                scale(colormap[n + i]),
                scale(colormap[2 * n + i]),
                255,
            ]
        })
        .collect()
}

// =============================================================================
// Header prefetch
// =============================================================================

/// Serves reads inside the prefetched header region from memory.
struct PrefetchedReader<'a, R: RangeReader + ?Sized> {
    inner: &'a R,
    prefix: Bytes,
}

#[async_trait]
impl<R: RangeReader + ?Sized> RangeReader for PrefetchedReader<'_, R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if end <= self.prefix.len() as u64 => {
                Ok(self.prefix.slice(offset as usize..end as usize))
            }
            _ => self.inner.read_exact_at(offset, len).await,
        }
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
