//! In-memory TIFF and GeoTIFF fixtures for unit tests.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::ZlibEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::IoError;
use crate::format::DataType;
use crate::io::{MemoryRangeReader, RangeReader};

// =============================================================================
// Raw TIFF writer
// =============================================================================

/// A tag value with its TIFF field type.
#[derive(Debug, Clone)]
pub enum TiffValue {
    Byte(Vec<u8>),
    Ascii(String),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Double(Vec<f64>),
    Long8(Vec<u64>),
}

impl TiffValue {
    fn field_type(&self) -> u16 {
        match self {
            TiffValue::Byte(_) => 1,
            TiffValue::Ascii(_) => 2,
            TiffValue::Short(_) => 3,
            TiffValue::Long(_) => 4,
            TiffValue::Double(_) => 12,
            TiffValue::Long8(_) => 16,
        }
    }

    fn count(&self) -> u64 {
        match self {
            TiffValue::Byte(v) => v.len() as u64,
            TiffValue::Ascii(s) => s.len() as u64 + 1,
            TiffValue::Short(v) => v.len() as u64,
            TiffValue::Long(v) => v.len() as u64,
            TiffValue::Double(v) => v.len() as u64,
            TiffValue::Long8(v) => v.len() as u64,
        }
    }

    fn encode(&self, be: bool) -> Vec<u8> {
        macro_rules! ordered {
            ($values:expr) => {
                $values
                    .iter()
                    .flat_map(|v| if be { v.to_be_bytes().to_vec() } else { v.to_le_bytes().to_vec() })
                    .collect()
            };
        }
        match self {
            TiffValue::Byte(v) => v.clone(),
            TiffValue::Ascii(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
            TiffValue::Short(v) => ordered!(v),
            TiffValue::Long(v) => ordered!(v),
            TiffValue::Double(v) => ordered!(v),
            TiffValue::Long8(v) => ordered!(v),
        }
    }
}

/// Tags and tile payloads of one IFD.
#[derive(Debug, Clone, Default)]
pub struct IfdSpec {
    entries: Vec<(u16, TiffValue)>,
    tiles: Option<Vec<Vec<u8>>>,
}

impl IfdSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: u16, value: TiffValue) -> Self {
        self.entries.retain(|(t, _)| *t != tag);
        self.entries.push((tag, value));
        self
    }

    /// Tile payloads in row-major order; an empty payload is written as a
    /// sparse tile. TileOffsets and TileByteCounts are generated.
    pub fn tiles(mut self, tiles: Vec<Vec<u8>>) -> Self {
        self.tiles = Some(tiles);
        self
    }

    fn entries_with(&self, offsets: &[u64], counts: &[u64], bigtiff: bool) -> Vec<(u16, TiffValue)> {
        let mut entries = self.entries.clone();
        if self.tiles.is_some() {
            let array = |v: &[u64]| {
                if bigtiff {
                    TiffValue::Long8(v.to_vec())
                } else {
                    TiffValue::Long(v.iter().map(|&x| x as u32).collect())
                }
            };
            entries.push((324, array(offsets)));
            entries.push((325, array(counts)));
        }
        entries.sort_by_key(|(tag, _)| *tag);
        entries
    }
}

/// Writes IFDs first (each followed by its out-of-line values), then all
/// tile data, the way COG writers lay files out.
#[derive(Debug, Clone, Default)]
pub struct TiffWriter {
    big_endian: bool,
    bigtiff: bool,
    ifds: Vec<IfdSpec>,
}

impl TiffWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn big_endian(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }

    pub fn bigtiff(mut self, bigtiff: bool) -> Self {
        self.bigtiff = bigtiff;
        self
    }

    pub fn ifd(mut self, ifd: IfdSpec) -> Self {
        self.ifds.push(ifd);
        self
    }

    pub fn write(&self) -> Vec<u8> {
        let be = self.big_endian;
        let (header_len, count_len, entry_len, inline_len) =
            if self.bigtiff { (16, 8, 20, 8) } else { (8, 2, 12, 4) };
        let next_len = inline_len;
        let padded = |n: usize| n + (n & 1);

        let uint = |value: u64, width: usize| -> Vec<u8> {
            let bytes = if be { value.to_be_bytes() } else { value.to_le_bytes() };
            if be {
                bytes[8 - width..].to_vec()
            } else {
                bytes[..width].to_vec()
            }
        };

        // pass 1: directory sizes with placeholder tile arrays
        let mut ifd_offsets = Vec::with_capacity(self.ifds.len());
        let mut cursor = header_len as u64;
        for ifd in &self.ifds {
            let n = ifd.tiles.as_ref().map_or(0, |t| t.len());
            let entries = ifd.entries_with(&vec![0; n], &vec![0; n], self.bigtiff);
            let block = count_len + entries.len() * entry_len + next_len;
            let external: usize = entries
                .iter()
                .map(|(_, v)| v.encode(be).len())
                .filter(|&len| len > inline_len)
                .map(padded)
                .sum();
            ifd_offsets.push(cursor);
            cursor += (block + external) as u64;
        }

        // tile data follows every directory
        let mut tile_cursor = cursor;
        let mut tile_layout = Vec::with_capacity(self.ifds.len());
        for ifd in &self.ifds {
            let mut offsets = Vec::new();
            let mut counts = Vec::new();
            for tile in ifd.tiles.iter().flatten() {
                if tile.is_empty() {
                    offsets.push(0);
                    counts.push(0);
                } else {
                    offsets.push(tile_cursor);
                    counts.push(tile.len() as u64);
                    tile_cursor += tile.len() as u64;
                }
            }
            tile_layout.push((offsets, counts));
        }

        // pass 2
        let mut out = Vec::with_capacity(tile_cursor as usize);
        out.extend_from_slice(if be { b"MM" } else { b"II" });
        if self.bigtiff {
            out.extend(uint(43, 2));
            out.extend(uint(8, 2));
            out.extend(uint(0, 2));
            out.extend(uint(ifd_offsets.first().copied().unwrap_or(0), 8));
        } else {
            out.extend(uint(42, 2));
            out.extend(uint(ifd_offsets.first().copied().unwrap_or(0), 4));
        }

        for (i, ifd) in self.ifds.iter().enumerate() {
            let (offsets, counts) = &tile_layout[i];
            let entries = ifd.entries_with(offsets, counts, self.bigtiff);
            out.extend(uint(entries.len() as u64, count_len));

            let block = count_len + entries.len() * entry_len + next_len;
            let mut ext_cursor = ifd_offsets[i] + block as u64;
            let mut external = Vec::new();
            for (tag, value) in &entries {
                out.extend(uint(*tag as u64, 2));
                out.extend(uint(value.field_type() as u64, 2));
                out.extend(uint(value.count(), if self.bigtiff { 8 } else { 4 }));
                let bytes = value.encode(be);
                if bytes.len() <= inline_len {
                    let mut field = bytes;
                    field.resize(inline_len, 0);
                    out.extend(field);
                } else {
                    out.extend(uint(ext_cursor, inline_len));
                    ext_cursor += padded(bytes.len()) as u64;
                    let len = bytes.len();
                    external.extend(bytes);
                    external.resize(external.len() + padded(len) - len, 0);
                }
            }
            let next = ifd_offsets.get(i + 1).copied().unwrap_or(0);
            out.extend(uint(next, next_len));
            out.extend(external);
        }
        assert_eq!(out.len() as u64, cursor, "directory layout drifted");

        for ifd in &self.ifds {
            for tile in ifd.tiles.iter().flatten() {
                out.extend_from_slice(tile);
            }
        }
        out
    }
}

// =============================================================================
// GeoTIFF fixture
// =============================================================================

/// Parameters of a synthetic tiled GeoTIFF with optional overviews.
#[derive(Debug, Clone)]
pub struct GeoTiffSpec {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub bands: usize,
    pub dtype: DataType,
    /// Last band is alpha (ExtraSamples = unassociated alpha)
    pub alpha: bool,
    pub compression: u16,
    pub predictor: u16,
    /// Each overview halves the previous level
    pub overviews: usize,
    pub epsg: u16,
    /// Upper-left corner in CRS units
    pub origin: (f64, f64),
    pub resolution: f64,
    pub pixel_is_point: bool,
    pub nodata: Option<f64>,
    pub big_endian: bool,
    pub bigtiff: bool,
    /// Full-resolution tiles written as sparse
    pub sparse_tiles: Vec<usize>,
    pub colormap: Option<Vec<u16>>,
    pub descriptions: Vec<String>,
    /// Value of (band, col, row) at full resolution
    pub pixel: fn(usize, u32, u32) -> f64,
}

/// Never zero, so a nodata value of 0 masks nothing.
pub fn default_pixel(band: usize, col: u32, row: u32) -> f64 {
    ((col as usize + 2 * row as usize + 40 * band) % 200 + 1) as f64
}

impl Default for GeoTiffSpec {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            tile_size: 16,
            bands: 1,
            dtype: DataType::U8,
            alpha: false,
            compression: 1,
            predictor: 1,
            overviews: 0,
            epsg: 3857,
            origin: (0.0, 1000.0),
            resolution: 10.0,
            pixel_is_point: false,
            nodata: None,
            big_endian: false,
            bigtiff: false,
            sparse_tiles: Vec::new(),
            colormap: None,
            descriptions: Vec::new(),
            pixel: default_pixel,
        }
    }
}

impl GeoTiffSpec {
    fn photometric(&self) -> u16 {
        if self.colormap.is_some() {
            3
        } else if self.bands >= 3 {
            2
        } else {
            1
        }
    }

    fn sample_format(&self) -> u16 {
        match self.dtype {
            DataType::F32 | DataType::F64 => 3,
            DataType::I8 | DataType::I16 | DataType::I32 => 2,
            _ => 1,
        }
    }

    /// Value of a level pixel: nearest decimation of full resolution.
    pub fn level_pixel(&self, level: usize, band: usize, col: u32, row: u32) -> f64 {
        let f = 1u32 << level;
        (self.pixel)(band, col * f, row * f)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut writer = TiffWriter::new()
            .big_endian(self.big_endian)
            .bigtiff(self.bigtiff);
        for level in 0..=self.overviews {
            writer = writer.ifd(self.level_ifd(level));
        }
        writer.write()
    }

    fn level_ifd(&self, level: usize) -> IfdSpec {
        let f = 1u32 << level;
        let (w, h) = (self.width.div_ceil(f), self.height.div_ceil(f));
        let ts = self.tile_size;
        let bits = (self.dtype.size_in_bytes() * 8) as u16;
        let photometric = self.photometric();
        let color_bands = if photometric == 2 { 3 } else { 1 };

        let mut tiles = Vec::new();
        for row in 0..h.div_ceil(ts) {
            for col in 0..w.div_ceil(ts) {
                let index = tiles.len();
                if level == 0 && self.sparse_tiles.contains(&index) {
                    tiles.push(Vec::new());
                } else {
                    tiles.push(self.encode_tile(level, w, h, col, row));
                }
            }
        }

        let mut ifd = IfdSpec::new()
            .with(254, TiffValue::Long(vec![if level == 0 { 0 } else { 1 }]))
            .with(256, TiffValue::Long(vec![w]))
            .with(257, TiffValue::Long(vec![h]))
            .with(258, TiffValue::Short(vec![bits; self.bands]))
            .with(259, TiffValue::Short(vec![self.compression]))
            .with(262, TiffValue::Short(vec![photometric]))
            .with(277, TiffValue::Short(vec![self.bands as u16]))
            .with(284, TiffValue::Short(vec![1]))
            .with(322, TiffValue::Short(vec![ts as u16]))
            .with(323, TiffValue::Short(vec![ts as u16]))
            .with(339, TiffValue::Short(vec![self.sample_format(); self.bands]))
            .tiles(tiles);

        if self.predictor != 1 {
            ifd = ifd.with(317, TiffValue::Short(vec![self.predictor]));
        }
        if self.bands > color_bands {
            let mut extra = vec![0u16; self.bands - color_bands];
            if self.alpha {
                if let Some(last) = extra.last_mut() {
                    *last = 2;
                }
            }
            ifd = ifd.with(338, TiffValue::Short(extra));
        }
        if let Some(cmap) = &self.colormap {
            ifd = ifd.with(320, TiffValue::Short(cmap.clone()));
        }

        if level == 0 {
            ifd = ifd
                .with(33550, TiffValue::Double(vec![self.resolution, self.resolution, 0.0]))
                .with(
                    33922,
                    TiffValue::Double(vec![0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0]),
                )
                .with(34735, TiffValue::Short(self.geokeys()));
            if let Some(nodata) = self.nodata {
                ifd = ifd.with(42113, TiffValue::Ascii(format!("{}", nodata)));
            }
            if !self.descriptions.is_empty() {
                let items: String = self
                    .descriptions
                    .iter()
                    .enumerate()
                    .map(|(i, d)| {
                        format!(
                            "<Item name=\"DESCRIPTION\" sample=\"{}\" role=\"description\">{}</Item>",
                            i, d
                        )
                    })
                    .collect();
                ifd = ifd.with(
                    42112,
                    TiffValue::Ascii(format!("<GDALMetadata>{}</GDALMetadata>", items)),
                );
            }
        }
        ifd
    }

    fn geokeys(&self) -> Vec<u16> {
        let raster_type = if self.pixel_is_point { 2 } else { 1 };
        if self.epsg == 4326 {
            vec![1, 1, 0, 3, 1024, 0, 1, 2, 1025, 0, 1, raster_type, 2048, 0, 1, 4326]
        } else {
            vec![1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, raster_type, 3072, 0, 1, self.epsg]
        }
    }

    fn encode_tile(&self, level: usize, w: u32, h: u32, col: u32, row: u32) -> Vec<u8> {
        let ts = self.tile_size;
        let mut samples = Vec::with_capacity((ts * ts) as usize * self.bands);
        for y in 0..ts {
            for x in 0..ts {
                let (px, py) = (col * ts + x, row * ts + y);
                for band in 0..self.bands {
                    samples.push(if px < w && py < h {
                        self.level_pixel(level, band, px, py)
                    } else {
                        0.0
                    });
                }
            }
        }

        if self.compression == 7 {
            return self.encode_jpeg(&samples);
        }

        let raw = match self.predictor {
            2 => self.horizontal_difference(&samples),
            3 => self.float_difference(&samples),
            _ => samples
                .iter()
                .flat_map(|&v| sample_bytes(self.dtype, v as i64, v, self.big_endian))
                .collect(),
        };
        compress(self.compression, &raw)
    }

    fn horizontal_difference(&self, samples: &[f64]) -> Vec<u8> {
        let row_len = (self.tile_size as usize) * self.bands;
        let mut out = Vec::new();
        for row in samples.chunks(row_len) {
            for (i, &v) in row.iter().enumerate() {
                let diff = if i >= self.bands {
                    v as i64 - row[i - self.bands] as i64
                } else {
                    v as i64
                };
                out.extend(sample_bytes(self.dtype, diff, v, self.big_endian));
            }
        }
        out
    }

    fn float_difference(&self, samples: &[f64]) -> Vec<u8> {
        let size = self.dtype.size_in_bytes();
        let row_len = (self.tile_size as usize) * self.bands;
        let mut out = Vec::new();
        for row in samples.chunks(row_len) {
            let mut planes = vec![0u8; row.len() * size];
            for (i, &v) in row.iter().enumerate() {
                let be = sample_bytes(self.dtype, 0, v, true);
                for (k, byte) in be.into_iter().enumerate() {
                    planes[k * row.len() + i] = byte;
                }
            }
            for i in (self.bands..planes.len()).rev() {
                planes[i] = planes[i].wrapping_sub(planes[i - self.bands]);
            }
            out.extend(planes);
        }
        out
    }

    fn encode_jpeg(&self, samples: &[f64]) -> Vec<u8> {
        let pixels: Vec<u8> = samples.iter().map(|&v| v as u8).collect();
        let color = if self.bands == 3 {
            ExtendedColorType::Rgb8
        } else {
            ExtendedColorType::L8
        };
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 95)
            .write_image(&pixels, self.tile_size, self.tile_size, color)
            .expect("jpeg encode");
        out
    }
}

/// Bytes of one sample. Integer types use `int` (wrapping), floats `value`.
fn sample_bytes(dtype: DataType, int: i64, value: f64, be: bool) -> Vec<u8> {
    macro_rules! ordered {
        ($v:expr) => {
            if be {
                $v.to_be_bytes().to_vec()
            } else {
                $v.to_le_bytes().to_vec()
            }
        };
    }
    match dtype {
        DataType::U8 => vec![int as u8],
        DataType::I8 => vec![int as i8 as u8],
        DataType::U16 => ordered!(int as u16),
        DataType::I16 => ordered!(int as i16),
        DataType::U32 => ordered!(int as u32),
        DataType::I32 => ordered!(int as i32),
        DataType::F32 => ordered!(value as f32),
        DataType::F64 => ordered!(value),
    }
}

pub fn compress(compression: u16, raw: &[u8]) -> Vec<u8> {
    match compression {
        1 => raw.to_vec(),
        5 => weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
            .encode(raw)
            .expect("lzw encode"),
        8 | 32946 => {
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(raw).expect("zlib write");
            encoder.finish().expect("zlib finish")
        }
        32773 => packbits(raw),
        other => panic!("fixture cannot compress with {}", other),
    }
}

fn packbits(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        let mut run = 1;
        while i + run < raw.len() && raw[i + run] == raw[i] && run < 128 {
            run += 1;
        }
        if run >= 3 {
            out.push((257 - run) as u8);
            out.push(raw[i]);
            i += run;
            continue;
        }
        let start = i;
        while i < raw.len() && i - start < 128 {
            if i + 2 < raw.len() && raw[i] == raw[i + 1] && raw[i] == raw[i + 2] {
                break;
            }
            i += 1;
        }
        out.push((i - start - 1) as u8);
        out.extend_from_slice(&raw[start..i]);
    }
    out
}

// =============================================================================
// Instrumented reader
// =============================================================================

/// Memory reader that counts the reads it serves.
pub struct CountingReader {
    inner: MemoryRangeReader,
    reads: AtomicUsize,
}

impl CountingReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: MemoryRangeReader::new(data, "mem://counting"),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RangeReader for CountingReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_exact_at(offset, len).await
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
