//! Test utilities for integration tests.
//!
//! This module provides an in-memory COG writer, a range reader that records
//! its requests, and a source resolver serving those readers by URI.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::ZlibEncoder;
use parking_lot::Mutex;

use cog_tiler::error::IoError;
use cog_tiler::geo::TileMatrixSet;
use cog_tiler::io::{MemoryRangeReader, RangeReader};
use cog_tiler::{PipelineConfig, RasterSource, SourceResolver, TileError, TilePipeline};

// =============================================================================
// Tracking Range Reader
// =============================================================================

/// An in-memory reader that records every range it serves.
pub struct TrackingReader {
    inner: MemoryRangeReader,
    requests: Mutex<Vec<(u64, usize)>>,
}

impl TrackingReader {
    pub fn new(data: Vec<u8>, identifier: impl Into<String>) -> Self {
        Self {
            inner: MemoryRangeReader::new(data, identifier),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn reset(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl RangeReader for TrackingReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.requests.lock().push((offset, len));
        self.inner.read_exact_at(offset, len).await
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}

// =============================================================================
// Mock Source Resolver
// =============================================================================

/// Serves registered in-memory files by URI and counts how often each
/// source is opened.
#[derive(Default)]
pub struct MockResolver {
    readers: HashMap<String, Arc<TrackingReader>>,
    opens: AtomicUsize,
    latency: Option<Duration>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, uri: &str, data: Vec<u8>) -> Self {
        let reader = TrackingReader::new(data, format!("mem://{}", uri));
        self.readers.insert(uri.to_string(), Arc::new(reader));
        self
    }

    /// Delay every open, to widen race windows.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn reader(&self, uri: &str) -> Arc<TrackingReader> {
        Arc::clone(&self.readers[uri])
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceResolver for MockResolver {
    async fn open(&self, source: &RasterSource) -> Result<Arc<dyn RangeReader>, TileError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.readers.get(source.key()) {
            Some(reader) => Ok(Arc::clone(reader) as Arc<dyn RangeReader>),
            None => Err(IoError::NotFound(source.uri.clone()).into()),
        }
    }
}

/// A pipeline over a mock resolver, returned alongside it.
pub fn mock_pipeline(resolver: MockResolver) -> (TilePipeline, Arc<MockResolver>) {
    let resolver = Arc::new(resolver);
    let pipeline = TilePipeline::with_resolver(
        PipelineConfig::default(),
        Arc::clone(&resolver) as Arc<dyn SourceResolver>,
    );
    (pipeline, resolver)
}

// =============================================================================
// COG writer
// =============================================================================

/// Sample type written by [`CogBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    U8,
    U16,
    F32,
}

impl Sample {
    fn bits(self) -> u16 {
        match self {
            Sample::U8 => 8,
            Sample::U16 => 16,
            Sample::F32 => 32,
        }
    }

    fn format(self) -> u16 {
        match self {
            Sample::F32 => 3,
            _ => 1,
        }
    }

    fn write(self, out: &mut Vec<u8>, value: f64) {
        match self {
            Sample::U8 => out.push(value as u8),
            Sample::U16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
            Sample::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
        }
    }
}

/// Pixel value of (level, band, col, row).
pub type PixelFn = fn(usize, usize, u32, u32) -> f64;

/// Never zero; overviews are nearest decimations of full resolution.
pub fn gradient(level: usize, band: usize, col: u32, row: u32) -> f64 {
    let (col, row) = ((col as usize) << level, (row as usize) << level);
    ((col + 2 * row + 40 * band) % 200 + 1) as f64
}

/// A little-endian tiled GeoTIFF with tile data first and directories at
/// the end of the file.
#[derive(Debug, Clone)]
pub struct CogBuilder {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub bands: usize,
    pub sample: Sample,
    /// 1 (none), 8 (deflate), or any other code written over raw bytes
    pub compression: u16,
    pub overviews: usize,
    /// EPSG code of a projected CRS, or 4326
    pub epsg: u16,
    /// Upper-left corner in CRS units
    pub origin: (f64, f64),
    pub resolution: f64,
    pub nodata: Option<f64>,
    /// Last band is unassociated alpha
    pub alpha: bool,
    /// Full-resolution tiles written as sparse
    pub sparse_tiles: Vec<usize>,
    /// Strip layout instead of tiles
    pub stripped: bool,
    pub pixel: PixelFn,
}

impl Default for CogBuilder {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            tile_size: 256,
            bands: 1,
            sample: Sample::U8,
            compression: 1,
            overviews: 0,
            epsg: 3857,
            origin: (0.0, 0.0),
            resolution: z14_resolution(),
            nodata: None,
            alpha: false,
            sparse_tiles: Vec::new(),
            stripped: false,
            pixel: gradient,
        }
    }
}

/// Web Mercator resolution of zoom 14, so that the default raster's
/// top-left pixel is the top-left of tile 14/8192/8192.
pub fn z14_resolution() -> f64 {
    TileMatrixSet::WebMercatorQuad.resolution(14)
}

enum Value {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Double(Vec<f64>),
    Ascii(String),
}

impl Value {
    fn field_type(&self) -> u16 {
        match self {
            Value::Short(_) => 3,
            Value::Long(_) => 4,
            Value::Double(_) => 12,
            Value::Ascii(_) => 2,
        }
    }

    fn count(&self) -> u32 {
        match self {
            Value::Short(v) => v.len() as u32,
            Value::Long(v) => v.len() as u32,
            Value::Double(v) => v.len() as u32,
            Value::Ascii(s) => s.len() as u32 + 1,
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            Value::Short(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Value::Long(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Value::Double(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Value::Ascii(s) => s.bytes().chain(std::iter::once(0)).collect(),
        }
    }
}

impl CogBuilder {
    /// Tile (or strip) grid of one level: `(width, height, across, down)`.
    fn level_grid(&self, level: usize) -> (u32, u32, u32, u32) {
        let f = 1u32 << level;
        let (w, h) = (self.width.div_ceil(f), self.height.div_ceil(f));
        if self.stripped {
            (w, h, 1, h.div_ceil(self.tile_size))
        } else {
            (w, h, w.div_ceil(self.tile_size), h.div_ceil(self.tile_size))
        }
    }

    fn encode_block(&self, level: usize, w: u32, h: u32, col: u32, row: u32) -> Vec<u8> {
        let block_w = if self.stripped { w } else { self.tile_size };
        let mut raw = Vec::new();
        for y in 0..self.tile_size {
            for x in 0..block_w {
                let (px, py) = (col * block_w + x, row * self.tile_size + y);
                for band in 0..self.bands {
                    let value = if px < w && py < h {
                        (self.pixel)(level, band, px, py)
                    } else {
                        0.0
                    };
                    self.sample.write(&mut raw, value);
                }
            }
        }
        match self.compression {
            8 => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&raw).unwrap();
                encoder.finish().unwrap()
            }
            _ => raw,
        }
    }

    fn entries(&self, level: usize, offsets: Vec<u32>, counts: Vec<u32>) -> Vec<(u16, Value)> {
        let (w, h, _, _) = self.level_grid(level);
        let color_bands = if self.bands >= 3 { 3 } else { 1 };
        let mut entries = vec![
            (254, Value::Long(vec![if level == 0 { 0 } else { 1 }])),
            (256, Value::Long(vec![w])),
            (257, Value::Long(vec![h])),
            (258, Value::Short(vec![self.sample.bits(); self.bands])),
            (259, Value::Short(vec![self.compression])),
            (262, Value::Short(vec![if color_bands == 3 { 2 } else { 1 }])),
            (277, Value::Short(vec![self.bands as u16])),
            (284, Value::Short(vec![1])),
            (339, Value::Short(vec![self.sample.format(); self.bands])),
        ];
        if self.stripped {
            entries.push((273, Value::Long(offsets)));
            entries.push((278, Value::Long(vec![self.tile_size])));
            entries.push((279, Value::Long(counts)));
        } else {
            entries.push((322, Value::Long(vec![self.tile_size])));
            entries.push((323, Value::Long(vec![self.tile_size])));
            entries.push((324, Value::Long(offsets)));
            entries.push((325, Value::Long(counts)));
        }
        if self.bands > color_bands {
            let mut extra = vec![0u16; self.bands - color_bands];
            if self.alpha {
                if let Some(last) = extra.last_mut() {
                    *last = 2;
                }
            }
            entries.push((338, Value::Short(extra)));
        }
        if level == 0 {
            let model_type = if self.epsg == 4326 { 2 } else { 1 };
            let crs_key = if self.epsg == 4326 { 2048 } else { 3072 };
            entries.push((
                33550,
                Value::Double(vec![self.resolution, self.resolution, 0.0]),
            ));
            entries.push((
                33922,
                Value::Double(vec![0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0]),
            ));
            entries.push((
                34735,
                Value::Short(vec![
                    1, 1, 0, 3, 1024, 0, 1, model_type, 1025, 0, 1, 1, crs_key, 0, 1, self.epsg,
                ]),
            ));
            if let Some(nodata) = self.nodata {
                entries.push((42113, Value::Ascii(format!("{}", nodata))));
            }
        }
        entries.sort_by_key(|(tag, _)| *tag);
        entries
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![b'I', b'I', 42, 0, 0, 0, 0, 0];

        // tile data for every level
        let mut layouts = Vec::new();
        for level in 0..=self.overviews {
            let (w, h, across, down) = self.level_grid(level);
            let mut offsets = Vec::new();
            let mut counts = Vec::new();
            for row in 0..down {
                for col in 0..across {
                    let index = offsets.len();
                    if level == 0 && self.sparse_tiles.contains(&index) {
                        offsets.push(0);
                        counts.push(0);
                        continue;
                    }
                    let block = self.encode_block(level, w, h, col, row);
                    offsets.push(out.len() as u32);
                    counts.push(block.len() as u32);
                    out.extend_from_slice(&block);
                }
            }
            layouts.push((offsets, counts));
        }

        // directories, each followed by its out-of-line values
        let mut next_pointer = 4usize;
        for (level, (offsets, counts)) in layouts.into_iter().enumerate() {
            if out.len() % 2 == 1 {
                out.push(0);
            }
            let ifd_offset = out.len() as u32;
            out[next_pointer..next_pointer + 4].copy_from_slice(&ifd_offset.to_le_bytes());

            let entries = self.entries(level, offsets, counts);
            let mut external_offset = out.len() + 2 + entries.len() * 12 + 4;
            let mut external = Vec::new();
            out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
            for (tag, value) in &entries {
                out.extend_from_slice(&tag.to_le_bytes());
                out.extend_from_slice(&value.field_type().to_le_bytes());
                out.extend_from_slice(&value.count().to_le_bytes());
                let mut bytes = value.bytes();
                if bytes.len() <= 4 {
                    bytes.resize(4, 0);
                    out.extend_from_slice(&bytes);
                } else {
                    out.extend_from_slice(&(external_offset as u32).to_le_bytes());
                    if bytes.len() % 2 == 1 {
                        bytes.push(0);
                    }
                    external_offset += bytes.len();
                    external.extend_from_slice(&bytes);
                }
            }
            next_pointer = out.len();
            out.extend_from_slice(&[0, 0, 0, 0]);
            out.extend_from_slice(&external);
        }
        out
    }
}

// =============================================================================
// Output parsing
// =============================================================================

/// One array of an NPY stream.
#[derive(Debug, Clone)]
pub struct NpyArray {
    pub descr: String,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl NpyArray {
    pub fn item_size(&self) -> usize {
        self.descr[2..].parse().unwrap()
    }

    /// Sample `i` as f64.
    pub fn value(&self, i: usize) -> f64 {
        let size = self.item_size();
        let bytes = &self.data[i * size..(i + 1) * size];
        match self.descr.as_str() {
            "|u1" => bytes[0] as f64,
            "<u2" => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            "<f4" => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            other => panic!("unexpected dtype {}", other),
        }
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }
}

fn header_field<'a>(header: &'a str, key: &str, open: char, close: char) -> &'a str {
    let start = header.find(key).unwrap() + key.len();
    let rest = &header[start..];
    let open_at = rest.find(open).unwrap() + 1;
    let close_at = open_at + rest[open_at..].find(close).unwrap();
    &rest[open_at..close_at]
}

/// Parse the consecutive NPY arrays of a raw tile.
pub fn parse_npy_stream(mut bytes: &[u8]) -> Vec<NpyArray> {
    let mut arrays = Vec::new();
    while !bytes.is_empty() {
        assert_eq!(&bytes[..6], b"\x93NUMPY", "missing NPY magic");
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0, "NPY data is not 64-byte aligned");
        let header = std::str::from_utf8(&bytes[10..10 + header_len]).unwrap();

        let descr = header_field(header, "'descr'", '\'', '\'').to_string();
        let shape: Vec<usize> = header_field(header, "'shape'", '(', ')')
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().unwrap())
            .collect();

        let mut array = NpyArray {
            descr,
            shape,
            data: Vec::new(),
        };
        let start = 10 + header_len;
        let end = start + array.len() * array.item_size();
        array.data = bytes[start..end].to_vec();
        arrays.push(array);
        bytes = &bytes[end..];
    }
    arrays
}
