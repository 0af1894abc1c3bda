//! IFD chain walking and pyramid level discovery.
//!
//! A COG stores the full-resolution image in its first IFD and each reduced
//! resolution copy in a later IFD flagged through `NewSubfileType`. Internal
//! transparency masks use the same chain with the mask bit set; they are
//! skipped here.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::warn;

use crate::error::TiffError;
use crate::geo::Affine;
use crate::io::{ByteRange, RangeReader};

use super::parser::{ByteOrder, Ifd, TiffHeader};
use super::tags::TiffTag;
use super::values::ValueReader;

/// Maximum number of IFDs followed in one file.
pub const MAX_IFDS: usize = 64;

/// Tile edges must be multiples of this many pixels.
const TILE_ALIGNMENT: u32 = 16;

const SUBFILE_REDUCED_IMAGE: u32 = 0x1;
const SUBFILE_MASK: u32 = 0x4;

/// What an IFD holds, from its `NewSubfileType` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfdRole {
    FullResolution,
    Overview,
    Mask,
}

impl IfdRole {
    pub fn of(ifd: &Ifd, bo: ByteOrder) -> Self {
        let subfile = ifd.inline_u32(TiffTag::NewSubfileType, bo).unwrap_or(0);
        if subfile & SUBFILE_MASK != 0 {
            IfdRole::Mask
        } else if subfile & SUBFILE_REDUCED_IMAGE != 0 {
            IfdRole::Overview
        } else {
            IfdRole::FullResolution
        }
    }
}

/// Follow the next-IFD chain from the header.
///
/// Fails with [`TiffError::IfdLoop`] when an offset repeats. Chains longer
/// than [`MAX_IFDS`] are cut with a warning.
pub async fn read_ifd_chain<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
) -> Result<Vec<Ifd>, TiffError> {
    let size = reader.size();
    let mut ifds = Vec::new();
    let mut seen = HashSet::new();
    let mut offset = header.first_ifd_offset;

    while offset != 0 {
        if ifds.len() == MAX_IFDS {
            warn!(
                source = reader.identifier(),
                "IFD chain longer than {} entries, ignoring the rest", MAX_IFDS
            );
            break;
        }
        if !seen.insert(offset) {
            return Err(TiffError::IfdLoop(offset));
        }

        let count_size = header.ifd_count_size() as u64;
        if offset.checked_add(count_size).map_or(true, |end| end > size) {
            return Err(TiffError::InvalidIfdOffset(offset));
        }
        let count_bytes = reader.read_exact_at(offset, count_size as usize).await?;
        let entry_count = header.read_entry_count(&count_bytes)?;

        let ifd_size = Ifd::calculate_size(entry_count, header) as u64;
        if offset + ifd_size > size {
            return Err(TiffError::InvalidTagValue {
                tag: "IFD",
                message: format!(
                    "directory at {} with {} entries runs past the end of the file",
                    offset, entry_count
                ),
            });
        }
        let ifd_bytes = reader.read_exact_at(offset, ifd_size as usize).await?;
        let ifd = Ifd::parse(&ifd_bytes, offset, header)?;

        offset = ifd.next_ifd_offset;
        ifds.push(ifd);
    }

    Ok(ifds)
}

/// One resolution level of the pyramid: tile grid, tile directory and
/// georeferencing.
#[derive(Debug, Clone)]
pub struct OverviewLevel {
    /// 0 is full resolution; larger is coarser
    pub index: usize,

    /// Position of the IFD in the file's chain
    pub ifd_index: usize,

    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_across: u32,
    pub tiles_down: u32,

    /// Compression code, may differ between levels
    pub compression: u16,
    pub predictor: u16,

    /// Byte offset per tile, row-major
    pub tile_offsets: Vec<u64>,
    pub tile_byte_counts: Vec<u64>,

    /// Shared JPEG tables for abbreviated tile streams
    pub jpeg_tables: Option<Bytes>,

    /// Pixel grid to CRS for this level
    pub transform: Affine,

    /// Base width over this level's width
    pub decimation: f64,
}

impl OverviewLevel {
    /// Read the tile layout and directory of a tiled IFD.
    ///
    /// `transform` and `decimation` are left at identity; the caller fills
    /// them in once the base level is known.
    pub(crate) async fn read<R: RangeReader + ?Sized>(
        values: &ValueReader<'_, R>,
        ifd: &Ifd,
        ifd_index: usize,
        file_size: u64,
    ) -> Result<Self, TiffError> {
        let bo = values.byte_order();

        if !ifd.has_tag(TiffTag::TileWidth) {
            if ifd.has_tag(TiffTag::StripOffsets) {
                return Err(TiffError::StripOrganization);
            }
            return Err(TiffError::MissingTag(TiffTag::TileWidth.name()));
        }

        let width = ifd.require_u32(TiffTag::ImageWidth, bo)?;
        let height = ifd.require_u32(TiffTag::ImageLength, bo)?;
        if width == 0 || height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "ImageWidth",
                message: format!("empty image {}x{}", width, height),
            });
        }

        let tile_width = ifd.require_u32(TiffTag::TileWidth, bo)?;
        let tile_height = ifd.require_u32(TiffTag::TileLength, bo)?;
        for (tag, value) in [(TiffTag::TileWidth, tile_width), (TiffTag::TileLength, tile_height)] {
            if value == 0 || value % TILE_ALIGNMENT != 0 {
                return Err(TiffError::InvalidTagValue {
                    tag: tag.name(),
                    message: format!("{} is not a positive multiple of {}", value, TILE_ALIGNMENT),
                });
            }
        }

        let samples = ifd.inline_u32(TiffTag::SamplesPerPixel, bo).unwrap_or(1);
        let planar = ifd.inline_u32(TiffTag::PlanarConfiguration, bo).unwrap_or(1);
        if planar != 1 && samples > 1 {
            return Err(TiffError::Unsupported(
                "separate band planes (PlanarConfiguration=2)".to_string(),
            ));
        }

        let compression = ifd.inline_u32(TiffTag::Compression, bo).unwrap_or(1) as u16;
        let predictor = ifd.inline_u32(TiffTag::Predictor, bo).unwrap_or(1) as u16;

        let tiles_across = width.div_ceil(tile_width);
        let tiles_down = height.div_ceil(tile_height);
        let expected = tiles_across as u64 * tiles_down as u64;

        let offsets_entry = ifd
            .get_entry_by_tag(TiffTag::TileOffsets)
            .ok_or(TiffError::MissingTag(TiffTag::TileOffsets.name()))?;
        let counts_entry = ifd
            .get_entry_by_tag(TiffTag::TileByteCounts)
            .ok_or(TiffError::MissingTag(TiffTag::TileByteCounts.name()))?;

        // both counts are checked before reading either array
        for entry in [offsets_entry, counts_entry] {
            if entry.count != expected {
                return Err(TiffError::TileCountMismatch {
                    level: ifd_index,
                    expected,
                    actual: entry.count,
                });
            }
        }

        let tile_offsets = values.read_u64_array(offsets_entry).await?;
        let tile_byte_counts = values.read_u64_array(counts_entry).await?;

        for (index, (&offset, &length)) in tile_offsets.iter().zip(&tile_byte_counts).enumerate() {
            if length == 0 {
                continue;
            }
            if offset.checked_add(length).map_or(true, |end| end > file_size) {
                return Err(TiffError::TileOutOfFile {
                    level: ifd_index,
                    index,
                    offset,
                    length,
                    file_size,
                });
            }
        }

        let jpeg_tables = match ifd.get_entry_by_tag(TiffTag::JpegTables) {
            Some(entry) if compression == 7 => Some(values.read_bytes(entry).await?),
            _ => None,
        };

        Ok(OverviewLevel {
            index: 0,
            ifd_index,
            width,
            height,
            tile_width,
            tile_height,
            tiles_across,
            tiles_down,
            compression,
            predictor,
            tile_offsets,
            tile_byte_counts,
            jpeg_tables,
            transform: Affine::identity(),
            decimation: 1.0,
        })
    }

    pub fn tile_count(&self) -> usize {
        self.tile_offsets.len()
    }

    /// Row-major index of tile (col, row), `None` outside the grid.
    pub fn tile_index(&self, col: u32, row: u32) -> Option<usize> {
        if col >= self.tiles_across || row >= self.tiles_down {
            return None;
        }
        Some(row as usize * self.tiles_across as usize + col as usize)
    }

    /// Byte range of a tile; `None` for sparse tiles, which read as masked.
    pub fn tile_range(&self, index: usize) -> Option<ByteRange> {
        let offset = *self.tile_offsets.get(index)?;
        let length = *self.tile_byte_counts.get(index)?;
        (length > 0).then(|| ByteRange::new(offset, length))
    }

    /// Pixel size of the part of tile (col, row) inside the image.
    ///
    /// Edge tiles are stored at full size; the padding is not image data.
    pub fn valid_tile_size(&self, col: u32, row: u32) -> (u32, u32) {
        let w = self.width.saturating_sub(col * self.tile_width).min(self.tile_width);
        let h = self.height.saturating_sub(row * self.tile_height).min(self.tile_height);
        (w, h)
    }

    /// Pixel size in CRS units along x and y.
    pub fn resolution(&self) -> (f64, f64) {
        self.transform.resolution()
    }

    /// Derive this level's transform from the base level's.
    pub(crate) fn georeference(&mut self, base: &Affine, base_width: u32, base_height: u32) {
        let sx = base_width as f64 / self.width as f64;
        let sy = base_height as f64 / self.height as f64;
        self.transform = base.scale(sx, sy);
        self.decimation = sx;
    }
}

/// Order levels from finest to coarsest and assign indexes.
///
/// Levels no narrower than the previous one are dropped: they duplicate a
/// resolution already present or break the pyramid order.
pub(crate) fn order_levels(base: OverviewLevel, mut overviews: Vec<OverviewLevel>) -> Vec<OverviewLevel> {
    overviews.sort_by(|a, b| b.width.cmp(&a.width).then(b.height.cmp(&a.height)));

    let mut levels = vec![base];
    for level in overviews {
        let previous_width = levels[levels.len() - 1].width;
        if level.width >= previous_width {
            warn!(
                ifd = level.ifd_index,
                width = level.width,
                "ignoring overview that is not smaller than the level above it"
            );
            continue;
        }
        levels.push(level);
    }
    for (index, level) in levels.iter_mut().enumerate() {
        level.index = index;
    }
    levels
}
