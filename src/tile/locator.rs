//! Tile Locator: from a web tile to internal tiles of one pyramid level.
//!
//! The tile's footprint is taken into the raster's CRS, the coarsest level
//! whose resolution is still at least as fine as the request is chosen, and
//! the footprint's pixel window on that level (padded by the resampling
//! kernel radius) gives the internal tiles to read.

use tracing::debug;

use crate::error::TileError;
use crate::format::RasterMetadata;
use crate::geo::{Affine, Bounds, Crs, CrsTransform};
use crate::io::ByteRange;

use super::request::TileRequest;

/// Points per edge when transforming a tile footprint between CRSs.
pub const DENSIFY_POINTS: usize = 21;

/// Relative slack when comparing level and request resolutions.
const RESOLUTION_EPSILON: f64 = 1e-9;

/// Fraction of a source pixel below which footprints count as touching.
const EDGE_TOLERANCE: f64 = 1e-6;

/// Window edges this close to a pixel boundary snap onto it.
const PIXEL_EPSILON: f64 = 1e-6;

/// One internal tile of the selected level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalTileRef {
    pub level: usize,
    pub row: u32,
    pub col: u32,

    /// Row-major position in the level's tile directory
    pub index: usize,

    /// `None` for sparse tiles
    pub range: Option<ByteRange>,

    pub compression: u16,
}

/// A pixel window on one level, already clipped to the level's extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelWindow {
    pub col_off: u32,
    pub row_off: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelWindow {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn col_end(&self) -> u32 {
        self.col_off + self.width
    }

    pub fn row_end(&self) -> u32 {
        self.row_off + self.height
    }
}

/// The exact output pixel grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DestinationGrid {
    pub transform: Affine,
    pub width: u32,
    pub height: u32,
    pub crs: Crs,
}

/// Everything the later stages need to produce one tile.
#[derive(Debug, Clone)]
pub struct TileLocation {
    pub level: usize,

    /// The request is finer than the full-resolution level
    pub upsampling: bool,

    pub window: PixelWindow,

    /// Internal tiles covering `window`, row-major
    pub tiles: Vec<InternalTileRef>,

    pub destination: DestinationGrid,

    /// Pixel grid of the selected level
    pub level_transform: Affine,

    /// Footprint of the tile in the raster's CRS
    pub footprint: Bounds,
}

impl TileLocation {
    /// Pixel grid of `window` on the selected level.
    pub fn window_transform(&self) -> Affine {
        self.level_transform
            .translate_pixels(self.window.col_off as f64, self.window.row_off as f64)
    }
}

/// Build a transform between two CRSs as a `TileError`.
pub(crate) fn crs_transform(src: Crs, dst: Crs) -> Result<CrsTransform, TileError> {
    CrsTransform::new(src, dst).map_err(|e| {
        TileError::unsupported_format(format!("cannot transform {} to {}: {}", src, dst, e))
    })
}

/// Internal tiles of `level` overlapping `window`, row-major.
pub fn tiles_for_window(
    metadata: &RasterMetadata,
    level_index: usize,
    window: &PixelWindow,
) -> Vec<InternalTileRef> {
    let Some(level) = metadata.level(level_index) else {
        return Vec::new();
    };
    if window.is_empty() {
        return Vec::new();
    }
    let first_col = window.col_off / level.tile_width;
    let last_col = (window.col_end() - 1) / level.tile_width;
    let first_row = window.row_off / level.tile_height;
    let last_row = (window.row_end() - 1) / level.tile_height;

    let mut tiles = Vec::new();
    for row in first_row..=last_row {
        for col in first_col..=last_col {
            let Some(index) = level.tile_index(col, row) else {
                continue;
            };
            tiles.push(InternalTileRef {
                level: level_index,
                row,
                col,
                index,
                range: level.tile_range(index),
                compression: level.compression,
            });
        }
    }
    tiles
}

/// Pick the level to read for a request resolution.
///
/// Returns the coarsest level whose resolution does not exceed `target_res`,
/// or level 0 with `upsampling = true` when even level 0 is too coarse.
pub fn select_level(metadata: &RasterMetadata, target_res: f64) -> (usize, bool) {
    let limit = target_res * (1.0 + RESOLUTION_EPSILON);
    let selected = metadata
        .levels
        .iter()
        .enumerate()
        .filter(|(_, level)| {
            let (rx, ry) = level.resolution();
            rx.min(ry) <= limit
        })
        .map(|(i, _)| i)
        .last();

    match selected {
        Some(index) => (index, false),
        None => (0, true),
    }
}

/// Map a web tile to the internal tiles that cover it.
pub fn locate(metadata: &RasterMetadata, request: &TileRequest) -> Result<TileLocation, TileError> {
    let (z, x, y) = (request.z, request.x, request.y);
    if !request.tms.contains_tile(z, x, y) {
        return Err(TileError::invalid_request(format!(
            "tile {}/{}/{} is not in {}",
            z, x, y, request.tms
        )));
    }

    let size = request.tile_size();
    let tile_bounds = request.tms.tile_bounds(z, x, y);
    let destination = DestinationGrid {
        transform: Affine::from_bounds(&tile_bounds, size, size),
        width: size,
        height: size,
        crs: request.tms.crs(),
    };

    let to_source = crs_transform(destination.crs, metadata.crs)?;
    let footprint = to_source
        .transform_bounds(&tile_bounds, DENSIFY_POINTS)
        .ok_or(TileError::OutOfBounds { z, x, y })?;

    let raster_bounds = metadata.bounds();
    let (base_rx, base_ry) = metadata.transform.resolution();
    let tolerance = EDGE_TOLERANCE * base_rx.min(base_ry);
    if !footprint.intersects(&raster_bounds, tolerance) {
        return Err(TileError::OutOfBounds { z, x, y });
    }

    let target_res = (footprint.width() / size as f64).min(footprint.height() / size as f64);
    let (level_index, upsampling) = select_level(metadata, target_res);
    let level = &metadata.levels[level_index];

    let inverse = level.transform.inverse().ok_or_else(|| TileError::CorruptMetadata {
        reason: format!("level {} has a degenerate geotransform", level_index),
    })?;
    let pixel_bounds = Bounds::from_points([
        inverse.apply(footprint.left, footprint.top),
        inverse.apply(footprint.right, footprint.top),
        inverse.apply(footprint.left, footprint.bottom),
        inverse.apply(footprint.right, footprint.bottom),
    ])
    .ok_or(TileError::OutOfBounds { z, x, y })?;

    let pad = request.resampling.radius() as f64;
    let clip = |v: f64, max: u32| v.clamp(0.0, max as f64) as u32;
    let col_start = clip((pixel_bounds.left + PIXEL_EPSILON).floor() - pad, level.width);
    let col_end = clip((pixel_bounds.right - PIXEL_EPSILON).ceil() + pad, level.width);
    let row_start = clip((pixel_bounds.bottom + PIXEL_EPSILON).floor() - pad, level.height);
    let row_end = clip((pixel_bounds.top - PIXEL_EPSILON).ceil() + pad, level.height);
    let window = PixelWindow {
        col_off: col_start,
        row_off: row_start,
        width: col_end.saturating_sub(col_start),
        height: row_end.saturating_sub(row_start),
    };

    let tiles = tiles_for_window(metadata, level_index, &window);

    debug!(
        source = %metadata.identifier,
        z, x, y,
        level = level_index,
        upsampling,
        target_res,
        tiles = tiles.len(),
        "located tile"
    );

    Ok(TileLocation {
        level: level_index,
        upsampling,
        window,
        tiles,
        destination,
        level_transform: level.transform,
        footprint,
    })
}
