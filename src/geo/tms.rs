//! Built-in tile matrix sets (OGC TMS 2.0 identifiers).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::affine::{Affine, Bounds};
use super::crs::Crs;

/// Highest zoom level accepted in tile requests.
pub const MAX_ZOOM: u8 = 24;

/// Tile edge in pixels at scale 1.
pub const BASE_TILE_SIZE: u32 = 256;

const MERCATOR_HALF_EXTENT: f64 = 20_037_508.342_789_244;

const EPSG3413_HALF_EXTENT: f64 = 4_194_304.0;

/// Standardized rendering pixel size in metres (OGC WMTS).
const STANDARD_PIXEL_SIZE: f64 = 0.00028;

/// Metres per degree on the WGS84 equator.
const METERS_PER_DEGREE: f64 = 2.0 * std::f64::consts::PI * 6_378_137.0 / 360.0;

/// Relative tolerance when comparing resolutions.
const RES_EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileMatrixSet {
    #[default]
    WebMercatorQuad,
    #[serde(rename = "WorldCRS84Quad")]
    WorldCrs84Quad,
    #[serde(rename = "EPSG3413")]
    Epsg3413,
}

impl TileMatrixSet {
    pub const ALL: [TileMatrixSet; 3] = [
        TileMatrixSet::WebMercatorQuad,
        TileMatrixSet::WorldCrs84Quad,
        TileMatrixSet::Epsg3413,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            TileMatrixSet::WebMercatorQuad => "WebMercatorQuad",
            TileMatrixSet::WorldCrs84Quad => "WorldCRS84Quad",
            TileMatrixSet::Epsg3413 => "EPSG3413",
        }
    }

    pub fn crs(&self) -> Crs {
        match self {
            TileMatrixSet::WebMercatorQuad => Crs::WEB_MERCATOR,
            TileMatrixSet::WorldCrs84Quad => Crs::WGS84,
            TileMatrixSet::Epsg3413 => Crs(3413),
        }
    }

    /// Full extent of the grid in its CRS.
    pub fn bounds(&self) -> Bounds {
        match self {
            TileMatrixSet::WebMercatorQuad => Bounds::new(
                -MERCATOR_HALF_EXTENT,
                -MERCATOR_HALF_EXTENT,
                MERCATOR_HALF_EXTENT,
                MERCATOR_HALF_EXTENT,
            ),
            TileMatrixSet::WorldCrs84Quad => Bounds::new(-180.0, -90.0, 180.0, 90.0),
            TileMatrixSet::Epsg3413 => Bounds::new(
                -EPSG3413_HALF_EXTENT,
                -EPSG3413_HALF_EXTENT,
                EPSG3413_HALF_EXTENT,
                EPSG3413_HALF_EXTENT,
            ),
        }
    }

    /// Matrix width and height (tiles) at zoom `z`.
    pub fn matrix_size(&self, z: u8) -> (u32, u32) {
        let n = 1u32 << z.min(MAX_ZOOM);
        match self {
            TileMatrixSet::WebMercatorQuad => (n, n),
            TileMatrixSet::WorldCrs84Quad => (2 * n, n),
            TileMatrixSet::Epsg3413 => (2 * n, 2 * n),
        }
    }

    pub fn contains_tile(&self, z: u8, x: u32, y: u32) -> bool {
        let (cols, rows) = self.matrix_size(z);
        z <= MAX_ZOOM && x < cols && y < rows
    }

    /// Extent of tile (z, x, y); row 0 is the top row.
    pub fn tile_bounds(&self, z: u8, x: u32, y: u32) -> Bounds {
        let extent = self.bounds();
        let (cols, rows) = self.matrix_size(z);
        let tw = extent.width() / cols as f64;
        let th = extent.height() / rows as f64;
        Bounds::new(
            extent.left + x as f64 * tw,
            extent.top - (y + 1) as f64 * th,
            extent.left + (x + 1) as f64 * tw,
            extent.top - y as f64 * th,
        )
    }

    /// Pixel grid of a tile rendered at `size × size`.
    pub fn tile_transform(&self, z: u8, x: u32, y: u32, size: u32) -> Affine {
        Affine::from_bounds(&self.tile_bounds(z, x, y), size, size)
    }

    /// Cell size at zoom `z` for 256-pixel tiles.
    pub fn resolution(&self, z: u8) -> f64 {
        let (cols, _) = self.matrix_size(z);
        self.bounds().width() / (cols as f64 * BASE_TILE_SIZE as f64)
    }

    /// WMTS scale denominator of zoom `z` for tiles of `tile_size` pixels.
    pub fn scale_denominator(&self, z: u8, tile_size: u32) -> f64 {
        let meters_per_unit = if self.crs().is_geographic() {
            METERS_PER_DEGREE
        } else {
            1.0
        };
        let res = self.resolution(z) * BASE_TILE_SIZE as f64 / tile_size as f64;
        res * meters_per_unit / STANDARD_PIXEL_SIZE
    }

    /// OGC well-known scale set the grid belongs to, if any.
    pub fn well_known_scale_set(&self) -> Option<&'static str> {
        match self {
            TileMatrixSet::WebMercatorQuad => {
                Some("http://www.opengis.net/def/wkss/OGC/1.0/GoogleMapsCompatible")
            }
            TileMatrixSet::WorldCrs84Quad => {
                Some("http://www.opengis.net/def/wkss/OGC/1.0/GoogleCRS84Quad")
            }
            TileMatrixSet::Epsg3413 => None,
        }
    }

    /// Zoom level matching a resolution, choosing between the two
    /// neighbouring levels by the smaller resolution ratio.
    pub fn zoom_for_resolution(&self, res: f64, min_zoom: u8, max_zoom: u8) -> u8 {
        let max_zoom = max_zoom.min(MAX_ZOOM);
        let mut zoom = min_zoom;
        let mut matrix_res = self.resolution(zoom);
        while zoom < max_zoom {
            if res > matrix_res || (res - matrix_res).abs() / matrix_res <= RES_EPSILON {
                break;
            }
            zoom += 1;
            matrix_res = self.resolution(zoom);
        }

        if zoom > 0 && (res - matrix_res).abs() / matrix_res > RES_EPSILON {
            let coarser = zoom.saturating_sub(1).max(min_zoom);
            if self.resolution(coarser) / res < res / matrix_res {
                zoom = coarser;
            }
        }
        zoom
    }

    /// Tiles at zoom `z` that intersect `bounds` (given in the grid's CRS),
    /// as inclusive `(min_x, min_y, max_x, max_y)`.
    pub fn tile_range(&self, bounds: &Bounds, z: u8) -> Option<(u32, u32, u32, u32)> {
        let extent = self.bounds();
        let clipped = extent.intersection(bounds)?;
        let (cols, rows) = self.matrix_size(z);
        let tw = extent.width() / cols as f64;
        let th = extent.height() / rows as f64;
        let col = |x: f64| (((x - extent.left) / tw).floor().max(0.0) as u32).min(cols - 1);
        let row = |y: f64| (((extent.top - y) / th).floor().max(0.0) as u32).min(rows - 1);
        Some((
            col(clipped.left),
            row(clipped.top),
            col(clipped.right),
            row(clipped.bottom),
        ))
    }
}

impl fmt::Display for TileMatrixSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TileMatrixSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TileMatrixSet::ALL
            .into_iter()
            .find(|tms| tms.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown tile matrix set '{}'", s))
    }
}
