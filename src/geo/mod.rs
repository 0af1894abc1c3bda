//! Georeferencing: affine transforms, CRS transforms and tile grids.

mod affine;
mod crs;
mod tms;

pub use affine::{Affine, Bounds};
pub use crs::{lon_lat_to_mercator, mercator_to_lon_lat, Crs, CrsTransform, MAX_MERCATOR_LAT};
pub use tms::{TileMatrixSet, BASE_TILE_SIZE, MAX_ZOOM};
