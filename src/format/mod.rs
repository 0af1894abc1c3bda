//! Cloud-Optimized GeoTIFF parsing.
//!
//! [`RasterMetadata::parse`] turns the header and directories of a TIFF or
//! BigTIFF file into the structure the tile pipeline works from: overview
//! levels with their tile directories, band layout, nodata, CRS and
//! geotransform.

pub mod detect;
pub mod geotiff;
pub mod jpeg;
pub mod metadata;
pub mod tiff;

pub use detect::{detect_container, ContainerFormat};
pub use metadata::{ColorInterp, DataType, NodataKind, RasterMetadata, HEADER_PREFETCH_BYTES};
pub use tiff::OverviewLevel;
