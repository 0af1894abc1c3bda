//! # cog-tiler
//!
//! Dynamic web map tiles from Cloud-Optimized GeoTIFFs (COGs).
//!
//! A tile request is answered by reading only the byte ranges of the
//! internal tiles it touches, from a local file, an HTTP(S) server or S3.
//! Those tiles are decoded, mosaicked, resampled onto the requested tile
//! grid and encoded as PNG, JPEG, WebP or raw NPY arrays.
//!
//! ## Architecture
//!
//! - [`io`] - range readers, retries, the shared byte-range cache
//! - [`mod@format`] - TIFF/BigTIFF and GeoTIFF metadata parsing
//! - [`geo`] - affine transforms, CRS transforms, tile matrix sets
//! - [`source`] - source URIs, backends and the metadata registry
//! - [`tile`] - locating, decoding, resampling, rendering and encoding
//! - [`config`] - pipeline settings and the command-line interface
//!
//! ## Example
//!
//! ```rust,no_run
//! use cog_tiler::{PipelineConfig, RasterSource, TilePipeline, TileRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cog_tiler::TileError> {
//!     let pipeline = TilePipeline::new(PipelineConfig::default())?;
//!     let source = RasterSource::new("https://example.com/imagery/cog.tif");
//!     let tile = pipeline
//!         .produce_tile(&source, &TileRequest::new(12, 2048, 1360))
//!         .await?;
//!     println!("{} bytes of {}", tile.len(), tile.mime_type);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod geo;
pub mod io;
pub mod source;
pub mod tile;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{IoError, TiffError, TileError};
pub use format::RasterMetadata;
pub use geo::TileMatrixSet;
pub use io::{RangeCache, RangeReader};
pub use source::{Credentials, MetadataRegistry, RasterSource, SourceResolver, UriResolver};
pub use tile::{
    BandStatistics, Colormap, EncodedTile, OutputFormat, RasterInfo, RenderOptions, Resampling,
    StatisticsOptions, TileJson, TilePipeline, TileRequest, Transparency, WmtsOptions,
};
