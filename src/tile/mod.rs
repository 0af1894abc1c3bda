//! Tile production.
//!
//! A web map tile is built in stages, each in its own module:
//!
//! ```text
//! TileRequest ─▶ locator ─▶ (range reads) ─▶ decoder ─▶ resample ─▶ render ─▶ encoder
//!                  │                                                          │
//!           InternalTileRefs                                            EncodedTile
//! ```
//!
//! [`TilePipeline`] sequences the stages and also serves dataset info,
//! TileJSON, WMTS capabilities and statistics.

pub mod buffer;
pub mod colormap;
pub mod decoder;
pub mod encoder;
pub mod info;
pub mod locator;
pub mod render;
pub mod request;
pub mod resample;
pub mod service;
pub mod statistics;

pub use buffer::{Mask, PixelBuffer};
pub use colormap::Colormap;
pub use decoder::{decode_tile, decoder_for, Decoder, TileLayout};
pub use encoder::{encode_tile, EncodedTile, Encoder, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY};
pub use info::{RasterInfo, TileJson, WmtsOptions};
pub use locator::{locate, select_level, InternalTileRef, PixelWindow, TileLocation};
pub use render::RenderedTile;
pub use request::{
    OutputFormat, RenderOptions, Resampling, TileRequest, Transparency, DEFAULT_JPEG_QUALITY,
    MAX_TILE_SCALE,
};
pub use service::TilePipeline;
pub use statistics::{BandStatistics, Histogram, StatisticsOptions};
