//! Tile pipeline: the orchestrator behind every tile request.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          TilePipeline                            │
//! │  produce_tile()                                                  │
//! │   1. validate request      5. decode tiles (blocking pool)       │
//! │   2. metadata (registry)   6. mosaic + nodata/alpha mask         │
//! │   3. locate level/window   7. resample onto the tile grid        │
//! │   4. fetch byte ranges     8. render + encode                    │
//! └──────────────────────────────────────────────────────────────────┘
//!        │                 │                         │
//!        ▼                 ▼                         ▼
//!  MetadataRegistry   RangeReader (+cache)   Decoder / Encoder tables
//! ```
//!
//! Everything after the metadata lookup is request-scoped. Decoded tiles
//! are merged in directory order regardless of which finished first, so
//! identical requests give identical bytes.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, instrument};

use crate::config::PipelineConfig;
use crate::error::TileError;
use crate::format::RasterMetadata;
use crate::geo::TileMatrixSet;
use crate::io::{fetch_ranges, RangeCache};
use crate::source::{MetadataRegistry, OpenedSource, RasterSource, SourceResolver, UriResolver};

use super::buffer::{Mask, PixelBuffer};
use super::decoder::{decode_tile, decoder_for, TileLayout};
use super::encoder::{encode_tile, EncodedTile};
use super::info::{
    raster_info, tilejson, wmts_capabilities, RasterInfo, TileJson, WmtsOptions,
};
use super::locator::{
    crs_transform, locate, tiles_for_window, DestinationGrid, InternalTileRef, PixelWindow,
};
use super::render::{
    effective_colormap, raw_bands, render_image, resolve_format, select_bands, select_raw_bands,
    validate_for_raster, RenderedTile,
};
use super::request::{OutputFormat, TileRequest, Transparency};
use super::resample::{resample, SourceWindow};
use super::statistics::{compute_statistics, statistics_level, BandStatistics, StatisticsOptions};

/// Produces map tiles, metadata and statistics from raster sources.
///
/// The pipeline owns the metadata registry; it is cheap to share behind an
/// `Arc` between request handlers.
pub struct TilePipeline {
    registry: MetadataRegistry,
    config: PipelineConfig,
}

impl TilePipeline {
    /// Pipeline over local, HTTP(S) and S3 sources.
    pub fn new(config: PipelineConfig) -> Result<Self, TileError> {
        let cache = Arc::new(RangeCache::new(config.range_cache_bytes));
        let resolver = UriResolver::new(
            cache,
            config.retry,
            config.http_timeout,
            config.s3.clone(),
        )?;
        Ok(Self::with_resolver(config, Arc::new(resolver)))
    }

    /// Pipeline over a custom source backend.
    pub fn with_resolver(config: PipelineConfig, resolver: Arc<dyn SourceResolver>) -> Self {
        let registry =
            MetadataRegistry::with_capacity(resolver, config.metadata_capacity, config.metadata_ttl);
        Self { registry, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    /// Parsed metadata of a source.
    pub async fn metadata(&self, source: &RasterSource) -> Result<Arc<RasterMetadata>, TileError> {
        Ok(Arc::clone(&self.registry.get(source).await?.metadata))
    }

    /// Produce one encoded map tile.
    ///
    /// Request validation happens before any I/O. Out-of-extent tiles fail
    /// with [`TileError::OutOfBounds`] unless the request opts into a fully
    /// transparent tile.
    #[instrument(skip_all, fields(source = %source, z = request.z, x = request.x, y = request.y))]
    pub async fn produce_tile(
        &self,
        source: &RasterSource,
        request: &TileRequest,
    ) -> Result<EncodedTile, TileError> {
        request.validate()?;

        let opened = self.registry.get(source).await?;
        let metadata = Arc::clone(&opened.metadata);
        validate_for_raster(&request.render, &metadata)?;

        let location = match locate(&metadata, request) {
            Ok(location) => location,
            Err(TileError::OutOfBounds { .. }) if request.fill_out_of_bounds => {
                debug!("tile outside raster, filling");
                let size = request.tile_size();
                let pixels = PixelBuffer::new(metadata.bands, size, size, metadata.dtype);
                let mask = Mask::new(size, size, false);
                return self.finish(pixels, mask, request, metadata).await;
            }
            Err(e) => return Err(e),
        };

        let nodata = request.render.nodata.or(metadata.nodata);
        let (window_pixels, window_mask) = self
            .read_window(&opened, location.level, &location.window, &location.tiles, nodata)
            .await?;

        let source_transform = location.window_transform();
        let destination: DestinationGrid = location.destination;
        let kernel = request.resampling;
        let source_crs = metadata.crs;
        let (pixels, mask) = tokio::task::spawn_blocking(move || {
            let to_source = crs_transform(destination.crs, source_crs)?;
            resample(
                SourceWindow {
                    pixels: &window_pixels,
                    mask: &window_mask,
                    transform: source_transform,
                },
                &to_source,
                &destination,
                kernel,
            )
        })
        .await
        .map_err(join_error)??;

        self.finish(pixels, mask, request, metadata).await
    }

    /// Render and encode a resampled tile on the blocking pool.
    async fn finish(
        &self,
        pixels: PixelBuffer,
        mask: Mask,
        request: &TileRequest,
        metadata: Arc<RasterMetadata>,
    ) -> Result<EncodedTile, TileError> {
        let request = request.clone();
        let default_quality = self.config.jpeg_quality;
        tokio::task::spawn_blocking(move || {
            render_tile(&pixels, &mask, &request, &metadata, default_quality)
        })
        .await
        .map_err(join_error)?
    }

    /// Fetch, decode and mosaic the internal tiles covering `window`.
    ///
    /// Pixels outside any stored tile (sparse tiles, padding) stay masked,
    /// as do nodata pixels and pixels with zero alpha.
    async fn read_window(
        &self,
        opened: &OpenedSource,
        level_index: usize,
        window: &PixelWindow,
        tiles: &[InternalTileRef],
        nodata: Option<f64>,
    ) -> Result<(PixelBuffer, Mask), TileError> {
        let metadata = &opened.metadata;
        let level = metadata.level(level_index).ok_or_else(|| TileError::CorruptMetadata {
            reason: format!("level {} does not exist", level_index),
        })?;
        let mut pixels = PixelBuffer::new(metadata.bands, window.width, window.height, metadata.dtype);
        let mut mask = Mask::new(window.width, window.height, false);
        if window.is_empty() {
            return Ok((pixels, mask));
        }

        let present: Vec<InternalTileRef> = tiles.iter().filter(|t| t.range.is_some()).copied().collect();
        if !present.is_empty() {
            decoder_for(level.compression)?;
        }
        let ranges: Vec<_> = present.iter().filter_map(|t| t.range).collect();
        let parallelism = self.config.max_concurrent_fetches.max(1);
        let data = fetch_ranges(
            opened.reader.as_ref(),
            &ranges,
            self.config.range_merge_gap,
            parallelism,
        )
        .await?;

        let layout = TileLayout::for_level(metadata, level);
        let decoded: Vec<(InternalTileRef, PixelBuffer)> = stream::iter(present.into_iter().zip(data))
            .map(|(tile, bytes)| {
                let layout = layout.clone();
                async move {
                    let buffer = tokio::task::spawn_blocking(move || decode_tile(&bytes, &layout))
                        .await
                        .map_err(join_error)??;
                    Ok::<_, TileError>((tile, buffer))
                }
            })
            .buffered(parallelism)
            .try_collect()
            .await?;

        for (tile, buffer) in &decoded {
            let tile_col0 = tile.col * level.tile_width;
            let tile_row0 = tile.row * level.tile_height;
            let (valid_w, valid_h) = level.valid_tile_size(tile.col, tile.row);

            let col0 = tile_col0.max(window.col_off);
            let row0 = tile_row0.max(window.row_off);
            let col1 = (tile_col0 + valid_w).min(window.col_end());
            let row1 = (tile_row0 + valid_h).min(window.row_end());
            if col1 <= col0 || row1 <= row0 {
                continue;
            }
            pixels.copy_region(
                buffer,
                col0 - tile_col0,
                row0 - tile_row0,
                col0 - window.col_off,
                row0 - window.row_off,
                col1 - col0,
                row1 - row0,
            );
            mask.fill_region(
                col0 - window.col_off,
                row0 - window.row_off,
                col1 - col0,
                row1 - row0,
                true,
            );
        }

        mask_invalid(&pixels, &mut mask, nodata, metadata.alpha_band());
        debug!(
            level = level_index,
            tiles = decoded.len(),
            sparse = tiles.len() - decoded.len(),
            valid = mask.count_valid(),
            "read window"
        );
        Ok((pixels, mask))
    }

    /// Dataset summary.
    pub async fn info(&self, source: &RasterSource) -> Result<RasterInfo, TileError> {
        let metadata = self.metadata(source).await?;
        raster_info(&metadata)
    }

    /// TileJSON document for a source served under `url_template`.
    pub async fn tilejson(
        &self,
        source: &RasterSource,
        tms: TileMatrixSet,
        url_template: &str,
    ) -> Result<TileJson, TileError> {
        let metadata = self.metadata(source).await?;
        tilejson(&metadata, source.name(), tms, url_template)
    }

    /// WMTS capabilities XML for a source whose tiles live under `endpoint`.
    pub async fn wmts_capabilities(
        &self,
        source: &RasterSource,
        endpoint: &str,
        options: &WmtsOptions,
    ) -> Result<String, TileError> {
        let metadata = self.metadata(source).await?;
        wmts_capabilities(&metadata, &source.name(), endpoint, options)
    }

    /// Per-band statistics over one whole overview level.
    pub async fn statistics(
        &self,
        source: &RasterSource,
        options: &StatisticsOptions,
    ) -> Result<Vec<BandStatistics>, TileError> {
        options.validate()?;
        let opened = self.registry.get(source).await?;
        let metadata = &opened.metadata;
        let bands = options.select_bands(metadata)?;

        let level_index = statistics_level(metadata, options.max_size);
        let level = &metadata.levels[level_index];
        let window = PixelWindow {
            col_off: 0,
            row_off: 0,
            width: level.width,
            height: level.height,
        };
        let tiles = tiles_for_window(metadata, level_index, &window);
        debug!(level = level_index, width = level.width, height = level.height, "statistics level");

        let nodata = options.nodata.or(metadata.nodata);
        let (pixels, mask) = self
            .read_window(&opened, level_index, &window, &tiles, nodata)
            .await?;
        let options = options.clone();
        tokio::task::spawn_blocking(move || compute_statistics(&pixels, &mask, &bands, &options))
            .await
            .map_err(join_error)
    }

    /// Forget a source's metadata and cached byte ranges.
    pub async fn invalidate(&self, source: &RasterSource) -> bool {
        self.registry.invalidate(source).await
    }
}

fn join_error(err: tokio::task::JoinError) -> TileError {
    TileError::decode(format!("worker task failed: {}", err))
}

/// Mask pixels whose non-alpha samples all equal `nodata`, and pixels whose
/// alpha sample is zero.
fn mask_invalid(pixels: &PixelBuffer, mask: &mut Mask, nodata: Option<f64>, alpha: Option<usize>) {
    if nodata.is_none() && alpha.is_none() {
        return;
    }
    let is_nodata = |v: f64| match nodata {
        Some(nd) if nd.is_nan() => v.is_nan(),
        Some(nd) => v == nd,
        None => false,
    };
    let data_bands: Vec<usize> = (0..pixels.bands).filter(|&b| Some(b) != alpha).collect();

    for row in 0..pixels.height {
        for col in 0..pixels.width {
            if !mask.get(col, row) {
                continue;
            }
            let transparent = alpha.is_some_and(|a| pixels.get(a, col, row) == 0.0);
            let empty = nodata.is_some()
                && !data_bands.is_empty()
                && data_bands.iter().all(|&b| is_nodata(pixels.get(b, col, row)));
            if transparent || empty {
                mask.set(col, row, false);
            }
        }
    }
}

/// Select bands, render and encode.
fn render_tile(
    pixels: &PixelBuffer,
    mask: &Mask,
    request: &TileRequest,
    metadata: &RasterMetadata,
    default_quality: u8,
) -> Result<EncodedTile, TileError> {
    let options = &request.render;
    let quality = options.jpeg_quality.unwrap_or(default_quality);

    if request.format == OutputFormat::Raw {
        let bands = select_raw_bands(options, metadata)?;
        let tile = RenderedTile::Raw {
            pixels: raw_bands(pixels, &bands),
            mask: mask.clone(),
        };
        return encode_tile(&tile, OutputFormat::Raw, quality);
    }

    let bands = select_bands(options, metadata)?;
    let colormap = effective_colormap(options, metadata);
    let format = match (request.format, options.transparency) {
        (OutputFormat::Auto, Transparency::Always) => OutputFormat::Png,
        (format, _) => resolve_format(format, mask, colormap.as_ref()),
    };
    let image = render_image(pixels, mask, &bands, options, colormap.as_ref(), format)?;
    encode_tile(&RenderedTile::Image(image), format, quality)
}
