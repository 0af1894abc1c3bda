//! Configuration for the tile pipeline and the `cog-tiler` command line.
//!
//! The library only consumes [`PipelineConfig`]. The binary builds it from
//! command-line flags, each of which can also be set from the environment:
//!
//! - `COG_TILER_METADATA_CACHE` - sources whose metadata is kept (default: 128)
//! - `COG_TILER_METADATA_TTL` - metadata lifetime in seconds, 0 = no expiry (default: 300)
//! - `COG_TILER_RANGE_CACHE` - byte-range cache size, e.g. `64MB` (default: 64MB)
//! - `COG_TILER_MAX_FETCHES` - concurrent range reads per request (default: 8)
//! - `COG_TILER_RETRY_ATTEMPTS` - attempts per range read (default: 3)
//! - `COG_TILER_RETRY_DELAY_MS` - first retry delay (default: 100)
//! - `COG_TILER_HTTP_TIMEOUT` - HTTP request timeout in seconds (default: 30)
//! - `COG_TILER_S3_REGION` / `COG_TILER_S3_ENDPOINT` - S3 connection
//! - `COG_TILER_JPEG_QUALITY` - default JPEG quality (default: 85)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::error::TileError;
use crate::geo::TileMatrixSet;
use crate::io::{RetryPolicy, DEFAULT_RANGE_CACHE_BYTES, DEFAULT_RETRY_ATTEMPTS};
use crate::source::{
    Credentials, RasterSource, S3Settings, DEFAULT_HTTP_TIMEOUT, DEFAULT_METADATA_CAPACITY,
    DEFAULT_METADATA_TTL,
};
use crate::tile::statistics::{parse_histogram_range, DEFAULT_HISTOGRAM_BINS, DEFAULT_STATISTICS_MAX_SIZE};
use crate::tile::{
    Colormap, OutputFormat, RenderOptions, Resampling, StatisticsOptions, TileRequest,
    WmtsOptions, DEFAULT_JPEG_QUALITY,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default concurrent range reads per request.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

// =============================================================================
// Pipeline configuration
// =============================================================================

/// Settings the tile pipeline runs with.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub metadata_capacity: usize,
    /// `None` keeps metadata until evicted or invalidated
    pub metadata_ttl: Option<Duration>,
    pub range_cache_bytes: usize,
    /// Ranges this close together are fetched as one read
    pub range_merge_gap: u64,
    pub max_concurrent_fetches: usize,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
    pub s3: S3Settings,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            metadata_capacity: DEFAULT_METADATA_CAPACITY,
            metadata_ttl: Some(DEFAULT_METADATA_TTL),
            range_cache_bytes: DEFAULT_RANGE_CACHE_BYTES,
            range_merge_gap: 0,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            retry: RetryPolicy::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            s3: S3Settings::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// cog-tiler - dynamic map tiles from Cloud-Optimized GeoTIFFs.
///
/// Reads only the byte ranges a tile needs, from local files, HTTP(S)
/// servers or S3.
#[derive(Parser, Debug)]
#[command(name = "cog-tiler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render one tile to a file or stdout
    Tile(TileArgs),
    /// Print dataset information as JSON
    Info(SourceArgs),
    /// Print per-band statistics as JSON
    Stats(StatsArgs),
    /// Print a TileJSON document
    Tilejson(TileJsonArgs),
    /// Print a WMTS capabilities document
    Wmts(WmtsArgs),
}

/// Pipeline settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Number of sources whose parsed metadata is cached.
    #[arg(long, global = true, default_value_t = DEFAULT_METADATA_CAPACITY, env = "COG_TILER_METADATA_CACHE")]
    pub metadata_cache: usize,

    /// Metadata lifetime in seconds (0 keeps it until evicted).
    #[arg(long, global = true, default_value_t = DEFAULT_METADATA_TTL.as_secs(), env = "COG_TILER_METADATA_TTL")]
    pub metadata_ttl: u64,

    /// Byte-range cache size (e.g. 512KB, 64MB, 1GB).
    #[arg(long, global = true, default_value = "64MB", value_parser = parse_size, env = "COG_TILER_RANGE_CACHE")]
    pub range_cache: usize,

    /// Concurrent range reads per request.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CONCURRENT_FETCHES, env = "COG_TILER_MAX_FETCHES")]
    pub max_fetches: usize,

    /// Attempts per range read, first try included.
    #[arg(long, global = true, default_value_t = DEFAULT_RETRY_ATTEMPTS, env = "COG_TILER_RETRY_ATTEMPTS")]
    pub retry_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[arg(long, global = true, default_value_t = 100, env = "COG_TILER_RETRY_DELAY_MS")]
    pub retry_delay_ms: u64,

    /// HTTP request timeout in seconds.
    #[arg(long, global = true, default_value_t = DEFAULT_HTTP_TIMEOUT.as_secs(), env = "COG_TILER_HTTP_TIMEOUT")]
    pub http_timeout: u64,

    /// AWS region for s3:// sources.
    #[arg(long, global = true, default_value = DEFAULT_REGION, env = "COG_TILER_S3_REGION")]
    pub s3_region: String,

    /// Custom S3 endpoint for S3-compatible services (MinIO, etc.).
    #[arg(long, global = true, env = "COG_TILER_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Default JPEG quality (1-100).
    #[arg(long, global = true, default_value_t = DEFAULT_JPEG_QUALITY, env = "COG_TILER_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.metadata_cache == 0 {
            return Err("metadata_cache must be greater than 0".to_string());
        }
        if self.range_cache == 0 {
            return Err("range_cache must be greater than 0".to_string());
        }
        if self.max_fetches == 0 {
            return Err("max_fetches must be greater than 0".to_string());
        }
        if self.retry_attempts == 0 {
            return Err("retry_attempts must be at least 1".to_string());
        }
        if self.http_timeout == 0 {
            return Err("http_timeout must be greater than 0".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            metadata_capacity: self.metadata_cache,
            metadata_ttl: (self.metadata_ttl > 0).then(|| Duration::from_secs(self.metadata_ttl)),
            range_cache_bytes: self.range_cache,
            max_concurrent_fetches: self.max_fetches,
            retry: RetryPolicy {
                max_attempts: self.retry_attempts,
                base_delay: Duration::from_millis(self.retry_delay_ms),
                ..RetryPolicy::default()
            },
            http_timeout: Duration::from_secs(self.http_timeout),
            s3: S3Settings {
                region: self.s3_region.clone(),
                endpoint: self.s3_endpoint.clone(),
            },
            jpeg_quality: self.jpeg_quality,
            ..PipelineConfig::default()
        }
    }
}

/// Parse a byte size such as `1048576`, `512KB`, `64MB` or `1GiB`.
pub fn parse_size(text: &str) -> Result<usize, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let value: usize = digits
        .parse()
        .map_err(|_| format!("invalid size '{}'", text))?;
    let multiplier: usize = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown size unit '{}'", other)),
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' is too large", text))
}

// =============================================================================
// Subcommand arguments
// =============================================================================

/// Which raster to read.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Local path, http(s):// URL or s3://bucket/key
    pub source: String,

    /// Object size in bytes, skips the HEAD request
    #[arg(long)]
    pub size: Option<u64>,

    /// Bearer token for HTTP(S) sources
    #[arg(long, env = "COG_TILER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// AWS profile for s3:// sources
    #[arg(long)]
    pub aws_profile: Option<String>,
}

impl SourceArgs {
    pub fn raster_source(&self) -> RasterSource {
        let mut source = RasterSource::new(&self.source);
        if let Some(size) = self.size {
            source = source.with_size(size);
        }
        if let Some(token) = &self.token {
            source = source.with_credentials(Credentials::BearerToken(token.clone()));
        } else if let Some(profile) = &self.aws_profile {
            source = source.with_credentials(Credentials::AwsProfile(profile.clone()));
        }
        source
    }
}

#[derive(Args, Debug, Clone)]
pub struct TileArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    pub z: u8,
    pub x: u32,
    pub y: u32,

    /// Tile matrix set
    #[arg(long, default_value_t = TileMatrixSet::WebMercatorQuad)]
    pub tms: TileMatrixSet,

    /// Tile size multiplier: 1 = 256px, 2 = 512px, ...
    #[arg(long, default_value_t = 1)]
    pub scale: u32,

    /// png, jpeg, webp, npy or auto
    #[arg(short, long, default_value_t = OutputFormat::Auto)]
    pub format: OutputFormat,

    /// nearest, bilinear, cubic or average
    #[arg(long, default_value = "nearest")]
    pub resampling: Resampling,

    /// Comma-separated 1-based band indexes
    #[arg(long)]
    pub bidx: Option<String>,

    /// min,max pairs, one for all bands or one per band
    #[arg(long)]
    pub rescale: Option<String>,

    /// Named colormap (append _r to reverse) or JSON {"value": [r,g,b,a]}
    #[arg(long)]
    pub colormap: Option<String>,

    /// Override the raster's nodata value
    #[arg(long)]
    pub nodata: Option<f64>,

    /// JPEG quality for this tile
    #[arg(long)]
    pub quality: Option<u8>,

    /// Return a transparent tile instead of failing outside the raster
    #[arg(long, default_value_t = false)]
    pub fill_out_of_bounds: bool,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl TileArgs {
    pub fn tile_request(&self) -> Result<TileRequest, TileError> {
        let render = RenderOptions {
            bands: self.bidx.as_deref().map(RenderOptions::parse_bands).transpose()?,
            rescale: self
                .rescale
                .as_deref()
                .map(RenderOptions::parse_rescale)
                .transpose()?
                .unwrap_or_default(),
            colormap: self.colormap.as_deref().map(Colormap::parse).transpose()?,
            nodata: self.nodata,
            jpeg_quality: self.quality,
            ..RenderOptions::default()
        };
        Ok(TileRequest::new(self.z, self.x, self.y)
            .with_tms(self.tms)
            .with_scale(self.scale)
            .with_format(self.format)
            .with_resampling(self.resampling)
            .with_render(render)
            .with_fill_out_of_bounds(self.fill_out_of_bounds))
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Smallest larger side of the overview level read
    #[arg(long, default_value_t = DEFAULT_STATISTICS_MAX_SIZE)]
    pub max_size: u32,

    /// Comma-separated percentiles
    #[arg(long, default_value = "2,98", value_delimiter = ',')]
    pub percentiles: Vec<f64>,

    #[arg(long, default_value_t = DEFAULT_HISTOGRAM_BINS)]
    pub bins: usize,

    /// Histogram range as min,max
    #[arg(long)]
    pub range: Option<String>,

    #[arg(long)]
    pub bidx: Option<String>,

    #[arg(long)]
    pub nodata: Option<f64>,
}

impl StatsArgs {
    pub fn statistics_options(&self) -> Result<StatisticsOptions, TileError> {
        Ok(StatisticsOptions {
            max_size: self.max_size,
            percentiles: self.percentiles.clone(),
            bins: self.bins,
            range: self.range.as_deref().map(parse_histogram_range).transpose()?,
            bands: self.bidx.as_deref().map(RenderOptions::parse_bands).transpose()?,
            nodata: self.nodata,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct TileJsonArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(long, default_value_t = TileMatrixSet::WebMercatorQuad)]
    pub tms: TileMatrixSet,

    /// Tile URL template placed in the document
    #[arg(long, default_value = "/tiles/{z}/{x}/{y}")]
    pub url_template: String,
}

#[derive(Args, Debug, Clone)]
pub struct WmtsArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(long, default_value_t = TileMatrixSet::WebMercatorQuad)]
    pub tms: TileMatrixSet,

    /// Tile route prefix; `/{TileMatrix}/{TileCol}/{TileRow}@{scale}x.{ext}` is appended
    #[arg(long, default_value = "/tiles")]
    pub endpoint: String,

    #[arg(long, default_value_t = 1)]
    pub scale: u32,

    #[arg(short, long, default_value_t = OutputFormat::Png)]
    pub format: OutputFormat,
}

impl WmtsArgs {
    pub fn wmts_options(&self) -> WmtsOptions {
        WmtsOptions {
            tms: self.tms,
            scale: self.scale,
            format: self.format,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
