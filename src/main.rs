//! cog-tiler - render map tiles and describe Cloud-Optimized GeoTIFFs.

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cog_tiler::config::{Cli, Command, SourceArgs, StatsArgs, TileArgs, TileJsonArgs, WmtsArgs};
use cog_tiler::TilePipeline;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.config.verbose);

    if let Err(e) = cli.config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let pipeline = match TilePipeline::new(cli.config.pipeline_config()) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to set up sources: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Tile(args) => run_tile(&pipeline, args).await,
        Command::Info(args) => run_info(&pipeline, args).await,
        Command::Stats(args) => run_stats(&pipeline, args).await,
        Command::Tilejson(args) => run_tilejson(&pipeline, args).await,
        Command::Wmts(args) => run_wmts(&pipeline, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
///
/// Logs go to stderr so tiles and JSON written to stdout stay clean.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "cog_tiler=debug"
    } else {
        "cog_tiler=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Commands
// =============================================================================

async fn run_tile(pipeline: &TilePipeline, args: TileArgs) -> CommandResult {
    let request = args.tile_request()?;
    let source = args.source.raster_source();
    let tile = pipeline.produce_tile(&source, &request).await?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &tile.data)?;
            info!(
                path = %path.display(),
                bytes = tile.len(),
                format = %tile.format,
                "tile written"
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&tile.data)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn run_info(pipeline: &TilePipeline, args: SourceArgs) -> CommandResult {
    let info = pipeline.info(&args.raster_source()).await?;
    print_json(&info)
}

async fn run_stats(pipeline: &TilePipeline, args: StatsArgs) -> CommandResult {
    let options = args.statistics_options()?;
    let stats = pipeline
        .statistics(&args.source.raster_source(), &options)
        .await?;
    print_json(&stats)
}

async fn run_tilejson(pipeline: &TilePipeline, args: TileJsonArgs) -> CommandResult {
    let doc = pipeline
        .tilejson(&args.source.raster_source(), args.tms, &args.url_template)
        .await?;
    print_json(&doc)
}

async fn run_wmts(pipeline: &TilePipeline, args: WmtsArgs) -> CommandResult {
    let xml = pipeline
        .wmts_capabilities(&args.source.raster_source(), &args.endpoint, &args.wmts_options())
        .await?;
    println!("{}", xml);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> CommandResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
