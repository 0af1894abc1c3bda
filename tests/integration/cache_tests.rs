//! Metadata registry and byte-range cache behavior.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use cog_tiler::io::{RangeCache, RetryPolicy};
use cog_tiler::source::{S3Settings, DEFAULT_HTTP_TIMEOUT};
use cog_tiler::{
    OutputFormat, PipelineConfig, RasterSource, SourceResolver, TilePipeline, TileRequest,
    UriResolver,
};

use super::test_utils::{mock_pipeline, parse_npy_stream, CogBuilder, MockResolver, PixelFn};

const URI: &str = "https://example.com/cog.tif";

#[tokio::test]
async fn test_concurrent_first_access_opens_once() {
    let resolver = MockResolver::new()
        .with_file(URI, CogBuilder::default().build())
        .with_latency(Duration::from_millis(20));
    let (pipeline, resolver) = mock_pipeline(resolver);
    let pipeline = Arc::new(pipeline);

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                let request = TileRequest::new(14, 8192 + i % 2, 8192).with_format(OutputFormat::Png);
                pipeline
                    .produce_tile(&RasterSource::new(URI), &request)
                    .await
            })
        })
        .collect();

    let results = join_all(tasks).await;
    let tiles: Vec<_> = results.into_iter().map(|r| r.unwrap().unwrap()).collect();
    assert_eq!(resolver.open_count(), 1);
    assert_eq!(pipeline.registry().entry_count().await, 1);

    // same coordinates, same bytes
    assert_eq!(tiles[0], tiles[2]);
    assert_eq!(tiles[1], tiles[3]);
}

#[tokio::test]
async fn test_metadata_is_reused_across_requests() {
    let (pipeline, resolver) =
        mock_pipeline(MockResolver::new().with_file(URI, CogBuilder::default().build()));
    let source = RasterSource::new(URI);
    let request = TileRequest::new(14, 8192, 8192).with_format(OutputFormat::Raw);

    pipeline.produce_tile(&source, &request).await.unwrap();
    let reader = resolver.reader(URI);
    let first = reader.request_count();
    reader.reset();

    pipeline.produce_tile(&source, &request).await.unwrap();
    let second = reader.request_count();
    assert_eq!(resolver.open_count(), 1);
    // header and directories are not read again
    assert!(second < first, "first {} reads, second {}", first, second);
    assert_eq!(second, 1);
}

#[tokio::test]
async fn test_invalidate_reparses_source() {
    let (pipeline, resolver) =
        mock_pipeline(MockResolver::new().with_file(URI, CogBuilder::default().build()));
    let source = RasterSource::new(URI);

    pipeline.info(&source).await.unwrap();
    assert!(pipeline.invalidate(&source).await);
    assert!(!pipeline.invalidate(&source).await);
    pipeline.info(&source).await.unwrap();
    assert_eq!(resolver.open_count(), 2);
}

#[tokio::test]
async fn test_failed_open_is_not_cached() {
    let (pipeline, resolver) = mock_pipeline(MockResolver::new());
    let source = RasterSource::new(URI);
    assert!(pipeline.info(&source).await.is_err());
    assert!(pipeline.info(&source).await.is_err());
    assert_eq!(resolver.open_count(), 2);
    assert_eq!(pipeline.registry().entry_count().await, 0);
}

#[tokio::test]
async fn test_range_cache_serves_repeated_tiles() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&CogBuilder::default().build()).unwrap();
    file.flush().unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let cache = Arc::new(RangeCache::new(8 * 1024 * 1024));
    let pipeline = local_pipeline(&cache, PipelineConfig::default().metadata_ttl);
    let source = RasterSource::new(path);
    let request = TileRequest::new(14, 8192, 8192).with_format(OutputFormat::Png);

    let first = pipeline.produce_tile(&source, &request).await.unwrap();
    let entries = cache.len();
    assert!(entries > 0);
    assert!(cache.cached_bytes() > 0);

    let second = pipeline.produce_tile(&source, &request).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.len(), entries);

    assert!(pipeline.invalidate(&source).await);
    assert!(cache.is_empty());
}

fn local_pipeline(cache: &Arc<RangeCache>, metadata_ttl: Option<Duration>) -> TilePipeline {
    let resolver = UriResolver::new(
        Arc::clone(cache),
        RetryPolicy::none(),
        DEFAULT_HTTP_TIMEOUT,
        S3Settings::default(),
    )
    .unwrap();
    let config = PipelineConfig {
        metadata_ttl,
        ..PipelineConfig::default()
    };
    TilePipeline::with_resolver(config, Arc::new(resolver) as Arc<dyn SourceResolver>)
}

fn cog_with(pixel: PixelFn) -> Vec<u8> {
    CogBuilder {
        pixel,
        ..Default::default()
    }
    .build()
}

async fn first_sample(pipeline: &TilePipeline, source: &RasterSource) -> f64 {
    let request = TileRequest::new(14, 8192, 8192).with_format(OutputFormat::Raw);
    let tile = pipeline.produce_tile(source, &request).await.unwrap();
    parse_npy_stream(&tile.data)[0].value(0)
}

#[tokio::test]
async fn test_expired_metadata_rereads_changed_file() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), cog_with(|_, _, _, _| 10.0)).unwrap();
    let source = RasterSource::new(file.path().to_str().unwrap());

    let cache = Arc::new(RangeCache::new(8 * 1024 * 1024));
    let pipeline = local_pipeline(&cache, Some(Duration::from_millis(200)));
    assert_eq!(first_sample(&pipeline, &source).await, 10.0);

    // same layout, new pixels
    std::fs::write(file.path(), cog_with(|_, _, _, _| 20.0)).unwrap();
    assert_eq!(first_sample(&pipeline, &source).await, 10.0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(first_sample(&pipeline, &source).await, 20.0);
}
