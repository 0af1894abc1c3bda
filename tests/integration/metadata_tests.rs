//! Dataset info, TileJSON, WMTS capabilities and statistics.

use cog_tiler::{
    OutputFormat, RasterSource, StatisticsOptions, TileError, TileMatrixSet, WmtsOptions,
};

use super::test_utils::{mock_pipeline, CogBuilder, MockResolver, Sample};

const URI: &str = "https://data.example.com/imagery/scene-42.tif";

fn source() -> RasterSource {
    RasterSource::new(URI)
}

#[tokio::test]
async fn test_info_describes_raster() {
    let cog = CogBuilder {
        width: 1024,
        height: 1024,
        bands: 3,
        overviews: 2,
        nodata: Some(0.0),
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let info = pipeline.info(&source()).await.unwrap();
    assert_eq!((info.width, info.height, info.count), (1024, 1024, 3));
    assert_eq!(info.crs, "EPSG:3857");
    assert_eq!(info.overviews, vec![2, 4]);
    assert_eq!(info.block_size, [256, 256]);
    assert_eq!((info.minzoom, info.maxzoom), (12, 14));
    assert_eq!(info.nodata_value, Some(0.0));

    let [left, bottom, right, top] = info.bounds;
    assert_eq!((left, top), (0.0, 0.0));
    assert!(right > 0.0 && bottom < 0.0);

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["dtype"], "uint8");
    assert_eq!(json["nodata_type"], "Nodata");
    assert_eq!(json["colorinterp"], serde_json::json!(["red", "green", "blue"]));
    assert_eq!(json["band_descriptions"][2], serde_json::json!([3, "b3"]));
}

#[tokio::test]
async fn test_tilejson_document() {
    let cog = CogBuilder {
        width: 1024,
        height: 1024,
        overviews: 2,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let doc = pipeline
        .tilejson(
            &source(),
            TileMatrixSet::WebMercatorQuad,
            "https://tiles.example.com/{z}/{x}/{y}.png",
        )
        .await
        .unwrap();
    assert_eq!(doc.name, "scene-42");
    assert_eq!((doc.minzoom, doc.maxzoom), (12, 14));
    assert_eq!(doc.center.2, 12);

    // the raster sits just south-east of (0, 0)
    let [west, south, east, north] = doc.bounds;
    assert!(west.abs() < 1e-9 && north.abs() < 1e-9);
    assert!(east > 0.0 && south < 0.0);

    let json = serde_json::to_value(&doc).unwrap();
    assert_eq!(json["tilejson"], "2.2.0");
    assert_eq!(json["scheme"], "xyz");
    assert_eq!(json["tiles"][0], "https://tiles.example.com/{z}/{x}/{y}.png");
}

#[tokio::test]
async fn test_wmts_capabilities_lists_zoom_range() {
    let cog = CogBuilder {
        width: 1024,
        height: 1024,
        overviews: 2,
        ..Default::default()
    };
    let (pipeline, resolver) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let xml = pipeline
        .wmts_capabilities(
            &source(),
            "https://tiles.example.com/cog/tiles",
            &WmtsOptions {
                format: OutputFormat::Jpeg,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(xml.matches("<TileMatrix>").count(), 3);
    for z in 12..=14 {
        assert!(xml.contains(&format!("<ows:Identifier>{}</ows:Identifier>", z)));
        assert!(xml.contains(&format!("<MatrixWidth>{}</MatrixWidth>", 1u32 << z)));
    }
    assert!(!xml.contains("<ows:Identifier>11</ows:Identifier>"));
    assert!(xml.contains("<ows:Title>scene-42</ows:Title>"));
    assert!(xml.contains("<TileMatrixSet>WebMercatorQuad</TileMatrixSet>"));
    assert!(xml.contains(
        r#"template="https://tiles.example.com/cog/tiles/{TileMatrix}/{TileCol}/{TileRow}@1x.jpg""#
    ));

    // metadata is shared with tile and info requests
    pipeline.info(&source()).await.unwrap();
    assert_eq!(resolver.open_count(), 1);
}

fn halves(_level: usize, _band: usize, col: u32, _row: u32) -> f64 {
    if col < 64 {
        0.0
    } else {
        (col % 10) as f64 + 1.0
    }
}

#[tokio::test]
async fn test_statistics_skip_nodata() {
    let cog = CogBuilder {
        width: 128,
        height: 128,
        tile_size: 64,
        sample: Sample::U16,
        nodata: Some(0.0),
        pixel: halves,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let stats = pipeline
        .statistics(&source(), &StatisticsOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.len(), 1);
    let band = &stats[0];
    assert_eq!(band.band, 1);
    assert_eq!(band.min, 1.0);
    assert_eq!(band.max, 10.0);
    assert_eq!(band.valid_pixels, 64 * 128);
    assert_eq!(band.masked_pixels, 64 * 128);
    assert_eq!(band.valid_percent, 50.0);
    assert_eq!(band.histogram.counts.len(), 10);
    assert_eq!(band.histogram.counts.iter().sum::<u64>(), 64 * 128);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json[0]["percentiles"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_statistics_use_small_overview() {
    let cog = CogBuilder {
        width: 1024,
        height: 1024,
        overviews: 2,
        pixel: |level, _, _, _| level as f64 + 1.0,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let options = StatisticsOptions {
        max_size: 256,
        ..Default::default()
    };
    let stats = pipeline.statistics(&source(), &options).await.unwrap();
    // level 2 is 256 pixels wide and holds 3s everywhere
    assert_eq!(stats[0].mean, 3.0);
    assert_eq!(stats[0].valid_pixels, 256 * 256);

    let options = StatisticsOptions {
        max_size: 500,
        ..Default::default()
    };
    let stats = pipeline.statistics(&source(), &options).await.unwrap();
    assert_eq!(stats[0].mean, 2.0);
}

#[tokio::test]
async fn test_statistics_band_selection() {
    let cog = CogBuilder {
        width: 64,
        height: 64,
        tile_size: 64,
        bands: 3,
        pixel: |_, band, _, _| band as f64 * 10.0 + 5.0,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let options = StatisticsOptions {
        bands: Some(vec![3]),
        ..Default::default()
    };
    let stats = pipeline.statistics(&source(), &options).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].band, 3);
    assert_eq!(stats[0].median, 25.0);

    let options = StatisticsOptions {
        bands: Some(vec![4]),
        ..Default::default()
    };
    let err = pipeline.statistics(&source(), &options).await.unwrap_err();
    assert!(matches!(err, TileError::InvalidRenderOptions { .. }));
}
