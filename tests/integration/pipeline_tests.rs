//! End-to-end tile production tests.

use image::ColorType;

use cog_tiler::{
    Colormap, OutputFormat, RasterSource, RenderOptions, Resampling, TileError, TileRequest,
    Transparency,
};

use super::test_utils::{gradient, mock_pipeline, parse_npy_stream, CogBuilder, MockResolver, Sample};

const URI: &str = "s3://bucket/cog.tif";

fn source() -> RasterSource {
    RasterSource::new(URI)
}

/// Tile 14/8192/8192 starts at the raster origin.
fn z14(x_offset: u32, y_offset: u32) -> TileRequest {
    TileRequest::new(14, 8192 + x_offset, 8192 + y_offset)
}

/// Distinct constant value per level: 10, 20, 30, ...
fn per_level(level: usize, _band: usize, _col: u32, _row: u32) -> f64 {
    (level as f64 + 1.0) * 10.0
}

// =============================================================================
// Pixel fidelity
// =============================================================================

#[tokio::test]
async fn test_raw_tile_matches_source_pixels() {
    let cog = CogBuilder {
        sample: Sample::U16,
        tile_size: 128,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    for (dx, dy) in [(0, 0), (1, 0), (1, 1)] {
        let request = z14(dx, dy).with_format(OutputFormat::Raw);
        let tile = pipeline.produce_tile(&source(), &request).await.unwrap();
        assert_eq!(tile.mime_type, "application/x-binary");

        let arrays = parse_npy_stream(&tile.data);
        assert_eq!(arrays.len(), 2);
        let (data, mask) = (&arrays[0], &arrays[1]);
        assert_eq!(data.descr, "<u2");
        assert_eq!(data.shape, vec![1, 256, 256]);
        assert_eq!(mask.shape, vec![256, 256]);
        assert!(mask.data.iter().all(|&m| m == 255));

        for (row, col) in [(0u32, 0u32), (0, 255), (17, 93), (255, 255), (128, 3)] {
            let expected = gradient(0, 0, dx * 256 + col, dy * 256 + row);
            assert_eq!(
                data.value((row * 256 + col) as usize),
                expected,
                "tile +{}+{} pixel ({}, {})",
                dx,
                dy,
                col,
                row
            );
        }
    }
}

#[tokio::test]
async fn test_png_gray_tile_is_lossless() {
    let cog = CogBuilder::default();
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let request = z14(1, 0).with_format(OutputFormat::Png);
    let tile = pipeline.produce_tile(&source(), &request).await.unwrap();
    assert_eq!(tile.mime_type, "image/png");

    let image = image::load_from_memory(&tile.data).unwrap();
    assert_eq!(image.color(), ColorType::L8);
    let gray = image.to_luma8();
    for (col, row, pixel) in gray.enumerate_pixels() {
        assert_eq!(pixel.0[0] as f64, gradient(0, 0, 256 + col, row));
    }
}

#[tokio::test]
async fn test_identical_requests_give_identical_bytes() {
    let cog = CogBuilder {
        bands: 3,
        compression: 8,
        tile_size: 64,
        ..Default::default()
    };
    let data = cog.build();
    let request = z14(0, 0)
        .with_format(OutputFormat::Png)
        .with_resampling(Resampling::Bilinear);

    let (first, _) = mock_pipeline(MockResolver::new().with_file(URI, data.clone()));
    let (second, _) = mock_pipeline(MockResolver::new().with_file(URI, data));

    let src = source();
    let a = first.produce_tile(&src, &request).await.unwrap();
    let (b, c) = tokio::join!(
        second.produce_tile(&src, &request),
        second.produce_tile(&src, &request)
    );
    assert_eq!(a, b.unwrap());
    assert_eq!(a, c.unwrap());
}

#[tokio::test]
async fn test_deflate_and_uncompressed_agree() {
    let plain = CogBuilder::default();
    let deflate = CogBuilder {
        compression: 8,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(
        MockResolver::new()
            .with_file("plain.tif", plain.build())
            .with_file("deflate.tif", deflate.build()),
    );

    let request = z14(1, 1).with_format(OutputFormat::Raw);
    let a = pipeline
        .produce_tile(&RasterSource::new("plain.tif"), &request)
        .await
        .unwrap();
    let b = pipeline
        .produce_tile(&RasterSource::new("deflate.tif"), &request)
        .await
        .unwrap();
    assert_eq!(a.data, b.data);
}

// =============================================================================
// Coverage and masking
// =============================================================================

#[tokio::test]
async fn test_partial_tile_masks_outside_pixels() {
    // 300 columns: tile +1 covers columns 256..512, only 44 of them exist
    let cog = CogBuilder {
        width: 300,
        height: 300,
        tile_size: 32,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let raw = pipeline
        .produce_tile(&source(), &z14(1, 0).with_format(OutputFormat::Raw))
        .await
        .unwrap();
    let arrays = parse_npy_stream(&raw.data);
    let mask = &arrays[1];
    for row in [0usize, 100, 255] {
        for col in 0..256usize {
            let expected = if col < 44 { 255 } else { 0 };
            assert_eq!(mask.data[row * 256 + col], expected, "({}, {})", col, row);
        }
    }

    // Auto picks PNG with alpha for a partial tile
    let auto = pipeline.produce_tile(&source(), &z14(1, 0)).await.unwrap();
    assert_eq!(auto.format, OutputFormat::Png);
    let image = image::load_from_memory(&auto.data).unwrap();
    assert_eq!(image.color(), ColorType::La8);
    let la = image.to_luma_alpha8();
    assert_eq!(la.get_pixel(10, 10).0[1], 255);
    assert_eq!(la.get_pixel(200, 10).0, [0, 0]);
}

#[tokio::test]
async fn test_fully_covered_auto_tile_is_jpeg() {
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, CogBuilder::default().build()));
    let tile = pipeline.produce_tile(&source(), &z14(0, 0)).await.unwrap();
    assert_eq!(tile.format, OutputFormat::Jpeg);
    assert_eq!(tile.mime_type, "image/jpeg");
    assert_eq!(&tile.data[..2], &[0xFF, 0xD8]);
}

fn left_half_zero(_level: usize, _band: usize, col: u32, _row: u32) -> f64 {
    if col < 128 {
        0.0
    } else {
        77.0
    }
}

#[tokio::test]
async fn test_nodata_pixels_are_masked() {
    let cog = CogBuilder {
        nodata: Some(0.0),
        pixel: left_half_zero,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let raw = pipeline
        .produce_tile(&source(), &z14(0, 0).with_format(OutputFormat::Raw))
        .await
        .unwrap();
    let mask = &parse_npy_stream(&raw.data)[1];
    assert_eq!(mask.data[0], 0);
    assert_eq!(mask.data[127], 0);
    assert_eq!(mask.data[128], 255);

    // a request-level nodata overrides the raster's
    let request = z14(0, 0).with_format(OutputFormat::Raw).with_render(RenderOptions {
        nodata: Some(77.0),
        ..Default::default()
    });
    let raw = pipeline.produce_tile(&source(), &request).await.unwrap();
    let mask = &parse_npy_stream(&raw.data)[1];
    assert_eq!(mask.data[0], 255);
    assert_eq!(mask.data[128], 0);
}

#[tokio::test]
async fn test_alpha_band_masks_and_is_not_rendered() {
    fn rgba(_level: usize, band: usize, col: u32, _row: u32) -> f64 {
        match band {
            3 if col >= 200 => 0.0,
            3 => 255.0,
            b => 60.0 * (b as f64 + 1.0),
        }
    }
    let cog = CogBuilder {
        bands: 4,
        alpha: true,
        pixel: rgba,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let tile = pipeline
        .produce_tile(&source(), &z14(0, 0).with_format(OutputFormat::Png))
        .await
        .unwrap();
    let image = image::load_from_memory(&tile.data).unwrap().to_rgba8();
    assert_eq!(image.get_pixel(10, 10).0, [60, 120, 180, 255]);
    assert_eq!(image.get_pixel(220, 10).0[3], 0);
}

#[tokio::test]
async fn test_sparse_tiles_are_masked() {
    let cog = CogBuilder {
        tile_size: 128,
        sparse_tiles: vec![0],
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let raw = pipeline
        .produce_tile(&source(), &z14(0, 0).with_format(OutputFormat::Raw))
        .await
        .unwrap();
    let arrays = parse_npy_stream(&raw.data);
    let mask = &arrays[1];
    assert_eq!(mask.data[0], 0);
    assert_eq!(mask.data[127 * 256 + 127], 0);
    assert_eq!(mask.data[128], 255);
    assert_eq!(arrays[0].value(128), gradient(0, 0, 128, 0));
}

// =============================================================================
// Overview selection
// =============================================================================

#[tokio::test]
async fn test_zoom_selects_matching_overview() {
    let cog = CogBuilder {
        width: 1024,
        height: 1024,
        overviews: 2,
        pixel: per_level,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    // (z, x, y, value of the level that must be read)
    let table = [
        (15, 16384, 16384, 10.0),
        (14, 8192, 8192, 10.0),
        (13, 4096, 4096, 20.0),
        (12, 2048, 2048, 30.0),
    ];
    for (z, x, y, expected) in table {
        let request = TileRequest::new(z, x, y).with_format(OutputFormat::Raw);
        let tile = pipeline.produce_tile(&source(), &request).await.unwrap();
        let data = &parse_npy_stream(&tile.data)[0];
        assert_eq!(data.value(0), expected, "zoom {}", z);
        assert_eq!(data.value(256 * 256 - 1), expected, "zoom {}", z);
    }
}

#[tokio::test]
async fn test_overview_tile_reads_only_its_level() {
    let cog = CogBuilder {
        width: 1024,
        height: 1024,
        bands: 3,
        overviews: 2,
        compression: 8,
        pixel: |level, band, _, _| 50.0 * (band as f64 + 1.0) + level as f64,
        ..Default::default()
    };
    let data = cog.build();
    let (pipeline, resolver) = mock_pipeline(MockResolver::new().with_file(URI, data));

    pipeline.metadata(&source()).await.unwrap();
    let reader = resolver.reader(URI);
    reader.reset();

    let request = TileRequest::new(12, 2048, 2048).with_format(OutputFormat::Png);
    let tile = pipeline.produce_tile(&source(), &request).await.unwrap();

    // level 2 is a single 256x256 internal tile
    assert_eq!(reader.request_count(), 1);

    let image = image::load_from_memory(&tile.data).unwrap();
    assert_eq!(image.color(), ColorType::Rgb8);
    let rgb = image.to_rgb8();
    assert_eq!(rgb.get_pixel(0, 0).0, [52, 102, 152]);
    assert_eq!(rgb.get_pixel(255, 255).0, [52, 102, 152]);
}

// =============================================================================
// Render options
// =============================================================================

#[tokio::test]
async fn test_band_order_and_rescale() {
    let cog = CogBuilder {
        bands: 3,
        sample: Sample::U16,
        pixel: |_, band, _, _| 1000.0 * (band as f64 + 1.0),
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let request = z14(0, 0).with_format(OutputFormat::Png).with_render(RenderOptions {
        bands: Some(vec![3, 2, 1]),
        rescale: vec![(0.0, 3000.0)],
        ..Default::default()
    });
    let tile = pipeline.produce_tile(&source(), &request).await.unwrap();
    let rgb = image::load_from_memory(&tile.data).unwrap().to_rgb8();
    assert_eq!(rgb.get_pixel(5, 5).0, [255, 170, 85]);
}

#[tokio::test]
async fn test_colormap_applies_to_single_band() {
    let cog = CogBuilder {
        pixel: |_, _, col, _| if col < 128 { 10.0 } else { 20.0 },
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let colormap = Colormap::parse(r#"{"10": [255, 0, 0], "20": [0, 0, 255, 128]}"#).unwrap();
    let request = z14(0, 0).with_render(RenderOptions {
        colormap: Some(colormap),
        ..Default::default()
    });
    let tile = pipeline.produce_tile(&source(), &request).await.unwrap();
    assert_eq!(tile.format, OutputFormat::Png);
    let rgba = image::load_from_memory(&tile.data).unwrap().to_rgba8();
    assert_eq!(rgba.get_pixel(0, 0).0, [255, 0, 0, 255]);
    assert_eq!(rgba.get_pixel(200, 0).0, [0, 0, 255, 128]);
}

#[tokio::test]
async fn test_transparency_never_fills_masked_pixels() {
    let cog = CogBuilder {
        width: 300,
        height: 300,
        tile_size: 32,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    let request = z14(1, 0).with_format(OutputFormat::Png).with_render(RenderOptions {
        transparency: Transparency::Never,
        fill_value: 9,
        ..Default::default()
    });
    let tile = pipeline.produce_tile(&source(), &request).await.unwrap();
    let image = image::load_from_memory(&tile.data).unwrap();
    assert_eq!(image.color(), ColorType::L8);
    assert_eq!(image.to_luma8().get_pixel(200, 0).0, [9]);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_invalid_rescale_fails_before_io() {
    let (pipeline, resolver) =
        mock_pipeline(MockResolver::new().with_file(URI, CogBuilder::default().build()));

    let request = z14(0, 0).with_render(RenderOptions {
        rescale: vec![(0.0, -1.0)],
        ..Default::default()
    });
    let err = pipeline.produce_tile(&source(), &request).await.unwrap_err();
    assert!(matches!(err, TileError::InvalidRenderOptions { .. }));
    assert_eq!(resolver.open_count(), 0);
    assert_eq!(resolver.reader(URI).request_count(), 0);
}

#[tokio::test]
async fn test_band_out_of_range_fails_before_pixel_io() {
    let (pipeline, resolver) =
        mock_pipeline(MockResolver::new().with_file(URI, CogBuilder::default().build()));
    pipeline.metadata(&source()).await.unwrap();
    let reader = resolver.reader(URI);
    reader.reset();

    let request = z14(0, 0).with_render(RenderOptions {
        bands: Some(vec![2]),
        ..Default::default()
    });
    let err = pipeline.produce_tile(&source(), &request).await.unwrap_err();
    assert!(matches!(err, TileError::InvalidRenderOptions { .. }));
    assert_eq!(reader.request_count(), 0);
}

#[tokio::test]
async fn test_tile_outside_raster() {
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, CogBuilder::default().build()));

    let err = pipeline
        .produce_tile(&source(), &TileRequest::new(14, 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, TileError::OutOfBounds { z: 14, x: 0, y: 0 }));
    assert_eq!(err.http_status(), 404);

    let filled = pipeline
        .produce_tile(&source(), &TileRequest::new(14, 0, 0).with_fill_out_of_bounds(true))
        .await
        .unwrap();
    assert_eq!(filled.format, OutputFormat::Png);
    let image = image::load_from_memory(&filled.data).unwrap().to_luma_alpha8();
    assert!(image.pixels().all(|p| p.0[1] == 0));

    let raw = pipeline
        .produce_tile(
            &source(),
            &TileRequest::new(14, 0, 0)
                .with_format(OutputFormat::Raw)
                .with_fill_out_of_bounds(true),
        )
        .await
        .unwrap();
    let arrays = parse_npy_stream(&raw.data);
    assert!(arrays[1].data.iter().all(|&m| m == 0));
}

#[tokio::test]
async fn test_tile_touching_raster_edge_is_empty() {
    let (pipeline, resolver) =
        mock_pipeline(MockResolver::new().with_file(URI, CogBuilder::default().build()));
    pipeline.metadata(&source()).await.unwrap();
    let reader = resolver.reader(URI);
    reader.reset();

    // right edge of 14/8191/8192 is the raster's left edge
    let tile = pipeline
        .produce_tile(&source(), &TileRequest::new(14, 8191, 8192))
        .await
        .unwrap();
    assert_eq!(tile.format, OutputFormat::Png);
    let image = image::load_from_memory(&tile.data).unwrap();
    assert_eq!((image.width(), image.height()), (256, 256));
    assert!(image.to_luma_alpha8().pixels().all(|p| p.0[1] == 0));
    assert_eq!(reader.request_count(), 0);
}

#[tokio::test]
async fn test_invalid_tile_coordinates() {
    let (pipeline, resolver) =
        mock_pipeline(MockResolver::new().with_file(URI, CogBuilder::default().build()));
    let err = pipeline
        .produce_tile(&source(), &TileRequest::new(2, 4, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, TileError::InvalidRequest { .. }));
    assert_eq!(resolver.open_count(), 0);
}

#[tokio::test]
async fn test_unknown_codec_is_reported() {
    let cog = CogBuilder {
        compression: 34887,
        ..Default::default()
    };
    let (pipeline, _) = mock_pipeline(MockResolver::new().with_file(URI, cog.build()));

    // metadata still parses
    assert!(pipeline.info(&source()).await.is_ok());

    let err = pipeline.produce_tile(&source(), &z14(0, 0)).await.unwrap_err();
    assert!(matches!(err, TileError::UnsupportedCodec { compression: 34887 }));
}

#[tokio::test]
async fn test_missing_source() {
    let (pipeline, _) = mock_pipeline(MockResolver::new());
    let err = pipeline.produce_tile(&source(), &z14(0, 0)).await.unwrap_err();
    assert!(matches!(err, TileError::SourceUnavailable { timed_out: false, .. }));
}
