//! Dataset descriptions: raster info, zoom range, TileJSON and WMTS
//! capabilities.

use serde::Serialize;

use crate::error::TileError;
use crate::format::{ColorInterp, DataType, NodataKind, RasterMetadata};
use crate::geo::{Bounds, Crs, TileMatrixSet, BASE_TILE_SIZE, MAX_ZOOM};

use super::locator::{crs_transform, DENSIFY_POINTS};
use super::request::{OutputFormat, MAX_TILE_SCALE};

pub const TILEJSON_VERSION: &str = "2.2.0";

/// Summary of a raster, as reported by an `info` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterInfo {
    /// `[left, bottom, right, top]` in the raster's CRS
    pub bounds: [f64; 4],
    /// Same extent in WGS84 longitude/latitude
    pub geographic_bounds: [f64; 4],
    pub crs: String,
    pub width: u32,
    pub height: u32,
    pub count: usize,
    pub dtype: DataType,
    pub nodata_type: NodataKind,
    pub nodata_value: Option<f64>,
    pub colorinterp: Vec<ColorInterp>,
    /// `(1-based index, description)`; unnamed bands are `b1`, `b2`, ...
    pub band_descriptions: Vec<(usize, String)>,
    pub overviews: Vec<u32>,
    pub compression: String,
    pub block_size: [u32; 2],
    pub has_colormap: bool,
    pub minzoom: u8,
    pub maxzoom: u8,
}

/// TileJSON 2.2.0 document for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileJson {
    pub tilejson: &'static str,
    pub name: String,
    pub version: &'static str,
    pub scheme: &'static str,
    pub tiles: Vec<String>,
    pub minzoom: u8,
    pub maxzoom: u8,
    pub bounds: [f64; 4],
    /// `[lon, lat, zoom]`
    pub center: (f64, f64, u8),
}

pub fn geographic_bounds(metadata: &RasterMetadata) -> Result<Bounds, TileError> {
    transformed_bounds(metadata, Crs::WGS84)
}

fn transformed_bounds(metadata: &RasterMetadata, dst: Crs) -> Result<Bounds, TileError> {
    crs_transform(metadata.crs, dst)?
        .transform_bounds(&metadata.bounds(), DENSIFY_POINTS)
        .ok_or_else(|| {
            TileError::unsupported_format(format!(
                "raster extent cannot be expressed in {}",
                dst
            ))
        })
}

/// Zoom levels at which the raster is worth rendering in `tms`.
///
/// The maximum zoom matches the full-resolution pixel size once warped into
/// the grid's CRS. The minimum zoom matches the resolution at which the
/// raster, halved repeatedly, last stays larger than one tile.
pub fn zoom_range(metadata: &RasterMetadata, tms: TileMatrixSet) -> Result<(u8, u8), TileError> {
    let warped = transformed_bounds(metadata, tms.crs())?;
    let resolution = if metadata.crs == tms.crs() {
        let (rx, ry) = metadata.transform.resolution();
        rx.max(ry)
    } else {
        warped.width().hypot(warped.height())
            / (metadata.width as f64).hypot(metadata.height as f64)
    };
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(TileError::CorruptMetadata {
            reason: "raster has no usable resolution".to_string(),
        });
    }

    let width = (warped.width() / resolution).ceil().max(1.0) as u64;
    let height = (warped.height() / resolution).ceil().max(1.0) as u64;
    let mut factor = 1u64;
    let mut halvings = 0i32;
    while (width / factor).min(height / factor) > BASE_TILE_SIZE as u64 {
        factor *= 2;
        halvings += 1;
    }

    let maxzoom = tms.zoom_for_resolution(resolution, 0, MAX_ZOOM);
    let minzoom = tms.zoom_for_resolution(resolution * 2f64.powi(halvings), 0, maxzoom);
    Ok((minzoom, maxzoom))
}

pub fn raster_info(metadata: &RasterMetadata) -> Result<RasterInfo, TileError> {
    let (minzoom, maxzoom) = zoom_range(metadata, TileMatrixSet::WebMercatorQuad)?;
    let base = &metadata.levels[0];
    Ok(RasterInfo {
        bounds: metadata.bounds().to_array(),
        geographic_bounds: geographic_bounds(metadata)?.to_array(),
        crs: metadata.crs.to_string(),
        width: metadata.width,
        height: metadata.height,
        count: metadata.bands,
        dtype: metadata.dtype,
        nodata_type: metadata.nodata_kind(),
        nodata_value: metadata.nodata,
        colorinterp: metadata.color_interp.clone(),
        band_descriptions: (0..metadata.bands)
            .map(|b| {
                let description = metadata
                    .band_descriptions
                    .get(b)
                    .filter(|d| !d.is_empty())
                    .cloned()
                    .unwrap_or_else(|| format!("b{}", b + 1));
                (b + 1, description)
            })
            .collect(),
        overviews: metadata.overview_factors(),
        compression: metadata.compression(),
        block_size: [base.tile_width, base.tile_height],
        has_colormap: metadata.colormap.is_some(),
        minzoom,
        maxzoom,
    })
}

pub fn tilejson(
    metadata: &RasterMetadata,
    name: impl Into<String>,
    tms: TileMatrixSet,
    url_template: impl Into<String>,
) -> Result<TileJson, TileError> {
    let (minzoom, maxzoom) = zoom_range(metadata, tms)?;
    let bounds = geographic_bounds(metadata)?;
    let (lon, lat) = bounds.center();
    Ok(TileJson {
        tilejson: TILEJSON_VERSION,
        name: name.into(),
        version: "1.0.0",
        scheme: "xyz",
        tiles: vec![url_template.into()],
        minzoom,
        maxzoom,
        bounds: bounds.to_array(),
        center: (lon, lat, minzoom),
    })
}

/// Layer settings for a WMTS capabilities document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WmtsOptions {
    pub tms: TileMatrixSet,
    /// Tile size multiplier, `1` for 256-pixel tiles
    pub scale: u32,
    pub format: OutputFormat,
}

impl Default for WmtsOptions {
    fn default() -> Self {
        Self {
            tms: TileMatrixSet::WebMercatorQuad,
            scale: 1,
            format: OutputFormat::Png,
        }
    }
}

/// OGC WMTS 1.0.0 capabilities document exposing one dataset as a single
/// layer, with one tile matrix per zoom in [`zoom_range`].
///
/// `endpoint` is the tile route prefix; the resource template appends
/// `/{TileMatrix}/{TileCol}/{TileRow}@{scale}x.{ext}` to its path and keeps
/// its query string.
pub fn wmts_capabilities(
    metadata: &RasterMetadata,
    title: &str,
    endpoint: &str,
    options: &WmtsOptions,
) -> Result<String, TileError> {
    if !(1..=MAX_TILE_SCALE).contains(&options.scale) {
        return Err(TileError::invalid_request(format!(
            "tile scale {} outside 1..={}",
            options.scale, MAX_TILE_SCALE
        )));
    }
    let tms = options.tms;
    let (minzoom, maxzoom) = zoom_range(metadata, tms)?;
    let bounds = geographic_bounds(metadata)?;
    let tile_size = BASE_TILE_SIZE * options.scale;
    let extent = tms.bounds();

    let (path, query) = match endpoint.split_once('?') {
        Some((path, query)) => (path, format!("?{}", query)),
        None => (endpoint, String::new()),
    };
    let template = format!(
        "{}/{{TileMatrix}}/{{TileCol}}/{{TileRow}}@{}x.{}{}",
        path.trim_end_matches('/'),
        options.scale,
        options.format.extension(),
        query
    );

    let supported_crs = if tms.crs().is_geographic() {
        "urn:ogc:def:crs:OGC:1.3:CRS84".to_string()
    } else {
        format!("urn:ogc:def:crs:EPSG::{}", tms.crs().epsg())
    };
    let scale_set = tms
        .well_known_scale_set()
        .map(|wkss| format!("<WellKnownScaleSet>{}</WellKnownScaleSet>", wkss))
        .unwrap_or_default();

    let matrices: String = (minzoom..=maxzoom)
        .map(|z| {
            let (cols, rows) = tms.matrix_size(z);
            format!(
                r#"<TileMatrix><ows:Identifier>{}</ows:Identifier><ScaleDenominator>{}</ScaleDenominator><TopLeftCorner>{} {}</TopLeftCorner><TileWidth>{}</TileWidth><TileHeight>{}</TileHeight><MatrixWidth>{}</MatrixWidth><MatrixHeight>{}</MatrixHeight></TileMatrix>"#,
                z,
                tms.scale_denominator(z, tile_size),
                extent.left,
                extent.top,
                tile_size,
                tile_size,
                cols,
                rows
            )
        })
        .collect();

    let title = xml_escape(title);
    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Capabilities xmlns="http://www.opengis.net/wmts/1.0" xmlns:ows="http://www.opengis.net/ows/1.1" xmlns:xlink="http://www.w3.org/1999/xlink" version="1.0.0"><ows:ServiceIdentification><ows:Title>{title}</ows:Title><ows:ServiceType>OGC WMTS</ows:ServiceType><ows:ServiceTypeVersion>1.0.0</ows:ServiceTypeVersion></ows:ServiceIdentification><Contents><Layer><ows:Title>{title}</ows:Title><ows:Identifier>{title}</ows:Identifier><ows:WGS84BoundingBox crs="urn:ogc:def:crs:OGC:2:84"><ows:LowerCorner>{west} {south}</ows:LowerCorner><ows:UpperCorner>{east} {north}</ows:UpperCorner></ows:WGS84BoundingBox><Style isDefault="true"><ows:Identifier>default</ows:Identifier></Style><Format>{mime}</Format><TileMatrixSetLink><TileMatrixSet>{tms_id}</TileMatrixSet></TileMatrixSetLink><ResourceURL format="{mime}" resourceType="tile" template="{template}"/></Layer><TileMatrixSet><ows:Identifier>{tms_id}</ows:Identifier><ows:SupportedCRS>{supported_crs}</ows:SupportedCRS>{scale_set}{matrices}</TileMatrixSet></Contents><ServiceMetadataURL xlink:href="{service_url}"/></Capabilities>"#,
        title = title,
        west = bounds.left,
        south = bounds.bottom,
        east = bounds.right,
        north = bounds.top,
        mime = options.format.mime_type(),
        tms_id = tms.id(),
        template = xml_escape(&template),
        supported_crs = supported_crs,
        scale_set = scale_set,
        matrices = matrices,
        service_url = xml_escape(endpoint),
    ))
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
