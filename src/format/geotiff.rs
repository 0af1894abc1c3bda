//! GeoTIFF georeferencing: geokeys, model transform tags, GDAL extensions.

use std::collections::HashMap;

use crate::error::TiffError;
use crate::geo::{Affine, Crs};
use crate::io::RangeReader;

use super::tiff::{Ifd, TiffTag, ValueReader};

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// The geokeys this reader interprets. Keys stored out of line (in the
/// double or ASCII params) are not needed to name an EPSG CRS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoKeys {
    pub model_type: Option<u16>,
    pub raster_type: Option<u16>,
    pub geographic_type: Option<u16>,
    pub projected_type: Option<u16>,
}

impl GeoKeys {
    /// Decode a `GeoKeyDirectory` tag value.
    pub fn parse(directory: &[u16]) -> Result<Self, TiffError> {
        let invalid = |message: String| TiffError::InvalidTagValue {
            tag: TiffTag::GeoKeyDirectory.name(),
            message,
        };
        let [version, _, _, count, ..] = *directory else {
            return Err(invalid(format!("{} values, need at least 4", directory.len())));
        };
        if version != 1 {
            return Err(invalid(format!("directory version {}", version)));
        }
        let needed = 4 + 4 * count as usize;
        if directory.len() < needed {
            return Err(invalid(format!(
                "{} keys declared, only {} values present",
                count,
                directory.len()
            )));
        }

        let mut keys = GeoKeys::default();
        for key in directory[4..needed].chunks_exact(4) {
            let (id, location, value) = (key[0], key[1], key[3]);
            if location != 0 {
                continue;
            }
            match id {
                GT_MODEL_TYPE => keys.model_type = Some(value),
                GT_RASTER_TYPE => keys.raster_type = Some(value),
                GEOGRAPHIC_TYPE => keys.geographic_type = Some(value),
                PROJECTED_CS_TYPE => keys.projected_type = Some(value),
                _ => {}
            }
        }
        Ok(keys)
    }

    pub fn pixel_is_point(&self) -> bool {
        self.raster_type == Some(RASTER_PIXEL_IS_POINT)
    }

    /// The CRS named by the keys.
    ///
    /// User-defined systems and codes without a projection definition are
    /// unsupported.
    pub fn crs(&self) -> Result<Crs, TiffError> {
        let code = match self.model_type {
            Some(MODEL_TYPE_GEOGRAPHIC) => self.geographic_type,
            Some(MODEL_TYPE_PROJECTED) | None => self.projected_type.or(self.geographic_type),
            Some(other) => {
                return Err(TiffError::Unsupported(format!("GeoTIFF model type {}", other)))
            }
        };
        match code {
            None => Err(TiffError::Unsupported(
                "raster CRS is not identified by an EPSG code".to_string(),
            )),
            Some(USER_DEFINED) => Err(TiffError::Unsupported(
                "user-defined coordinate reference system".to_string(),
            )),
            Some(code) => Crs::from_epsg(code as u32).ok_or_else(|| {
                TiffError::Unsupported(format!("EPSG:{} has no projection definition", code))
            }),
        }
    }
}

/// Build the pixel-to-CRS transform from `ModelTransformation`, or from
/// `ModelPixelScale` plus a single `ModelTiepoint`.
pub fn transform_from_tags(
    scale: Option<&[f64]>,
    tiepoints: Option<&[f64]>,
    matrix: Option<&[f64]>,
) -> Result<Affine, TiffError> {
    let transform = match (matrix, scale, tiepoints) {
        (Some(m), _, _) => {
            if m.len() < 16 {
                return Err(TiffError::InvalidTagValue {
                    tag: TiffTag::ModelTransformation.name(),
                    message: format!("{} values, need 16", m.len()),
                });
            }
            Affine::new(m[0], m[1], m[3], m[4], m[5], m[7])
        }
        (None, Some(s), Some(tp)) if s.len() >= 2 && tp.len() >= 6 => {
            let (i, j, x, y) = (tp[0], tp[1], tp[3], tp[4]);
            let (sx, sy) = (s[0], s[1]);
            Affine::new(sx, 0.0, x - i * sx, 0.0, -sy, y + j * sy)
        }
        (None, None, Some(tp)) if tp.len() > 6 => {
            return Err(TiffError::Unsupported(
                "georeferencing by ground control points".to_string(),
            ))
        }
        _ => {
            return Err(TiffError::Unsupported(
                "raster has no georeferencing".to_string(),
            ))
        }
    };

    if !transform.determinant().is_normal() {
        return Err(TiffError::InvalidTagValue {
            tag: TiffTag::ModelPixelScale.name(),
            message: "degenerate pixel size".to_string(),
        });
    }
    Ok(transform)
}

/// Move a point-registered transform so that it addresses pixel corners.
pub fn pixel_is_point_to_area(t: &Affine) -> Affine {
    t.translate_pixels(-0.5, -0.5)
}

/// Parse a `GDAL_NODATA` value.
pub fn parse_nodata(text: &str) -> Option<f64> {
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    match text.to_ascii_lowercase().as_str() {
        "nan" | "-nan" => Some(f64::NAN),
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => text.parse().ok(),
    }
}

/// Band descriptions from a `GDAL_METADATA` XML document, indexed from 0.
pub fn parse_band_descriptions(xml: &str) -> HashMap<usize, String> {
    let mut out = HashMap::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Item") {
        rest = &rest[start + 5..];
        let Some(tag_end) = rest.find('>') else { break };
        let attributes = &rest[..tag_end];
        let Some(close) = rest.find("</Item>") else { break };
        let text = rest.get(tag_end + 1..close).unwrap_or_default();
        rest = &rest[close..];

        let name = attribute(attributes, "name");
        let role = attribute(attributes, "role");
        let sample = attribute(attributes, "sample").and_then(|s| s.parse::<usize>().ok());
        if let (Some("DESCRIPTION"), Some("description"), Some(sample)) = (name, role, sample) {
            out.insert(sample, unescape(text));
        }
    }
    out
}

fn attribute<'a>(attributes: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{}=\"", name);
    let start = attributes.find(&needle)? + needle.len();
    let len = attributes[start..].find('"')?;
    Some(&attributes[start..start + len])
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Georeferencing of the base image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Georeference {
    pub crs: Crs,
    pub transform: Affine,
}

/// Read CRS and transform from the base IFD.
pub async fn read_georeference<R: RangeReader + ?Sized>(
    values: &ValueReader<'_, R>,
    ifd: &Ifd,
) -> Result<Georeference, TiffError> {
    let directory = ifd
        .get_entry_by_tag(TiffTag::GeoKeyDirectory)
        .ok_or_else(|| TiffError::Unsupported("raster has no GeoKeyDirectory".to_string()))?;
    let keys = GeoKeys::parse(&values.read_u16_array(directory).await?)?;
    let crs = keys.crs()?;

    let mut arrays = Vec::with_capacity(3);
    for tag in [
        TiffTag::ModelPixelScale,
        TiffTag::ModelTiepoint,
        TiffTag::ModelTransformation,
    ] {
        arrays.push(match ifd.get_entry_by_tag(tag) {
            Some(entry) => Some(values.read_f64_array(entry).await?),
            None => None,
        });
    }
    let mut transform =
        transform_from_tags(arrays[0].as_deref(), arrays[1].as_deref(), arrays[2].as_deref())?;
    if keys.pixel_is_point() {
        transform = pixel_is_point_to_area(&transform);
    }

    Ok(Georeference { crs, transform })
}
