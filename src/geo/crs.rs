//! Coordinate reference systems and point transforms.
//!
//! A CRS is identified by its EPSG code. Transforms between EPSG:4326 and
//! EPSG:3857 use closed-form spherical Mercator; every other pair goes
//! through proj4rs with definitions from the crs-definitions database.

use std::f64::consts::PI;
use std::fmt;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::Serialize;

use super::affine::Bounds;

/// Spherical Mercator earth radius in metres.
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator square.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// A CRS identified by EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Crs(pub(crate) u16);

impl Crs {
    pub const WGS84: Crs = Crs(4326);
    pub const WEB_MERCATOR: Crs = Crs(3857);

    /// Look up an EPSG code. Legacy Web Mercator aliases map to 3857.
    pub fn from_epsg(code: u32) -> Option<Crs> {
        let code = match code {
            900913 | 102100 | 102113 | 3785 => 3857,
            other => u16::try_from(other).ok()?,
        };
        if code == 4326 || code == 3857 || crs_definitions::from_code(code).is_some() {
            Some(Crs(code))
        } else {
            None
        }
    }

    pub fn epsg(&self) -> u16 {
        self.0
    }

    /// PROJ.4 definition string.
    pub fn proj4(&self) -> Option<&'static str> {
        crs_definitions::from_code(self.0).map(|def| def.proj4)
    }

    /// Whether coordinates are longitude/latitude in degrees.
    pub fn is_geographic(&self) -> bool {
        match self.0 {
            4326 => true,
            3857 => false,
            _ => self.proj4().is_some_and(|p| p.contains("+proj=longlat")),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

pub fn mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

/// A point transform between two CRSs.
pub enum CrsTransform {
    Identity,
    GeographicToMercator,
    MercatorToGeographic,
    Proj {
        src: Box<Proj>,
        dst: Box<Proj>,
        src_geographic: bool,
        dst_geographic: bool,
    },
}

impl CrsTransform {
    /// Build the transform from `src` to `dst`.
    pub fn new(src: Crs, dst: Crs) -> Result<Self, String> {
        if src == dst {
            return Ok(CrsTransform::Identity);
        }
        match (src.epsg(), dst.epsg()) {
            (4326, 3857) => return Ok(CrsTransform::GeographicToMercator),
            (3857, 4326) => return Ok(CrsTransform::MercatorToGeographic),
            _ => {}
        }

        let build = |crs: Crs| -> Result<Proj, String> {
            let def = crs
                .proj4()
                .ok_or_else(|| format!("{} has no projection definition", crs))?;
            Proj::from_proj_string(def).map_err(|e| format!("{}: {:?}", crs, e))
        };

        Ok(CrsTransform::Proj {
            src: Box::new(build(src)?),
            dst: Box::new(build(dst)?),
            src_geographic: src.is_geographic(),
            dst_geographic: dst.is_geographic(),
        })
    }

    /// Transform one point; `None` if it has no image in the target CRS.
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let (ox, oy) = match self {
            CrsTransform::Identity => (x, y),
            CrsTransform::GeographicToMercator => lon_lat_to_mercator(x, y),
            CrsTransform::MercatorToGeographic => mercator_to_lon_lat(x, y),
            CrsTransform::Proj {
                src,
                dst,
                src_geographic,
                dst_geographic,
            } => {
                let mut point = if *src_geographic {
                    (x.to_radians(), y.to_radians(), 0.0)
                } else {
                    (x, y, 0.0)
                };
                transform(src, dst, &mut point).ok()?;
                if *dst_geographic {
                    (point.0.to_degrees(), point.1.to_degrees())
                } else {
                    (point.0, point.1)
                }
            }
        };
        (ox.is_finite() && oy.is_finite()).then_some((ox, oy))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, CrsTransform::Identity)
    }

    /// Envelope of `bounds` in the target CRS, sampled along its edges.
    pub fn transform_bounds(&self, bounds: &Bounds, points_per_edge: usize) -> Option<Bounds> {
        if self.is_identity() {
            return Some(*bounds);
        }
        Bounds::from_points(
            bounds
                .densify(points_per_edge)
                .into_iter()
                .filter_map(|(x, y)| self.apply(x, y)),
        )
    }
}
