//! Colormaps: lookup tables from an 8-bit value to RGBA.
//!
//! Named maps are built by interpolating between color stops; a `_r` suffix
//! reverses any named map. Custom maps come from JSON objects such as
//! `{"0": [0, 0, 0, 0], "255": [255, 0, 0]}` or from a raster's own palette.

use std::collections::BTreeMap;

use crate::error::TileError;

pub type Rgba = [u8; 4];

/// A position in [0, 1] mapped to an RGB color.
#[derive(Debug, Clone, Copy)]
struct ColorStop {
    t: f64,
    color: [u8; 3],
}

const fn stop(t: f64, r: u8, g: u8, b: u8) -> ColorStop {
    ColorStop {
        t,
        color: [r, g, b],
    }
}

const VIRIDIS: &[ColorStop] = &[
    stop(0.000, 68, 1, 84),
    stop(0.125, 71, 44, 122),
    stop(0.250, 59, 81, 139),
    stop(0.375, 44, 113, 142),
    stop(0.500, 33, 144, 141),
    stop(0.625, 39, 173, 129),
    stop(0.750, 92, 200, 99),
    stop(0.875, 170, 220, 50),
    stop(1.000, 253, 231, 37),
];

const MAGMA: &[ColorStop] = &[
    stop(0.000, 0, 0, 4),
    stop(0.125, 28, 16, 68),
    stop(0.250, 79, 18, 123),
    stop(0.375, 129, 37, 129),
    stop(0.500, 181, 54, 122),
    stop(0.625, 229, 80, 100),
    stop(0.750, 251, 135, 97),
    stop(0.875, 254, 194, 135),
    stop(1.000, 252, 253, 191),
];

const GREYS: &[ColorStop] = &[stop(0.0, 255, 255, 255), stop(1.0, 0, 0, 0)];

const TERRAIN: &[ColorStop] = &[
    stop(0.00, 51, 51, 153),
    stop(0.15, 0, 153, 255),
    stop(0.25, 0, 204, 102),
    stop(0.50, 255, 255, 153),
    stop(0.75, 128, 92, 84),
    stop(1.00, 255, 255, 255),
];

const RDYLGN: &[ColorStop] = &[
    stop(0.0, 165, 0, 38),
    stop(0.1, 215, 48, 39),
    stop(0.2, 244, 109, 67),
    stop(0.3, 253, 174, 97),
    stop(0.4, 254, 224, 139),
    stop(0.5, 255, 255, 191),
    stop(0.6, 217, 239, 139),
    stop(0.7, 166, 217, 106),
    stop(0.8, 102, 189, 99),
    stop(0.9, 26, 152, 80),
    stop(1.0, 0, 104, 55),
];

const NAMED: &[(&str, &[ColorStop])] = &[
    ("viridis", VIRIDIS),
    ("magma", MAGMA),
    ("greys", GREYS),
    ("terrain", TERRAIN),
    ("rdylgn", RDYLGN),
];

fn lerp(a: u8, b: u8, t: f64) -> u8 {
    (a as f64 + (b as f64 - a as f64) * t).round() as u8
}

fn multi_stop(stops: &[ColorStop], t: f64) -> [u8; 3] {
    let first = stops[0];
    if t <= first.t {
        return first.color;
    }
    for pair in stops.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if t <= hi.t {
            let ratio = (t - lo.t) / (hi.t - lo.t);
            return [
                lerp(lo.color[0], hi.color[0], ratio),
                lerp(lo.color[1], hi.color[1], ratio),
                lerp(lo.color[2], hi.color[2], ratio),
            ];
        }
    }
    stops[stops.len() - 1].color
}

/// Lookup table indexed by an 8-bit (or palette) value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Colormap {
    name: String,
    entries: Vec<Rgba>,
}

impl Colormap {
    /// Names accepted by [`Colormap::named`], without the `_r` variants.
    pub fn available() -> impl Iterator<Item = &'static str> {
        NAMED.iter().map(|(name, _)| *name)
    }

    /// A built-in map such as `viridis` or `terrain_r`.
    pub fn named(name: &str) -> Result<Self, TileError> {
        let lower = name.to_ascii_lowercase();
        let (base, reversed) = match lower.strip_suffix("_r") {
            Some(base) => (base, true),
            None => (lower.as_str(), false),
        };
        let stops = NAMED
            .iter()
            .find(|(n, _)| *n == base)
            .map(|(_, stops)| *stops)
            .ok_or_else(|| {
                TileError::render_options(format!(
                    "unknown colormap '{}' (available: {})",
                    name,
                    Self::available().collect::<Vec<_>>().join(", ")
                ))
            })?;

        let mut entries: Vec<Rgba> = (0..256)
            .map(|i| {
                let [r, g, b] = multi_stop(stops, i as f64 / 255.0);
                [r, g, b, 255]
            })
            .collect();
        if reversed {
            entries.reverse();
        }
        Ok(Self {
            name: lower,
            entries,
        })
    }

    /// Parse a JSON object of `"value": [r, g, b(, a)]` entries.
    ///
    /// Values without an entry map to transparent.
    pub fn from_json(text: &str) -> Result<Self, TileError> {
        let parsed: BTreeMap<String, Vec<u8>> = serde_json::from_str(text)
            .map_err(|e| TileError::render_options(format!("invalid colormap JSON: {}", e)))?;

        let mut entries = vec![[0u8; 4]; 256];
        for (key, color) in parsed {
            let index: u8 = key.trim().parse().map_err(|_| {
                TileError::render_options(format!("colormap key '{}' is not in 0..=255", key))
            })?;
            entries[index as usize] = match color.as_slice() {
                [r, g, b] => [*r, *g, *b, 255],
                [r, g, b, a] => [*r, *g, *b, *a],
                _ => {
                    return Err(TileError::render_options(format!(
                        "colormap entry '{}' needs 3 or 4 components",
                        key
                    )))
                }
            };
        }
        Ok(Self {
            name: "custom".to_string(),
            entries,
        })
    }

    /// Wrap a raster's palette.
    pub fn from_palette(palette: &[Rgba]) -> Self {
        Self {
            name: "palette".to_string(),
            entries: palette.to_vec(),
        }
    }

    /// Parse a request value: a named map or a JSON object.
    pub fn parse(value: &str) -> Result<Self, TileError> {
        if value.trim_start().starts_with('{') {
            Self::from_json(value)
        } else {
            Self::named(value)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Color for `value`; transparent when the table has no entry.
    #[inline]
    pub fn lookup(&self, value: u8) -> Rgba {
        self.entries
            .get(value as usize)
            .copied()
            .unwrap_or([0, 0, 0, 0])
    }

    /// Whether any entry is not fully opaque.
    pub fn has_transparency(&self) -> bool {
        self.entries.iter().any(|c| c[3] != 255)
    }
}
