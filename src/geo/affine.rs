use serde::Serialize;

/// Affine map from pixel space (col, row) to model space (x, y).
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// Pixel (0, 0) is the outer corner of the top-left pixel; the pixel centre
/// is at (0.5, 0.5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// North-up transform with the given upper-left corner and pixel size.
    pub fn from_origin(west: f64, north: f64, xres: f64, yres: f64) -> Self {
        Self::new(xres, 0.0, west, 0.0, -yres, north)
    }

    /// North-up transform that maps a `width × height` grid onto `bounds`.
    pub fn from_bounds(bounds: &Bounds, width: u32, height: u32) -> Self {
        Self::from_origin(
            bounds.left,
            bounds.top,
            bounds.width() / width as f64,
            bounds.height() / height as f64,
        )
    }

    #[inline]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// Inverse transform (model → pixel), `None` if degenerate.
    pub fn inverse(&self) -> Option<Affine> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let ia = self.e / det;
        let ib = -self.b / det;
        let id = -self.d / det;
        let ie = self.a / det;
        Some(Affine::new(
            ia,
            ib,
            -self.c * ia - self.f * ib,
            id,
            ie,
            -self.c * id - self.f * ie,
        ))
    }

    /// The transform of a grid whose pixels are `sx × sy` pixels of this one.
    pub fn scale(&self, sx: f64, sy: f64) -> Affine {
        Affine::new(
            self.a * sx,
            self.b * sy,
            self.c,
            self.d * sx,
            self.e * sy,
            self.f,
        )
    }

    /// The transform of a window starting at pixel (col, row) of this grid.
    pub fn translate_pixels(&self, col: f64, row: f64) -> Affine {
        let (c, f) = self.apply(col, row);
        Affine { c, f, ..*self }
    }

    /// Pixel size along x and y in model units.
    pub fn resolution(&self) -> (f64, f64) {
        (self.a.hypot(self.d), self.b.hypot(self.e))
    }

    /// Whether pixel rows and columns are aligned with the model axes.
    pub fn is_rectilinear(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// Model-space envelope of a `width × height` grid.
    pub fn bounds(&self, width: u32, height: u32) -> Bounds {
        let (w, h) = (width as f64, height as f64);
        Bounds::from_points([
            self.apply(0.0, 0.0),
            self.apply(w, 0.0),
            self.apply(0.0, h),
            self.apply(w, h),
        ])
        .unwrap_or(Bounds::new(self.c, self.f, self.c, self.f))
    }

    /// GDAL-ordered geotransform `[c, a, b, f, d, e]`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }
}

/// Axis-aligned bounding box `(left, bottom, right, top)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    pub const fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    /// Envelope of a set of points, skipping non-finite ones.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut out: Option<Bounds> = None;
        for (x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            out = Some(match out {
                None => Bounds::new(x, y, x, y),
                Some(b) => Bounds::new(b.left.min(x), b.bottom.min(y), b.right.max(x), b.top.max(y)),
            });
        }
        out
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.left + self.right) / 2.0, (self.bottom + self.top) / 2.0)
    }

    /// Overlap test with an absolute tolerance.
    ///
    /// Boxes separated by more than `tolerance` are disjoint; boxes sharing
    /// an edge (within `tolerance`) intersect.
    pub fn intersects(&self, other: &Bounds, tolerance: f64) -> bool {
        self.left <= other.right + tolerance
            && other.left <= self.right + tolerance
            && self.bottom <= other.top + tolerance
            && other.bottom <= self.top + tolerance
    }

    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        let b = Bounds::new(
            self.left.max(other.left),
            self.bottom.max(other.bottom),
            self.right.min(other.right),
            self.top.min(other.top),
        );
        (b.left <= b.right && b.bottom <= b.top).then_some(b)
    }

    /// `[left, bottom, right, top]`
    pub fn to_array(&self) -> [f64; 4] {
        [self.left, self.bottom, self.right, self.top]
    }

    /// Points along the four edges, `points_per_edge` per edge including
    /// the corners, for transforming curved footprints.
    pub fn densify(&self, points_per_edge: usize) -> Vec<(f64, f64)> {
        let n = points_per_edge.max(2);
        let mut out = Vec::with_capacity(4 * n);
        for i in 0..n {
            let t = i as f64 / (n - 1) as f64;
            let x = self.left + t * self.width();
            let y = self.bottom + t * self.height();
            out.push((x, self.top));
            out.push((x, self.bottom));
            out.push((self.left, y));
            out.push((self.right, y));
        }
        out
    }
}
