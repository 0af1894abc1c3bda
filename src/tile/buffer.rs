//! Decoded pixel arrays and validity masks.

use crate::format::DataType;

/// A `(bands, height, width)` array of samples.
///
/// Samples are held as `f64`, which represents every supported source type
/// exactly; `dtype` records the type they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub bands: usize,
    pub width: u32,
    pub height: u32,
    pub dtype: DataType,
    data: Vec<f64>,
}

impl PixelBuffer {
    /// A zero-filled buffer.
    pub fn new(bands: usize, width: u32, height: u32, dtype: DataType) -> Self {
        Self {
            bands,
            width,
            height,
            dtype,
            data: vec![0.0; bands * width as usize * height as usize],
        }
    }

    /// Wrap band-major samples; `None` if the length does not match.
    pub fn from_vec(
        bands: usize,
        width: u32,
        height: u32,
        dtype: DataType,
        data: Vec<f64>,
    ) -> Option<Self> {
        (data.len() == bands * width as usize * height as usize).then_some(Self {
            bands,
            width,
            height,
            dtype,
            data,
        })
    }

    #[inline]
    pub fn pixels_per_band(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    fn offset(&self, band: usize, col: u32, row: u32) -> usize {
        band * self.pixels_per_band() + row as usize * self.width as usize + col as usize
    }

    #[inline]
    pub fn get(&self, band: usize, col: u32, row: u32) -> f64 {
        self.data[self.offset(band, col, row)]
    }

    #[inline]
    pub fn set(&mut self, band: usize, col: u32, row: u32, value: f64) {
        let i = self.offset(band, col, row);
        self.data[i] = value;
    }

    pub fn band(&self, band: usize) -> &[f64] {
        let n = self.pixels_per_band();
        &self.data[band * n..(band + 1) * n]
    }

    pub fn band_mut(&mut self, band: usize) -> &mut [f64] {
        let n = self.pixels_per_band();
        &mut self.data[band * n..(band + 1) * n]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Copy a `width × height` block of `src` (starting at `src_col`,
    /// `src_row`) to (`dst_col`, `dst_row`) in every band.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_region(
        &mut self,
        src: &PixelBuffer,
        src_col: u32,
        src_row: u32,
        dst_col: u32,
        dst_row: u32,
        width: u32,
        height: u32,
    ) {
        let w = width as usize;
        for band in 0..self.bands.min(src.bands) {
            for r in 0..height {
                let s = src.offset(band, src_col, src_row + r);
                let d = self.offset(band, dst_col, dst_row + r);
                self.data[d..d + w].copy_from_slice(&src.data[s..s + w]);
            }
        }
    }
}

/// Per-pixel validity of a 2-D grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    valid: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32, valid: bool) -> Self {
        Self {
            width,
            height,
            valid: vec![valid; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn get(&self, col: u32, row: u32) -> bool {
        self.valid[row as usize * self.width as usize + col as usize]
    }

    #[inline]
    pub fn set(&mut self, col: u32, row: u32, valid: bool) {
        let i = row as usize * self.width as usize + col as usize;
        self.valid[i] = valid;
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.valid
    }

    pub fn all_valid(&self) -> bool {
        self.valid.iter().all(|&v| v)
    }

    pub fn any_valid(&self) -> bool {
        self.valid.iter().any(|&v| v)
    }

    pub fn count_valid(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Fill a rectangle.
    pub fn fill_region(&mut self, col: u32, row: u32, width: u32, height: u32, valid: bool) {
        for r in row..row + height {
            let start = r as usize * self.width as usize + col as usize;
            self.valid[start..start + width as usize].fill(valid);
        }
    }
}
