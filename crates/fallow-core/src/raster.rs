use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Affine pixel → map transform without rotation terms.
/// `pixel_height` is negative for north-up rasters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self { origin_x, origin_y, pixel_width, pixel_height }
    }

    /// Fractional `(col, row)` of a map coordinate.
    #[inline]
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        )
    }

    /// Map-space extent of a `width` × `height` grid.
    pub fn bounds(&self, width: usize, height: usize) -> BBox {
        let x1 = self.origin_x + width as f64 * self.pixel_width;
        let y1 = self.origin_y + height as f64 * self.pixel_height;
        BBox::new(
            self.origin_x.min(x1),
            self.origin_y.min(y1),
            self.origin_x.max(x1),
            self.origin_y.max(y1),
        )
    }
}

/// Axis-aligned rectangle in map coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// One named raster band, row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub data: Vec<f32>,
}

impl Band {
    pub fn new(name: impl Into<String>, data: Vec<f32>) -> Self {
        Self { name: name.into(), data }
    }
}

/// Wire form of a band stack; converted through [`RasterBandStack::new`] so a
/// deserialised stack is validated like a constructed one.
#[derive(Deserialize)]
struct StackRecord {
    bands: Vec<Band>,
    width: usize,
    height: usize,
    transform: GeoTransform,
    #[serde(default)]
    crs: String,
}

impl TryFrom<StackRecord> for RasterBandStack {
    type Error = Error;

    fn try_from(r: StackRecord) -> Result<Self> {
        RasterBandStack::new(r.bands, r.width, r.height, r.transform, r.crs)
    }
}

/// An ordered stack of equally sized bands over one extent.
///
/// Band values are `f32`; coordinate math uses `f64`. Non-finite values are
/// masked pixels. The stack is immutable: derivations return new stacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StackRecord")]
pub struct RasterBandStack {
    bands: Vec<Band>,
    width: usize,
    height: usize,
    transform: GeoTransform,
    crs: String,
}

impl RasterBandStack {
    pub fn new(
        bands: Vec<Band>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: impl Into<String>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::invalid("dimensions", format!("{width}x{height}"), "raster must be non-empty"));
        }
        if !(transform.pixel_width.is_finite() && transform.pixel_width != 0.0)
            || !(transform.pixel_height.is_finite() && transform.pixel_height != 0.0)
        {
            return Err(Error::invalid(
                "transform",
                format!("{}x{}", transform.pixel_width, transform.pixel_height),
                "pixel size must be finite and non-zero",
            ));
        }
        let mut seen = HashSet::new();
        for band in &bands {
            if band.data.len() != width * height {
                return Err(Error::ShapeMismatch {
                    expected: width * height,
                    actual: band.data.len(),
                });
            }
            if !seen.insert(band.name.as_str()) {
                return Err(Error::invalid("bands", &band.name, "duplicate band name"));
            }
        }
        Ok(Self { bands, width, height, transform, crs: crs.into() })
    }

    /// Replace every occurrence of `nodata` with NaN.
    pub fn with_nodata(mut self, nodata: f32) -> Self {
        for band in &mut self.bands {
            for v in &mut band.data {
                if *v == nodata {
                    *v = f32::NAN;
                }
            }
        }
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn bounds(&self) -> BBox {
        self.transform.bounds(self.width, self.height)
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_index(&self, name: &str) -> Result<usize> {
        self.bands
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| Error::InvalidBand(name.to_string()))
    }

    pub fn band(&self, name: &str) -> Result<&Band> {
        Ok(&self.bands[self.band_index(name)?])
    }

    /// Resolve band names to indices, preserving the requested order.
    pub fn band_indices<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>> {
        names.iter().map(|n| self.band_index(n.as_ref())).collect()
    }

    #[inline]
    pub fn get(&self, band: usize, row: usize, col: usize) -> f32 {
        self.bands[band].data[row * self.width + col]
    }

    /// Feature vector of the given bands at `(row, col)`; `None` when any
    /// selected band is masked there.
    pub fn pixel_features(&self, bands: &[usize], row: usize, col: usize) -> Option<Vec<f64>> {
        let mut out = Vec::with_capacity(bands.len());
        for &b in bands {
            let v = self.get(b, row, col);
            if !v.is_finite() {
                return None;
            }
            out.push(v as f64);
        }
        Some(out)
    }

    /// `(row, col)` of the pixel containing map point `(x, y)`, if inside.
    pub fn pixel_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (fc, fr) = self.transform.to_pixel(x, y);
        if !fc.is_finite() || !fr.is_finite() || fc < 0.0 || fr < 0.0 {
            return None;
        }
        let (col, row) = (fc.floor() as usize, fr.floor() as usize);
        (col < self.width && row < self.height).then_some((row, col))
    }

    /// New stack with only `names`, in that order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        let bands = names
            .iter()
            .map(|n| self.band(n.as_ref()).cloned())
            .collect::<Result<Vec<_>>>()?;
        Self::new(bands, self.width, self.height, self.transform, self.crs.clone())
    }

    /// Crop to the pixel window covering `roi`.
    pub fn clip(&self, roi: &BBox) -> Result<Self> {
        let miss = || Error::invalid("roi", format!("{roi:?}"), "region does not overlap the raster");
        if !self.bounds().intersects(roi) {
            return Err(miss());
        }

        let (c0, r0) = self.transform.to_pixel(roi.min_x, roi.min_y);
        let (c1, r1) = self.transform.to_pixel(roi.max_x, roi.max_y);
        let col_start = c0.min(c1).floor().max(0.0) as usize;
        let row_start = r0.min(r1).floor().max(0.0) as usize;
        let col_end = (c0.max(c1).ceil() as usize).min(self.width);
        let row_end = (r0.max(r1).ceil() as usize).min(self.height);
        if col_start >= col_end || row_start >= row_end {
            return Err(miss());
        }

        let (w, h) = (col_end - col_start, row_end - row_start);
        let bands = self
            .bands
            .iter()
            .map(|b| {
                let mut data = Vec::with_capacity(w * h);
                for r in row_start..row_end {
                    let start = r * self.width + col_start;
                    data.extend_from_slice(&b.data[start..start + w]);
                }
                Band::new(b.name.clone(), data)
            })
            .collect();

        let t = &self.transform;
        let transform = GeoTransform::new(
            t.origin_x + col_start as f64 * t.pixel_width,
            t.origin_y + row_start as f64 * t.pixel_height,
            t.pixel_width,
            t.pixel_height,
        );
        Self::new(bands, w, h, transform, self.crs.clone())
    }

    /// Append `(a − b) / (a + b)` as band `name` (e.g. NDVI from NIR and red).
    /// Pixels where `a + b == 0` are masked.
    pub fn with_normalized_difference(&self, a: &str, b: &str, name: &str) -> Result<Self> {
        let da = &self.band(a)?.data;
        let db = &self.band(b)?.data;
        let data = da
            .iter()
            .zip(db)
            .map(|(&x, &y)| {
                let sum = x + y;
                if sum == 0.0 { f32::NAN } else { (x - y) / sum }
            })
            .collect();
        let mut bands = self.bands.clone();
        bands.push(Band::new(name, data));
        Self::new(bands, self.width, self.height, self.transform, self.crs.clone())
    }
}

/// Per-pixel class labels over the extent of a classified stack.
/// Masked input pixels are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRaster {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: String,
    /// Every class the producing model was trained on, ascending. Classes
    /// absent from `data` are still listed.
    #[serde(default)]
    pub classes: Vec<i64>,
    pub data: Vec<Option<i64>>,
}

impl ClassRaster {
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<i64> {
        self.data[row * self.width + col]
    }

    /// Pixel count per class, masked pixels excluded.
    pub fn class_counts(&self) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for label in self.data.iter().flatten() {
            *counts.entry(*label).or_insert(0) += 1;
        }
        counts
    }
}
