//! Sample extraction: joins labelled geometries against a band stack to
//! build a labelled feature table.
//!
//! Points take the pixel containing them. Polygons take every pixel whose
//! centre falls inside (even-odd rule), or, with an explicit sampling scale,
//! every `scale`-sized grid cell whose centre falls inside, each resolved to
//! the raster pixel under that centre (nearest-neighbour). Pixels masked in
//! any selected band are dropped.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::geometry::{Geometry, LabeledGeometry};
use crate::raster::RasterBandStack;
use crate::{Error, Result};

/// One feature vector with its class label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub features: Vec<f64>,
    pub label: i64,
}

impl LabeledSample {
    pub fn new(features: Vec<f64>, label: i64) -> Self {
        Self { features, label }
    }
}

/// Ordered samples sharing one feature layout (`band_names`).
/// Order is significant: splitting keys on sample index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleCollection {
    band_names: Vec<String>,
    samples: Vec<LabeledSample>,
}

impl SampleCollection {
    pub fn new(band_names: Vec<String>) -> Self {
        Self { band_names, samples: Vec::new() }
    }

    pub fn from_samples(band_names: Vec<String>, samples: Vec<LabeledSample>) -> Result<Self> {
        let mut c = Self::new(band_names);
        for s in samples {
            c.push(s)?;
        }
        Ok(c)
    }

    pub fn push(&mut self, sample: LabeledSample) -> Result<()> {
        if sample.features.len() != self.band_names.len() {
            return Err(Error::ShapeMismatch {
                expected: self.band_names.len(),
                actual: sample.features.len(),
            });
        }
        self.samples.push(sample);
        Ok(())
    }

    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    pub fn n_features(&self) -> usize {
        self.band_names.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LabeledSample> {
        self.samples.iter()
    }

    pub fn labels(&self) -> Vec<i64> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// Distinct labels, ascending.
    pub fn classes(&self) -> Vec<i64> {
        let mut classes = self.labels();
        classes.sort_unstable();
        classes.dedup();
        classes
    }
}

impl<'a> IntoIterator for &'a SampleCollection {
    type Item = &'a LabeledSample;
    type IntoIter = std::slice::Iter<'a, LabeledSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Pixels `(row, col)` covered by `geometry`.
fn covered_pixels(stack: &RasterBandStack, geometry: &Geometry, scale: Option<f64>) -> Vec<(usize, usize)> {
    if let Geometry::Point { coordinates: [x, y] } = geometry {
        return stack.pixel_at(*x, *y).into_iter().collect();
    }
    let Some(bb) = geometry.bbox() else {
        return Vec::new();
    };
    let t = stack.transform();

    // Cell step along each axis, signed like the raster's pixel size.
    let (step_x, step_y, cols, rows) = match scale {
        None => (t.pixel_width, t.pixel_height, stack.width(), stack.height()),
        Some(s) => (
            s * t.pixel_width.signum(),
            s * t.pixel_height.signum(),
            (stack.width() as f64 * t.pixel_width.abs() / s).ceil() as usize,
            (stack.height() as f64 * t.pixel_height.abs() / s).ceil() as usize,
        ),
    };

    let index_range = |lo: f64, hi: f64, origin: f64, step: f64, n: usize| {
        let a = (lo - origin) / step;
        let b = (hi - origin) / step;
        let start = a.min(b).floor().max(0.0) as usize;
        let end = (a.max(b).ceil().max(0.0) as usize).min(n);
        start..end
    };
    let col_range = index_range(bb.min_x, bb.max_x, t.origin_x, step_x, cols);
    let row_range = index_range(bb.min_y, bb.max_y, t.origin_y, step_y, rows);

    let mut out = Vec::new();
    for j in row_range {
        let cy = t.origin_y + (j as f64 + 0.5) * step_y;
        for i in col_range.clone() {
            let cx = t.origin_x + (i as f64 + 0.5) * step_x;
            if !geometry.contains(cx, cy) {
                continue;
            }
            match scale {
                None => out.push((j, i)),
                Some(_) => out.extend(stack.pixel_at(cx, cy)),
            }
        }
    }
    out
}

fn check_scale(scale: Option<f64>) -> Result<()> {
    match scale {
        Some(s) if !(s.is_finite() && s > 0.0) => {
            Err(Error::invalid("scale", s, "sampling scale must be positive and finite"))
        }
        _ => Ok(()),
    }
}

/// Build a labelled feature table from `geometries` over the `bands` of `stack`.
///
/// Fails with `InvalidBand` for an unknown band and `EmptyGeometry` when a
/// geometry covers no unmasked pixel.
pub fn extract_samples<S: AsRef<str>>(
    stack: &RasterBandStack,
    bands: &[S],
    geometries: &[LabeledGeometry],
    scale: Option<f64>,
) -> Result<SampleCollection> {
    check_scale(scale)?;
    let indices = stack.band_indices(bands)?;
    let names = bands.iter().map(|b| b.as_ref().to_string()).collect();
    let mut collection = SampleCollection::new(names);

    for (index, lg) in geometries.iter().enumerate() {
        let before = collection.len();
        for (row, col) in covered_pixels(stack, &lg.geometry, scale) {
            if let Some(features) = stack.pixel_features(&indices, row, col) {
                collection.push(LabeledSample::new(features, lg.label))?;
            }
        }
        let n = collection.len() - before;
        if n == 0 {
            return Err(Error::EmptyGeometry { index });
        }
        debug!(geometry = index, label = lg.label, samples = n, "sampled geometry");
    }

    info!(
        geometries = geometries.len(),
        samples = collection.len(),
        classes = collection.classes().len(),
        "extracted training samples"
    );
    Ok(collection)
}

/// Maximum of `band` over each geometry's covered pixels, paired with the
/// geometry's label. Same coverage rules and errors as [`extract_samples`].
pub fn reduce_max(
    stack: &RasterBandStack,
    band: &str,
    geometries: &[LabeledGeometry],
    scale: Option<f64>,
) -> Result<Vec<(f64, i64)>> {
    check_scale(scale)?;
    let b = stack.band_index(band)?;
    geometries
        .iter()
        .enumerate()
        .map(|(index, lg)| {
            covered_pixels(stack, &lg.geometry, scale)
                .into_iter()
                .map(|(r, c)| stack.get(b, r, c))
                .filter(|v| v.is_finite())
                .map(f64::from)
                .reduce(f64::max)
                .map(|max| (max, lg.label))
                .ok_or(Error::EmptyGeometry { index })
        })
        .collect()
}
