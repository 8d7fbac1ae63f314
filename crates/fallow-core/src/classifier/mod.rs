//! Trainable classifiers behind one train/predict surface.
//!
//! `ClassifierKind` is the configuration choice; training it yields a
//! `TrainedModel` that dispatches to the fitted variant.

pub mod forest;
pub mod margin;
pub mod tree;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::maybe_rayon::*;
use crate::raster::{ClassRaster, RasterBandStack};
use crate::sample::SampleCollection;
use crate::{Error, Result};

pub use forest::{ForestParams, RandomForest};
pub use margin::{Kernel, MarginModel, MarginParams};
pub use tree::{Criterion, DecisionTree, TreeParams};

/// Which classifier to train, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClassifierKind {
    DecisionTree(TreeParams),
    RandomForest(ForestParams),
    Margin(MarginParams),
}

impl Default for ClassifierKind {
    fn default() -> Self {
        ClassifierKind::DecisionTree(TreeParams::default())
    }
}

impl ClassifierKind {
    pub fn name(&self) -> &'static str {
        match self {
            ClassifierKind::DecisionTree(_) => "decision-tree",
            ClassifierKind::RandomForest(_) => "random-forest",
            ClassifierKind::Margin(_) => "margin",
        }
    }

    /// Fit the selected variant. Fails with `InsufficientData` when fewer
    /// than two distinct classes are present.
    pub fn train(&self, samples: &SampleCollection) -> Result<TrainedModel> {
        let model = match self {
            ClassifierKind::DecisionTree(p) => TrainedModel::DecisionTree(DecisionTree::fit(samples, p)?),
            ClassifierKind::RandomForest(p) => TrainedModel::RandomForest(RandomForest::fit(samples, p)?),
            ClassifierKind::Margin(p) => TrainedModel::Margin(MarginModel::fit(samples, p)?),
        };
        info!(
            classifier = self.name(),
            samples = samples.len(),
            features = model.n_features(),
            classes = model.classes().len(),
            "trained classifier"
        );
        Ok(model)
    }
}

/// Training rows with labels encoded as indices into the sorted class list.
pub(crate) struct Encoded<'a> {
    pub rows: Vec<&'a [f64]>,
    pub y: Vec<usize>,
    pub classes: Vec<i64>,
    pub n_features: usize,
}

impl<'a> Encoded<'a> {
    pub fn new(samples: &'a SampleCollection) -> Result<Self> {
        let classes = samples.classes();
        if classes.len() < 2 {
            return Err(Error::InsufficientData {
                classes: classes.len(),
                samples: samples.len(),
            });
        }
        let y = samples
            .iter()
            .map(|s| classes.binary_search(&s.label).unwrap_or_default())
            .collect();
        Ok(Self {
            rows: samples.iter().map(|s| s.features.as_slice()).collect(),
            y,
            classes,
            n_features: samples.n_features(),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Index of the largest count; the first (smallest label) wins ties.
pub(crate) fn argmax<T: PartialOrd + Copy>(values: &[T]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Shared surface of the fitted variants. Inputs are already shape-checked.
pub(crate) trait Fitted: Send + Sync {
    fn classes(&self) -> &[i64];
    fn n_features(&self) -> usize;
    fn predict_index(&self, x: &[f64]) -> usize;
    /// Score in [0, 1] for the larger of two classes.
    fn positive_score(&self, x: &[f64]) -> f64;
}

/// A fitted classifier. Owns no reference to its training data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TrainedModel {
    DecisionTree(DecisionTree),
    RandomForest(RandomForest),
    Margin(MarginModel),
}

impl TrainedModel {
    fn fitted(&self) -> &dyn Fitted {
        match self {
            TrainedModel::DecisionTree(m) => m,
            TrainedModel::RandomForest(m) => m,
            TrainedModel::Margin(m) => m,
        }
    }

    /// Class labels the model can emit, ascending.
    pub fn classes(&self) -> &[i64] {
        self.fitted().classes()
    }

    pub fn n_features(&self) -> usize {
        self.fitted().n_features()
    }

    fn check_shape(&self, x: &[f64]) -> Result<()> {
        let expected = self.n_features();
        if x.len() != expected {
            return Err(Error::ShapeMismatch { expected, actual: x.len() });
        }
        Ok(())
    }

    pub fn predict(&self, x: &[f64]) -> Result<i64> {
        self.check_shape(x)?;
        let m = self.fitted();
        Ok(m.classes()[m.predict_index(x)])
    }

    /// Continuous score in [0, 1] that `x` belongs to the positive (larger)
    /// class. Only defined for two-class models.
    pub fn score(&self, x: &[f64]) -> Result<f64> {
        self.check_shape(x)?;
        let m = self.fitted();
        if m.classes().len() != 2 {
            return Err(Error::invalid(
                "model",
                format!("{} classes", m.classes().len()),
                "scores need a two-class model",
            ));
        }
        Ok(m.positive_score(x))
    }

    pub fn predict_collection(&self, samples: &SampleCollection) -> Result<Vec<i64>> {
        samples.iter().map(|s| self.predict(&s.features)).collect()
    }

    /// Classify every pixel of `stack` using `bands` as the feature layout.
    /// Masked pixels stay unclassified.
    pub fn predict_raster<S: AsRef<str>>(
        &self,
        stack: &RasterBandStack,
        bands: &[S],
    ) -> Result<ClassRaster> {
        let indices = stack.band_indices(bands)?;
        if indices.len() != self.n_features() {
            return Err(Error::ShapeMismatch {
                expected: self.n_features(),
                actual: indices.len(),
            });
        }
        let m = self.fitted();
        let (width, height) = (stack.width(), stack.height());

        let rows: Vec<Vec<Option<i64>>> = (0..height)
            .into_par_iter()
            .map(|row| {
                (0..width)
                    .map(|col| {
                        stack
                            .pixel_features(&indices, row, col)
                            .map(|x| m.classes()[m.predict_index(&x)])
                    })
                    .collect()
            })
            .collect();

        let raster = ClassRaster {
            width,
            height,
            transform: *stack.transform(),
            crs: stack.crs().to_string(),
            classes: m.classes().to_vec(),
            data: rows.into_iter().flatten().collect(),
        };
        info!(width, height, classified = raster.data.iter().flatten().count(), "classified raster");
        Ok(raster)
    }
}
