//! Error taxonomy for the classification pipeline.
//!
//! Every failure aborts the run; callers propagate with `?`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("band '{0}' not found in raster")]
    InvalidBand(String),

    #[error("geometry {index} covers no usable pixels")]
    EmptyGeometry { index: usize },

    #[error("split produced an empty partition: {train} train / {test} test samples")]
    EmptySplit { train: usize, test: usize },

    #[error("training needs at least 2 distinct classes, found {classes} in {samples} samples")]
    InsufficientData { classes: usize, samples: usize },

    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("kappa is undefined: expected chance agreement is 1")]
    UndefinedKappa,

    #[error("ROC needs both target and non-target points ({targets} targets, {non_targets} non-targets)")]
    SingleClassRoc { targets: usize, non_targets: usize },

    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(name: &'static str, value: impl ToString, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
