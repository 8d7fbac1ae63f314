//! Local supervised land-cover classification.
//!
//! Samples labelled geometries against a multi-band raster, trains one of
//! three classifier variants, classifies the scene, and evaluates the model
//! on a held-out partition (confusion matrix, accuracy, Cohen's kappa, ROC).

pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod geometry;
mod maybe_rayon;
pub mod pipeline;
pub mod raster;
pub mod sample;
pub mod split;

pub use error::{Error, Result};
