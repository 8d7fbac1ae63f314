//! Accuracy assessment: error matrices and ROC analysis.

pub mod confusion;
pub mod roc;

pub use confusion::ConfusionMatrix;
pub use roc::{RocCurve, RocPoint, RocPoints};
