//! Pipeline driver: runs every stage of a classification in order.
//!
//! Stage order:
//!   1. Scene preparation (ROI clip, derived indices)
//!   2. Sampling
//!   3. Training on all samples and classification of the scene
//!   4. Train/test partition
//!   5. Validation on the held-out partition
//!   6. ROC analysis (optional)

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::classifier::TrainedModel;
use crate::config::{PipelineConfig, RocConfig};
use crate::evaluate::{ConfusionMatrix, RocCurve, RocPoint};
use crate::geometry::LabeledGeometry;
use crate::raster::{ClassRaster, RasterBandStack};
use crate::sample::{extract_samples, reduce_max, SampleCollection};
use crate::split::{split_non_empty, Split};
use crate::{Error, Result};

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Model trained on every sample; it classified the scene.
    pub model: TrainedModel,
    pub classified: ClassRaster,
    pub report: PipelineReport,
}

/// Accuracy assessment of the model retrained on the training partition.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub classifier: String,
    pub bands: Vec<String>,
    pub samples: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    /// Rows are true classes, columns predicted.
    pub confusion: ConfusionMatrix,
    pub accuracy: Option<f64>,
    /// Resubstitution accuracy on the training partition.
    pub train_accuracy: Option<f64>,
    pub kappa: f64,
    pub producers_accuracy: Vec<Option<f64>>,
    pub consumers_accuracy: Vec<Option<f64>>,
    /// Classified pixel count per class over the whole scene.
    pub class_pixels: BTreeMap<i64, usize>,
    pub roc: Option<RocReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RocReport {
    pub source: String,
    pub positive_class: i64,
    pub points: Vec<RocPoint>,
    pub auc: f64,
    pub best: RocPoint,
}

/// Clip to the configured ROI and append the configured indices.
pub fn prepare_stack(stack: &RasterBandStack, config: &PipelineConfig) -> Result<RasterBandStack> {
    let mut stack = match &config.roi {
        Some(roi) => stack.clip(roi)?,
        None => stack.clone(),
    };
    for nd in &config.indices {
        stack = stack.with_normalized_difference(&nd.a, &nd.b, &nd.name)?;
    }
    Ok(stack)
}

pub fn run(
    stack: &RasterBandStack,
    geometries: &[LabeledGeometry],
    config: &PipelineConfig,
) -> Result<PipelineResult> {
    config.validate()?;

    // ── 1. Scene preparation ────────────────────────────────────────────────
    let stack = prepare_stack(stack, config)?;
    info!(width = stack.width(), height = stack.height(), bands = stack.bands().len(), "prepared scene");

    // ── 2. Sampling ─────────────────────────────────────────────────────────
    let samples = extract_samples(&stack, &config.bands, geometries, config.scale)?;

    // ── 3. Training + scene classification ──────────────────────────────────
    let model = config.classifier.train(&samples)?;
    let classified = model.predict_raster(&stack, &config.bands)?;

    // ── 4. Partition ────────────────────────────────────────────────────────
    let Split { train, test } = split_non_empty(&samples, config.split_fraction, config.split_seed)?;

    // ── 5. Validation ───────────────────────────────────────────────────────
    let trained = config.classifier.train(&train)?;
    let confusion = error_matrix(&trained, &test)?;
    let kappa = confusion.kappa()?;
    let train_accuracy = error_matrix(&trained, &train)?.accuracy();

    // ── 6. ROC ──────────────────────────────────────────────────────────────
    let roc = config
        .roc
        .as_ref()
        .map(|r| roc_report(r, config, &stack, geometries, &trained, &test))
        .transpose()?;

    let report = PipelineReport {
        classifier: config.classifier.name().to_string(),
        bands: config.bands.clone(),
        samples: samples.len(),
        train_samples: train.len(),
        test_samples: test.len(),
        accuracy: confusion.accuracy(),
        train_accuracy,
        kappa,
        producers_accuracy: confusion.producers_accuracy(),
        consumers_accuracy: confusion.consumers_accuracy(),
        class_pixels: classified.class_counts(),
        confusion,
        roc,
    };
    info!(
        accuracy = ?report.accuracy,
        kappa = report.kappa,
        auc = ?report.roc.as_ref().map(|r| r.auc),
        "validation complete"
    );

    Ok(PipelineResult { model, classified, report })
}

fn error_matrix(model: &TrainedModel, samples: &SampleCollection) -> Result<ConfusionMatrix> {
    let predicted = model.predict_collection(samples)?;
    ConfusionMatrix::from_predictions(&samples.labels(), &predicted)
}

fn roc_report(
    roc: &RocConfig,
    config: &PipelineConfig,
    stack: &RasterBandStack,
    geometries: &[LabeledGeometry],
    model: &TrainedModel,
    test: &SampleCollection,
) -> Result<RocReport> {
    let target = roc.positive_class;
    let (source, points): (String, Vec<(f64, bool)>) = match &roc.score_band {
        Some(band) => {
            let maxima = reduce_max(stack, band, geometries, config.scale)?;
            let points = maxima.into_iter().map(|(v, label)| (v, label == target)).collect();
            (format!("max {band} per geometry"), points)
        }
        None => {
            let classes = model.classes();
            if !classes.contains(&target) {
                return Err(Error::invalid("positive_class", target, "not a trained class"));
            }
            // Scores favour the larger label.
            let flip = classes.last() != Some(&target);
            let points = test
                .iter()
                .map(|s| {
                    let p = model.score(&s.features)?;
                    Ok((if flip { 1.0 - p } else { p }, s.label == target))
                })
                .collect::<Result<Vec<_>>>()?;
            ("classifier score on test partition".to_string(), points)
        }
    };

    let curve = RocCurve::new(&points, config.roc_steps)?;
    Ok(RocReport {
        source,
        positive_class: target,
        points: curve.points().collect(),
        auc: curve.auc(),
        best: curve.best(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierKind, ForestParams, Kernel, MarginParams};
    use crate::config::NormalizedDifference;
    use crate::geometry::Geometry;
    use crate::raster::{BBox, Band, GeoTransform};
    use approx::assert_abs_diff_eq;

    /// 20 × 20 scene of 30 m pixels, origin (0, 600). Columns 0..10 are
    /// vegetated (high NIR), columns 10..20 bare.
    fn scene() -> RasterBandStack {
        let (mut b5, mut b4, mut b3) = (Vec::new(), Vec::new(), Vec::new());
        for r in 0..20 {
            for c in 0..20 {
                let jitter = 0.01 * ((r * 7 + c * 3) % 5) as f32;
                if c < 10 {
                    b5.push(0.5 + jitter);
                    b4.push(0.1 + jitter);
                    b3.push(0.08);
                } else {
                    b5.push(0.2 + jitter);
                    b4.push(0.3 + jitter);
                    b3.push(0.25);
                }
            }
        }
        RasterBandStack::new(
            vec![Band::new("B5", b5), Band::new("B4", b4), Band::new("B3", b3)],
            20,
            20,
            GeoTransform::new(0.0, 600.0, 30.0, -30.0),
            "EPSG:32611",
        )
        .unwrap()
    }

    /// Polygon over pixel columns `c0..c1` and rows `r0..r1`.
    fn cells(c0: usize, c1: usize, r0: usize, r1: usize) -> Geometry {
        let (x0, x1) = (c0 as f64 * 30.0, c1 as f64 * 30.0);
        let (y0, y1) = (600.0 - r1 as f64 * 30.0, 600.0 - r0 as f64 * 30.0);
        Geometry::polygon(vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]])
    }

    /// Four 3 × 3 blocks per class: label 0 on the vegetated side, 1 on the bare side.
    fn training() -> Vec<LabeledGeometry> {
        let mut g = Vec::new();
        for r0 in [1, 6, 11, 16] {
            g.push(LabeledGeometry::new(cells(1, 4, r0, r0 + 3), 0));
            g.push(LabeledGeometry::new(cells(14, 17, r0, r0 + 3), 1));
        }
        g
    }

    #[test]
    fn separable_scene_classifies_and_validates_perfectly() {
        let result = run(&scene(), &training(), &PipelineConfig::default()).unwrap();
        let report = &result.report;

        assert_eq!(report.samples, 72);
        assert_eq!(report.train_samples + report.test_samples, 72);
        assert_eq!(report.confusion.total(), report.test_samples as u64);
        assert_eq!(report.accuracy, Some(1.0));
        assert_abs_diff_eq!(report.kappa, 1.0, epsilon = 1e-12);
        assert!(report.train_accuracy >= report.accuracy);

        assert_eq!(result.classified.get(5, 2), Some(0));
        assert_eq!(result.classified.get(5, 17), Some(1));
        assert_eq!(report.class_pixels.values().sum::<usize>(), 400);
        assert!(report.roc.is_none());
    }

    #[test]
    fn every_classifier_runs_end_to_end() {
        let kinds = [
            ClassifierKind::RandomForest(ForestParams { n_trees: 10, ..ForestParams::default() }),
            ClassifierKind::Margin(MarginParams::default()),
            ClassifierKind::Margin(MarginParams { kernel: Kernel::Rbf { gamma: None }, ..MarginParams::default() }),
        ];
        for classifier in kinds {
            let config = PipelineConfig { classifier, ..PipelineConfig::default() };
            let report = run(&scene(), &training(), &config).unwrap().report;
            assert_eq!(report.accuracy, Some(1.0), "{}", report.classifier);
        }
    }

    #[test]
    fn runs_are_reproducible() {
        let config = PipelineConfig {
            classifier: ClassifierKind::RandomForest(ForestParams { n_trees: 8, seed: 5, ..ForestParams::default() }),
            ..PipelineConfig::default()
        };
        let a = run(&scene(), &training(), &config).unwrap();
        let b = run(&scene(), &training(), &config).unwrap();
        assert_eq!(
            serde_json::to_string(&a.report).unwrap(),
            serde_json::to_string(&b.report).unwrap()
        );
        assert_eq!(a.classified.data, b.classified.data);
    }

    #[test]
    fn ndvi_maxima_drive_roc() {
        let config = PipelineConfig {
            bands: vec!["B5".into(), "B4".into(), "NDVI".into()],
            indices: vec![NormalizedDifference { name: "NDVI".into(), a: "B5".into(), b: "B4".into() }],
            roc: Some(RocConfig { score_band: Some("NDVI".into()), positive_class: 0 }),
            roc_steps: 101,
            ..PipelineConfig::default()
        };
        let roc = run(&scene(), &training(), &config).unwrap().report.roc.unwrap();
        assert_eq!(roc.points.len(), 101);
        assert_abs_diff_eq!(roc.auc, 1.0, epsilon = 1e-9);
        assert_eq!((roc.best.fpr, roc.best.tpr), (0.0, 1.0));
    }

    #[test]
    fn classifier_scores_drive_roc() {
        for positive_class in [0, 1] {
            let config = PipelineConfig {
                roc: Some(RocConfig { score_band: None, positive_class }),
                ..PipelineConfig::default()
            };
            let roc = run(&scene(), &training(), &config).unwrap().report.roc.unwrap();
            assert_abs_diff_eq!(roc.auc, 1.0, epsilon = 1e-9);
        }
        let config = PipelineConfig {
            roc: Some(RocConfig { score_band: None, positive_class: 9 }),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            run(&scene(), &training(), &config),
            Err(Error::InvalidParameter { name: "positive_class", .. })
        ));
    }

    #[test]
    fn roi_clips_the_classified_scene() {
        let config = PipelineConfig {
            roi: Some(BBox::new(0.0, 0.0, 600.0, 300.0)),
            ..PipelineConfig::default()
        };
        let geoms: Vec<LabeledGeometry> = training()
            .into_iter()
            .filter(|g| g.geometry.bbox().is_some_and(|b| b.max_y <= 300.0))
            .collect();
        let result = run(&scene(), &geoms, &config).unwrap();
        assert_eq!((result.classified.width, result.classified.height), (20, 10));
        assert_eq!(result.report.samples, 36);
    }

    #[test]
    fn stage_failures_propagate() {
        let bad_band = PipelineConfig { bands: vec!["B9".into()], ..PipelineConfig::default() };
        assert!(matches!(run(&scene(), &training(), &bad_band), Err(Error::InvalidBand(b)) if b == "B9"));

        let mut geoms = training();
        geoms.push(LabeledGeometry::new(Geometry::point(5000.0, 5000.0), 1));
        assert!(matches!(
            run(&scene(), &geoms, &PipelineConfig::default()),
            Err(Error::EmptyGeometry { index: 8 })
        ));

        let one_class: Vec<LabeledGeometry> = training().into_iter().filter(|g| g.label == 0).collect();
        assert!(matches!(
            run(&scene(), &one_class, &PipelineConfig::default()),
            Err(Error::InsufficientData { classes: 1, .. })
        ));
    }
}
