//! Receiver operating characteristic over scored binary points.
//!
//! A point counts as predicted positive when its score is at or above the
//! threshold. Thresholds are `steps` equally spaced values covering [0, 1]
//! inclusive.

use serde::Serialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RocPoint {
    pub threshold: f64,
    pub tpr: f64,
    pub fpr: f64,
}

impl RocPoint {
    /// Euclidean distance to the perfect classifier at (FPR 0, TPR 1).
    pub fn distance_to_corner(&self) -> f64 {
        self.fpr.hypot(1.0 - self.tpr)
    }
}

#[derive(Debug, Clone)]
pub struct RocCurve {
    /// Scores of target points, ascending.
    targets: Vec<f64>,
    /// Scores of non-target points, ascending.
    others: Vec<f64>,
    steps: usize,
}

impl RocCurve {
    pub fn new(points: &[(f64, bool)], steps: usize) -> Result<Self> {
        if steps < 2 {
            return Err(Error::invalid("roc_steps", steps, "need at least 2 thresholds"));
        }
        if let Some((s, _)) = points.iter().find(|(s, _)| !s.is_finite()) {
            return Err(Error::invalid("score", s, "ROC scores must be finite"));
        }
        let mut targets: Vec<f64> = points.iter().filter(|p| p.1).map(|p| p.0).collect();
        let mut others: Vec<f64> = points.iter().filter(|p| !p.1).map(|p| p.0).collect();
        if targets.is_empty() || others.is_empty() {
            return Err(Error::SingleClassRoc { targets: targets.len(), non_targets: others.len() });
        }
        targets.sort_by(f64::total_cmp);
        others.sort_by(f64::total_cmp);
        Ok(Self { targets, others, steps })
    }

    pub fn threshold(&self, i: usize) -> f64 {
        i as f64 / (self.steps - 1) as f64
    }

    /// Rates at one threshold.
    pub fn at(&self, threshold: f64) -> RocPoint {
        let rate = |scores: &[f64]| {
            let below = scores.partition_point(|&s| s < threshold);
            (scores.len() - below) as f64 / scores.len() as f64
        };
        RocPoint { threshold, tpr: rate(&self.targets), fpr: rate(&self.others) }
    }

    /// Lazily evaluated curve, one point per threshold. Each call starts over.
    pub fn points(&self) -> RocPoints<'_> {
        RocPoints { curve: self, next: 0 }
    }

    /// Area under the curve by the trapezoid rule, anchored at (0, 0) and
    /// (1, 1).
    pub fn auc(&self) -> f64 {
        let mut pts: Vec<(f64, f64)> = self.points().map(|p| (p.fpr, p.tpr)).collect();
        pts.push((0.0, 0.0));
        pts.push((1.0, 1.0));
        pts.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        pts.windows(2)
            .map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) / 2.0)
            .sum()
    }

    /// Threshold closest to the (0, 1) corner; the lowest threshold wins ties.
    pub fn best(&self) -> RocPoint {
        let mut points = self.points();
        // `steps >= 2` so the first point exists.
        let mut best = points.next().unwrap_or_else(|| self.at(0.0));
        for p in points {
            if p.distance_to_corner() < best.distance_to_corner() {
                best = p;
            }
        }
        best
    }
}

/// Iterator over a curve's thresholds, ascending.
#[derive(Debug, Clone)]
pub struct RocPoints<'a> {
    curve: &'a RocCurve,
    next: usize,
}

impl Iterator for RocPoints<'_> {
    type Item = RocPoint;

    fn next(&mut self) -> Option<RocPoint> {
        if self.next >= self.curve.steps {
            return None;
        }
        let p = self.curve.at(self.curve.threshold(self.next));
        self.next += 1;
        Some(p)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.curve.steps.saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for RocPoints<'_> {}
