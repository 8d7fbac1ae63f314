//! Soft-margin support vector classifier.
//!
//! Features are z-scored, then each binary machine solves the hinge-loss
//! dual by coordinate descent (Hsieh et al., 2008) with the bias folded in as
//! a constant feature, so the kernel seen by the solver is `K(x, z) + 1`.
//! Linear machines collapse to a weight vector; RBF machines keep their
//! support vectors. More than two classes train one-vs-rest.
//!
//! RBF machines share one cache of up to 2²³ kernel values. Rows past that
//! budget are recomputed on every update, so training on tens of thousands
//! of samples costs O(n²) kernel evaluations per pass.

use std::borrow::Cow;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{argmax, Encoded, Fitted};
use crate::sample::SampleCollection;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Kernel {
    #[default]
    Linear,
    /// `exp(-gamma * |x - z|²)`; `gamma` defaults to `1 / n_features`.
    Rbf { gamma: Option<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarginParams {
    /// Misclassification cost C; larger values fit the training set harder.
    pub cost: f64,
    pub kernel: Kernel,
    /// Passes over the training set.
    pub max_iter: usize,
    /// Stop once the projected-gradient spread falls below this.
    pub tolerance: f64,
    /// Seeds the coordinate visiting order.
    pub seed: u64,
}

impl Default for MarginParams {
    fn default() -> Self {
        Self {
            cost: 1.0,
            kernel: Kernel::Linear,
            max_iter: 1000,
            tolerance: 1e-3,
            seed: 0,
        }
    }
}

/// Per-feature z-score transform fitted on the training rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Standardizer {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Standardizer {
    fn fit(rows: &[&[f64]], d: usize) -> Self {
        let n = rows.len() as f64;
        let mut mean = vec![0.0; d];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.iter()) {
                *m += v / n;
            }
        }
        let mut var = vec![0.0; d];
        for row in rows {
            for j in 0..d {
                var[j] += (row[j] - mean[j]).powi(2) / n;
            }
        }
        // Constant features are centred but not scaled.
        let scale = var.into_iter().map(|v| if v > 1e-24 { v.sqrt() } else { 1.0 }).collect();
        Self { mean, scale }
    }

    fn apply(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum Machine {
    Linear { weights: Vec<f64>, bias: f64 },
    Rbf { gamma: f64, support: Vec<Vec<f64>>, coef: Vec<f64> },
}

impl Machine {
    fn decision(&self, z: &[f64]) -> f64 {
        match self {
            Machine::Linear { weights, bias } => dot(weights, z) + bias,
            Machine::Rbf { gamma, support, coef } => support
                .iter()
                .zip(coef)
                .map(|(sv, c)| c * (rbf(*gamma, sv, z) + 1.0))
                .sum(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginModel {
    classes: Vec<i64>,
    n_features: usize,
    standardizer: Standardizer,
    /// One machine for two classes (positive = larger label), else one per class.
    machines: Vec<Machine>,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn rbf(gamma: f64, a: &[f64], b: &[f64]) -> f64 {
    let d2: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    (-gamma * d2).exp()
}

/// Kernel values kept across solver passes (64 MiB of `f64`).
const KERNEL_CACHE_ENTRIES: usize = 1 << 23;

/// Lazily filled rows of the augmented RBF Gram matrix.
struct KernelCache<'a> {
    z: &'a [Vec<f64>],
    gamma: f64,
    rows: Vec<Option<Vec<f64>>>,
    /// Rows that may still be stored.
    room: usize,
}

impl<'a> KernelCache<'a> {
    fn new(z: &'a [Vec<f64>], gamma: f64, budget: usize) -> Self {
        let n = z.len();
        Self { z, gamma, rows: vec![None; n], room: budget / n.max(1) }
    }

    fn compute(&self, i: usize) -> Vec<f64> {
        self.z.iter().map(|zk| rbf(self.gamma, zk, &self.z[i]) + 1.0).collect()
    }

    /// `K(x_k, x_i) + 1` for every k, stored while the budget lasts.
    fn row(&mut self, i: usize) -> Cow<'_, [f64]> {
        if self.rows[i].is_none() && self.room > 0 {
            self.rows[i] = Some(self.compute(i));
            self.room -= 1;
        }
        match &self.rows[i] {
            Some(row) => Cow::Borrowed(row.as_slice()),
            None => Cow::Owned(self.compute(i)),
        }
    }
}

impl MarginModel {
    pub fn fit(samples: &SampleCollection, params: &MarginParams) -> Result<Self> {
        let data = Encoded::new(samples)?;
        if !(params.cost.is_finite() && params.cost > 0.0) {
            return Err(Error::invalid("cost", params.cost, "must be positive and finite"));
        }
        if params.max_iter == 0 {
            return Err(Error::invalid("max_iter", 0, "must be at least 1"));
        }
        let d = data.n_features;
        let gamma = match params.kernel {
            Kernel::Linear => None,
            Kernel::Rbf { gamma } => {
                let g = gamma.unwrap_or(1.0 / d.max(1) as f64);
                if !(g.is_finite() && g > 0.0) {
                    return Err(Error::invalid("gamma", g, "must be positive and finite"));
                }
                Some(g)
            }
        };

        let standardizer = Standardizer::fit(&data.rows, d);
        let z: Vec<Vec<f64>> = data.rows.iter().map(|r| standardizer.apply(r)).collect();

        let mut cache = gamma.map(|g| KernelCache::new(&z, g, KERNEL_CACHE_ENTRIES));
        let positives: Vec<usize> = if data.classes.len() == 2 {
            vec![1]
        } else {
            (0..data.classes.len()).collect()
        };
        let machines = positives
            .into_iter()
            .map(|c| {
                let y: Vec<f64> = data.y.iter().map(|&k| if k == c { 1.0 } else { -1.0 }).collect();
                match cache.as_mut() {
                    None => solve_linear(&z, &y, params),
                    Some(k) => solve_rbf(k, &y, params),
                }
            })
            .collect();

        Ok(Self { classes: data.classes.clone(), n_features: d, standardizer, machines })
    }

    fn decisions(&self, x: &[f64]) -> Vec<f64> {
        let z = self.standardizer.apply(x);
        self.machines.iter().map(|m| m.decision(&z)).collect()
    }
}

/// Dual coordinate descent keeping the primal weights (bias last) in sync.
fn solve_linear(z: &[Vec<f64>], y: &[f64], params: &MarginParams) -> Machine {
    let n = z.len();
    let d = z.first().map_or(0, Vec::len);
    let c = params.cost;
    let q: Vec<f64> = z.iter().map(|x| dot(x, x) + 1.0).collect();
    let mut alpha = vec![0.0; n];
    let mut w = vec![0.0; d];
    let mut b = 0.0;
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(params.seed);

    for iter in 0..params.max_iter {
        order.shuffle(&mut rng);
        let (mut pg_max, mut pg_min) = (f64::NEG_INFINITY, f64::INFINITY);
        for &i in &order {
            let g = y[i] * (dot(&w, &z[i]) + b) - 1.0;
            let pg = projected_gradient(g, alpha[i], c);
            pg_max = pg_max.max(pg);
            pg_min = pg_min.min(pg);
            if pg.abs() > 1e-12 {
                let old = alpha[i];
                alpha[i] = (old - g / q[i]).clamp(0.0, c);
                let delta = (alpha[i] - old) * y[i];
                for (wj, xj) in w.iter_mut().zip(&z[i]) {
                    *wj += delta * xj;
                }
                b += delta;
            }
        }
        if pg_max - pg_min < params.tolerance {
            debug!(iterations = iter + 1, "linear margin solver converged");
            break;
        }
    }
    Machine::Linear { weights: w, bias: b }
}

/// Dual coordinate descent over the augmented RBF kernel, caching every
/// training point's decision value.
fn solve_rbf(kernel: &mut KernelCache<'_>, y: &[f64], params: &MarginParams) -> Machine {
    let n = kernel.z.len();
    let c = params.cost;
    let mut alpha = vec![0.0; n];
    let mut f = vec![0.0; n];
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(params.seed);

    for iter in 0..params.max_iter {
        order.shuffle(&mut rng);
        let (mut pg_max, mut pg_min) = (f64::NEG_INFINITY, f64::INFINITY);
        for &i in &order {
            let g = y[i] * f[i] - 1.0;
            let pg = projected_gradient(g, alpha[i], c);
            pg_max = pg_max.max(pg);
            pg_min = pg_min.min(pg);
            if pg.abs() > 1e-12 {
                let old = alpha[i];
                // K(x, x) = 1 for RBF, plus the bias term.
                alpha[i] = (old - g / 2.0).clamp(0.0, c);
                let delta = (alpha[i] - old) * y[i];
                for (fk, kv) in f.iter_mut().zip(kernel.row(i).iter()) {
                    *fk += delta * kv;
                }
            }
        }
        if pg_max - pg_min < params.tolerance {
            debug!(iterations = iter + 1, "rbf margin solver converged");
            break;
        }
    }

    let (support, coef) = alpha
        .iter()
        .enumerate()
        .filter(|&(_, &a)| a > 0.0)
        .map(|(i, &a)| (kernel.z[i].clone(), a * y[i]))
        .unzip();
    Machine::Rbf { gamma: kernel.gamma, support, coef }
}

fn projected_gradient(g: f64, alpha: f64, c: f64) -> f64 {
    if alpha <= 0.0 {
        g.min(0.0)
    } else if alpha >= c {
        g.max(0.0)
    } else {
        g
    }
}

impl Fitted for MarginModel {
    fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_index(&self, x: &[f64]) -> usize {
        let decisions = self.decisions(x);
        if self.machines.len() == 1 {
            usize::from(decisions[0] > 0.0)
        } else {
            argmax(&decisions)
        }
    }

    /// Logistic squash of the binary decision value.
    fn positive_score(&self, x: &[f64]) -> f64 {
        let f = self.decisions(x)[0];
        1.0 / (1.0 + (-f).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::test_data;
    use crate::sample::LabeledSample;
    use approx::assert_abs_diff_eq;

    fn accuracy(model: &MarginModel, data: &SampleCollection) -> f64 {
        let correct = data
            .iter()
            .filter(|s| model.classes()[model.predict_index(&s.features)] == s.label)
            .count();
        correct as f64 / data.len() as f64
    }

    #[test]
    fn linear_machine_separates_clusters() {
        let data = test_data::two_clusters();
        let model = MarginModel::fit(&data, &MarginParams::default()).unwrap();
        assert_eq!(accuracy(&model, &data), 1.0);
        assert_eq!(model.machines.len(), 1);
    }

    #[test]
    fn rbf_machine_learns_a_ring() {
        // Class 1 inside radius 1, class 0 on a ring of radius 3: not linearly separable.
        let mut samples = Vec::new();
        for k in 0..16 {
            let a = k as f64 * std::f64::consts::TAU / 16.0;
            samples.push(LabeledSample::new(vec![0.5 * a.cos(), 0.5 * a.sin()], 1));
            samples.push(LabeledSample::new(vec![3.0 * a.cos(), 3.0 * a.sin()], 0));
        }
        let data = SampleCollection::from_samples(vec!["B5".into(), "B4".into()], samples).unwrap();
        let params = MarginParams {
            cost: 10.0,
            kernel: Kernel::Rbf { gamma: Some(1.0) },
            ..MarginParams::default()
        };
        let model = MarginModel::fit(&data, &params).unwrap();
        assert_eq!(accuracy(&model, &data), 1.0);
        let centre = model.classes()[model.predict_index(&[0.0, 0.0])];
        assert_eq!(centre, 1);
    }

    #[test]
    fn one_vs_rest_handles_three_classes() {
        let data = test_data::three_bands();
        let params = MarginParams { kernel: Kernel::Rbf { gamma: None }, cost: 10.0, ..MarginParams::default() };
        let model = MarginModel::fit(&data, &params).unwrap();
        assert_eq!(model.machines.len(), 3);
        assert!(accuracy(&model, &data) >= 0.9);
    }

    #[test]
    fn constant_feature_does_not_break_scaling() {
        let samples = (0..10)
            .map(|i| LabeledSample::new(vec![i as f64, 5.0], if i < 5 { 0 } else { 1 }))
            .collect();
        let data = SampleCollection::from_samples(vec!["B5".into(), "B4".into()], samples).unwrap();
        let model = MarginModel::fit(&data, &MarginParams { cost: 10.0, ..MarginParams::default() }).unwrap();
        assert!(model.decisions(&[0.0, 5.0])[0].is_finite());
        assert_eq!(accuracy(&model, &data), 1.0);
    }

    #[test]
    fn kernel_cache_budget_does_not_change_the_solution() {
        let data = test_data::three_bands();
        let z: Vec<Vec<f64>> = data.iter().map(|s| s.features.clone()).collect();
        let y: Vec<f64> = data.iter().map(|s| if s.label == 1 { 1.0 } else { -1.0 }).collect();
        let params = MarginParams { cost: 10.0, ..MarginParams::default() };

        let mut full = KernelCache::new(&z, 0.5, KERNEL_CACHE_ENTRIES);
        let mut starved = KernelCache::new(&z, 0.5, 2 * z.len());
        let a = solve_rbf(&mut full, &y, &params);
        let b = solve_rbf(&mut starved, &y, &params);
        match (a, b) {
            (Machine::Rbf { coef: ca, support: sa, .. }, Machine::Rbf { coef: cb, support: sb, .. }) => {
                assert_eq!(ca, cb);
                assert_eq!(sa, sb);
            }
            _ => panic!("expected RBF machines"),
        }
        assert_eq!(starved.rows.iter().flatten().count(), 2);
        assert_eq!(starved.row(0).len(), z.len());
        assert_abs_diff_eq!(full.row(3)[3], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn non_positive_cost_is_rejected() {
        let data = test_data::two_clusters();
        assert!(MarginModel::fit(&data, &MarginParams { cost: 0.0, ..MarginParams::default() }).is_err());
    }
}
