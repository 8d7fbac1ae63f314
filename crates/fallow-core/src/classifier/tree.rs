//! CART decision tree.
//!
//! Greedy top-down induction: at each node every candidate feature is sorted
//! and swept, thresholds sit at midpoints between distinct values, and the
//! split minimising weighted child impurity (Gini or entropy) wins. Growth
//! stops at pure nodes, `max_depth`, `min_samples_split`, or when no split
//! lowers impurity. Leaves keep class counts.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::{argmax, Encoded, Fitted};
use crate::sample::SampleCollection;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criterion {
    #[default]
    Gini,
    Entropy,
}

impl Criterion {
    fn impurity(self, counts: &[usize], total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let n = total as f64;
        match self {
            Criterion::Gini => 1.0 - counts.iter().map(|&c| (c as f64 / n).powi(2)).sum::<f64>(),
            Criterion::Entropy => -counts
                .iter()
                .filter(|&&c| c > 0)
                .map(|&c| {
                    let p = c as f64 / n;
                    p * p.log2()
                })
                .sum::<f64>(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    pub criterion: Criterion,
    /// `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per node; `None` means all. Forests set this.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            criterion: Criterion::Gini,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

impl TreeParams {
    pub(crate) fn validate(&self, n_features: usize) -> Result<()> {
        if self.min_samples_split < 2 {
            return Err(Error::invalid("min_samples_split", self.min_samples_split, "must be at least 2"));
        }
        if self.min_samples_leaf < 1 {
            return Err(Error::invalid("min_samples_leaf", self.min_samples_leaf, "must be at least 1"));
        }
        if let Some(k) = self.max_features {
            if k == 0 || k > n_features {
                return Err(Error::invalid("max_features", k, format!("must lie in 1..={n_features}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf { counts: Vec<usize> },
    /// `x[feature] <= threshold` goes left.
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    classes: Vec<i64>,
    n_features: usize,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    pub fn fit(samples: &SampleCollection, params: &TreeParams) -> Result<Self> {
        let data = Encoded::new(samples)?;
        params.validate(data.n_features)?;
        let indices: Vec<usize> = (0..data.len()).collect();
        let mut rng = StdRng::seed_from_u64(0);
        Ok(Self::grow(&data, indices, params, &mut rng))
    }

    /// Grow a tree over `indices` (duplicates allowed, as in a bootstrap).
    /// `rng` drives per-node feature subsampling when `max_features` is set.
    pub(crate) fn grow(data: &Encoded, indices: Vec<usize>, params: &TreeParams, rng: &mut StdRng) -> Self {
        let n_classes = data.classes.len();
        let mut nodes = vec![Node::Leaf { counts: Vec::new() }];
        let mut work = vec![(0usize, indices, 0usize)];

        while let Some((id, idx, depth)) = work.pop() {
            let mut counts = vec![0usize; n_classes];
            for &i in &idx {
                counts[data.y[i]] += 1;
            }

            let splittable = idx.len() >= params.min_samples_split
                && params.max_depth.map_or(true, |d| depth < d)
                && counts.iter().filter(|&&c| c > 0).count() > 1;
            let best = if splittable {
                best_split(data, &idx, &counts, params, rng)
            } else {
                None
            };

            let Some(best) = best else {
                nodes[id] = Node::Leaf { counts };
                continue;
            };

            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = idx
                .into_iter()
                .partition(|&i| data.rows[i][best.feature] <= best.threshold);
            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf { counts: Vec::new() });
            nodes.push(Node::Leaf { counts: Vec::new() });
            nodes[id] = Node::Split {
                feature: best.feature,
                threshold: best.threshold,
                left,
                right,
            };
            work.push((right, right_idx, depth + 1));
            work.push((left, left_idx, depth + 1));
        }

        Self {
            classes: data.classes.clone(),
            n_features: data.n_features,
            nodes,
        }
    }

    /// Class counts of the leaf `x` falls into.
    pub(crate) fn leaf_counts(&self, x: &[f64]) -> &[usize] {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { counts } => return counts,
                Node::Split { feature, threshold, left, right } => {
                    id = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }
}

fn best_split(
    data: &Encoded,
    idx: &[usize],
    parent_counts: &[usize],
    params: &TreeParams,
    rng: &mut StdRng,
) -> Option<BestSplit> {
    let n = idx.len();
    let min_leaf = params.min_samples_leaf;
    let parent = params.criterion.impurity(parent_counts, n);

    let features: Vec<usize> = match params.max_features {
        Some(k) if k < data.n_features => rand::seq::index::sample(rng, data.n_features, k).into_vec(),
        _ => (0..data.n_features).collect(),
    };

    let mut best: Option<BestSplit> = None;
    let mut column: Vec<(f64, usize)> = Vec::with_capacity(n);
    for feature in features {
        column.clear();
        column.extend(idx.iter().map(|&i| (data.rows[i][feature], data.y[i])));
        column.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left = vec![0usize; parent_counts.len()];
        let mut right = parent_counts.to_vec();
        for k in 0..n - 1 {
            let (v, class) = column[k];
            left[class] += 1;
            right[class] -= 1;

            let next = column[k + 1].0;
            let n_left = k + 1;
            if v == next || n_left < min_leaf || n - n_left < min_leaf {
                continue;
            }
            let impurity = (n_left as f64 * params.criterion.impurity(&left, n_left)
                + (n - n_left) as f64 * params.criterion.impurity(&right, n - n_left))
                / n as f64;
            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                let mid = v + (next - v) / 2.0;
                let threshold = if mid < next { mid } else { v };
                best = Some(BestSplit { feature, threshold, impurity });
            }
        }
    }

    best.filter(|b| b.impurity < parent - 1e-12)
}

impl Fitted for DecisionTree {
    fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_index(&self, x: &[f64]) -> usize {
        argmax(self.leaf_counts(x))
    }

    fn positive_score(&self, x: &[f64]) -> f64 {
        let counts = self.leaf_counts(x);
        let total: usize = counts.iter().sum();
        if total == 0 {
            return 0.0;
        }
        counts[counts.len() - 1] as f64 / total as f64
    }
}
