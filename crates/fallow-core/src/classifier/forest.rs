//! Random forest: bagged CART trees with per-node feature subsampling and
//! majority vote.
//!
//! Tree `t` draws its bootstrap and feature subsets from its own `StdRng`
//! keyed by `(seed, t)`, so the forest is identical whether trees grow
//! sequentially or in parallel.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::tree::{Criterion, DecisionTree, TreeParams};
use super::{argmax, Encoded, Fitted};
use crate::maybe_rayon::*;
use crate::sample::SampleCollection;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    /// Features tried per node; `None` means ⌈√d⌉.
    pub max_features: Option<usize>,
    /// Bootstrap size as a fraction of the training set.
    pub bag_fraction: f64,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            criterion: Criterion::Gini,
            max_depth: None,
            min_samples_leaf: 1,
            max_features: None,
            bag_fraction: 1.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    classes: Vec<i64>,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn fit(samples: &SampleCollection, params: &ForestParams) -> Result<Self> {
        let data = Encoded::new(samples)?;
        if params.n_trees == 0 {
            return Err(Error::invalid("n_trees", 0, "a forest needs at least one tree"));
        }
        if !(params.bag_fraction > 0.0 && params.bag_fraction <= 1.0) {
            return Err(Error::invalid("bag_fraction", params.bag_fraction, "must lie in (0, 1]"));
        }

        let d = data.n_features;
        let tree_params = TreeParams {
            criterion: params.criterion,
            max_depth: params.max_depth,
            min_samples_split: 2,
            min_samples_leaf: params.min_samples_leaf,
            max_features: Some(params.max_features.unwrap_or_else(|| (d as f64).sqrt().ceil() as usize)),
        };
        tree_params.validate(d)?;

        let n = data.len();
        let bag = ((n as f64 * params.bag_fraction).round() as usize).max(1);
        let trees = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let key = params.seed ^ (t as u64 + 1).wrapping_mul(0xD1B5_4A32_D192_ED03);
                let mut rng = StdRng::seed_from_u64(key);
                let indices: Vec<usize> = (0..bag).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree::grow(&data, indices, &tree_params, &mut rng)
            })
            .collect();

        Ok(Self { classes: data.classes.clone(), n_features: d, trees })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn votes(&self, x: &[f64]) -> Vec<usize> {
        let mut votes = vec![0usize; self.classes.len()];
        for tree in &self.trees {
            votes[tree.predict_index(x)] += 1;
        }
        votes
    }
}

impl Fitted for RandomForest {
    fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_index(&self, x: &[f64]) -> usize {
        argmax(&self.votes(x))
    }

    /// Fraction of trees voting for the positive class.
    fn positive_score(&self, x: &[f64]) -> f64 {
        let votes = self.votes(x);
        votes[votes.len() - 1] as f64 / self.trees.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::test_data;

    #[test]
    fn same_seed_grows_same_forest() {
        let data = test_data::three_bands();
        let params = ForestParams { n_trees: 20, seed: 9, ..ForestParams::default() };
        let a = RandomForest::fit(&data, &params).unwrap();
        let b = RandomForest::fit(&data, &params).unwrap();
        for i in 0..90 {
            let x = [i as f64 * 0.1];
            assert_eq!(a.votes(&x), b.votes(&x));
        }
    }

    #[test]
    fn forest_recovers_three_classes() {
        let data = test_data::three_bands();
        let forest = RandomForest::fit(&data, &ForestParams { n_trees: 25, ..ForestParams::default() }).unwrap();
        assert_eq!(forest.n_trees(), 25);
        let predict = |v: f64| forest.classes()[forest.predict_index(&[v])];
        assert_eq!(predict(0.5), 0);
        assert_eq!(predict(4.5), 1);
        assert_eq!(predict(8.5), 2);
    }

    #[test]
    fn vote_fraction_is_a_probability() {
        let data = test_data::two_clusters();
        let forest = RandomForest::fit(&data, &ForestParams { n_trees: 10, ..ForestParams::default() }).unwrap();
        assert_eq!(forest.positive_score(&[10.0, 10.0]), 1.0);
        assert_eq!(forest.positive_score(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn zero_trees_is_rejected() {
        let data = test_data::two_clusters();
        assert!(RandomForest::fit(&data, &ForestParams { n_trees: 0, ..ForestParams::default() }).is_err());
    }
}
