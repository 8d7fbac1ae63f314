//! Seeded train/test partitioning.
//!
//! Every sample index gets its own reproducible draw in [0, 1) from a
//! `StdRng` keyed by `(seed, index)`; draws below the split fraction go to
//! training. The partition is probabilistic: with `p = 0.7` roughly, not
//! exactly, 70 % of the samples train.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::sample::SampleCollection;
use crate::{Error, Result};

/// Disjoint train/test partitions whose union is the source collection.
#[derive(Debug, Clone)]
pub struct Split {
    pub train: SampleCollection,
    pub test: SampleCollection,
}

/// Reproducible draw in [0, 1) for sample `index` under `seed`.
pub fn split_value(seed: u64, index: usize) -> f64 {
    let key = seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    StdRng::seed_from_u64(key).gen::<f64>()
}

/// Partition `samples` by comparing each sample's draw against `fraction`.
/// Either side may come back empty; see [`split_non_empty`].
pub fn split(samples: &SampleCollection, fraction: f64, seed: u64) -> Result<Split> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(Error::invalid("split_fraction", fraction, "must lie in (0, 1)"));
    }

    let names = samples.band_names().to_vec();
    let mut train = SampleCollection::new(names.clone());
    let mut test = SampleCollection::new(names);
    for (i, s) in samples.iter().enumerate() {
        if split_value(seed, i) < fraction {
            train.push(s.clone())?;
        } else {
            test.push(s.clone())?;
        }
    }

    info!(train = train.len(), test = test.len(), fraction, seed, "partitioned samples");
    Ok(Split { train, test })
}

/// [`split`], failing with `EmptySplit` when either partition is empty.
pub fn split_non_empty(samples: &SampleCollection, fraction: f64, seed: u64) -> Result<Split> {
    let s = split(samples, fraction, seed)?;
    if s.train.is_empty() || s.test.is_empty() {
        return Err(Error::EmptySplit { train: s.train.len(), test: s.test.len() });
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::LabeledSample;
    use approx::assert_abs_diff_eq;

    /// Band-5 values 1..=7 → class 0, 8..=10 → class 1.
    fn band5_samples() -> SampleCollection {
        let samples = (1..=10)
            .map(|v| LabeledSample::new(vec![v as f64], if v <= 7 { 0 } else { 1 }))
            .collect();
        SampleCollection::from_samples(vec!["B5".into()], samples).unwrap()
    }

    fn values(c: &SampleCollection) -> Vec<f64> {
        c.iter().map(|s| s.features[0]).collect()
    }

    #[test]
    fn same_seed_gives_same_partition() {
        let c = band5_samples();
        let a = split(&c, 0.7, 42).unwrap();
        let b = split(&c, 0.7, 42).unwrap();
        assert_eq!(values(&a.train), values(&b.train));
        assert_eq!(values(&a.test), values(&b.test));
    }

    #[test]
    fn seed_42_partition_is_pinned() {
        let s = split(&band5_samples(), 0.7, 42).unwrap();
        assert_eq!(values(&s.train), [1.0, 2.0, 3.0, 4.0, 6.0, 7.0, 9.0]);
        assert_eq!(values(&s.test), [5.0, 8.0, 10.0]);
        assert_abs_diff_eq!(split_value(42, 0), 0.526_557_409, epsilon = 1e-9);
    }

    #[test]
    fn partitions_are_disjoint_and_cover_source() {
        let c = band5_samples();
        for seed in 0..20 {
            let s = split(&c, 0.7, seed).unwrap();
            let mut all = values(&s.train);
            all.extend(values(&s.test));
            all.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(all, values(&c), "seed {seed}");
            assert_eq!(s.train.len() + s.test.len(), c.len());
        }
    }

    #[test]
    fn train_fraction_is_approximately_p() {
        let samples = (0..5000).map(|i| LabeledSample::new(vec![i as f64], 0)).collect();
        let c = SampleCollection::from_samples(vec!["B5".into()], samples).unwrap();
        let s = split(&c, 0.7, 7).unwrap();
        let frac = s.train.len() as f64 / c.len() as f64;
        assert!((frac - 0.7).abs() < 0.03, "train fraction {frac}");
    }

    #[test]
    fn split_values_lie_in_unit_interval() {
        for i in 0..1000 {
            let v = split_value(42, i);
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn fraction_outside_open_interval_is_rejected() {
        let c = band5_samples();
        assert!(split(&c, 0.0, 1).is_err());
        assert!(split(&c, 1.0, 1).is_err());
    }

    #[test]
    fn empty_partition_is_reported() {
        let c = SampleCollection::from_samples(
            vec!["B5".into()],
            vec![LabeledSample::new(vec![1.0], 0)],
        )
        .unwrap();
        assert!(matches!(
            split_non_empty(&c, 0.5, 3),
            Err(Error::EmptySplit { train, test }) if train + test == 1
        ));
    }
}
