//! Confusion (error) matrix with overall accuracy, Cohen's kappa and the
//! per-class producer's/consumer's accuracies.
//!
//! Rows are the true class, columns the predicted class; both axes follow the
//! ascending label list.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    labels: Vec<i64>,
    counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    /// Tabulate paired labels. The label axis is the union of both sides.
    pub fn from_predictions(truth: &[i64], predicted: &[i64]) -> Result<Self> {
        if truth.len() != predicted.len() {
            return Err(Error::ShapeMismatch { expected: truth.len(), actual: predicted.len() });
        }
        let labels: Vec<i64> = truth
            .iter()
            .chain(predicted)
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let k = labels.len();
        let mut counts = vec![vec![0u64; k]; k];
        for (t, p) in truth.iter().zip(predicted) {
            // Both labels are in the set built above.
            let r = labels.binary_search(t).unwrap_or_default();
            let c = labels.binary_search(p).unwrap_or_default();
            counts[r][c] += 1;
        }
        Ok(Self { labels, counts })
    }

    /// Build from pre-tabulated counts. `labels` must be strictly ascending
    /// and `rows` square over them.
    pub fn from_counts(labels: Vec<i64>, rows: Vec<Vec<u64>>) -> Result<Self> {
        if labels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::invalid("labels", format!("{labels:?}"), "must be strictly ascending"));
        }
        let k = labels.len();
        if rows.len() != k {
            return Err(Error::ShapeMismatch { expected: k, actual: rows.len() });
        }
        if let Some(row) = rows.iter().find(|r| r.len() != k) {
            return Err(Error::ShapeMismatch { expected: k, actual: row.len() });
        }
        Ok(Self { labels, counts: rows })
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    pub fn counts(&self) -> &[Vec<u64>] {
        &self.counts
    }

    /// Count of samples with true class `truth` predicted as `predicted`.
    pub fn get(&self, truth: i64, predicted: i64) -> u64 {
        match (self.labels.binary_search(&truth), self.labels.binary_search(&predicted)) {
            (Ok(r), Ok(c)) => self.counts[r][c],
            _ => 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    /// Correctly classified samples.
    pub fn trace(&self) -> u64 {
        (0..self.labels.len()).map(|i| self.counts[i][i]).sum()
    }

    fn row_sum(&self, r: usize) -> u64 {
        self.counts[r].iter().sum()
    }

    fn col_sum(&self, c: usize) -> u64 {
        self.counts.iter().map(|row| row[c]).sum()
    }

    /// Overall accuracy; `None` for an empty matrix.
    pub fn accuracy(&self) -> Option<f64> {
        let total = self.total();
        (total > 0).then(|| self.trace() as f64 / total as f64)
    }

    /// Cohen's kappa. Undefined for an empty matrix or when chance agreement
    /// is total (a single class on both axes).
    pub fn kappa(&self) -> Result<f64> {
        let total = self.total();
        if total == 0 {
            return Err(Error::UndefinedKappa);
        }
        let n = total as f64;
        let p_o = self.trace() as f64 / n;
        let p_e = (0..self.labels.len())
            .map(|i| self.row_sum(i) as f64 * self.col_sum(i) as f64)
            .sum::<f64>()
            / (n * n);
        if (1.0 - p_e).abs() < 1e-12 {
            return Err(Error::UndefinedKappa);
        }
        Ok((p_o - p_e) / (1.0 - p_e))
    }

    /// Per true class: fraction of its samples predicted correctly (recall).
    pub fn producers_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.labels.len())
            .map(|i| {
                let n = self.row_sum(i);
                (n > 0).then(|| self.counts[i][i] as f64 / n as f64)
            })
            .collect()
    }

    /// Per predicted class: fraction of its predictions that are correct
    /// (precision).
    pub fn consumers_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.labels.len())
            .map(|j| {
                let n = self.col_sum(j);
                (n > 0).then(|| self.counts[j][j] as f64 / n as f64)
            })
            .collect()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .labels
            .iter()
            .map(|l| l.to_string().len())
            .chain(self.counts.iter().flatten().map(|c| c.to_string().len()))
            .chain(std::iter::once("truth\\pred".len()))
            .max()
            .unwrap_or(1);
        write!(f, "{:>width$}", "truth\\pred")?;
        for l in &self.labels {
            write!(f, " {l:>width$}")?;
        }
        for (l, row) in self.labels.iter().zip(&self.counts) {
            write!(f, "\n{l:>width$}")?;
            for c in row {
                write!(f, " {c:>width$}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn accuracy_is_trace_over_total() {
        let m = ConfusionMatrix::from_counts(vec![0, 1], vec![vec![8, 1], vec![2, 9]]).unwrap();
        assert_eq!(m.total(), 20);
        assert_eq!(m.trace(), 17);
        assert_relative_eq!(m.accuracy().unwrap(), 0.85, epsilon = 1e-12);
    }

    #[test]
    fn kappa_matches_hand_computation() {
        let m = ConfusionMatrix::from_counts(vec![0, 1], vec![vec![8, 1], vec![2, 9]]).unwrap();
        // p_o = 0.85, p_e = (9*10 + 11*10) / 400 = 0.5
        assert_relative_eq!(m.kappa().unwrap(), 0.7, epsilon = 1e-12);
    }

    #[test]
    fn perfect_agreement_has_unit_kappa() {
        let m = ConfusionMatrix::from_predictions(&[0, 0, 1, 1, 2], &[0, 0, 1, 1, 2]).unwrap();
        assert_eq!(m.accuracy(), Some(1.0));
        assert_relative_eq!(m.kappa().unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn single_class_matrix_has_undefined_kappa() {
        let m = ConfusionMatrix::from_counts(vec![0, 1], vec![vec![10, 0], vec![0, 0]]).unwrap();
        assert_eq!(m.accuracy(), Some(1.0));
        assert!(matches!(m.kappa(), Err(Error::UndefinedKappa)));
    }

    #[test]
    fn empty_matrix_has_no_accuracy() {
        let m = ConfusionMatrix::from_predictions(&[], &[]).unwrap();
        assert_eq!(m.total(), 0);
        assert_eq!(m.accuracy(), None);
        assert!(matches!(m.kappa(), Err(Error::UndefinedKappa)));
    }

    #[test]
    fn predictions_tabulate_into_cells() {
        let truth = [0, 0, 0, 1, 1, 2];
        let pred = [0, 1, 0, 1, 2, 2];
        let m = ConfusionMatrix::from_predictions(&truth, &pred).unwrap();
        assert_eq!(m.labels(), &[0, 1, 2]);
        assert_eq!(m.total(), truth.len() as u64);
        assert_eq!(m.get(0, 1), 1);
        assert_eq!(m.get(1, 2), 1);
        assert_eq!(m.get(2, 2), 1);
        assert_eq!(m.get(7, 0), 0);
        let k = m.kappa().unwrap();
        assert!((-1.0..=1.0).contains(&k));
    }

    #[test]
    fn label_seen_only_in_predictions_gets_a_column() {
        let m = ConfusionMatrix::from_predictions(&[1, 1], &[1, 5]).unwrap();
        assert_eq!(m.labels(), &[1, 5]);
        assert_eq!(m.counts(), &[vec![1u64, 1], vec![0u64, 0]]);
        assert_eq!(m.producers_accuracy(), vec![Some(0.5), None]);
        assert_eq!(m.consumers_accuracy(), vec![Some(1.0), Some(0.0)]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(matches!(
            ConfusionMatrix::from_predictions(&[0, 1], &[0]),
            Err(Error::ShapeMismatch { expected: 2, actual: 1 })
        ));
        assert!(ConfusionMatrix::from_counts(vec![0, 1], vec![vec![1, 2]]).is_err());
        assert!(ConfusionMatrix::from_counts(vec![1, 0], vec![vec![1, 0], vec![0, 1]]).is_err());
    }

    #[test]
    fn display_renders_rows_per_true_class() {
        let m = ConfusionMatrix::from_counts(vec![0, 1], vec![vec![8, 1], vec![2, 9]]).unwrap();
        let text = m.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("truth\\pred"));
        assert_eq!(lines[1].split_whitespace().collect::<Vec<_>>(), ["0", "8", "1"]);
        assert_eq!(lines[2].split_whitespace().collect::<Vec<_>>(), ["1", "2", "9"]);
    }
}
