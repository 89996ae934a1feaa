use std::fmt;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

/// Square count table; row = actual class, column = predicted class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    counts: Array2<u64>,
}

impl ConfusionMatrix {
    /// All-zero matrix for `num_classes` classes.
    #[must_use]
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: Array2::zeros((num_classes, num_classes)),
        }
    }

    /// Side length.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.counts.nrows()
    }

    /// Counts one (actual, predicted) pair.
    pub fn record(&mut self, actual: usize, predicted: usize) -> FlowResult<()> {
        let n = self.num_classes();
        let cell = self.counts.get_mut((actual, predicted)).ok_or_else(|| {
            FlowError::config(format!(
                "class pair ({actual}, {predicted}) outside a {n}x{n} confusion matrix"
            ))
        })?;
        *cell += 1;
        Ok(())
    }

    /// Adds another matrix of the same size cell by cell.
    pub fn merge(&mut self, other: &Self) -> FlowResult<()> {
        if other.num_classes() != self.num_classes() {
            return Err(FlowError::config(format!(
                "cannot merge {0}x{0} into {1}x{1} confusion matrix",
                other.num_classes(),
                self.num_classes()
            )));
        }
        self.counts += &other.counts;
        Ok(())
    }

    /// Count for one cell; 0 outside the matrix.
    #[must_use]
    pub fn get(&self, actual: usize, predicted: usize) -> u64 {
        self.counts.get((actual, predicted)).copied().unwrap_or(0)
    }

    /// Instances whose actual class is `actual`.
    #[must_use]
    pub fn row_total(&self, actual: usize) -> u64 {
        if actual >= self.num_classes() {
            return 0;
        }
        self.counts.index_axis(Axis(0), actual).sum()
    }

    /// Instances predicted as `predicted`.
    #[must_use]
    pub fn column_total(&self, predicted: usize) -> u64 {
        if predicted >= self.num_classes() {
            return 0;
        }
        self.counts.index_axis(Axis(1), predicted).sum()
    }

    /// Every counted instance.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.sum()
    }

    /// Diagonal sum.
    #[must_use]
    pub fn correct(&self) -> u64 {
        self.counts.diag().sum()
    }

    /// Off-diagonal sum.
    #[must_use]
    pub fn mismatches(&self) -> u64 {
        self.total() - self.correct()
    }

    /// `mismatches / total`, or 0 for an empty matrix.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.mismatches() as f64 / total as f64,
        }
    }

    /// Underlying counts.
    #[must_use]
    pub const fn counts(&self) -> &Array2<u64> {
        &self.counts
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.counts.iter().max().map_or(1, |m| m.to_string().len()).max(3);
        write!(f, "{:>width$} |", "a\\p")?;
        for col in 0..self.num_classes() {
            write!(f, " {col:>width$}")?;
        }
        writeln!(f)?;
        for (actual, row) in self.counts.outer_iter().enumerate() {
            write!(f, "{actual:>width$} |")?;
            for count in row {
                write!(f, " {count:>width$}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn records_and_summarizes() {
        let mut matrix = ConfusionMatrix::new(2);
        for (a, p) in [(0, 0), (0, 1), (1, 1), (1, 1)] {
            matrix.record(a, p).unwrap();
        }
        assert_eq!(matrix.get(0, 1), 1);
        assert_eq!(matrix.row_total(0), 2);
        assert_eq!(matrix.column_total(1), 3);
        assert_eq!(matrix.correct(), 3);
        assert!((matrix.error_rate() - 0.25).abs() < 1e-12);
        let err = matrix.record(2, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn merge_requires_equal_sizes() {
        let mut a = ConfusionMatrix::new(2);
        let mut b = ConfusionMatrix::new(2);
        b.record(1, 0).unwrap();
        a.merge(&b).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a.get(1, 0), 2);
        assert!(a.merge(&ConfusionMatrix::new(3)).is_err());
        assert_eq!(ConfusionMatrix::new(3).error_rate(), 0.0);
    }

    #[test]
    fn renders_rows() {
        let mut matrix = ConfusionMatrix::new(2);
        matrix.record(1, 0).unwrap();
        let text = matrix.to_string();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(2).unwrap().starts_with("  1 |"));
    }
}
