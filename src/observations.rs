//! Observation sequences.
//!
//! A sequence is a `T×D` matrix: one row per time step, one column per
//! observed dimension. Structured records expose that matrix under the
//! conventional `x` field through [`Demonstration`].

use crate::errors::{validate_all_finite, HmmError, HmmResult};
use nalgebra::DMatrix;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Anything that can be viewed as a `T×D` observation matrix.
pub trait SequenceData: Sync {
    /// Observation matrix, one row per time step.
    fn observations(&self) -> &DMatrix<f64>;

    /// Number of time steps.
    fn len(&self) -> usize {
        self.observations().nrows()
    }

    /// Whether the sequence has no time steps.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Observation dimension.
    fn dim(&self) -> usize {
        self.observations().ncols()
    }
}

impl SequenceData for DMatrix<f64> {
    fn observations(&self) -> &DMatrix<f64> {
        self
    }
}

/// A recorded trajectory: the observation matrix `x` plus optional named
/// auxiliary signals of the same length.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Demonstration {
    /// Observation matrix (T×D)
    pub x: DMatrix<f64>,
    /// Auxiliary signals keyed by name
    pub extras: BTreeMap<String, DMatrix<f64>>,
}

impl Demonstration {
    /// Wrap an observation matrix.
    pub fn new(x: DMatrix<f64>) -> Self {
        Self {
            x,
            extras: BTreeMap::new(),
        }
    }

    /// Build from per-timestep rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> HmmResult<Self> {
        Ok(Self::new(sequence_from_rows(rows)?))
    }

    /// Attach an auxiliary signal. Its row count must match `x`.
    pub fn with_extra(mut self, name: &str, values: DMatrix<f64>) -> HmmResult<Self> {
        if values.nrows() != self.x.nrows() {
            return Err(HmmError::DimensionMismatch {
                expected: self.x.nrows(),
                actual: values.nrows(),
                context: format!("length of auxiliary signal '{}'", name),
            });
        }
        self.extras.insert(name.to_string(), values);
        Ok(self)
    }

    /// Look up an auxiliary signal.
    pub fn extra(&self, name: &str) -> Option<&DMatrix<f64>> {
        self.extras.get(name)
    }
}

impl SequenceData for Demonstration {
    fn observations(&self) -> &DMatrix<f64> {
        &self.x
    }
}

/// Builds a `T×D` matrix from per-timestep rows, rejecting ragged or
/// non-finite input.
pub fn sequence_from_rows(rows: &[Vec<f64>]) -> HmmResult<DMatrix<f64>> {
    let dim = rows.first().map_or(0, |r| r.len());
    for row in rows {
        if row.len() != dim {
            return Err(HmmError::DimensionMismatch {
                expected: dim,
                actual: row.len(),
                context: "observation row".to_string(),
            });
        }
        validate_all_finite(row, "observation")?;
    }
    let flat: Vec<f64> = rows.iter().flat_map(|r| r.iter().cloned()).collect();
    Ok(DMatrix::from_row_slice(rows.len(), dim, &flat))
}

/// Builds a one-dimensional sequence (T×1).
pub fn sequence_from_scalars(values: &[f64]) -> DMatrix<f64> {
    DMatrix::from_column_slice(values.len(), 1, values)
}

/// Checks a collection of sequences and returns their shared dimension.
///
/// Fails with `EmptyDataset` for no sequences, `EmptySequence` for a
/// zero-length member and `DimensionMismatch` when dimensions disagree.
pub fn validate_sequences<S: SequenceData>(sequences: &[S]) -> HmmResult<usize> {
    let first = sequences.first().ok_or(HmmError::EmptyDataset)?;
    let dim = first.dim();

    for (index, seq) in sequences.iter().enumerate() {
        if seq.is_empty() {
            return Err(HmmError::EmptySequence { index });
        }
        if seq.dim() != dim {
            return Err(HmmError::DimensionMismatch {
                expected: dim,
                actual: seq.dim(),
                context: format!("sequence {}", index),
            });
        }
    }

    Ok(dim)
}

/// Stacks all sequences along the time axis into one `(ΣT)×D` matrix.
pub fn concatenate<S: SequenceData>(sequences: &[S]) -> HmmResult<DMatrix<f64>> {
    let dim = validate_sequences(sequences)?;
    let total: usize = sequences.iter().map(|s| s.len()).sum();

    let mut pooled = DMatrix::zeros(total, dim);
    let mut offset = 0;
    for seq in sequences {
        let len = seq.len();
        pooled.rows_mut(offset, len).copy_from(seq.observations());
        offset += len;
    }
    Ok(pooled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows() {
        let m = sequence_from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 2);
        assert_eq!(m[(1, 0)], 3.0);
        assert_eq!(m[(2, 1)], 6.0);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = sequence_from_rows(&[vec![1.0, 2.0], vec![3.0]]);
        assert!(matches!(result, Err(HmmError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_nan_rejected() {
        assert!(sequence_from_rows(&[vec![f64::NAN]]).is_err());
    }

    #[test]
    fn test_demonstration_extras() {
        let demo = Demonstration::new(sequence_from_scalars(&[0.0, 1.0]))
            .with_extra("velocity", DMatrix::from_element(2, 1, 0.5))
            .unwrap();
        assert_eq!(demo.len(), 2);
        assert!(demo.extra("velocity").is_some());
        assert!(demo.extra("missing").is_none());

        let bad = Demonstration::new(sequence_from_scalars(&[0.0, 1.0]))
            .with_extra("velocity", DMatrix::from_element(3, 1, 0.5));
        assert!(bad.is_err());
    }

    #[test]
    fn test_validate_sequences() {
        let empty: Vec<DMatrix<f64>> = vec![];
        assert!(matches!(validate_sequences(&empty), Err(HmmError::EmptyDataset)));

        let seqs = vec![sequence_from_scalars(&[1.0]), DMatrix::zeros(0, 1)];
        assert!(matches!(
            validate_sequences(&seqs),
            Err(HmmError::EmptySequence { index: 1 })
        ));

        let seqs = vec![DMatrix::zeros(2, 2), DMatrix::zeros(2, 3)];
        assert!(matches!(
            validate_sequences(&seqs),
            Err(HmmError::DimensionMismatch { expected: 2, actual: 3, .. })
        ));
    }

    #[test]
    fn test_concatenate() {
        let seqs = vec![
            sequence_from_scalars(&[1.0, 2.0]),
            sequence_from_scalars(&[3.0]),
        ];
        let pooled = concatenate(&seqs).unwrap();
        assert_eq!(pooled, sequence_from_scalars(&[1.0, 2.0, 3.0]));
    }
}
