use std::collections::TryReserveError;

use thiserror::Error;

use crate::utils::linalg::LinalgError;

/// Error types for the levmar-rs library.
///
/// These are the failures that abort a fit before (or instead of) producing
/// a parameter vector. Conditions the iteration is designed to survive, such
/// as a singular normal-equations matrix or a model returning non-finite
/// values, are reported through [`StopReason`](crate::lm::StopReason) instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LevMarError {
    /// Unclassified failure inside the solver.
    #[error("Levenberg-Marquardt error: {0}")]
    Generic(String),

    /// A dense linear-algebra routine failed outside the iteration loop.
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// A lower bound exceeds its corresponding upper bound.
    #[error("Box check failed: lower bound {lower} exceeds upper bound {upper} for parameter {index}")]
    FailedBoxCheck { index: usize, lower: f64, upper: f64 },

    /// Working storage could not be allocated.
    #[error("Memory allocation failure: {0}")]
    MemoryAllocationFailure(String),

    /// More linear equality constraints than parameters.
    #[error("Constraint matrix has more rows ({rows}) than columns ({cols})")]
    ConstraintMatrixRowsGtCols { rows: usize, cols: usize },

    /// The linear equality constraint matrix is rank deficient.
    #[error("Constraint matrix with {rows} rows is not of full row rank (rank {rank})")]
    ConstraintMatrixNotFullRowRank { rows: usize, rank: usize },

    /// Fewer observations than free parameters.
    #[error("Too few measurements: got {measurements}, need at least {required}")]
    TooFewMeasurements { measurements: usize, required: usize },

    /// A vector or matrix argument does not have the expected length.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
}

/// Fieldless category of a [`LevMarError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Generic,
    LinearAlgebra,
    FailedBoxCheck,
    MemoryAllocationFailure,
    ConstraintMatrixRowsGtCols,
    ConstraintMatrixNotFullRowRank,
    TooFewMeasurements,
    DimensionMismatch,
}

impl LevMarError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LevMarError::Generic(_) => ErrorKind::Generic,
            LevMarError::LinearAlgebra(_) => ErrorKind::LinearAlgebra,
            LevMarError::FailedBoxCheck { .. } => ErrorKind::FailedBoxCheck,
            LevMarError::MemoryAllocationFailure(_) => ErrorKind::MemoryAllocationFailure,
            LevMarError::ConstraintMatrixRowsGtCols { .. } => ErrorKind::ConstraintMatrixRowsGtCols,
            LevMarError::ConstraintMatrixNotFullRowRank { .. } => {
                ErrorKind::ConstraintMatrixNotFullRowRank
            }
            LevMarError::TooFewMeasurements { .. } => ErrorKind::TooFewMeasurements,
            LevMarError::DimensionMismatch(_) => ErrorKind::DimensionMismatch,
        }
    }

    pub(crate) fn length_mismatch(what: &str, expected: usize, actual: usize) -> Self {
        LevMarError::DimensionMismatch(format!(
            "{} has length {}, expected {}",
            what, actual, expected
        ))
    }
}

/// Result type alias for levmar-rs operations.
pub type Result<T> = std::result::Result<T, LevMarError>;

impl From<LinalgError> for LevMarError {
    fn from(err: LinalgError) -> Self {
        match err {
            LinalgError::DimensionMismatch(msg) => LevMarError::DimensionMismatch(msg),
            other => LevMarError::LinearAlgebra(other.to_string()),
        }
    }
}

impl From<TryReserveError> for LevMarError {
    fn from(err: TryReserveError) -> Self {
        LevMarError::MemoryAllocationFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LevMarError::FailedBoxCheck {
            index: 2,
            lower: 3.0,
            upper: 1.0,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("parameter 2"));
        assert!(msg.contains("lower bound 3"));

        let err = LevMarError::TooFewMeasurements {
            measurements: 3,
            required: 5,
        };
        assert!(format!("{}", err).contains("got 3, need at least 5"));
    }

    #[test]
    fn test_error_conversion() {
        let err: LevMarError = LinalgError::Singular { index: 1, pivot: 0.0 }.into();
        assert_eq!(err.kind(), ErrorKind::LinearAlgebra);

        let err: LevMarError = LinalgError::DimensionMismatch("2x3 * 2x3".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);

        let mut buf: Vec<f64> = Vec::new();
        let reserve = buf.try_reserve_exact(usize::MAX);
        let err: LevMarError = reserve.unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::MemoryAllocationFailure);
    }
}
