//! Utility functions and helpers for the levmar-rs library.

pub mod finite_difference;
pub mod linalg;
#[cfg(feature = "parallel")]
pub mod parallel;

use ndarray::Array2;

use crate::error::{LevMarError, Result};

/// Allocates a zero matrix, reporting allocation failure instead of aborting.
pub(crate) fn try_zeros(rows: usize, cols: usize) -> Result<Array2<f64>> {
    let len = rows.checked_mul(cols).ok_or_else(|| {
        LevMarError::MemoryAllocationFailure(format!(
            "{}x{} matrix does not fit in memory",
            rows, cols
        ))
    })?;
    let mut buf: Vec<f64> = Vec::new();
    buf.try_reserve_exact(len)?;
    buf.resize(len, 0.0);
    Array2::from_shape_vec((rows, cols), buf)
        .map_err(|e| LevMarError::MemoryAllocationFailure(e.to_string()))
}
