//! # Covariance Matrix Calculations
//!
//! This module provides functions for calculating and manipulating covariance
//! matrices from the Jacobian at the solution of a least-squares fit.

use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::utils::linalg;

/// Calculate the covariance matrix of the fitted parameters.
///
/// Without equality constraints the estimate is `inv(J^T J)`. When the fit was
/// restricted to `p = p0 + Z y`, `jacobian` is the reduced Jacobian `J Z` and
/// the estimate is `Z inv((J Z)^T (J Z)) Z^T`, which is singular along the
/// constrained directions.
///
/// The result is symmetrized to remove rounding asymmetry from the inverse.
pub fn calculate_covariance(
    jacobian: &Array2<f64>,
    basis: Option<&Array2<f64>>,
) -> Result<Array2<f64>> {
    let jtj = linalg::gram(jacobian);
    let inverse = linalg::invert(&jtj)?;
    let covar = match basis {
        Some(z) => z.dot(&inverse).dot(&z.t()),
        None => inverse,
    };
    Ok(symmetrize(covar))
}

fn symmetrize(a: Array2<f64>) -> Array2<f64> {
    (&a + &a.t()) * 0.5
}

/// Scale an unscaled covariance by the residual variance `||e||^2 / dof`.
///
/// With no degrees of freedom left the matrix is returned unchanged.
pub fn scale_covariance(covar: &Array2<f64>, sum_of_squares: f64, dof: usize) -> Array2<f64> {
    if dof == 0 {
        return covar.clone();
    }
    covar * (sum_of_squares / dof as f64)
}

/// Calculate correlation matrix from covariance matrix.
///
/// The correlation matrix is calculated as:
///   correl[i,j] = covar[i,j] / sqrt(covar[i,i] * covar[j,j])
///
/// Entries involving a parameter with zero variance are set to zero.
pub fn calculate_correlation(covar: &Array2<f64>) -> Array2<f64> {
    let n = covar.nrows();
    let mut correl = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..n {
            if i == j {
                correl[[i, j]] = 1.0;
            } else {
                let denom = (covar[[i, i]] * covar[[j, j]]).sqrt();
                if denom > 0.0 {
                    correl[[i, j]] = covar[[i, j]] / denom;
                }
            }
        }
    }

    correl
}

/// Extract standard errors from the covariance matrix.
///
/// Standard errors are the square roots of the diagonal elements; negative
/// diagonals from rounding give zero.
pub fn standard_errors_from_covariance(covar: &Array2<f64>) -> Array1<f64> {
    covar.diag().mapv(|v| if v > 0.0 { v.sqrt() } else { 0.0 })
}
