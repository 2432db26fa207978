//! Finite difference methods for numerical differentiation.
//!
//! This module provides functions for approximating the Jacobian of a model
//! function column by column with forward or central differences.

use ndarray::{Array1, Array2};

use crate::error::{LevMarError, Result};
use crate::utils::try_zeros;

/// Perturbations are at least this fraction of the parameter's magnitude.
pub const RELATIVE_STEP: f64 = 1e-4;

/// Step used to perturb a parameter with value `param`.
///
/// The step scales with the parameter's magnitude and never drops below
/// `|delta|`, so zero-valued parameters are still perturbed.
pub fn perturbation(param: f64, delta: f64) -> f64 {
    (RELATIVE_STEP * param).abs().max(delta.abs())
}

pub(crate) fn check_output(output: Array1<f64>, expected: usize) -> Result<Array1<f64>> {
    if output.len() != expected {
        return Err(LevMarError::length_mismatch(
            "model output",
            expected,
            output.len(),
        ));
    }
    Ok(output)
}

/// One forward-difference column: `(f(p + h e_j) - f(p)) / h`.
pub(crate) fn forward_column<F>(
    f: &F,
    params: &Array1<f64>,
    f0: &Array1<f64>,
    j: usize,
    delta: f64,
) -> Result<Array1<f64>>
where
    F: Fn(&Array1<f64>) -> Array1<f64> + ?Sized,
{
    let h = perturbation(params[j], delta);
    let mut shifted = params.clone();
    shifted[j] += h;
    let f1 = check_output(f(&shifted), f0.len())?;
    Ok((f1 - f0) / h)
}

/// One central-difference column: `(f(p + h/2 e_j) - f(p - h/2 e_j)) / h`.
pub(crate) fn central_column<F>(
    f: &F,
    params: &Array1<f64>,
    n_outputs: usize,
    j: usize,
    delta: f64,
) -> Result<Array1<f64>>
where
    F: Fn(&Array1<f64>) -> Array1<f64> + ?Sized,
{
    let h = perturbation(params[j], delta);
    let mut forward = params.clone();
    forward[j] += 0.5 * h;
    let mut backward = params.clone();
    backward[j] -= 0.5 * h;
    let f_forward = check_output(f(&forward), n_outputs)?;
    let f_backward = check_output(f(&backward), n_outputs)?;
    Ok((f_forward - f_backward) / h)
}

/// Compute the Jacobian matrix using forward finite differences.
///
/// `f0` must be the model output at `params`; it is reused for every column,
/// so the approximation costs one model evaluation per parameter.
///
/// # Arguments
///
/// * `f` - The model function
/// * `params` - The parameter values at which to evaluate the Jacobian
/// * `f0` - The model output at `params`
/// * `delta` - The minimum perturbation
///
/// # Returns
///
/// * `Result<Array2<f64>>` - The `n x m` Jacobian matrix
pub fn forward_jacobian<F>(
    f: &F,
    params: &Array1<f64>,
    f0: &Array1<f64>,
    delta: f64,
) -> Result<Array2<f64>>
where
    F: Fn(&Array1<f64>) -> Array1<f64> + ?Sized,
{
    let mut jac = try_zeros(f0.len(), params.len())?;
    for j in 0..params.len() {
        let column = forward_column(f, params, f0, j, delta)?;
        jac.column_mut(j).assign(&column);
    }
    Ok(jac)
}

/// Compute the Jacobian matrix using central finite differences.
///
/// Costs two model evaluations per parameter; the truncation error is
/// second order in the step instead of first order.
pub fn central_jacobian<F>(
    f: &F,
    params: &Array1<f64>,
    n_outputs: usize,
    delta: f64,
) -> Result<Array2<f64>>
where
    F: Fn(&Array1<f64>) -> Array1<f64> + ?Sized,
{
    let mut jac = try_zeros(n_outputs, params.len())?;
    for j in 0..params.len() {
        let column = central_column(f, params, n_outputs, j, delta)?;
        jac.column_mut(j).assign(&column);
    }
    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    // r1 = x^2 - 1, r2 = y^2 - 2
    fn squares(params: &Array1<f64>) -> Array1<f64> {
        array![params[0].powi(2) - 1.0, params[1].powi(2) - 2.0]
    }

    #[test]
    fn test_perturbation_floor() {
        assert_eq!(perturbation(0.0, 1e-6), 1e-6);
        assert_eq!(perturbation(0.0, -1e-6), 1e-6);
        assert_relative_eq!(perturbation(100.0, 1e-6), 1e-2, epsilon = 1e-15);
    }

    #[test]
    fn test_forward_jacobian() {
        let params = array![2.0, 3.0];
        let f0 = squares(&params);
        let jac = forward_jacobian(&squares, &params, &f0, 1e-6).unwrap();

        assert_eq!(jac.dim(), (2, 2));
        assert_relative_eq!(jac[[0, 0]], 4.0, epsilon = 1e-3);
        assert_relative_eq!(jac[[0, 1]], 0.0, epsilon = 1e-12);
        assert_relative_eq!(jac[[1, 0]], 0.0, epsilon = 1e-12);
        assert_relative_eq!(jac[[1, 1]], 6.0, epsilon = 1e-3);
    }

    #[test]
    fn test_central_jacobian_exact_for_quadratics() {
        let params = array![2.0, 3.0];
        let jac = central_jacobian(&squares, &params, 2, 1e-6).unwrap();
        assert_relative_eq!(jac[[0, 0]], 4.0, epsilon = 1e-8);
        assert_relative_eq!(jac[[1, 1]], 6.0, epsilon = 1e-8);
    }

    #[test]
    fn test_wrong_output_length() {
        let short = |_: &Array1<f64>| array![1.0];
        let params = array![1.0, 1.0];
        let err = central_jacobian(&short, &params, 2, 1e-6).unwrap_err();
        assert!(matches!(err, LevMarError::DimensionMismatch(_)));
    }
}
