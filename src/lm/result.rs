//! Output of a Levenberg-Marquardt fit.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::convergence::StopReason;
use crate::uncertainty;

/// Diagnostics gathered during a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    /// `||e||_2` at the initial parameters
    pub initial_residual_norm: f64,

    /// `||e||_2` at the returned parameters
    pub final_residual_norm: f64,

    /// `||J^T e||_inf` at the returned parameters
    pub final_gradient_norm: f64,

    /// `||dp||_2` of the last computed step
    pub final_step_norm: f64,

    /// `mu / max(diag(J^T J))` at termination
    pub mu_ratio: f64,

    /// Number of accepted steps
    pub iterations: usize,

    /// Why the iteration stopped
    pub stop_reason: StopReason,

    /// Model evaluations, including those spent on finite differences
    pub function_evaluations: usize,

    /// Jacobian evaluations
    pub jacobian_evaluations: usize,

    /// Linear systems solved
    pub linear_solves: usize,
}

/// Result of the Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LevMarResult {
    /// Last accepted parameter vector
    pub params: Array1<f64>,

    /// Diagnostics of the run
    pub info: Info,

    /// Unscaled covariance of the parameters, `None` if `J^T J` at the
    /// solution could not be inverted
    pub covariance: Option<Array2<f64>>,

    /// Weighted residuals `y - f(p)` at `params`
    pub residuals: Array1<f64>,

    /// Observations minus free parameters, `n - m + k`
    pub degrees_of_freedom: usize,
}

impl LevMarResult {
    /// Whether the returned parameters are a regular result.
    pub fn success(&self) -> bool {
        self.info.stop_reason.is_success()
    }

    /// Sum of squared weighted residuals.
    pub fn cost(&self) -> f64 {
        self.residuals.dot(&self.residuals)
    }

    /// Covariance scaled by the residual variance `cost / dof`.
    pub fn scaled_covariance(&self) -> Option<Array2<f64>> {
        self.covariance.as_ref().map(|covar| {
            uncertainty::scale_covariance(covar, self.cost(), self.degrees_of_freedom)
        })
    }

    /// Standard errors from the scaled covariance.
    pub fn standard_errors(&self) -> Option<Array1<f64>> {
        self.scaled_covariance()
            .map(|covar| uncertainty::standard_errors_from_covariance(&covar))
    }

    /// Correlation matrix of the parameters.
    pub fn correlation(&self) -> Option<Array2<f64>> {
        self.covariance
            .as_ref()
            .map(uncertainty::calculate_correlation)
    }
}

impl fmt::Display for LevMarResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success())?;
        writeln!(f, "  Stop reason: {}", self.info.stop_reason)?;
        writeln!(f, "  Cost: {:.6e}", self.cost())?;
        writeln!(
            f,
            "  ||e||: {:.6e} -> {:.6e}",
            self.info.initial_residual_norm, self.info.final_residual_norm
        )?;
        writeln!(f, "  Iterations: {}", self.info.iterations)?;
        writeln!(
            f,
            "  Evaluations: {} function, {} Jacobian, {} linear solves",
            self.info.function_evaluations,
            self.info.jacobian_evaluations,
            self.info.linear_solves
        )?;
        writeln!(f, "  Parameters: {}", self.params)?;
        if let Some(errors) = self.standard_errors() {
            writeln!(f, "  Standard errors: {}", errors)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr2, array};

    fn sample_result() -> LevMarResult {
        LevMarResult {
            params: array![1.0, 2.0],
            info: Info {
                initial_residual_norm: 10.0,
                final_residual_norm: 2.0,
                final_gradient_norm: 1e-12,
                final_step_norm: 1e-9,
                mu_ratio: 1e-6,
                iterations: 4,
                stop_reason: StopReason::SmallGradient,
                function_evaluations: 15,
                jacobian_evaluations: 5,
                linear_solves: 6,
            },
            covariance: Some(arr2(&[[1.0, 0.5], [0.5, 4.0]])),
            residuals: array![1.0, -1.0, 1.0, -1.0],
            degrees_of_freedom: 2,
        }
    }

    #[test]
    fn test_derived_quantities() {
        let result = sample_result();
        assert!(result.success());
        assert_relative_eq!(result.cost(), 4.0);

        // Residual variance is 4 / 2 = 2.
        let scaled = result.scaled_covariance().unwrap();
        assert_relative_eq!(scaled[[1, 1]], 8.0);

        let errors = result.standard_errors().unwrap();
        assert_relative_eq!(errors[0], 2.0f64.sqrt());

        let correl = result.correlation().unwrap();
        assert_relative_eq!(correl[[0, 1]], 0.25);
    }

    #[test]
    fn test_missing_covariance() {
        let mut result = sample_result();
        result.covariance = None;
        assert!(result.standard_errors().is_none());
        assert!(result.to_string().contains("Stop reason"));
    }

    #[test]
    fn test_info_serializes() {
        let info = sample_result().info;
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"stop_reason\":\"SmallGradient\""));
        let back: Info = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
