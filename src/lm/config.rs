//! Configuration options for the Levenberg-Marquardt algorithm.
//!
//! This module defines the damping, stopping and differentiation settings of
//! a fit. The defaults are the conventional ones: an initial damping scale of
//! `1e-3`, stopping thresholds of `1e-15` and a finite-difference step of
//! `1e-6`.

use serde::{Deserialize, Serialize};

use crate::error::{LevMarError, Result};

/// Finite-difference scheme for approximating the Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffMethod {
    /// One extra model evaluation per parameter, first-order accurate.
    Forward,

    /// Two extra model evaluations per parameter, second-order accurate.
    Central,
}

/// Method for solving the damped normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecompositionMethod {
    /// Cholesky decomposition (the damped system is symmetric positive definite)
    Cholesky,

    /// LU decomposition with partial pivoting
    Lu,

    /// Try Cholesky first, fall back to LU if it fails
    #[default]
    Auto,
}

/// Configuration options for the Levenberg-Marquardt algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Scale factor for the initial damping: `mu0 = scale_init_mu * max(diag(J^T J))`. Default: 1e-3
    pub scale_init_mu: f64,

    /// Stop when `||J^T e||_inf` falls to this value. Default: 1e-15
    pub stop_norm_inf_jte: f64,

    /// Stop when `||dp||_2 <= stop_norm2_dp * ||p||_2`. Default: 1e-15
    pub stop_norm2_dp: f64,

    /// Stop when `||e||_2` falls to this value. Default: 1e-15
    pub stop_norm2_e: f64,

    /// Finite-difference step. Positive selects forward differences, negative
    /// selects central differences. Default: 1e-6
    pub delta: f64,

    /// Method to use for solving the linear system. Default: Auto
    pub decomposition: DecompositionMethod,

    /// Evaluate finite-difference columns on the rayon pool. Default: false
    pub parallel_jacobian: bool,

    /// Consecutive rejected steps tolerated before giving up with
    /// `SmallestError`. Default: 32
    pub max_rejections: usize,

    /// End the fit with `StopReason::SingularMatrix` when the damped system
    /// cannot be solved. When false the fit fails with a `LinearAlgebra`
    /// error instead. Default: true
    pub allow_singular_stop: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            scale_init_mu: 1e-3,
            stop_norm_inf_jte: 1e-15,
            stop_norm2_dp: 1e-15,
            stop_norm2_e: 1e-15,
            delta: 1e-6,
            decomposition: DecompositionMethod::default(),
            parallel_jacobian: false,
            max_rejections: 32,
            allow_singular_stop: true,
        }
    }
}

impl Options {
    /// Differencing scheme selected by the sign of `delta`.
    pub fn diff_method(&self) -> DiffMethod {
        if self.delta < 0.0 {
            DiffMethod::Central
        } else {
            DiffMethod::Forward
        }
    }

    /// Checks that every option is usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.scale_init_mu.is_finite() && self.scale_init_mu > 0.0) {
            return Err(LevMarError::Generic(format!(
                "scale_init_mu must be positive, got {}",
                self.scale_init_mu
            )));
        }
        for (name, value) in [
            ("stop_norm_inf_jte", self.stop_norm_inf_jte),
            ("stop_norm2_dp", self.stop_norm2_dp),
            ("stop_norm2_e", self.stop_norm2_e),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(LevMarError::Generic(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        if !(self.delta.is_finite() && self.delta != 0.0) {
            return Err(LevMarError::Generic(format!(
                "delta must be finite and non-zero, got {}",
                self.delta
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_method_from_delta_sign() {
        let mut opts = Options::default();
        assert_eq!(opts.diff_method(), DiffMethod::Forward);
        opts.delta = -1e-6;
        assert_eq!(opts.diff_method(), DiffMethod::Central);
    }

    #[test]
    fn test_validate() {
        assert!(Options::default().validate().is_ok());

        let opts = Options {
            delta: 0.0,
            ..Options::default()
        };
        assert!(opts.validate().is_err());

        let opts = Options {
            scale_init_mu: -1.0,
            ..Options::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let opts = Options {
            delta: -1e-5,
            decomposition: DecompositionMethod::Lu,
            ..Options::default()
        };
        let json = serde_json::to_string(&opts).unwrap();
        let back: Options = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, back);

        // Missing fields fall back to the defaults.
        let partial: Options = serde_json::from_str(r#"{"delta": 1e-4}"#).unwrap();
        assert_eq!(partial.delta, 1e-4);
        assert_eq!(partial.scale_init_mu, 1e-3);
        assert!(partial.allow_singular_stop);
    }
}
