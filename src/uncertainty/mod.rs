//! # Uncertainty Calculation
//!
//! Covariance, standard errors and correlations of fitted parameters, derived
//! from the Jacobian at the solution.

mod covariance;

pub use covariance::{
    calculate_correlation, calculate_covariance, scale_covariance,
    standard_errors_from_covariance,
};
