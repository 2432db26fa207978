//! # levmar-rs
//!
//! `levmar-rs` is a Rust implementation of the Levenberg-Marquardt algorithm
//! for nonlinear least-squares optimization.
//!
//! The library provides:
//! - A damped Gauss-Newton iteration with adaptive damping
//! - Box bounds, linear equality constraints and observation weights
//! - Analytic or finite-difference (forward or central) Jacobians
//! - Convergence diagnostics and a covariance estimate at the solution
//!
//! ## Basic Usage
//!
//! ```
//! use levmar_rs::{levmar, Constraints, Options, SampleModel};
//! use ndarray::{array, Array1};
//!
//! let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.5).collect();
//! let ys: Array1<f64> = xs.iter().map(|x| 2.0 * (-0.5 * x).exp()).collect();
//!
//! let model = SampleModel::new(xs, |p: &Array1<f64>, x: &f64| p[0] * (p[1] * x).exp());
//! let result = levmar(
//!     &model,
//!     array![1.0, 0.0],
//!     &ys,
//!     200,
//!     &Options::default(),
//!     &Constraints::none(),
//! )
//! .unwrap();
//!
//! assert!(result.success());
//! assert!((result.params[0] - 2.0).abs() < 1e-6);
//! ```

pub mod constraints;
pub mod error;
pub mod lm;
pub mod model;
pub mod uncertainty;
pub mod utils;

// Re-exports for convenience
pub use constraints::{ConstraintSet, Constraints, LinearConstraint};
pub use error::{ErrorKind, LevMarError, Result};
pub use lm::{levmar, Info, LevMarResult, LevenbergMarquardt, Options, StopReason};
pub use model::{Model, SampleModel, VectorModel};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
