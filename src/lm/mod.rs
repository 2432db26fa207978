//! Levenberg-Marquardt algorithm implementation.
//!
//! This module provides the damped Gauss-Newton iteration together with its
//! building blocks: options, stopping criteria, damping control, Jacobian
//! evaluation, the step solver and the result types.

pub mod algorithm;
pub mod config;
pub mod convergence;
pub mod jacobian;
pub mod result;
pub mod step;
pub mod trust_region;

// Re-export key types
pub use algorithm::{levmar, LevenbergMarquardt, DEFAULT_MAX_ITERATIONS};
pub use config::{DecompositionMethod, DiffMethod, Options};
pub use convergence::{ConvergenceCriteria, StopReason, TerminalState};
pub use jacobian::{EvaluationCounts, JacobianProvider};
pub use result::{Info, LevMarResult};
pub use step::{LmStep, NormalEquations, StepResult};
pub use trust_region::TrustRegion;
