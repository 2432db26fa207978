//! Stopping criteria for the Levenberg-Marquardt iteration.
//!
//! A fit always ends with a [`StopReason`]. Stop reasons are not errors: each
//! one is returned together with the last accepted parameter vector.

use serde::{Deserialize, Serialize};

use super::config::Options;

/// Why the iteration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopReason {
    /// `||J^T e||_inf` fell below its threshold.
    SmallGradient,

    /// `||dp||_2` fell below its threshold relative to `||p||_2`.
    SmallDp,

    /// The iteration limit was reached.
    MaxIterations,

    /// The damped normal equations could not be solved.
    SingularMatrix,

    /// No further error reduction is possible: the damping factor grew past
    /// the rejection cap without finding a better point.
    SmallestError,

    /// `||e||_2` fell below its threshold.
    SmallNorm2E,

    /// The model produced NaN or infinite values.
    InvalidValues,
}

/// Terminal state of the iteration's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminalState {
    Converged,
    MaxIterationsReached,
    Stalled,
    Failed,
}

impl StopReason {
    /// Returns true if a convergence threshold was met.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            StopReason::SmallGradient | StopReason::SmallDp | StopReason::SmallNorm2E
        )
    }

    /// Returns true if the returned parameters are a regular result.
    pub fn is_success(&self) -> bool {
        matches!(
            self.terminal_state(),
            TerminalState::Converged | TerminalState::MaxIterationsReached
        )
    }

    pub fn terminal_state(&self) -> TerminalState {
        match self {
            StopReason::SmallGradient | StopReason::SmallDp | StopReason::SmallNorm2E => {
                TerminalState::Converged
            }
            StopReason::MaxIterations => TerminalState::MaxIterationsReached,
            StopReason::SingularMatrix => TerminalState::Stalled,
            StopReason::SmallestError | StopReason::InvalidValues => TerminalState::Failed,
        }
    }

    /// Returns a description of the stop reason.
    pub fn description(&self) -> &'static str {
        match self {
            StopReason::SmallGradient => "Converged: small gradient J^T e",
            StopReason::SmallDp => "Converged: small parameter step",
            StopReason::MaxIterations => "Terminated: maximum iterations reached",
            StopReason::SingularMatrix => "Terminated: singular matrix, restart from current p with increased mu",
            StopReason::SmallestError => "Terminated: no further error reduction is possible",
            StopReason::SmallNorm2E => "Converged: small residual norm",
            StopReason::InvalidValues => "Terminated: model returned invalid (NaN or Inf) values",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Thresholds checked by the iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceCriteria {
    /// Threshold for `||J^T e||_inf`.
    pub gtol: f64,

    /// Relative threshold for `||dp||_2`.
    pub xtol: f64,

    /// Threshold for `||e||_2`.
    pub etol: f64,
}

impl From<&Options> for ConvergenceCriteria {
    fn from(opts: &Options) -> Self {
        Self {
            gtol: opts.stop_norm_inf_jte,
            xtol: opts.stop_norm2_dp,
            etol: opts.stop_norm2_e,
        }
    }
}

impl ConvergenceCriteria {
    pub fn small_gradient(&self, gradient_inf: f64) -> bool {
        gradient_inf <= self.gtol
    }

    pub fn small_step(&self, step_norm: f64, params_norm: f64) -> bool {
        step_norm <= self.xtol * params_norm
    }

    pub fn small_residual(&self, residual_norm: f64) -> bool {
        residual_norm <= self.etol
    }

    /// A step this large relative to the parameters only comes out of a
    /// numerically singular system.
    pub fn singular_step(&self, step_norm: f64, params_norm: f64) -> bool {
        step_norm >= (params_norm + self.xtol) / (f64::EPSILON * f64::EPSILON)
    }
}
