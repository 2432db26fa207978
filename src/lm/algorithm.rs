//! Implementation of the Levenberg-Marquardt algorithm.
//!
//! The iteration minimizes `sum w_i (y_i - f_i(p))^2` subject to optional box
//! bounds and linear equality constraints. Each pass solves the damped normal
//! equations for a step, evaluates the model at the clamped candidate and
//! accepts the candidate only when the sum of squares actually drops. The
//! damping factor follows the gain ratio between actual and predicted
//! reduction (see [`TrustRegion`]).

use ndarray::{Array1, Array2, Axis};
use tracing::{debug, info, warn};

use super::config::{DecompositionMethod, Options};
use super::convergence::{ConvergenceCriteria, StopReason};
use super::jacobian::JacobianProvider;
use super::result::{Info, LevMarResult};
use super::step::{LmStep, NormalEquations};
use super::trust_region::TrustRegion;
use crate::constraints::{ConstraintSet, Constraints};
use crate::error::{LevMarError, Result};
use crate::model::Model;
use crate::uncertainty;
use crate::utils::linalg;

/// Default iteration limit of [`LevenbergMarquardt::new`].
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct LevenbergMarquardt {
    /// Configuration options
    options: Options,

    /// Maximum number of accepted steps
    max_iterations: usize,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

impl LevenbergMarquardt {
    /// Create a new optimizer with default options.
    pub fn new() -> Self {
        Self {
            options: Options::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Create a new optimizer with the given options.
    pub fn with_options(options: Options) -> Self {
        Self {
            options,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Set the maximum number of accepted steps.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the scale of the initial damping factor.
    pub fn with_scale_init_mu(mut self, scale: f64) -> Self {
        self.options.scale_init_mu = scale;
        self
    }

    /// Set the threshold for `||J^T e||_inf`.
    pub fn with_gradient_tolerance(mut self, tol: f64) -> Self {
        self.options.stop_norm_inf_jte = tol;
        self
    }

    /// Set the relative threshold for `||dp||_2`.
    pub fn with_step_tolerance(mut self, tol: f64) -> Self {
        self.options.stop_norm2_dp = tol;
        self
    }

    /// Set the threshold for `||e||_2`.
    pub fn with_residual_tolerance(mut self, tol: f64) -> Self {
        self.options.stop_norm2_e = tol;
        self
    }

    /// Set the finite-difference step; a negative value selects central differences.
    pub fn with_delta(mut self, delta: f64) -> Self {
        self.options.delta = delta;
        self
    }

    /// Set the method used for solving the linear system.
    pub fn with_decomposition_method(mut self, method: DecompositionMethod) -> Self {
        self.options.decomposition = method;
        self
    }

    /// Evaluate finite-difference columns in parallel.
    pub fn with_parallel_jacobian(mut self, parallel: bool) -> Self {
        self.options.parallel_jacobian = parallel;
        self
    }

    /// Set the number of consecutive rejected steps tolerated.
    pub fn with_max_rejections(mut self, max_rejections: usize) -> Self {
        self.options.max_rejections = max_rejections;
        self
    }

    /// Choose whether an unsolvable damped system ends the fit with
    /// `SingularMatrix` (the default) or fails it with an error.
    pub fn with_allow_singular_stop(mut self, allow: bool) -> Self {
        self.options.allow_singular_stop = allow;
        self
    }

    /// Fit `model` to `observations` starting from `initial_params`.
    ///
    /// # Errors
    ///
    /// Invalid options, malformed or infeasible constraints, too few
    /// observations and model outputs of the wrong length are reported before
    /// the first step. Everything that goes wrong later, including a model
    /// returning NaN, ends the iteration with a [`StopReason`] instead, unless
    /// `allow_singular_stop` is off and the damped system cannot be solved.
    pub fn minimize<M>(
        &self,
        model: &M,
        initial_params: Array1<f64>,
        observations: &Array1<f64>,
        constraints: &Constraints,
    ) -> Result<LevMarResult>
    where
        M: Model + Sync + ?Sized,
    {
        self.options.validate()?;

        let m = initial_params.len();
        let n = observations.len();
        if m == 0 {
            return Err(LevMarError::DimensionMismatch(
                "parameter vector is empty".to_string(),
            ));
        }

        let set = ConstraintSet::new(constraints, m, n)?;
        let required = set.free_count();
        if n < required {
            return Err(LevMarError::TooFewMeasurements {
                measurements: n,
                required,
            });
        }

        let mut params = set.feasible_start(&initial_params)?;
        if params != initial_params {
            warn!(
                "Initial parameters moved into the feasible set: {} -> {}",
                initial_params, params
            );
        }

        let criteria = ConvergenceCriteria::from(&self.options);
        let mut provider = JacobianProvider::new(model, &self.options);

        let mut prediction = provider.eval(&params, n)?;
        let mut residuals = set.weight_residuals(observations - &prediction);
        let mut residual_norm = linalg::norm2(&residuals);
        let initial_residual_norm = residual_norm;
        debug!(
            "Starting fit: {} parameters, {} observations, ||e|| = {:.6e}",
            m, n, residual_norm
        );

        if !all_finite(&residuals) {
            warn!("Model returned non-finite values at the initial parameters");
            let info = Info {
                initial_residual_norm,
                final_residual_norm: residual_norm,
                final_gradient_norm: f64::NAN,
                final_step_norm: 0.0,
                mu_ratio: 0.0,
                iterations: 0,
                stop_reason: StopReason::InvalidValues,
                function_evaluations: provider.counts().function,
                jacobian_evaluations: provider.counts().jacobian,
                linear_solves: 0,
            };
            return Ok(LevMarResult {
                params,
                info,
                covariance: None,
                residuals,
                degrees_of_freedom: n - required,
            });
        }

        let mut jacobian = set.weight_jacobian(provider.jacobian(&params, &prediction)?);
        let mut reduced = set.reduce_jacobian(&jacobian);
        let mut equations = NormalEquations::new(&reduced, &residuals);
        let mut trust_region = TrustRegion::new(
            self.options.scale_init_mu,
            equations.max_diagonal(),
            self.options.max_rejections,
        );

        let mut iterations = 0;
        let mut linear_solves = 0;
        let mut step_norm = 0.0;
        let mut jacobian_valid = all_finite_matrix(&jacobian);

        let stop_reason = if !jacobian_valid {
            StopReason::InvalidValues
        } else if criteria.small_residual(residual_norm) {
            StopReason::SmallNorm2E
        } else {
            loop {
                if iterations >= self.max_iterations {
                    break StopReason::MaxIterations;
                }

                let gradient = set.projected_gradient(&params, &equations.gradient);
                if criteria.small_gradient(linalg::norm_inf(&gradient)) {
                    break StopReason::SmallGradient;
                }

                let step = match LmStep::calculate_step(
                    &equations,
                    trust_region.mu,
                    self.options.decomposition,
                    &set,
                    &params,
                ) {
                    Ok(result) => {
                        linear_solves += result.solves;
                        result.step
                    }
                    Err(err) => {
                        if !self.options.allow_singular_stop {
                            return Err(err.into());
                        }
                        linear_solves += 1;
                        debug!("Damped system could not be solved: {}", err);
                        break StopReason::SingularMatrix;
                    }
                };

                let full_step = set.expand_step(step);
                let params_norm = linalg::norm2(&params);
                let raw_norm = linalg::norm2(&full_step);
                if !raw_norm.is_finite() || criteria.singular_step(raw_norm, params_norm) {
                    break StopReason::SingularMatrix;
                }

                let candidate = set.apply_step(&params, &full_step);
                let taken = &candidate - &params;
                step_norm = linalg::norm2(&taken);
                if criteria.small_step(step_norm, params_norm) {
                    break StopReason::SmallDp;
                }

                let candidate_prediction = provider.eval(&candidate, n)?;
                let candidate_residuals =
                    set.weight_residuals(observations - &candidate_prediction);
                if !all_finite(&candidate_residuals) {
                    break StopReason::InvalidValues;
                }

                let cost = residual_norm * residual_norm;
                let candidate_cost = candidate_residuals.dot(&candidate_residuals);
                let actual = cost - candidate_cost;
                let predicted =
                    LmStep::predicted_reduction(&jacobian, &jacobian.t().dot(&residuals), &taken);

                if predicted > 0.0 && actual > 0.0 {
                    let rho = TrustRegion::gain_ratio(actual, predicted);
                    trust_region.accept(rho);
                    iterations += 1;
                    debug!(
                        "Iteration {}: accepted, cost {:.6e} -> {:.6e}, rho = {:.3}, mu = {:.3e}",
                        iterations, cost, candidate_cost, rho, trust_region.mu
                    );

                    params = candidate;
                    prediction = candidate_prediction;
                    residuals = candidate_residuals;
                    residual_norm = candidate_cost.sqrt();

                    jacobian = set.weight_jacobian(provider.jacobian(&params, &prediction)?);
                    if !all_finite_matrix(&jacobian) {
                        jacobian_valid = false;
                        break StopReason::InvalidValues;
                    }
                    reduced = set.reduce_jacobian(&jacobian);
                    equations = NormalEquations::new(&reduced, &residuals);

                    if criteria.small_residual(residual_norm) {
                        break StopReason::SmallNorm2E;
                    }
                } else {
                    debug!(
                        "Iteration {}: rejected, actual {:.3e}, predicted {:.3e}, mu = {:.3e}",
                        iterations + 1,
                        actual,
                        predicted,
                        trust_region.mu
                    );
                    if !trust_region.reject() {
                        break StopReason::SmallestError;
                    }
                }
            }
        };

        let covariance = if jacobian_valid {
            match parameter_covariance(&set, &reduced) {
                Ok(covar) => Some(covar),
                Err(err) => {
                    warn!("Covariance is unavailable: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let counts = provider.counts();
        let info = Info {
            initial_residual_norm,
            final_residual_norm: residual_norm,
            final_gradient_norm: linalg::norm_inf(
                &set.projected_gradient(&params, &equations.gradient),
            ),
            final_step_norm: step_norm,
            mu_ratio: trust_region.mu_ratio(equations.max_diagonal()),
            iterations,
            stop_reason,
            function_evaluations: counts.function,
            jacobian_evaluations: counts.jacobian,
            linear_solves,
        };
        info!(
            "{} after {} iterations, ||e|| = {:.6e}",
            stop_reason, iterations, residual_norm
        );

        Ok(LevMarResult {
            params,
            info,
            covariance,
            residuals,
            degrees_of_freedom: n - required,
        })
    }
}

/// Fit `model` to `observations` with the given limits, options and constraints.
///
/// Shorthand for [`LevenbergMarquardt::minimize`].
pub fn levmar<M>(
    model: &M,
    initial_params: Array1<f64>,
    observations: &Array1<f64>,
    max_iterations: usize,
    options: &Options,
    constraints: &Constraints,
) -> Result<LevMarResult>
where
    M: Model + Sync + ?Sized,
{
    LevenbergMarquardt::with_options(options.clone())
        .with_max_iterations(max_iterations)
        .minimize(model, initial_params, observations, constraints)
}

/// Covariance at the solution from the reduced Jacobian.
///
/// Pinned parameters carry no uncertainty: their rows and columns are zero
/// and the inverse is taken over the remaining parameters.
fn parameter_covariance(set: &ConstraintSet, reduced: &Array2<f64>) -> Result<Array2<f64>> {
    if let Some(null_space) = set.null_space() {
        return match set.face_basis(&set.initial_active_set()) {
            None => uncertainty::calculate_covariance(reduced, Some(null_space)),
            Some(face) if face.ncols() == 0 => {
                let m = set.parameter_count();
                Ok(Array2::zeros((m, m)))
            }
            Some(face) => {
                let basis = null_space.dot(&face);
                uncertainty::calculate_covariance(&reduced.dot(&face), Some(&basis))
            }
        };
    }

    let m = set.parameter_count();
    let free: Vec<usize> = (0..m).filter(|&i| !set.is_pinned(i)).collect();
    if free.len() == m {
        return uncertainty::calculate_covariance(reduced, None);
    }

    let mut covar = Array2::zeros((m, m));
    if free.is_empty() {
        return Ok(covar);
    }
    let sub = uncertainty::calculate_covariance(&reduced.select(Axis(1), &free), None)?;
    for (a, &i) in free.iter().enumerate() {
        for (b, &j) in free.iter().enumerate() {
            covar[[i, j]] = sub[[a, b]];
        }
    }
    Ok(covar)
}

fn all_finite(v: &Array1<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

fn all_finite_matrix(a: &Array2<f64>) -> bool {
    a.iter().all(|x| x.is_finite())
}
