//! Jacobian evaluation for the iteration.
//!
//! [`JacobianProvider`] owns the model-evaluation counters of a fit. It uses
//! the model's analytic Jacobian when there is one and falls back to forward
//! or central differences otherwise, depending on the sign of `delta`.

use ndarray::{Array1, Array2};

use super::config::{DiffMethod, Options};
use crate::error::{LevMarError, Result};
use crate::model::Model;
use crate::utils::finite_difference;

/// Number of model and Jacobian evaluations performed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationCounts {
    /// Model evaluations, including those spent on finite differences
    pub function: usize,

    /// Jacobian evaluations, analytic or approximated
    pub jacobian: usize,
}

/// Evaluates a model and its Jacobian, counting every call.
pub struct JacobianProvider<'a, M: ?Sized> {
    model: &'a M,
    delta: f64,
    method: DiffMethod,
    parallel: bool,
    counts: EvaluationCounts,
}

impl<'a, M> JacobianProvider<'a, M>
where
    M: Model + Sync + ?Sized,
{
    pub fn new(model: &'a M, options: &Options) -> Self {
        Self {
            model,
            delta: options.delta,
            method: options.diff_method(),
            parallel: options.parallel_jacobian,
            counts: EvaluationCounts::default(),
        }
    }

    /// Evaluates the model, checking it returns `n_outputs` values.
    pub fn eval(&mut self, params: &Array1<f64>, n_outputs: usize) -> Result<Array1<f64>> {
        self.counts.function += 1;
        finite_difference::check_output(self.model.eval(params), n_outputs)
    }

    /// Jacobian of the model at `params`, where `f0` is the model output there.
    pub fn jacobian(&mut self, params: &Array1<f64>, f0: &Array1<f64>) -> Result<Array2<f64>> {
        let n = f0.len();
        let m = params.len();
        self.counts.jacobian += 1;

        if self.model.has_custom_jacobian() {
            let jac = self.model.jacobian(params)?;
            if jac.dim() != (n, m) {
                return Err(LevMarError::DimensionMismatch(format!(
                    "analytic Jacobian is {}x{}, expected {}x{}",
                    jac.nrows(),
                    jac.ncols(),
                    n,
                    m
                )));
            }
            return Ok(jac);
        }

        let model = self.model;
        let f = move |p: &Array1<f64>| model.eval(p);
        let jac = match self.method {
            DiffMethod::Forward => {
                self.counts.function += m;
                self.forward(&f, params, f0)?
            }
            DiffMethod::Central => {
                self.counts.function += 2 * m;
                self.central(&f, params, n)?
            }
        };
        Ok(jac)
    }

    #[cfg(feature = "parallel")]
    fn forward<F>(&self, f: &F, params: &Array1<f64>, f0: &Array1<f64>) -> Result<Array2<f64>>
    where
        F: Fn(&Array1<f64>) -> Array1<f64> + Sync,
    {
        if self.parallel {
            crate::utils::parallel::forward_jacobian_parallel(f, params, f0, self.delta)
        } else {
            finite_difference::forward_jacobian(f, params, f0, self.delta)
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn forward<F>(&self, f: &F, params: &Array1<f64>, f0: &Array1<f64>) -> Result<Array2<f64>>
    where
        F: Fn(&Array1<f64>) -> Array1<f64> + Sync,
    {
        finite_difference::forward_jacobian(f, params, f0, self.delta)
    }

    #[cfg(feature = "parallel")]
    fn central<F>(&self, f: &F, params: &Array1<f64>, n: usize) -> Result<Array2<f64>>
    where
        F: Fn(&Array1<f64>) -> Array1<f64> + Sync,
    {
        if self.parallel {
            crate::utils::parallel::central_jacobian_parallel(f, params, n, self.delta)
        } else {
            finite_difference::central_jacobian(f, params, n, self.delta)
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn central<F>(&self, f: &F, params: &Array1<f64>, n: usize) -> Result<Array2<f64>>
    where
        F: Fn(&Array1<f64>) -> Array1<f64> + Sync,
    {
        finite_difference::central_jacobian(f, params, n, self.delta)
    }

    pub fn counts(&self) -> EvaluationCounts {
        self.counts
    }
}
