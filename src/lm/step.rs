//! Step calculation for the Levenberg-Marquardt algorithm.
//!
//! This module assembles the normal equations `J^T J dp = J^T e` in the
//! coordinates the iteration moves in, solves their damped form
//! `(J^T J + mu I) dp = J^T e`, and evaluates the reduction in the sum of
//! squares that the linearized model predicts for a step.

use ndarray::{Array1, Array2};

use super::config::DecompositionMethod;
use crate::constraints::ConstraintSet;
use crate::utils::linalg::{self, LinalgResult};

/// Normal equations of the linearized problem.
#[derive(Debug, Clone)]
pub struct NormalEquations {
    /// `J^T J`
    pub jtj: Array2<f64>,

    /// `J^T e`
    pub gradient: Array1<f64>,
}

impl NormalEquations {
    /// Builds `J^T J` and `J^T e`.
    pub fn new(jacobian: &Array2<f64>, residuals: &Array1<f64>) -> Self {
        Self {
            jtj: linalg::gram(jacobian),
            gradient: jacobian.t().dot(residuals),
        }
    }

    /// Number of unknowns.
    pub fn dim(&self) -> usize {
        self.gradient.len()
    }

    /// Largest diagonal entry of `J^T J`.
    pub fn max_diagonal(&self) -> f64 {
        linalg::max_diagonal(&self.jtj)
    }
}

/// Result of a step calculation.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The step in reduced coordinates
    pub step: Array1<f64>,

    /// Number of linear systems solved to obtain it
    pub solves: usize,
}

/// Handles step calculation for the Levenberg-Marquardt algorithm.
pub struct LmStep;

impl LmStep {
    /// Solves `(J^T J + mu I) dp = J^T e` with the variables flagged in
    /// `fixed` held at zero.
    pub fn solve_damped(
        equations: &NormalEquations,
        mu: f64,
        fixed: &[bool],
        method: DecompositionMethod,
    ) -> LinalgResult<Array1<f64>> {
        let n = equations.dim();
        let mut a = equations.jtj.clone();
        let mut b = equations.gradient.clone();

        for i in 0..n {
            if fixed[i] {
                a.row_mut(i).fill(0.0);
                a.column_mut(i).fill(0.0);
                a[[i, i]] = 1.0;
                b[i] = 0.0;
            } else {
                a[[i, i]] += mu;
            }
        }

        match method {
            DecompositionMethod::Cholesky => linalg::cholesky_solve(&a, &b),
            DecompositionMethod::Lu => linalg::solve(&a, &b),
            DecompositionMethod::Auto => {
                linalg::cholesky_solve(&a, &b).or_else(|_| linalg::solve(&a, &b))
            }
        }
    }

    /// Calculates the damped step at `params`, honoring the active set.
    ///
    /// Parameters pinned by `lower == upper` never move. If the solved step
    /// would push a parameter sitting on one of its bounds further out, that
    /// parameter joins the active set and the system is solved again. The
    /// active set only grows, so this ends after at most `m` extra solves.
    ///
    /// With equality constraints the step is in reduced coordinates and an
    /// active parameter is held by solving on the face of the null space
    /// that leaves it unchanged.
    pub fn calculate_step(
        equations: &NormalEquations,
        mu: f64,
        method: DecompositionMethod,
        constraints: &ConstraintSet,
        params: &Array1<f64>,
    ) -> LinalgResult<StepResult> {
        let mut fixed = constraints.initial_active_set();
        let mut solves = 0;

        if !constraints.has_equality() {
            loop {
                let step = Self::solve_damped(equations, mu, &fixed, method)?;
                solves += 1;
                if !constraints.block_outward(params, &step, &mut fixed) {
                    return Ok(StepResult { step, solves });
                }
            }
        }

        loop {
            let step = match constraints.face_basis(&fixed) {
                None => {
                    solves += 1;
                    Self::solve_damped(equations, mu, &vec![false; equations.dim()], method)?
                }
                Some(basis) if basis.ncols() == 0 => Array1::zeros(equations.dim()),
                Some(basis) => {
                    let face = NormalEquations {
                        jtj: basis.t().dot(&equations.jtj).dot(&basis),
                        gradient: basis.t().dot(&equations.gradient),
                    };
                    solves += 1;
                    basis.dot(&Self::solve_damped(
                        &face,
                        mu,
                        &vec![false; face.dim()],
                        method,
                    )?)
                }
            };
            let direction = constraints.expand_step(step.clone());
            if !constraints.block_outward(params, &direction, &mut fixed) {
                return Ok(StepResult { step, solves });
            }
        }
    }

    /// Reduction in `||e||^2` predicted by the linearized model for `step`:
    /// `2 step . J^T e - ||J step||^2`.
    pub fn predicted_reduction(
        jacobian: &Array2<f64>,
        gradient: &Array1<f64>,
        step: &Array1<f64>,
    ) -> f64 {
        let j_step = jacobian.dot(step);
        2.0 * step.dot(gradient) - j_step.dot(&j_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::Constraints;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_undamped_step_solves_least_squares() {
        // y = 2x + 1 observed exactly; residuals at p = 0 are the data.
        let j = array![[1.0, 1.0], [2.0, 1.0], [3.0, 1.0]];
        let e = array![3.0, 5.0, 7.0];
        let eq = NormalEquations::new(&j, &e);
        let step = LmStep::solve_damped(&eq, 0.0, &[false, false], DecompositionMethod::Auto)
            .unwrap();
        assert_relative_eq!(step[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(step[1], 1.0, epsilon = 1e-12);

        // The full step removes the whole residual.
        let predicted = LmStep::predicted_reduction(&j, &eq.gradient, &step);
        assert_relative_eq!(predicted, e.dot(&e), epsilon = 1e-9);
    }

    #[test]
    fn test_fixed_variables_do_not_move() {
        let j = array![[1.0, 1.0], [2.0, 1.0], [3.0, 1.0]];
        let e = array![3.0, 5.0, 7.0];
        let eq = NormalEquations::new(&j, &e);
        for method in [
            DecompositionMethod::Cholesky,
            DecompositionMethod::Lu,
            DecompositionMethod::Auto,
        ] {
            let step = LmStep::solve_damped(&eq, 1e-3, &[false, true], method).unwrap();
            assert_eq!(step[1], 0.0);
            // One-parameter least squares: sum(x e) / (sum(x^2) + mu).
            assert_relative_eq!(step[0], 34.0 / 14.001, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_active_set_blocks_outward_step() {
        // The unconstrained step increases p1, but p1 sits on its upper bound.
        let j = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let e = array![1.0, 1.0, 2.0];
        let eq = NormalEquations::new(&j, &e);
        let c = Constraints::none().with_bounds(array![-10.0, -10.0], array![10.0, 0.0]);
        let set = ConstraintSet::new(&c, 2, 3).unwrap();
        let params = array![0.0, 0.0];

        let result =
            LmStep::calculate_step(&eq, 1e-6, DecompositionMethod::Auto, &set, &params).unwrap();
        assert_eq!(result.solves, 2);
        assert_eq!(result.step[1], 0.0);
        assert!(result.step[0] > 0.0);
    }

    #[test]
    fn test_equality_step_respects_pinned_parameter() {
        // Three parameters with p0 + p1 + p2 = 1 and p2 pinned: the step may
        // only trade p0 against p1.
        let c = Constraints::none()
            .with_linear(array![[1.0, 1.0, 1.0]], array![1.0])
            .with_bounds(
                array![f64::NEG_INFINITY, f64::NEG_INFINITY, 0.2],
                array![f64::INFINITY, f64::INFINITY, 0.2],
            );
        let set = ConstraintSet::new(&c, 3, 3).unwrap();
        let j = set.reduce_jacobian(&Array2::eye(3));
        let eq = NormalEquations::new(&j, &array![1.0, -1.0, 5.0]);
        let params = array![0.4, 0.4, 0.2];

        let result =
            LmStep::calculate_step(&eq, 1e-6, DecompositionMethod::Auto, &set, &params).unwrap();
        let full = set.expand_step(result.step);
        assert!(full[2].abs() < 1e-12);
        assert!(full.sum().abs() < 1e-12);
        assert!(full[0] > 0.0 && full[1] < 0.0);
    }
}
