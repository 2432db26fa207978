//! Box bounds, linear equality constraints and observation weights.
//!
//! [`Constraints`] is the caller-facing description. [`ConstraintSet`] is the
//! validated form used by the iteration:
//!
//! - Box bounds are enforced by clamping every candidate parameter vector
//!   into `[lower, upper]`, together with an active set that holds a
//!   parameter fixed when it sits on a bound and the step would push it
//!   outside. A parameter with `lower == upper` is always fixed.
//! - Linear equality constraints `A p = b` are enforced by starting from a
//!   point satisfying them and restricting every step to the null space of
//!   `A`. Together with bounds, parameters held on a bound are removed from
//!   that null space and the step is shortened so it stops at the first
//!   bound it meets, which keeps every iterate on `A p = b`.
//! - Observation weights scale residuals and Jacobian rows by `sqrt(w_i)`, so
//!   the objective becomes `sum w_i e_i^2`.

use ndarray::{Array1, Array2, Axis};

use crate::error::{LevMarError, Result};
use crate::utils::linalg::{self, LuDecomposition};

/// Alternating projections tried when looking for a feasible start.
const MAX_FEASIBILITY_ROUNDS: usize = 1000;

/// Relative violation of `A p = b` accepted for a feasible start.
const FEASIBILITY_TOLERANCE: f64 = 1e-10;

/// Step components this small relative to the largest one are rounding noise.
const STEP_NOISE: f64 = 1e-12;

/// Linear equality constraint `matrix * p = rhs`, with `matrix` of shape `k x m`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub matrix: Array2<f64>,
    pub rhs: Array1<f64>,
}

impl LinearConstraint {
    /// Creates a constraint, checking that `rhs` has one entry per row.
    pub fn new(matrix: Array2<f64>, rhs: Array1<f64>) -> Result<Self> {
        if matrix.nrows() != rhs.len() {
            return Err(LevMarError::length_mismatch(
                "constraint right-hand side",
                matrix.nrows(),
                rhs.len(),
            ));
        }
        Ok(Self { matrix, rhs })
    }

    /// Number of constraint rows.
    pub fn rows(&self) -> usize {
        self.matrix.nrows()
    }
}

/// Optional constraints on a fit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    /// Lower bounds, one per parameter.
    pub lower: Option<Array1<f64>>,
    /// Upper bounds, one per parameter.
    pub upper: Option<Array1<f64>>,
    /// Non-negative weights, one per observation.
    pub weights: Option<Array1<f64>>,
    /// Linear equality constraint.
    pub linear: Option<LinearConstraint>,
}

impl Constraints {
    /// No constraints at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_lower(mut self, lower: Array1<f64>) -> Self {
        self.lower = Some(lower);
        self
    }

    pub fn with_upper(mut self, upper: Array1<f64>) -> Self {
        self.upper = Some(upper);
        self
    }

    /// Sets both bound vectors.
    pub fn with_bounds(self, lower: Array1<f64>, upper: Array1<f64>) -> Self {
        self.with_lower(lower).with_upper(upper)
    }

    pub fn with_weights(mut self, weights: Array1<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Adds the linear equality constraint `matrix * p = rhs`.
    pub fn with_linear(mut self, matrix: Array2<f64>, rhs: Array1<f64>) -> Self {
        self.linear = Some(LinearConstraint { matrix, rhs });
        self
    }

    /// Number of linear equality constraints.
    pub fn equality_count(&self) -> usize {
        self.linear.as_ref().map_or(0, LinearConstraint::rows)
    }
}

#[derive(Debug, Clone)]
struct EqualitySubspace {
    matrix: Array2<f64>,
    rhs: Array1<f64>,
    /// Orthonormal null-space basis of `matrix`, `m x (m - k)`.
    null_space: Array2<f64>,
    /// Factorization of `matrix * matrix^T`.
    gram: LuDecomposition,
}

/// Validated constraints for a problem with `m` parameters and `n` observations.
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    lower: Array1<f64>,
    upper: Array1<f64>,
    bounded: bool,
    sqrt_weights: Option<Array1<f64>>,
    equality: Option<EqualitySubspace>,
}

impl ConstraintSet {
    /// Validates `constraints` against the problem dimensions.
    ///
    /// # Errors
    ///
    /// * `DimensionMismatch` if a bound, weight or constraint vector has the wrong length.
    ///   Bound vectors are checked for length before `FailedBoxCheck` is considered,
    ///   so a short bound vector never reports a box failure.
    /// * `FailedBoxCheck` if some `lower[i] > upper[i]`
    /// * `ConstraintMatrixRowsGtCols` if there are more equality constraints than parameters
    /// * `ConstraintMatrixNotFullRowRank` if the constraint matrix is rank deficient
    /// * `Generic` for negative or non-finite weights
    pub fn new(constraints: &Constraints, n_params: usize, n_obs: usize) -> Result<Self> {
        let lower = match &constraints.lower {
            Some(lb) if lb.len() != n_params => {
                return Err(LevMarError::length_mismatch("lower bounds", n_params, lb.len()))
            }
            Some(lb) => lb.clone(),
            None => Array1::from_elem(n_params, f64::NEG_INFINITY),
        };
        let upper = match &constraints.upper {
            Some(ub) if ub.len() != n_params => {
                return Err(LevMarError::length_mismatch("upper bounds", n_params, ub.len()))
            }
            Some(ub) => ub.clone(),
            None => Array1::from_elem(n_params, f64::INFINITY),
        };

        for (index, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
            // Written negated so NaN bounds fail too.
            if !(lo <= hi) {
                return Err(LevMarError::FailedBoxCheck {
                    index,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        let bounded = constraints.lower.is_some() || constraints.upper.is_some();

        let sqrt_weights = match &constraints.weights {
            Some(w) if w.len() != n_obs => {
                return Err(LevMarError::length_mismatch("weights", n_obs, w.len()))
            }
            Some(w) => {
                if let Some(bad) = w.iter().find(|v| !(v.is_finite() && **v >= 0.0)) {
                    return Err(LevMarError::Generic(format!(
                        "weights must be finite and non-negative, got {}",
                        bad
                    )));
                }
                Some(w.mapv(f64::sqrt))
            }
            None => None,
        };

        let equality = match &constraints.linear {
            Some(lc) => Some(Self::equality_subspace(lc, n_params)?),
            None => None,
        };

        Ok(Self {
            lower,
            upper,
            bounded,
            sqrt_weights,
            equality,
        })
    }

    fn equality_subspace(lc: &LinearConstraint, n_params: usize) -> Result<EqualitySubspace> {
        let k = lc.matrix.nrows();
        if lc.rhs.len() != k {
            return Err(LevMarError::length_mismatch(
                "constraint right-hand side",
                k,
                lc.rhs.len(),
            ));
        }
        if k > n_params {
            return Err(LevMarError::ConstraintMatrixRowsGtCols {
                rows: k,
                cols: lc.matrix.ncols(),
            });
        }
        if lc.matrix.ncols() != n_params {
            return Err(LevMarError::length_mismatch(
                "constraint matrix row",
                n_params,
                lc.matrix.ncols(),
            ));
        }
        let rank = linalg::row_rank(&lc.matrix);
        if rank < k {
            return Err(LevMarError::ConstraintMatrixNotFullRowRank { rows: k, rank });
        }

        let gram = LuDecomposition::new(&lc.matrix.dot(&lc.matrix.t()))?;
        Ok(EqualitySubspace {
            matrix: lc.matrix.clone(),
            rhs: lc.rhs.clone(),
            null_space: linalg::null_space(&lc.matrix),
            gram,
        })
    }

    /// Number of parameters.
    pub fn parameter_count(&self) -> usize {
        self.lower.len()
    }

    /// Number of linear equality constraints.
    pub fn equality_count(&self) -> usize {
        self.equality.as_ref().map_or(0, |eq| eq.matrix.nrows())
    }

    /// Dimension of the space the iteration moves in, `m - k`.
    pub fn free_count(&self) -> usize {
        self.parameter_count() - self.equality_count()
    }

    pub fn has_bounds(&self) -> bool {
        self.bounded
    }

    pub fn has_equality(&self) -> bool {
        self.equality.is_some()
    }

    pub fn lower(&self) -> &Array1<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &Array1<f64> {
        &self.upper
    }

    /// Returns `true` if `lower[i] == upper[i]`.
    pub fn is_pinned(&self, i: usize) -> bool {
        self.lower[i] == self.upper[i]
    }

    /// Clamps every component into its bounds.
    pub fn clamp(&self, params: &Array1<f64>) -> Array1<f64> {
        let mut out = params.clone();
        for (i, v) in out.iter_mut().enumerate() {
            if self.is_pinned(i) {
                *v = self.lower[i];
            } else {
                *v = v.max(self.lower[i]).min(self.upper[i]);
            }
        }
        out
    }

    pub fn is_within_bounds(&self, params: &Array1<f64>) -> bool {
        params
            .iter()
            .enumerate()
            .all(|(i, &v)| v >= self.lower[i] && v <= self.upper[i])
    }

    /// Maximum absolute violation of the equality constraints, zero without them.
    pub fn equality_residual(&self, params: &Array1<f64>) -> f64 {
        match &self.equality {
            Some(eq) => linalg::norm_inf(&(eq.matrix.dot(params) - &eq.rhs)),
            None => 0.0,
        }
    }

    /// Moves an initial guess into the feasible set.
    ///
    /// The guess is projected orthogonally onto `{p : A p = b}` and clamped
    /// into the box. When the clamp breaks the equality constraints the two
    /// projections alternate until a point satisfying both is found.
    ///
    /// # Errors
    ///
    /// `Generic` if no point satisfies the bounds and the equality
    /// constraints together.
    pub fn feasible_start(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let eq = match &self.equality {
            Some(eq) => eq,
            None => return Ok(self.clamp(params)),
        };

        let tolerance = FEASIBILITY_TOLERANCE * (1.0 + linalg::norm_inf(&eq.rhs));
        let mut current = params.clone();
        for _ in 0..MAX_FEASIBILITY_ROUNDS {
            let violation = eq.matrix.dot(&current) - &eq.rhs;
            let lambda = eq.gram.solve(&violation)?;
            let projected = &current - &eq.matrix.t().dot(&lambda);
            if self.is_within_bounds(&projected) {
                return Ok(self.clamp(&projected));
            }
            current = self.clamp(&projected);
            if self.equality_residual(&current) <= tolerance {
                return Ok(current);
            }
        }
        Err(LevMarError::Generic(
            "no parameter vector satisfies both the bounds and the linear constraints".to_string(),
        ))
    }

    /// Candidate parameters for `step` taken from `params`.
    ///
    /// Without equality constraints this is `clamp(params + step)`. With
    /// them, the step is shortened to the first bound it reaches so the
    /// candidate stays on `A p = b`.
    pub fn apply_step(&self, params: &Array1<f64>, step: &Array1<f64>) -> Array1<f64> {
        if !self.bounded {
            return params + step;
        }
        if self.equality.is_none() {
            return self.clamp(&(params + step));
        }

        let noise = STEP_NOISE * linalg::norm_inf(step);
        let mut alpha = 1.0;
        let mut blocking = None;
        for (i, &d) in step.iter().enumerate() {
            if d.abs() <= noise {
                continue;
            }
            let room = if d > 0.0 {
                self.upper[i] - params[i]
            } else {
                self.lower[i] - params[i]
            };
            let t = (room / d).max(0.0);
            if t < alpha {
                alpha = t;
                blocking = Some(i);
            }
        }

        let mut candidate = params + &(step * alpha);
        if let Some(i) = blocking {
            candidate[i] = if step[i] > 0.0 {
                self.upper[i]
            } else {
                self.lower[i]
            };
        }
        self.clamp(&candidate)
    }

    /// Scales residuals by the square roots of the weights.
    pub fn weight_residuals(&self, residuals: Array1<f64>) -> Array1<f64> {
        match &self.sqrt_weights {
            Some(w) => residuals * w,
            None => residuals,
        }
    }

    /// Scales Jacobian rows by the square roots of the weights.
    pub fn weight_jacobian(&self, mut jacobian: Array2<f64>) -> Array2<f64> {
        if let Some(w) = &self.sqrt_weights {
            for (mut row, &wi) in jacobian.axis_iter_mut(Axis(0)).zip(w.iter()) {
                row *= wi;
            }
        }
        jacobian
    }

    /// Jacobian in the coordinates the iteration solves for: `J Z` with
    /// equality constraints, `J` otherwise.
    pub fn reduce_jacobian(&self, jacobian: &Array2<f64>) -> Array2<f64> {
        match &self.equality {
            Some(eq) => jacobian.dot(&eq.null_space),
            None => jacobian.clone(),
        }
    }

    /// Maps a step in reduced coordinates back to parameter space.
    pub fn expand_step(&self, step: Array1<f64>) -> Array1<f64> {
        match &self.equality {
            Some(eq) => eq.null_space.dot(&step),
            None => step,
        }
    }

    /// Null-space basis of the equality constraints, if any.
    pub fn null_space(&self) -> Option<&Array2<f64>> {
        self.equality.as_ref().map(|eq| &eq.null_space)
    }

    /// Parameters held fixed before the first solve of a step: those with
    /// `lower == upper`.
    pub fn initial_active_set(&self) -> Vec<bool> {
        (0..self.parameter_count())
            .map(|i| self.is_pinned(i))
            .collect()
    }

    /// Marks parameters that sit on a bound while `direction`, given in
    /// parameter space, points outward.
    ///
    /// Returns `true` if any entry of `active` changed.
    pub fn block_outward(
        &self,
        params: &Array1<f64>,
        direction: &Array1<f64>,
        active: &mut [bool],
    ) -> bool {
        if !self.bounded {
            return false;
        }
        let mut changed = false;
        for i in 0..active.len() {
            if active[i] {
                continue;
            }
            let at_lower = params[i] <= self.lower[i] && direction[i] < 0.0;
            let at_upper = params[i] >= self.upper[i] && direction[i] > 0.0;
            if at_lower || at_upper {
                active[i] = true;
                changed = true;
            }
        }
        changed
    }

    /// Orthonormal basis, in the reduced coordinates of the equality
    /// constraints, of the steps that leave every parameter flagged in
    /// `active` unchanged.
    ///
    /// `None` without equality constraints or when nothing is flagged. The
    /// basis has no columns when the flagged parameters leave no freedom.
    pub fn face_basis(&self, active: &[bool]) -> Option<Array2<f64>> {
        let eq = self.equality.as_ref()?;
        let rows: Vec<usize> = active
            .iter()
            .enumerate()
            .filter_map(|(i, &a)| a.then_some(i))
            .collect();
        if rows.is_empty() {
            return None;
        }
        Some(linalg::null_space(&eq.null_space.select(Axis(0), &rows)))
    }

    /// Gradient with the components blocked by a bound removed.
    ///
    /// A descent step moves along `+gradient` (the right-hand side of the
    /// normal equations), so a parameter on its lower bound with a negative
    /// component, or on its upper bound with a positive one, cannot move.
    /// With equality constraints the reduced gradient is projected onto the
    /// face left free by the blocked parameters.
    pub fn projected_gradient(&self, params: &Array1<f64>, gradient: &Array1<f64>) -> Array1<f64> {
        let mut active = self.initial_active_set();
        let eq = match &self.equality {
            Some(eq) => eq,
            None => {
                self.block_outward(params, gradient, &mut active);
                let mut g = gradient.clone();
                for (gi, &blocked) in g.iter_mut().zip(active.iter()) {
                    if blocked {
                        *gi = 0.0;
                    }
                }
                return g;
            }
        };

        loop {
            let g = match self.face_basis(&active) {
                Some(basis) => project_onto(&basis, gradient),
                None => gradient.clone(),
            };
            if !self.block_outward(params, &eq.null_space.dot(&g), &mut active) {
                return g;
            }
        }
    }
}

/// Orthogonal projection of `v` onto the columns of `basis`.
fn project_onto(basis: &Array2<f64>, v: &Array1<f64>) -> Array1<f64> {
    if basis.ncols() == 0 {
        return Array1::zeros(v.len());
    }
    basis.dot(&basis.t().dot(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_box_check() {
        let c = Constraints::none().with_bounds(array![0.0, 2.0], array![1.0, 1.0]);
        let err = ConstraintSet::new(&c, 2, 5).unwrap_err();
        assert_eq!(
            err,
            LevMarError::FailedBoxCheck {
                index: 1,
                lower: 2.0,
                upper: 1.0
            }
        );

        let c = Constraints::none().with_lower(array![0.0]);
        assert_eq!(
            ConstraintSet::new(&c, 2, 5).unwrap_err().kind(),
            ErrorKind::DimensionMismatch
        );
    }

    #[test]
    fn test_linear_checks() {
        let c = Constraints::none().with_linear(Array2::ones((3, 2)), array![1.0, 1.0, 1.0]);
        assert_eq!(
            ConstraintSet::new(&c, 2, 5).unwrap_err().kind(),
            ErrorKind::ConstraintMatrixRowsGtCols
        );

        let c = Constraints::none().with_linear(
            array![[1.0, 2.0, 3.0], [2.0, 4.0, 6.0]],
            array![1.0, 2.0],
        );
        assert_eq!(
            ConstraintSet::new(&c, 3, 5).unwrap_err(),
            LevMarError::ConstraintMatrixNotFullRowRank { rows: 2, rank: 1 }
        );
    }

    #[test]
    fn test_feasible_start() {
        // p0 + p1 = 1, then clamp p1 to [0, 0.25].
        let c = Constraints::none()
            .with_linear(array![[1.0, 1.0]], array![1.0])
            .with_bounds(array![f64::NEG_INFINITY, 0.0], array![f64::INFINITY, 0.25]);
        let set = ConstraintSet::new(&c, 2, 4).unwrap();
        assert_eq!(set.free_count(), 1);

        let p = set.feasible_start(&array![2.0, 2.0]).unwrap();
        // Projection gives (0.5, 0.5) and the clamp pulls p1 down to 0.25;
        // the next rounds restore p0 + p1 = 1 with p1 on its bound.
        assert_relative_eq!(p[0], 0.75, epsilon = 1e-9);
        assert_relative_eq!(p[1], 0.25, epsilon = 1e-12);
        assert!(set.equality_residual(&p) <= 1e-9);
    }

    #[test]
    fn test_infeasible_constraints() {
        // p0 + p1 = 3 cannot be met inside the unit box.
        let c = Constraints::none()
            .with_linear(array![[1.0, 1.0]], array![3.0])
            .with_bounds(array![0.0, 0.0], array![1.0, 1.0]);
        let set = ConstraintSet::new(&c, 2, 4).unwrap();
        let err = set.feasible_start(&array![0.5, 0.5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generic);
    }

    #[test]
    fn test_step_stops_at_first_bound() {
        // Along p0 + p1 = 2 with p1 <= 0.5, a step of (-2, 2) from (1.6, 0.4)
        // is cut to a twentieth and ends on the bound.
        let c = Constraints::none()
            .with_linear(array![[1.0, 1.0]], array![2.0])
            .with_upper(array![f64::INFINITY, 0.5]);
        let set = ConstraintSet::new(&c, 2, 4).unwrap();
        let params = array![1.6, 0.4];

        let candidate = set.apply_step(&params, &array![-2.0, 2.0]);
        assert_eq!(candidate[1], 0.5);
        assert_relative_eq!(candidate[0], 1.5, epsilon = 1e-12);
        assert!(set.equality_residual(&candidate) <= 1e-12);

        // Without equality constraints the step is clamped componentwise.
        let c = Constraints::none().with_upper(array![f64::INFINITY, 0.5]);
        let set = ConstraintSet::new(&c, 2, 4).unwrap();
        let clamped = set.apply_step(&params, &array![-2.0, 2.0]);
        assert_relative_eq!(clamped[0], -0.4, epsilon = 1e-12);
        assert_eq!(clamped[1], 0.5);
    }

    #[test]
    fn test_face_basis() {
        // p0 + p1 + p2 = 1 with p2 pinned leaves the single direction (1, -1, 0).
        let c = Constraints::none()
            .with_linear(array![[1.0, 1.0, 1.0]], array![1.0])
            .with_bounds(
                array![f64::NEG_INFINITY, f64::NEG_INFINITY, 0.2],
                array![f64::INFINITY, f64::INFINITY, 0.2],
            );
        let set = ConstraintSet::new(&c, 3, 4).unwrap();
        let active = set.initial_active_set();
        assert_eq!(active, vec![false, false, true]);

        let basis = set.face_basis(&active).unwrap();
        assert_eq!(basis.shape(), &[2, 1]);
        let direction = set.null_space().unwrap().dot(&basis.column(0));
        assert!(direction[2].abs() < 1e-12);
        assert_relative_eq!(direction[0], -direction[1], epsilon = 1e-12);

        assert!(set.face_basis(&[false, false, false]).is_none());
        assert_eq!(set.face_basis(&[true, false, true]).unwrap().ncols(), 0);
    }

    #[test]
    fn test_weights() {
        let c = Constraints::none().with_weights(array![4.0, 1.0]);
        let set = ConstraintSet::new(&c, 1, 2).unwrap();
        assert_eq!(set.weight_residuals(array![1.0, 1.0]), array![2.0, 1.0]);
        let j = set.weight_jacobian(array![[1.0], [3.0]]);
        assert_eq!(j, array![[2.0], [3.0]]);

        let c = Constraints::none().with_weights(array![-1.0, 1.0]);
        assert_eq!(
            ConstraintSet::new(&c, 1, 2).unwrap_err().kind(),
            ErrorKind::Generic
        );
    }

    #[test]
    fn test_active_set() {
        let c = Constraints::none().with_bounds(array![0.0, 1.0, -1.0], array![5.0, 1.0, 1.0]);
        let set = ConstraintSet::new(&c, 3, 3).unwrap();
        let mut active = set.initial_active_set();
        assert_eq!(active, vec![false, true, false]);

        let params = array![0.0, 1.0, 0.0];
        assert!(set.block_outward(&params, &array![-1.0, 0.0, -1.0], &mut active));
        assert_eq!(active, vec![true, true, false]);

        let g = set.projected_gradient(&params, &array![2.0, 3.0, -4.0]);
        assert_eq!(g, array![2.0, 0.0, -4.0]);
    }
}
