//! Model trait and function adapters.
//!
//! A [`Model`] maps a parameter vector to `n` predicted values, one per
//! observation. The fit minimizes the squared distance between those
//! predictions and the observed values.
//!
//! Two adapters cover the usual ways of writing a model down:
//!
//! - [`VectorModel`] wraps a function producing all predictions at once,
//!   optionally with a function producing the whole `n x m` Jacobian.
//! - [`SampleModel`] wraps a per-sample function `f(p, x_i)` evaluated over a
//!   list of independent-variable values, optionally with a per-sample
//!   gradient row `df(p, x_i)/dp`.
//!
//! Both produce identical numerical results for equivalent functions.

use ndarray::{Array1, Array2};

use crate::error::{LevMarError, Result};

/// A model function that can be fit to observations.
///
/// Implementations must be deterministic and free of side effects, and must
/// always return the same number of predictions.
pub trait Model {
    /// Evaluates the model's predictions at the given parameters.
    fn eval(&self, params: &Array1<f64>) -> Array1<f64>;

    /// Evaluates the analytic Jacobian, `J[i, j] = d prediction_i / d param_j`.
    ///
    /// Only called when [`has_custom_jacobian`](Model::has_custom_jacobian)
    /// returns `true`; otherwise the Jacobian is approximated by finite
    /// differences of [`eval`](Model::eval).
    fn jacobian(&self, _params: &Array1<f64>) -> Result<Array2<f64>> {
        Err(LevMarError::Generic(
            "model does not provide an analytic Jacobian".to_string(),
        ))
    }

    /// Returns whether this model has an analytic Jacobian.
    fn has_custom_jacobian(&self) -> bool {
        false
    }
}

/// Whole-vector Jacobian function type used when none is supplied.
pub type VectorJacobian = fn(&Array1<f64>) -> Array2<f64>;

/// Adapter for a function producing every prediction at once.
///
/// ```
/// use levmar_rs::model::{Model, VectorModel};
/// use ndarray::{array, Array1};
///
/// let xs = array![0.0, 1.0, 2.0];
/// let model = VectorModel::new(move |p: &Array1<f64>| xs.mapv(|x| p[0] * x + p[1]));
/// assert_eq!(model.eval(&array![2.0, 1.0]), array![1.0, 3.0, 5.0]);
/// ```
pub struct VectorModel<F, J = VectorJacobian> {
    func: F,
    jacobian: Option<J>,
}

impl<F> VectorModel<F>
where
    F: Fn(&Array1<f64>) -> Array1<f64>,
{
    /// Creates a model without an analytic Jacobian.
    pub fn new(func: F) -> Self {
        Self {
            func,
            jacobian: None,
        }
    }
}

impl<F, J> VectorModel<F, J> {
    /// Attaches an analytic Jacobian producing an `n x m` matrix.
    pub fn with_jacobian<J2>(self, jacobian: J2) -> VectorModel<F, J2>
    where
        J2: Fn(&Array1<f64>) -> Array2<f64>,
    {
        VectorModel {
            func: self.func,
            jacobian: Some(jacobian),
        }
    }
}

impl<F, J> Model for VectorModel<F, J>
where
    F: Fn(&Array1<f64>) -> Array1<f64>,
    J: Fn(&Array1<f64>) -> Array2<f64>,
{
    fn eval(&self, params: &Array1<f64>) -> Array1<f64> {
        (self.func)(params)
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        match &self.jacobian {
            Some(jac) => Ok(jac(params)),
            None => Err(LevMarError::Generic(
                "model does not provide an analytic Jacobian".to_string(),
            )),
        }
    }

    fn has_custom_jacobian(&self) -> bool {
        self.jacobian.is_some()
    }
}

/// Per-sample gradient function type used when none is supplied.
pub type SampleJacobian<X> = fn(&Array1<f64>, &X) -> Array1<f64>;

/// Adapter for a function evaluated once per independent-variable value.
pub struct SampleModel<X, F, J = SampleJacobian<X>> {
    xs: Vec<X>,
    func: F,
    jacobian: Option<J>,
}

impl<X, F> SampleModel<X, F>
where
    F: Fn(&Array1<f64>, &X) -> f64,
{
    /// Creates a model evaluating `func(params, x)` for every `x` in `xs`.
    pub fn new(xs: Vec<X>, func: F) -> Self {
        Self {
            xs,
            func,
            jacobian: None,
        }
    }
}

impl<X, F, J> SampleModel<X, F, J> {
    /// Attaches the per-sample gradient `d func(params, x) / d params`.
    pub fn with_jacobian<J2>(self, jacobian: J2) -> SampleModel<X, F, J2>
    where
        J2: Fn(&Array1<f64>, &X) -> Array1<f64>,
    {
        SampleModel {
            xs: self.xs,
            func: self.func,
            jacobian: Some(jacobian),
        }
    }

    /// Independent-variable values, one per observation.
    pub fn samples(&self) -> &[X] {
        &self.xs
    }
}

impl<X, F, J> Model for SampleModel<X, F, J>
where
    F: Fn(&Array1<f64>, &X) -> f64,
    J: Fn(&Array1<f64>, &X) -> Array1<f64>,
{
    fn eval(&self, params: &Array1<f64>) -> Array1<f64> {
        self.xs.iter().map(|x| (self.func)(params, x)).collect()
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        let jac_fn = self.jacobian.as_ref().ok_or_else(|| {
            LevMarError::Generic("model does not provide an analytic Jacobian".to_string())
        })?;

        let m = params.len();
        let mut jac = crate::utils::try_zeros(self.xs.len(), m)?;
        for (i, x) in self.xs.iter().enumerate() {
            let row = jac_fn(params, x);
            if row.len() != m {
                return Err(LevMarError::length_mismatch("Jacobian row", m, row.len()));
            }
            jac.row_mut(i).assign(&row);
        }
        Ok(jac)
    }

    fn has_custom_jacobian(&self) -> bool {
        self.jacobian.is_some()
    }
}

/// Splits `(x, y)` observation pairs into independent values and measurements.
pub fn split_observations<X: Clone>(pairs: &[(X, f64)]) -> (Vec<X>, Array1<f64>) {
    let xs = pairs.iter().map(|(x, _)| x.clone()).collect();
    let ys = pairs.iter().map(|(_, y)| *y).collect();
    (xs, ys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn line(p: &Array1<f64>, x: &f64) -> f64 {
        p[0] * x + p[1]
    }

    fn line_grad(_p: &Array1<f64>, x: &f64) -> Array1<f64> {
        array![*x, 1.0]
    }

    #[test]
    fn test_sample_and_vector_models_agree() {
        let xs = vec![1.0, 2.0, 3.0, 4.0];
        let xs_arr = Array1::from_vec(xs.clone());
        let xs_jac = xs_arr.clone();

        let sample = SampleModel::new(xs, line).with_jacobian(line_grad);
        let vector = VectorModel::new(move |p: &Array1<f64>| xs_arr.mapv(|x| p[0] * x + p[1]))
            .with_jacobian(move |_p: &Array1<f64>| {
                let mut jac = Array2::zeros((xs_jac.len(), 2));
                for (i, x) in xs_jac.iter().enumerate() {
                    jac[[i, 0]] = *x;
                    jac[[i, 1]] = 1.0;
                }
                jac
            });

        let p = array![2.0, -1.0];
        assert_eq!(sample.eval(&p), vector.eval(&p));
        assert_eq!(sample.jacobian(&p).unwrap(), vector.jacobian(&p).unwrap());
        assert!(sample.has_custom_jacobian());
        assert!(vector.has_custom_jacobian());
    }

    #[test]
    fn test_model_without_jacobian() {
        let model = SampleModel::new(vec![0.5, 1.5], line);
        assert!(!model.has_custom_jacobian());
        assert!(model.jacobian(&array![1.0, 0.0]).is_err());
        let pred = model.eval(&array![2.0, 1.0]);
        assert_relative_eq!(pred[0], 2.0);
        assert_relative_eq!(pred[1], 4.0);
    }

    #[test]
    fn test_jacobian_row_length_checked() {
        let model = SampleModel::new(vec![1.0], line)
            .with_jacobian(|_p: &Array1<f64>, _x: &f64| array![1.0]);
        let err = model.jacobian(&array![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, LevMarError::DimensionMismatch(_)));
    }

    #[test]
    fn test_split_observations() {
        let (xs, ys) = split_observations(&[(0.0, 1.0), (1.0, 3.0)]);
        assert_eq!(xs, vec![0.0, 1.0]);
        assert_eq!(ys, array![1.0, 3.0]);
    }
}
