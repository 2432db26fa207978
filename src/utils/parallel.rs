//! Parallel finite-difference Jacobians.
//!
//! Columns of a finite-difference Jacobian are independent of each other, so
//! they are evaluated on the rayon thread pool and written into disjoint
//! columns once every worker has finished. The model must be reentrant.

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use crate::error::Result;
use crate::utils::finite_difference::{central_column, forward_column};
use crate::utils::try_zeros;

fn assemble(n_outputs: usize, columns: Vec<Array1<f64>>) -> Result<Array2<f64>> {
    let mut jac = try_zeros(n_outputs, columns.len())?;
    for (j, column) in columns.iter().enumerate() {
        jac.column_mut(j).assign(column);
    }
    Ok(jac)
}

/// Compute the Jacobian matrix using forward finite differences in parallel.
///
/// Produces the same matrix as
/// [`forward_jacobian`](crate::utils::finite_difference::forward_jacobian).
pub fn forward_jacobian_parallel<F>(
    f: &F,
    params: &Array1<f64>,
    f0: &Array1<f64>,
    delta: f64,
) -> Result<Array2<f64>>
where
    F: Fn(&Array1<f64>) -> Array1<f64> + Sync + ?Sized,
{
    let columns: Result<Vec<_>> = (0..params.len())
        .into_par_iter()
        .map(|j| forward_column(f, params, f0, j, delta))
        .collect();
    assemble(f0.len(), columns?)
}

/// Compute the Jacobian matrix using central finite differences in parallel.
pub fn central_jacobian_parallel<F>(
    f: &F,
    params: &Array1<f64>,
    n_outputs: usize,
    delta: f64,
) -> Result<Array2<f64>>
where
    F: Fn(&Array1<f64>) -> Array1<f64> + Sync + ?Sized,
{
    let columns: Result<Vec<_>> = (0..params.len())
        .into_par_iter()
        .map(|j| central_column(f, params, n_outputs, j, delta))
        .collect();
    assemble(n_outputs, columns?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::finite_difference::{central_jacobian, forward_jacobian};
    use ndarray::array;

    fn model(p: &Array1<f64>) -> Array1<f64> {
        (0..20)
            .map(|i| {
                let x = i as f64 * 0.25;
                p[0] * (p[1] * x).exp() + p[2] * x.sin()
            })
            .collect()
    }

    #[test]
    fn test_parallel_matches_serial() {
        let p = array![1.5, -0.3, 0.7];
        let f0 = model(&p);

        let serial = forward_jacobian(&model, &p, &f0, 1e-6).unwrap();
        let parallel = forward_jacobian_parallel(&model, &p, &f0, 1e-6).unwrap();
        assert_eq!(serial, parallel);

        let serial = central_jacobian(&model, &p, 20, -1e-6).unwrap();
        let parallel = central_jacobian_parallel(&model, &p, 20, -1e-6).unwrap();
        assert_eq!(serial, parallel);
    }
}
