//! Dense linear algebra kernel.
//!
//! Small, allocation-per-call routines over `ndarray` storage: products,
//! norms, an LU decomposition with partial pivoting, a Cholesky solver for
//! the symmetric positive definite normal equations, and the orthogonal
//! basis helpers used by the linear equality constraint machinery.
//!
//! None of these functions mutate their inputs. Solvers refuse to return
//! non-finite results: a pivot below the numerical tolerance is reported as
//! [`LinalgError::Singular`].

use ndarray::{Array1, Array2, Axis};
use thiserror::Error;

/// Relative tolerance used when deciding whether a constraint row is
/// linearly dependent on the previous ones.
pub const RANK_TOLERANCE: f64 = 1e-10;

/// Minimum residual norm for a unit vector to extend an orthonormal basis.
const BASIS_EXTENSION_TOLERANCE: f64 = 1e-6;

/// Failures of the dense kernel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    /// A pivot fell below the numerical tolerance.
    #[error("Singular matrix: pivot {pivot:.3e} at column {index}")]
    Singular { index: usize, pivot: f64 },

    /// The matrix is not positive definite (Cholesky only).
    #[error("Matrix is not positive definite (column {index})")]
    NotPositiveDefinite { index: usize },

    /// Operand shapes do not agree.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
}

/// Result type for kernel operations.
pub type LinalgResult<T> = std::result::Result<T, LinalgError>;

/// Matrix product `A * B`.
pub fn multiply(a: &Array2<f64>, b: &Array2<f64>) -> LinalgResult<Array2<f64>> {
    if a.ncols() != b.nrows() {
        return Err(LinalgError::DimensionMismatch(format!(
            "cannot multiply {}x{} by {}x{}",
            a.nrows(),
            a.ncols(),
            b.nrows(),
            b.ncols()
        )));
    }
    Ok(a.dot(b))
}

/// Matrix-vector product `A * v`.
pub fn mat_vec(a: &Array2<f64>, v: &Array1<f64>) -> LinalgResult<Array1<f64>> {
    if a.ncols() != v.len() {
        return Err(LinalgError::DimensionMismatch(format!(
            "cannot multiply {}x{} by vector of length {}",
            a.nrows(),
            a.ncols(),
            v.len()
        )));
    }
    Ok(a.dot(v))
}

/// Owned transpose of `A`.
pub fn transpose(a: &Array2<f64>) -> Array2<f64> {
    a.t().to_owned()
}

/// Euclidean norm.
pub fn norm2(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

/// Infinity norm (largest absolute entry). Zero for an empty vector.
pub fn norm_inf(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

/// `A^T A` for a tall matrix.
pub fn gram(a: &Array2<f64>) -> Array2<f64> {
    a.t().dot(a)
}

/// Largest entry on the diagonal of a square matrix.
pub fn max_diagonal(a: &Array2<f64>) -> f64 {
    a.diag().iter().fold(f64::NEG_INFINITY, |acc, &d| acc.max(d))
}

fn check_square(a: &Array2<f64>, rhs_len: Option<usize>) -> LinalgResult<usize> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(LinalgError::DimensionMismatch(format!(
            "expected a square matrix, got {}x{}",
            n,
            a.ncols()
        )));
    }
    if let Some(len) = rhs_len {
        if len != n {
            return Err(LinalgError::DimensionMismatch(format!(
                "right-hand side has length {}, expected {}",
                len, n
            )));
        }
    }
    Ok(n)
}

/// LU decomposition with partial (row) pivoting, `P A = L U`.
#[derive(Debug, Clone)]
pub struct LuDecomposition {
    /// Packed factors: strictly lower part holds L (unit diagonal), the rest U.
    lu: Array2<f64>,
    /// Row permutation: row `i` of `P A` is row `perm[i]` of `A`.
    perm: Vec<usize>,
}

impl LuDecomposition {
    /// Factorizes a square matrix.
    ///
    /// Fails with [`LinalgError::Singular`] when the largest available pivot
    /// in some column is not above `n * EPSILON * max|A|`.
    pub fn new(a: &Array2<f64>) -> LinalgResult<Self> {
        let n = check_square(a, None)?;
        let mut lu = a.to_owned();
        let mut perm: Vec<usize> = (0..n).collect();

        let scale = a.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
        if n > 0 && !(scale > 0.0 && scale.is_finite()) {
            return Err(LinalgError::Singular {
                index: 0,
                pivot: scale,
            });
        }
        let tol = scale * (n as f64) * f64::EPSILON;

        for k in 0..n {
            let mut pivot_row = k;
            let mut pivot_abs = lu[[k, k]].abs();
            for i in (k + 1)..n {
                let v = lu[[i, k]].abs();
                if v > pivot_abs {
                    pivot_row = i;
                    pivot_abs = v;
                }
            }
            // Negated comparison also rejects NaN pivots.
            if !(pivot_abs > tol) {
                return Err(LinalgError::Singular {
                    index: k,
                    pivot: pivot_abs,
                });
            }
            if pivot_row != k {
                for j in 0..n {
                    lu.swap([k, j], [pivot_row, j]);
                }
                perm.swap(k, pivot_row);
            }

            let pivot = lu[[k, k]];
            for i in (k + 1)..n {
                let factor = lu[[i, k]] / pivot;
                lu[[i, k]] = factor;
                if factor != 0.0 {
                    for j in (k + 1)..n {
                        lu[[i, j]] -= factor * lu[[k, j]];
                    }
                }
            }
        }

        Ok(Self { lu, perm })
    }

    /// Order of the factorized matrix.
    pub fn dim(&self) -> usize {
        self.perm.len()
    }

    /// Solves `A x = b`.
    pub fn solve(&self, b: &Array1<f64>) -> LinalgResult<Array1<f64>> {
        let n = self.dim();
        if b.len() != n {
            return Err(LinalgError::DimensionMismatch(format!(
                "right-hand side has length {}, expected {}",
                b.len(),
                n
            )));
        }

        let mut x: Array1<f64> = self.perm.iter().map(|&p| b[p]).collect();

        // Forward substitution (L * y = P b)
        for i in 0..n {
            let mut sum = x[i];
            for j in 0..i {
                sum -= self.lu[[i, j]] * x[j];
            }
            x[i] = sum;
        }

        // Backward substitution (U * x = y)
        for i in (0..n).rev() {
            let mut sum = x[i];
            for j in (i + 1)..n {
                sum -= self.lu[[i, j]] * x[j];
            }
            x[i] = sum / self.lu[[i, i]];
        }

        if x.iter().all(|v| v.is_finite()) {
            Ok(x)
        } else {
            Err(LinalgError::Singular {
                index: n.saturating_sub(1),
                pivot: 0.0,
            })
        }
    }

    /// Inverse of the factorized matrix, one column at a time.
    pub fn inverse(&self) -> LinalgResult<Array2<f64>> {
        let n = self.dim();
        let mut inv = Array2::zeros((n, n));
        let mut e = Array1::zeros(n);
        for j in 0..n {
            e[j] = 1.0;
            let col = self.solve(&e)?;
            inv.column_mut(j).assign(&col);
            e[j] = 0.0;
        }
        Ok(inv)
    }
}

/// Solves the square system `A x = b` by LU decomposition with partial pivoting.
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> LinalgResult<Array1<f64>> {
    check_square(a, Some(b.len()))?;
    LuDecomposition::new(a)?.solve(b)
}

/// Inverts a square matrix.
pub fn invert(a: &Array2<f64>) -> LinalgResult<Array2<f64>> {
    LuDecomposition::new(a)?.inverse()
}

/// Solves a symmetric positive definite system with a Cholesky factorization.
///
/// Only the lower triangle of `a` is read.
pub fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> LinalgResult<Array1<f64>> {
    let n = check_square(a, Some(b.len()))?;
    let mut l = a.to_owned();

    for k in 0..n {
        for j in 0..k {
            l[[k, k]] -= l[[k, j]] * l[[k, j]];
        }
        if !(l[[k, k]] > 0.0) {
            return Err(LinalgError::NotPositiveDefinite { index: k });
        }
        let lkk = l[[k, k]].sqrt();
        l[[k, k]] = lkk;

        for i in (k + 1)..n {
            for j in 0..k {
                l[[i, k]] -= l[[i, j]] * l[[k, j]];
            }
            l[[i, k]] /= lkk;
        }
    }

    // Forward substitution (L * y = b)
    let mut y = b.to_owned();
    for i in 0..n {
        for j in 0..i {
            y[i] -= l[[i, j]] * y[j];
        }
        y[i] /= l[[i, i]];
    }

    // Backward substitution (L^T * x = y)
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = y[i];
        for j in (i + 1)..n {
            x[i] -= l[[j, i]] * x[j];
        }
        x[i] /= l[[i, i]];
    }

    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(LinalgError::NotPositiveDefinite { index: n.saturating_sub(1) })
    }
}

/// Orthonormal basis of the row space of `a` by modified Gram-Schmidt.
///
/// Returns the basis vectors (length `a.ncols()`) together with the
/// numerical rank. A row whose remainder after orthogonalization is below
/// `RANK_TOLERANCE` times its original norm counts as dependent.
pub fn orthonormal_rows(a: &Array2<f64>) -> (Vec<Array1<f64>>, usize) {
    let mut basis: Vec<Array1<f64>> = Vec::with_capacity(a.nrows());

    for row in a.axis_iter(Axis(0)) {
        let original = norm2(&row.to_owned());
        if original == 0.0 || !original.is_finite() {
            continue;
        }
        let mut v = row.to_owned();
        // Two passes of MGS keep the basis orthogonal to working precision.
        for _ in 0..2 {
            for q in &basis {
                let proj = q.dot(&v);
                v.scaled_add(-proj, q);
            }
        }
        let remainder = norm2(&v);
        if remainder > RANK_TOLERANCE * original {
            v /= remainder;
            basis.push(v);
        }
    }

    let rank = basis.len();
    (basis, rank)
}

/// Numerical row rank of `a`.
pub fn row_rank(a: &Array2<f64>) -> usize {
    orthonormal_rows(a).1
}

/// Orthonormal basis of the null space of `a`, as the columns of an
/// `a.ncols() x (a.ncols() - rank)` matrix.
pub fn null_space(a: &Array2<f64>) -> Array2<f64> {
    let m = a.ncols();
    let (mut basis, rank) = orthonormal_rows(a);
    let mut columns: Vec<Array1<f64>> = Vec::with_capacity(m - rank);

    for i in 0..m {
        if basis.len() == m {
            break;
        }
        let mut v = Array1::zeros(m);
        v[i] = 1.0;
        for _ in 0..2 {
            for q in &basis {
                let proj = q.dot(&v);
                v.scaled_add(-proj, q);
            }
        }
        let remainder = norm2(&v);
        if remainder > BASIS_EXTENSION_TOLERANCE {
            v /= remainder;
            columns.push(v.clone());
            basis.push(v);
        }
    }

    let mut z = Array2::zeros((m, columns.len()));
    for (j, col) in columns.iter().enumerate() {
        z.column_mut(j).assign(col);
    }
    z
}
