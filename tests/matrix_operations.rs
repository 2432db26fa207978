//! Tests for the dense linear algebra kernel.

use approx::assert_relative_eq;
use levmar_rs::utils::linalg::{self, LinalgError, LuDecomposition};
use ndarray::{array, Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_matrix(rng: &mut ChaCha8Rng, n: usize) -> Array2<f64> {
    // Diagonally dominant, hence well conditioned
    let mut a = Array2::from_shape_fn((n, n), |_| rng.gen_range(-1.0..1.0));
    for i in 0..n {
        a[[i, i]] += n as f64;
    }
    a
}

#[test]
fn test_solve_then_multiply_reproduces_rhs() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for n in [1, 2, 3, 5, 8, 13] {
        let a = random_matrix(&mut rng, n);
        let b: Array1<f64> = (0..n).map(|_| rng.gen_range(-10.0..10.0)).collect();

        let x = linalg::solve(&a, &b).unwrap();
        let back = linalg::mat_vec(&a, &x).unwrap();
        for i in 0..n {
            assert_relative_eq!(back[i], b[i], epsilon = 1e-10);
        }
    }
}

#[test]
fn test_cholesky_agrees_with_lu() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let j = Array2::from_shape_fn((10, 4), |_| rng.gen_range(-1.0..1.0));
    let jtj = linalg::gram(&j);
    let b = array![1.0, -2.0, 0.5, 3.0];

    let x_lu = linalg::solve(&jtj, &b).unwrap();
    let x_chol = linalg::cholesky_solve(&jtj, &b).unwrap();
    for i in 0..4 {
        assert_relative_eq!(x_lu[i], x_chol[i], epsilon = 1e-9);
    }
}

#[test]
fn test_singular_matrix_is_reported() {
    let a = array![[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 1.0, 1.0]];
    let err = linalg::solve(&a, &array![1.0, 2.0, 3.0]).unwrap_err();
    assert!(matches!(err, LinalgError::Singular { .. }));

    // Nearly singular within rounding
    let eps = 1e-17;
    let a = array![[1.0, 1.0], [1.0, 1.0 + eps]];
    assert!(LuDecomposition::new(&a).is_err());
}

#[test]
fn test_inverse() {
    let a = array![[4.0, 1.0], [2.0, 3.0]];
    let inv = linalg::invert(&a).unwrap();
    let eye = linalg::multiply(&a, &inv).unwrap();
    assert_relative_eq!(eye[[0, 0]], 1.0, epsilon = 1e-12);
    assert_relative_eq!(eye[[0, 1]], 0.0, epsilon = 1e-12);
    assert_relative_eq!(eye[[1, 0]], 0.0, epsilon = 1e-12);
    assert_relative_eq!(eye[[1, 1]], 1.0, epsilon = 1e-12);
}

#[test]
fn test_products_and_norms() {
    let a = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
    assert_eq!(linalg::transpose(&a), array![[1.0, 3.0, 5.0], [2.0, 4.0, 6.0]]);
    assert!(linalg::multiply(&a, &a).is_err());
    assert_eq!(
        linalg::multiply(&linalg::transpose(&a), &a).unwrap(),
        linalg::gram(&a)
    );

    let v = array![3.0, -4.0];
    assert_relative_eq!(linalg::norm2(&v), 5.0);
    assert_relative_eq!(linalg::norm_inf(&v), 4.0);
}

#[test]
fn test_null_space_is_orthonormal_complement() {
    let a = array![[1.0, 2.0, 0.0, -1.0], [0.0, 1.0, 1.0, 1.0]];
    let z = linalg::null_space(&a);
    assert_eq!(z.dim(), (4, 2));

    let az = a.dot(&z);
    assert!(az.iter().all(|v| v.abs() < 1e-12));
    let ztz = z.t().dot(&z);
    for i in 0..2 {
        for j in 0..2 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_relative_eq!(ztz[[i, j]], expected, epsilon = 1e-12);
        }
    }
    assert_eq!(linalg::row_rank(&a), 2);
}
