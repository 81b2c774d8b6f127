//! Gaussian elimination for the small dense systems of the LM loop.
//!
//! Matrices here are `nps × nps` with `nps` rarely above a dozen, so the
//! solver is the textbook one:
//!
//! - forward elimination below the diagonal, pivoting on the diagonal entry
//!   as-is (no row exchanges)
//! - back-substitution
//!
//! Apart from slots with no information at all (see `solve`), a zero pivot
//! is not trapped: it produces non-finite entries which the callers treat as
//! "no step" (LM) or as an unbounded error (covariance).

use nalgebra::{DMatrix, DVector};

/// `A = C + λ·diag(C)`.
pub fn damped_matrix(curvature: &DMatrix<f64>, lambda: f64) -> DMatrix<f64> {
    let mut a = curvature.clone();
    for i in 0..a.nrows().min(a.ncols()) {
        a[(i, i)] += lambda * curvature[(i, i)];
    }
    a
}

/// Solve `A·x = b` by forward elimination then back-substitution.
///
/// A slot whose row of `A` and entry of `b` are all zero carries no
/// information (the model does not depend on it here); it gets `x = 0`
/// instead of poisoning the other slots with `0/0`.
pub fn solve(mut a: DMatrix<f64>, mut b: DVector<f64>) -> DVector<f64> {
    let n = b.len();
    for i in 0..n {
        if b[i] == 0.0 && a.row(i).iter().all(|v| *v == 0.0) {
            a[(i, i)] = 1.0;
        }
    }
    triangularize(&mut a, std::slice::from_mut(&mut b));
    back_substitute(&a, &b, n)
}

/// Full inverse with the same elimination, one right-hand side per column of
/// the identity.
pub fn invert(a: &DMatrix<f64>) -> DMatrix<f64> {
    let n = a.nrows();
    let mut upper = a.clone();
    let mut columns: Vec<DVector<f64>> = (0..n)
        .map(|k| {
            let mut e = DVector::zeros(n);
            e[k] = 1.0;
            e
        })
        .collect();

    triangularize(&mut upper, &mut columns);

    let mut inverse = DMatrix::zeros(n, n);
    for (k, rhs) in columns.iter().enumerate() {
        let x = back_substitute(&upper, rhs, n);
        inverse.set_column(k, &x);
    }
    inverse
}

fn triangularize(a: &mut DMatrix<f64>, rhs: &mut [DVector<f64>]) {
    let n = a.nrows();
    for i in 0..n.saturating_sub(1) {
        for j in (i + 1)..n {
            let fac = -a[(j, i)] / a[(i, i)];
            for m in (i + 1)..n {
                let delta = a[(i, m)] * fac;
                a[(j, m)] += delta;
            }
            for b in rhs.iter_mut() {
                let delta = b[i] * fac;
                b[j] += delta;
            }
        }
    }
}

fn back_substitute(upper: &DMatrix<f64>, b: &DVector<f64>, n: usize) -> DVector<f64> {
    let mut x = DVector::zeros(n);
    for i in (0..n).rev() {
        let mut acc = b[i];
        for j in (i + 1)..n {
            acc -= x[j] * upper[(i, j)];
        }
        x[i] = acc / upper[(i, i)];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_small_spd_system() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0]);
        let x_true = DVector::from_row_slice(&[1.0, -2.0, 0.5]);
        let b = &a * &x_true;

        let x = solve(a, b);
        for i in 0..3 {
            assert!((x[i] - x_true[i]).abs() < 1e-12, "x[{i}]={}", x[i]);
        }
    }

    #[test]
    fn uninformative_slot_stays_put() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 0.0, 0.0, 0.0, 0.0]);
        let b = DVector::from_row_slice(&[5.0, 4.0, 0.0]);
        let x = solve(a, b);
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
        assert_eq!(x[2], 0.0);
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        let a = DMatrix::from_row_slice(3, 3, &[5.0, 2.0, 1.0, 2.0, 6.0, 0.5, 1.0, 0.5, 3.0]);
        let inv = invert(&a);
        let id = &a * &inv;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((id[(i, j)] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn damping_scales_only_the_diagonal() {
        let c = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 4.0]);
        let a = damped_matrix(&c, 3.0);
        assert_eq!(a[(0, 0)], 8.0);
        assert_eq!(a[(1, 1)], 16.0);
        assert_eq!(a[(0, 1)], 1.0);
        assert_eq!(a[(1, 0)], 1.0);
    }

    #[test]
    fn zero_pivot_yields_non_finite_solution() {
        let a = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, 1.0]);
        let b = DVector::from_row_slice(&[1.0, 1.0]);
        let x = solve(a, b);
        assert!(!x[0].is_finite());
    }

    #[test]
    fn one_by_one_system() {
        let a = DMatrix::from_row_slice(1, 1, &[4.0]);
        let x = solve(a, DVector::from_row_slice(&[2.0]));
        assert_eq!(x[0], 0.5);
    }
}
