//! Covariance of a finished descent and error propagation.

use nalgebra::{DMatrix, DVector};

use crate::domain::Uncertainty;
use crate::fit::gradient::Jacobian;
use crate::math::invert;

#[derive(Debug, Clone)]
pub struct Covariance {
    /// Inverse of the curvature (`nps × nps`).
    pub matrix: DMatrix<f64>,
    /// `√|diag|` per nonlinear slot (fit space).
    pub nonlinear_errors: Vec<Uncertainty>,
    /// Blending ratio and baseline errors, two per group (same layout as
    /// the sensitivity rows).
    pub linear_errors: Vec<Uncertainty>,
    pub constraint_errors: Vec<Uncertainty>,
}

impl Covariance {
    /// Invert the curvature and propagate errors.
    ///
    /// A slot with an all-zero curvature row is not constrained at all; it is
    /// pinned for the inversion, gets an infinite variance, and makes every
    /// quantity that depends on it unbounded.
    pub fn from_jacobian(jacobian: &Jacobian) -> Self {
        let curvature = &jacobian.curvature;
        let n = curvature.nrows();
        let free: Vec<bool> = (0..n)
            .map(|i| curvature.row(i).iter().any(|v| *v != 0.0))
            .collect();

        let mut pinned = curvature.clone();
        for i in (0..n).filter(|i| !free[*i]) {
            pinned[(i, i)] = 1.0;
        }
        let mut reduced = invert(&pinned);
        for i in (0..n).filter(|i| !free[*i]) {
            reduced[(i, i)] = 0.0;
        }

        let nonlinear_errors = reduced
            .diagonal()
            .iter()
            .zip(&free)
            .map(|(v, is_free)| {
                if *is_free {
                    Uncertainty::from_diagonal(*v)
                } else {
                    Uncertainty::Unbounded
                }
            })
            .collect();

        let linear_errors = match &jacobian.sensitivities {
            Some(sens) => propagate_rows(&reduced, &free, sens),
            None => Vec::new(),
        };
        let constraint_errors = propagate_rows(&reduced, &free, &jacobian.constraint_gradients);

        let mut matrix = reduced;
        for i in (0..n).filter(|i| !free[*i]) {
            matrix[(i, i)] = f64::INFINITY;
        }

        Self {
            matrix,
            nonlinear_errors,
            linear_errors,
            constraint_errors,
        }
    }
}

/// `gᵀ·Cov·g` for every row `g`.
fn propagate_rows(cov: &DMatrix<f64>, free: &[bool], rows: &DMatrix<f64>) -> Vec<Uncertainty> {
    rows.row_iter()
        .map(|row| {
            let g: DVector<f64> = row.transpose();
            let touches_pinned = g.iter().zip(free).any(|(v, is_free)| *v != 0.0 && !is_free);
            if touches_pinned {
                Uncertainty::Unbounded
            } else {
                Uncertainty::from_variance(g.dot(&(cov * &g)))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jacobian(curvature: DMatrix<f64>, sens: Option<DMatrix<f64>>, cons: DMatrix<f64>) -> Jacobian {
        let n = curvature.nrows();
        Jacobian {
            curvature,
            linear_term: DVector::zeros(n),
            constraint_gradients: cons,
            sensitivities: sens,
        }
    }

    #[test]
    fn diagonal_curvature_gives_reciprocal_variances() {
        let c = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 25.0]);
        let cov = Covariance::from_jacobian(&jacobian(c, None, DMatrix::zeros(0, 2)));
        assert_eq!(cov.nonlinear_errors[0], Uncertainty::Bounded(0.5));
        assert_eq!(cov.nonlinear_errors[1], Uncertainty::Bounded(0.2));
        assert!(cov.linear_errors.is_empty());
        assert!(cov.constraint_errors.is_empty());
    }

    #[test]
    fn propagation_through_sensitivities() {
        let c = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 1.0]);
        let sens = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 1.0]);
        let cons = DMatrix::from_row_slice(1, 2, &[0.0, 2.0]);
        let cov = Covariance::from_jacobian(&jacobian(c, Some(sens), cons));
        assert_eq!(cov.linear_errors[0], Uncertainty::Bounded(0.5));
        let e = cov.linear_errors[1].value().unwrap();
        assert!((e - 1.25_f64.sqrt()).abs() < 1e-12);
        assert_eq!(cov.constraint_errors[0], Uncertainty::Bounded(2.0));
    }

    #[test]
    fn unconstrained_slot_does_not_poison_the_rest() {
        let c = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 0.0]);
        let sens = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 1.0]);
        let cov = Covariance::from_jacobian(&jacobian(c, Some(sens), DMatrix::zeros(0, 2)));
        assert_eq!(cov.nonlinear_errors[0], Uncertainty::Bounded(0.5));
        assert_eq!(cov.nonlinear_errors[1], Uncertainty::Unbounded);
        assert_eq!(cov.linear_errors[0], Uncertainty::Bounded(0.5));
        assert_eq!(cov.linear_errors[1], Uncertainty::Unbounded);
        assert_eq!(cov.matrix[(1, 1)], f64::INFINITY);
        assert_eq!(cov.matrix[(0, 1)], 0.0);
    }

    #[test]
    fn zero_gradient_is_unbounded() {
        let c = DMatrix::from_row_slice(1, 1, &[2.0]);
        let sens = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let cov = Covariance::from_jacobian(&jacobian(c, Some(sens), DMatrix::zeros(0, 1)));
        assert_eq!(cov.linear_errors[0], Uncertainty::Unbounded);
        assert!(cov.linear_errors[1].value().is_some());
    }
}
