//! Finite-difference Jacobian and Gauss-Newton normal equations.
//!
//! For each nonlinear slot `j` the model is re-evaluated at `p + h·e_j` with
//! the nuisance pairs re-solved there, giving per-point sensitivities
//!
//! ```text
//! Gr[j][i] = w_i · ((b' + m'·f'_i) − (b + m·f_i)) / h
//! ```
//!
//! The curvature is `Gr·Grᵀ` plus one outer product per constraint, and the
//! right-hand side is `Gr·(w·residual)` minus the constraint pulls.

use nalgebra::{DMatrix, DVector};

use crate::fit::objective::{Evaluation, Objective};

/// Forward-difference increment, shared by the Jacobian and constraint gradients.
pub const FD_STEP: f64 = 1.0e-3;

#[derive(Debug, Clone)]
pub struct Jacobian {
    /// `nps × nps` Gauss-Newton curvature.
    pub curvature: DMatrix<f64>,
    /// Right-hand side of the normal equations.
    pub linear_term: DVector<f64>,
    /// `∂c/∂p` of every constraint, unnormalized (`ncons × nps`).
    pub constraint_gradients: DMatrix<f64>,
    /// Central differences of the derived linear quantities (`2·nfil × nps`):
    /// row `2g` is the blending ratio of group `g`, row `2g + 1` its baseline.
    pub sensitivities: Option<DMatrix<f64>>,
}

/// Build the normal equations around `params`.
///
/// `base` must be the evaluation at `params`. Sensitivities cost one extra
/// model sweep per slot, so they are only computed when asked for.
pub fn build_jacobian(
    objective: &Objective<'_>,
    params: &[f64],
    base: &Evaluation,
    with_sensitivities: bool,
) -> Jacobian {
    let nps = params.len();
    let points = objective.store().points();
    let constraints = objective.constraints();
    let nfil = base.linear.len();

    let mut gr = DMatrix::zeros(nps, points.len());
    let mut constraint_gradients = DMatrix::zeros(constraints.len(), nps);
    let mut sensitivities = with_sensitivities.then(|| DMatrix::zeros(2 * nfil, nps));

    let mut shifted = params.to_vec();
    for j in 0..nps {
        shifted[j] = params[j] + FD_STEP;
        let f_plus = objective.model_values(&shifted);
        let lin_plus = objective.solve_linear(&f_plus);

        for (i, p) in points.iter().enumerate() {
            let after = lin_plus[p.group].offset + lin_plus[p.group].scale * f_plus[i];
            let before = base.linear[p.group].offset + base.linear[p.group].scale * base.model_values[i];
            gr[(j, i)] = p.weight * (after - before) / FD_STEP;
        }

        let c_plus = objective.constraint_values(&shifted, &lin_plus);
        for (k, v) in c_plus.iter().enumerate() {
            constraint_gradients[(k, j)] = (v - base.constraint_values[k]) / FD_STEP;
        }

        if let Some(sens) = sensitivities.as_mut() {
            shifted[j] = params[j] - FD_STEP;
            let f_minus = objective.model_values(&shifted);
            let lin_minus = objective.solve_linear(&f_minus);
            for g in 0..nfil {
                sens[(2 * g, j)] =
                    (lin_plus[g].blending_ratio() - lin_minus[g].blending_ratio()) / (2.0 * FD_STEP);
                sens[(2 * g + 1, j)] =
                    (lin_plus[g].baseline() - lin_minus[g].baseline()) / (2.0 * FD_STEP);
            }
        }

        shifted[j] = params[j];
    }

    let weighted_residuals = DVector::from_iterator(
        points.len(),
        points.iter().zip(&base.model_values).map(|(p, f)| {
            let lc = base.linear[p.group];
            p.weight * (p.y - lc.offset - lc.scale * f)
        }),
    );

    let mut curvature = &gr * gr.transpose();
    let mut linear_term = &gr * weighted_residuals;

    for (k, c) in constraints.iter().enumerate() {
        let current = base.constraint_values[k];
        let scale = c.side_scale(current);
        let normalized = constraint_gradients.row(k).transpose() / scale;
        curvature += &normalized * normalized.transpose();
        linear_term -= normalized * c.normalized_residual(current);
    }

    Jacobian {
        curvature,
        linear_term,
        constraint_gradients,
        sensitivities,
    }
}
