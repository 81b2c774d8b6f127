//! Closed-form weighted least squares for the per-group linear pair.
//!
//! For one group with model values `f_i`, data `y_i` and weights `w_i` we
//! solve
//!
//! ```text
//! minimize Σ w_i² (y_i − b − m·f_i)²
//! ```
//!
//! for offset `b` and scale `m`. Only five running sums are needed, so the
//! linear pair never enters the nonlinear search.

use crate::domain::LinearCoefficients;

/// Guard added to the 2×2 determinant (near-constant model in a group).
pub const DETERMINANT_EPSILON: f64 = 1.0e-100;

/// Sums that depend only on the data (`Σw²`, `Σw²y`).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DataSums {
    pub w2: f64,
    pub w2y: f64,
}

impl DataSums {
    pub fn add(&mut self, y: f64, w: f64) {
        let w2 = w * w;
        self.w2 += w2;
        self.w2y += w2 * y;
    }

    /// Weighted mean of the data.
    pub fn mean(&self) -> f64 {
        self.w2y / self.w2
    }
}

/// Sums that depend on the model values (`Σw²f`, `Σw²f²`, `Σw²fy`).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModelSums {
    pub w2f: f64,
    pub w2f2: f64,
    pub w2fy: f64,
}

impl ModelSums {
    pub fn add(&mut self, f: f64, y: f64, w: f64) {
        let w2 = w * w;
        self.w2f += w2 * f;
        self.w2f2 += w2 * f * f;
        self.w2fy += w2 * f * y;
    }
}

/// Solve for `(offset, scale)`; a negative scale is clamped to zero while the
/// offset keeps its unconstrained value.
pub fn solve_linear_pair(data: &DataSums, model: &ModelSums) -> LinearCoefficients {
    let denom = model.w2f * model.w2f - model.w2f2 * data.w2 + DETERMINANT_EPSILON;
    let offset = (model.w2f * model.w2fy - model.w2f2 * data.w2y) / denom;
    let scale = (model.w2f * data.w2y - data.w2 * model.w2fy) / denom;

    LinearCoefficients {
        offset,
        scale: if scale < 0.0 { 0.0 } else { scale },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sums(f: &[f64], y: &[f64], w: &[f64]) -> (DataSums, ModelSums) {
        let mut data = DataSums::default();
        let mut model = ModelSums::default();
        for i in 0..f.len() {
            data.add(y[i], w[i]);
            model.add(f[i], y[i], w[i]);
        }
        (data, model)
    }

    #[test]
    fn recovers_exact_offset_and_scale() {
        let f = [1.0, 1.3, 2.5, 4.0, 1.1, 7.2];
        let w = [1.0, 2.0, 0.5, 1.5, 3.0, 1.0];
        let (b, m) = (120.0, 35.5);
        let y: Vec<f64> = f.iter().map(|fi| b + m * fi).collect();

        let (data, model) = sums(&f, &y, &w);
        let lc = solve_linear_pair(&data, &model);
        assert!((lc.offset - b).abs() < 1e-9, "offset {}", lc.offset);
        assert!((lc.scale - m).abs() < 1e-9, "scale {}", lc.scale);
    }

    #[test]
    fn negative_scale_is_clamped_and_offset_kept() {
        let f = [1.0, 2.0, 3.0, 4.0];
        let w = [1.0; 4];
        let (b, m) = (10.0, -2.0);
        let y: Vec<f64> = f.iter().map(|fi| b + m * fi).collect();

        let (data, model) = sums(&f, &y, &w);
        let lc = solve_linear_pair(&data, &model);
        assert_eq!(lc.scale, 0.0);
        assert!((lc.offset - b).abs() < 1e-9);
    }

    #[test]
    fn constant_model_stays_finite() {
        let f = [2.0; 5];
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let w = [1.0; 5];
        let (data, model) = sums(&f, &y, &w);
        let lc = solve_linear_pair(&data, &model);
        // Determinant is exactly zero; the epsilon keeps the division defined.
        assert!(lc.offset.is_finite());
        assert!(lc.scale.is_finite());
    }

    #[test]
    fn weighted_mean() {
        let mut data = DataSums::default();
        data.add(1.0, 1.0);
        data.add(4.0, 2.0);
        assert!((data.mean() - (1.0 + 16.0) / 5.0).abs() < 1e-12);
    }
}
