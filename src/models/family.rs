//! Built-in microlensing model families.
//!
//! Each family is one variant of a closed enum, selected once from the run
//! configuration. Fit-space conventions (log slots, default step scales and
//! bounds) live next to the evaluation so they cannot drift apart.

use crate::domain::{Bounds, ModelSpec, RunConfig};
use crate::error::AppError;
use crate::models::magnification::finite_source;
use crate::models::model::{Auxiliary, ForwardModel};
use crate::models::parallax::ParallaxGeometry;

/// Bounds with a larger magnitude are placeholders for "unbounded".
pub const OPEN_BOUND: f64 = 1.0e90;
/// Half-width of the window an open bound is replaced with.
pub const OPEN_BOUND_WINDOW: f64 = 300.0;

/// Second-source radius scales as `FR^(0.89/4)` with the flux ratio.
const SECOND_SOURCE_RADIUS_EXPONENT: f64 = 0.89 / 4.0;

const PS_NAMES: [&str; 4] = ["u0", "tE", "t0", "rho"];
const PS_LOGS: [usize; 3] = [0, 1, 3];
const PS_SIGMA: [f64; 4] = [0.5, 0.5, 5.0, 4.6];
const PS_LEFT: [f64; 4] = [-13.0, -6.9, -1.0e101, -11.5];
const PS_RIGHT: [f64; 4] = [0.7, 6.9, 1.0e101, 0.0];

const PX_NAMES: [&str; 6] = ["u0", "tE", "t0", "rho", "piN", "piE"];
const PX_LOGS: [usize; 2] = [1, 3];
const PX_SIGMA: [f64; 6] = [0.5, 0.5, 5.0, 4.6, 1.0, 1.0];
const PX_LEFT: [f64; 6] = [-3.0, -6.9, -1.0e101, -11.5, -10.0, -10.0];
const PX_RIGHT: [f64; 6] = [3.0, 6.9, 1.0e101, 0.0, 10.0, 10.0];

const BS_NAMES: [&str; 7] = ["tE", "FR", "u01", "u02", "t0", "t02", "rho"];
const BS_LOGS: [usize; 3] = [0, 1, 6];
const BS_SIGMA: [f64; 7] = [0.1, 0.4, 1.0, 1.0, 1.0, 1.0, 4.6];
const BS_LEFT: [f64; 7] = [-6.9, -11.5, 0.0, 0.0, -1.0e101, -1.0e101, -11.5];
const BS_RIGHT: [f64; 7] = [6.9, 11.5, 3.0, 3.0, 1.0e101, 1.0e101, 0.0];

#[derive(Debug, Clone, PartialEq)]
pub enum ModelFamily {
    /// `u0, tE, t0, rho`.
    SingleLens,
    /// `u0, tE, t0, rho, piN, piE`.
    SingleLensParallax(ParallaxGeometry),
    /// `tE, FR, u01, u02, t0, t02, rho`.
    BinarySource,
}

impl ModelFamily {
    /// Select the family named in the config.
    ///
    /// The parallax family needs sky coordinates; its reference time defaults
    /// to the initial `t0`.
    pub fn from_config(config: &RunConfig) -> Result<Self, AppError> {
        match config.model {
            ModelSpec::Ps => Ok(ModelFamily::SingleLens),
            ModelSpec::Bs => Ok(ModelFamily::BinarySource),
            ModelSpec::Px => {
                let coords = config.coordinates.ok_or_else(|| {
                    AppError::config("Model PX requires `coordinates` (ra_deg, dec_deg).")
                })?;
                let t_ref = match config.parallax_reference {
                    Some(t) => t,
                    None => *config.initial.get(2).ok_or_else(|| {
                        AppError::config("Model PX needs an initial t0 to anchor parallax.")
                    })?,
                };
                let geometry = ParallaxGeometry::new(coords.ra_deg, coords.dec_deg, t_ref)?;
                Ok(ModelFamily::SingleLensParallax(geometry))
            }
        }
    }

    pub fn spec(&self) -> ModelSpec {
        match self {
            ModelFamily::SingleLens => ModelSpec::Ps,
            ModelFamily::SingleLensParallax(_) => ModelSpec::Px,
            ModelFamily::BinarySource => ModelSpec::Bs,
        }
    }

    pub fn code(&self) -> &'static str {
        self.spec().code()
    }

    /// Default trust-region scale per slot (fit space).
    pub fn default_step_sigma(&self) -> &'static [f64] {
        match self {
            ModelFamily::SingleLens => &PS_SIGMA,
            ModelFamily::SingleLensParallax(_) => &PX_SIGMA,
            ModelFamily::BinarySource => &BS_SIGMA,
        }
    }

    /// Default `(left, right)` per slot (fit space).
    pub fn default_bounds(&self) -> Vec<Bounds> {
        let (left, right): (&[f64], &[f64]) = match self {
            ModelFamily::SingleLens => (&PS_LEFT, &PS_RIGHT),
            ModelFamily::SingleLensParallax(_) => (&PX_LEFT, &PX_RIGHT),
            ModelFamily::BinarySource => (&BS_LEFT, &BS_RIGHT),
        };
        left.iter()
            .zip(right)
            .map(|(l, r)| Bounds::new(*l, *r))
            .collect()
    }

    /// Convert a natural-unit vector into fit space (`ln` at log slots).
    pub fn to_fit_space(&self, natural: &[f64]) -> Result<Vec<f64>, AppError> {
        let names = self.parameter_names();
        if natural.len() != names.len() {
            return Err(AppError::config(format!(
                "Model {} expects {} parameters ({}), got {}.",
                self.code(),
                names.len(),
                names.join(", "),
                natural.len()
            )));
        }

        natural
            .iter()
            .enumerate()
            .map(|(i, v)| {
                if !v.is_finite() {
                    return Err(AppError::config(format!(
                        "Parameter {} is not finite.",
                        names[i]
                    )));
                }
                if self.is_log(i) {
                    if *v <= 0.0 {
                        return Err(AppError::config(format!(
                            "Parameter {} must be positive, got {v}.",
                            names[i]
                        )));
                    }
                    Ok(v.ln())
                } else {
                    Ok(*v)
                }
            })
            .collect()
    }
}

/// Replace open bounds with a window around the initial value.
pub fn close_open_bounds(bounds: &mut [Bounds], initial: &[f64]) {
    for (b, p) in bounds.iter_mut().zip(initial) {
        if b.left.abs() > OPEN_BOUND {
            b.left = p - OPEN_BOUND_WINDOW;
        }
        if b.right.abs() > OPEN_BOUND {
            b.right = p + OPEN_BOUND_WINDOW;
        }
    }
}

impl ForwardModel for ModelFamily {
    fn parameter_names(&self) -> &[&'static str] {
        match self {
            ModelFamily::SingleLens => &PS_NAMES,
            ModelFamily::SingleLensParallax(_) => &PX_NAMES,
            ModelFamily::BinarySource => &BS_NAMES,
        }
    }

    fn log_positions(&self) -> &[usize] {
        match self {
            ModelFamily::SingleLens => &PS_LOGS,
            ModelFamily::SingleLensParallax(_) => &PX_LOGS,
            ModelFamily::BinarySource => &BS_LOGS,
        }
    }

    fn evaluate(&self, params: &[f64], t: f64, aux: &Auxiliary) -> f64 {
        match self {
            ModelFamily::SingleLens => {
                let u0 = params[0].exp();
                let te = params[1].exp();
                let rho = params[3].exp();
                let tau = (t - params[2]) / te;
                let u = (u0 * u0 + tau * tau).sqrt();
                finite_source(u, rho, aux.calibration, aux.tolerance)
            }
            ModelFamily::SingleLensParallax(geometry) => {
                let te = params[1].exp();
                let rho = params[3].exp();
                let (d_tau, d_beta) = geometry.shift(t, params[4], params[5]);
                let tau = (t - params[2]) / te + d_tau;
                let beta = params[0] + d_beta;
                let u = (tau * tau + beta * beta).sqrt();
                finite_source(u, rho, aux.calibration, aux.tolerance)
            }
            ModelFamily::BinarySource => {
                let te = params[0].exp();
                let fr = params[1].exp();
                let rho = params[6].exp();
                let rho2 = rho * fr.powf(SECOND_SOURCE_RADIUS_EXPONENT);

                let tau1 = (t - params[4]) / te;
                let tau2 = (t - params[5]) / te;
                let u1 = (params[2] * params[2] + tau1 * tau1).sqrt();
                let u2 = (params[3] * params[3] + tau2 * tau2).sqrt();

                let a1 = finite_source(u1, rho, aux.calibration, aux.tolerance);
                let a2 = finite_source(u2, rho2, aux.calibration, aux.tolerance);
                (a1 + fr * a2) / (1.0 + fr)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitOptions, SkyCoordinates};
    use crate::models::magnification::point_source;

    fn config(model: ModelSpec, initial: Vec<f64>) -> RunConfig {
        RunConfig {
            model,
            coordinates: None,
            parallax_reference: None,
            initial,
            step_sigma: None,
            bounds: None,
            constraints: Vec::new(),
            calibration: Vec::new(),
            normalizations: Vec::new(),
            options: FitOptions::default(),
        }
    }

    #[test]
    fn single_lens_peaks_at_t0() {
        let family = ModelFamily::SingleLens;
        let p = family.to_fit_space(&[0.1, 20.0, 7500.0, 1e-4]).unwrap();
        let aux = Auxiliary::default();
        let peak = family.evaluate(&p, 7500.0, &aux);
        assert!((peak - point_source(0.1)).abs() / peak < 1e-3);
        assert!(family.evaluate(&p, 7520.0, &aux) < peak);
        assert!(family.evaluate(&p, 7480.0, &aux) < peak);
    }

    #[test]
    fn parallax_requires_coordinates() {
        let cfg = config(ModelSpec::Px, vec![0.1, 20.0, 7500.0, 1e-3, 0.1, 0.1]);
        assert_eq!(ModelFamily::from_config(&cfg).unwrap_err().exit_code(), 2);

        let mut cfg = cfg;
        cfg.coordinates = Some(SkyCoordinates {
            ra_deg: 270.0,
            dec_deg: -30.0,
        });
        let family = ModelFamily::from_config(&cfg).unwrap();
        match &family {
            ModelFamily::SingleLensParallax(g) => assert_eq!(g.reference_time(), 7500.0),
            other => panic!("unexpected family {other:?}"),
        }
    }

    #[test]
    fn zero_parallax_matches_single_lens_with_positive_u0() {
        let geometry = ParallaxGeometry::new(270.0, -30.0, 7500.0).unwrap();
        let px = ModelFamily::SingleLensParallax(geometry);
        let ps = ModelFamily::SingleLens;
        let aux = Auxiliary::default();

        let p_px = px.to_fit_space(&[0.2, 30.0, 7500.0, 1e-3, 0.0, 0.0]).unwrap();
        let p_ps = ps.to_fit_space(&[0.2, 30.0, 7500.0, 1e-3]).unwrap();
        for t in [7450.0, 7490.0, 7500.0, 7530.0] {
            let a = px.evaluate(&p_px, t, &aux);
            let b = ps.evaluate(&p_ps, t, &aux);
            assert!((a - b).abs() < 1e-9, "t={t}: {a} vs {b}");
        }
    }

    #[test]
    fn binary_source_with_equal_tracks_reduces_to_single_source() {
        let bs = ModelFamily::BinarySource;
        let ps = ModelFamily::SingleLens;
        let aux = Auxiliary::default();
        // Tiny sources so both radii stay in the point-source regime.
        let p_bs = bs
            .to_fit_space(&[25.0, 1.0, 0.3, 0.3, 7500.0, 7500.0, 1e-5])
            .unwrap();
        let p_ps = ps.to_fit_space(&[0.3, 25.0, 7500.0, 1e-5]).unwrap();
        for t in [7460.0, 7500.0, 7510.0] {
            let a = bs.evaluate(&p_bs, t, &aux);
            let b = ps.evaluate(&p_ps, t, &aux);
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn fit_space_conversion_checks_layout_and_sign() {
        let family = ModelFamily::SingleLens;
        assert!(family.to_fit_space(&[0.1, 20.0, 7500.0]).is_err());
        assert!(family.to_fit_space(&[-0.1, 20.0, 7500.0, 0.01]).is_err());
        let p = family.to_fit_space(&[1.0, 1.0, 7500.0, 1.0]).unwrap();
        assert_eq!(p, vec![0.0, 0.0, 7500.0, 0.0]);
    }

    #[test]
    fn open_bounds_are_closed_around_initial_value() {
        let family = ModelFamily::SingleLens;
        let mut bounds = family.default_bounds();
        close_open_bounds(&mut bounds, &[-2.0, 3.0, 7500.0, -6.0]);
        assert_eq!(bounds[2], Bounds::new(7200.0, 7800.0));
        assert_eq!(bounds[0], Bounds::new(-13.0, 0.7));
    }
}
