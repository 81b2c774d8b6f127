//! Annual parallax offsets from a low-precision solar ephemeris.
//!
//! The Sun's geocentric position is projected on the sky plane of the target
//! (north/east unit vectors). The parallax shift at time `t` is the deviation
//! of that projection from its linear motion around the reference time, so
//! the offsets and their first derivative vanish at `t_ref`.
//!
//! Times are HJD − 2450000.

use crate::error::AppError;

/// J2000.0 in HJD − 2450000.
const J2000: f64 = 1545.0;
const OBLIQUITY_DEG: f64 = 23.439;
/// Half-width of the central difference used for the reference velocity (days).
const VELOCITY_STEP: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct ParallaxGeometry {
    north: [f64; 3],
    east: [f64; 3],
    t_ref: f64,
    position_ref: [f64; 2],
    velocity_ref: [f64; 2],
}

impl ParallaxGeometry {
    pub fn new(ra_deg: f64, dec_deg: f64, t_ref: f64) -> Result<Self, AppError> {
        if !(ra_deg.is_finite() && dec_deg.is_finite() && (-90.0..=90.0).contains(&dec_deg)) {
            return Err(AppError::config(format!(
                "Invalid sky coordinates: ra={ra_deg}, dec={dec_deg}."
            )));
        }
        if !t_ref.is_finite() {
            return Err(AppError::config("Parallax reference time must be finite."));
        }

        let (sa, ca) = ra_deg.to_radians().sin_cos();
        let (sd, cd) = dec_deg.to_radians().sin_cos();
        let north = [-sd * ca, -sd * sa, cd];
        let east = [-sa, ca, 0.0];

        let mut geometry = Self {
            north,
            east,
            t_ref,
            position_ref: [0.0; 2],
            velocity_ref: [0.0; 2],
        };

        let here = geometry.projected_sun(t_ref);
        let ahead = geometry.projected_sun(t_ref + VELOCITY_STEP);
        let behind = geometry.projected_sun(t_ref - VELOCITY_STEP);
        geometry.position_ref = here;
        geometry.velocity_ref = [
            (ahead[0] - behind[0]) / (2.0 * VELOCITY_STEP),
            (ahead[1] - behind[1]) / (2.0 * VELOCITY_STEP),
        ];
        Ok(geometry)
    }

    pub fn reference_time(&self) -> f64 {
        self.t_ref
    }

    /// Observer offset `(north, east)` in AU relative to linear motion.
    pub fn offset(&self, t: f64) -> [f64; 2] {
        let s = self.projected_sun(t);
        let dt = t - self.t_ref;
        [
            -(s[0] - self.position_ref[0] - dt * self.velocity_ref[0]),
            -(s[1] - self.position_ref[1] - dt * self.velocity_ref[1]),
        ]
    }

    /// Shifts `(Δτ, Δβ)` of the source trajectory for parallax `(piN, piE)`.
    pub fn shift(&self, t: f64, pi_n: f64, pi_e: f64) -> (f64, f64) {
        let [dn, de] = self.offset(t);
        let d_tau = pi_n * dn + pi_e * de;
        let d_beta = pi_n * de - pi_e * dn;
        (d_tau, d_beta)
    }

    fn projected_sun(&self, t: f64) -> [f64; 2] {
        let sun = sun_position(t);
        [dot(&sun, &self.north), dot(&sun, &self.east)]
    }
}

/// Geocentric equatorial position of the Sun in AU.
pub fn sun_position(t: f64) -> [f64; 3] {
    let n = t - J2000;
    let mean_longitude = 280.460 + 0.985_647_4 * n;
    let g = (357.528 + 0.985_600_3 * n).to_radians();
    let lambda = (mean_longitude + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
    let r = 1.000_14 - 0.016_71 * g.cos() - 0.000_14 * (2.0 * g).cos();
    let (se, ce) = OBLIQUITY_DEG.to_radians().sin_cos();
    let (sl, cl) = lambda.sin_cos();
    [r * cl, r * ce * sl, r * se * sl]
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_vanishes_at_reference_time() {
        let g = ParallaxGeometry::new(268.0, -29.0, 7500.0).unwrap();
        let [n, e] = g.offset(7500.0);
        assert!(n.abs() < 1e-12 && e.abs() < 1e-12);
        let (dt, db) = g.shift(7500.0, 0.3, -0.2);
        assert!(dt.abs() < 1e-12 && db.abs() < 1e-12);
    }

    #[test]
    fn offset_grows_away_from_reference() {
        let g = ParallaxGeometry::new(268.0, -29.0, 7500.0).unwrap();
        let [n, e] = g.offset(7590.0);
        let size = (n * n + e * e).sqrt();
        assert!(size > 0.05 && size < 2.0, "offset size {size}");
    }

    #[test]
    fn sun_distance_is_about_one_au() {
        for t in [7000.0, 7100.0, 7200.0, 7300.0] {
            let s = sun_position(t);
            let r = dot(&s, &s).sqrt();
            assert!((r - 1.0).abs() < 0.02, "r={r}");
        }
    }

    #[test]
    fn rejects_bad_declination() {
        assert!(ParallaxGeometry::new(10.0, 95.0, 7500.0).is_err());
    }
}
