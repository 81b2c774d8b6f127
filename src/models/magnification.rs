//! Single-lens magnification for point and finite sources.

use std::f64::consts::PI;

/// Sources farther than this many radii from the lens are treated as points.
pub const FINITE_SOURCE_RANGE: f64 = 10.0;

const MIN_SEPARATION: f64 = 1.0e-10;
const MIN_RINGS: usize = 8;
const MAX_RINGS: usize = 128;

/// `A(u) = (u² + 2) / (u·√(u² + 4))`.
pub fn point_source(u: f64) -> f64 {
    let u = u.abs().max(MIN_SEPARATION);
    let u2 = u * u;
    (u2 + 2.0) / (u * (u2 + 4.0).sqrt())
}

/// Magnification of a linearly limb-darkened disk of radius `rho` whose
/// center sits `u` from the lens.
///
/// The disk is integrated with a midpoint rule in polar coordinates around
/// the source center; the number of rings grows as the tolerance shrinks.
pub fn finite_source(u: f64, rho: f64, limb_darkening: f64, tolerance: f64) -> f64 {
    if !(rho > 0.0) || u > FINITE_SOURCE_RANGE * rho {
        return point_source(u);
    }

    let rings = ring_count(tolerance);
    let sectors = 2 * rings;
    let dr = 1.0 / rings as f64;
    // Symmetric about the lens-source axis, so half the disk is enough.
    let dphi = PI / sectors as f64;

    let mut flux = 0.0;
    let mut area = 0.0;
    for ir in 0..rings {
        let r = (ir as f64 + 0.5) * dr;
        let profile = 1.0 - limb_darkening * (1.0 - (1.0 - r * r).sqrt());
        let ring_weight = profile * r;
        let rr = r * rho;
        for ip in 0..sectors {
            let phi = (ip as f64 + 0.5) * dphi;
            let d = (u * u + rr * rr + 2.0 * u * rr * phi.cos()).max(0.0).sqrt();
            flux += ring_weight * point_source(d);
            area += ring_weight;
        }
    }

    flux / area
}

fn ring_count(tolerance: f64) -> usize {
    let t = if tolerance > 0.0 { tolerance } else { 1.0e-4 };
    let n = (2.0 / t.sqrt()).ceil();
    if n.is_finite() {
        (n as usize).clamp(MIN_RINGS, MAX_RINGS)
    } else {
        MAX_RINGS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_source_known_value() {
        let a = point_source(1.0);
        assert!((a - 3.0 / 5.0_f64.sqrt()).abs() < 1e-12);
        assert!(point_source(0.0).is_finite());
    }

    #[test]
    fn far_from_lens_finite_equals_point() {
        assert_eq!(finite_source(0.5, 0.01, 0.5, 1e-2), point_source(0.5));
    }

    #[test]
    fn uniform_disk_centered_on_lens() {
        let rho = 0.1;
        let a = finite_source(0.0, rho, 0.0, 1e-2);
        let expected = (1.0 + 4.0 / (rho * rho)).sqrt();
        assert!(
            ((a - expected) / expected).abs() < 1e-2,
            "got {a}, expected {expected}"
        );
    }

    #[test]
    fn finite_source_close_to_point_source_near_edge_of_range() {
        let rho = 0.01;
        let u = 0.09;
        let a = finite_source(u, rho, 0.3, 1e-3);
        let ps = point_source(u);
        assert!(((a - ps) / ps).abs() < 5e-3, "got {a}, point {ps}");
    }

    #[test]
    fn ring_count_is_bounded() {
        assert_eq!(ring_count(1.0), MIN_RINGS);
        assert_eq!(ring_count(1e-12), MAX_RINGS);
        assert_eq!(ring_count(1e-2), 20);
    }
}
