//! Bumpers (exclusion ellipsoids around found minima) and the step chain.
//!
//! A bumper keeps the converged position and its curvature rescaled by
//! `objective / point_count`. A later point `p` is inside when
//!
//! ```text
//! d(p) = (p − center)ᵀ · metric · (p − center) < 1
//! ```
//!
//! and is then pushed out along the ellipsoid's longest axis.
//!
//! The step chain records accepted positions of the batch; after each descent
//! it is cut at the first node that falls inside a bumper so the next descent
//! restarts from the last point known to lie outside every basin found so far.

use nalgebra::{DMatrix, DVector, SymmetricEigen};

/// Floor on `d` when computing the push length (a point at the center).
const MIN_DISTANCE: f64 = 1.0e-8;

#[derive(Debug, Clone)]
pub struct Bumper {
    center: DVector<f64>,
    metric: DMatrix<f64>,
    /// Longest semi-axis of the unit ellipsoid (`d(center + direction) = 1`).
    direction: DVector<f64>,
}

impl Bumper {
    /// Build a bumper at `center`; returns `None` when the objective cannot
    /// define a scale (non-finite or not positive).
    pub fn new(center: &[f64], curvature: &DMatrix<f64>, point_count: usize, objective: f64) -> Option<Self> {
        if !(objective.is_finite() && objective > 0.0) || point_count == 0 {
            return None;
        }
        let scale = point_count as f64 / objective;
        let metric = curvature / scale;
        if metric.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let direction = principal_axis(&metric);
        Some(Self {
            center: DVector::from_column_slice(center),
            metric,
            direction,
        })
    }

    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }

    pub fn distance(&self, p: &[f64]) -> f64 {
        let delta = DVector::from_column_slice(p) - &self.center;
        delta.dot(&(&self.metric * &delta))
    }

    pub fn contains(&self, p: &[f64]) -> bool {
        self.distance(p) < 1.0
    }

    /// Push vector for a point inside the bumper: `(2·power/√d)·direction`,
    /// oriented away from the center. Subtract it from `p`.
    pub fn displacement(&self, p: &[f64], power: f64) -> DVector<f64> {
        let delta = DVector::from_column_slice(p) - &self.center;
        let d = delta.dot(&(&self.metric * &delta)).max(MIN_DISTANCE);
        let along = delta.dot(&self.direction);
        // p −= k·dir must move away from the center.
        let orientation = if along > 0.0 { -1.0 } else { 1.0 };
        &self.direction * (orientation * 2.0 * power / d.sqrt())
    }
}

/// Eigenvector of the smallest positive eigenvalue scaled by `1/√λ`; falls
/// back to the first unit vector when the metric has no positive direction.
fn principal_axis(metric: &DMatrix<f64>) -> DVector<f64> {
    let n = metric.nrows();
    let symmetric = (metric + metric.transpose()) * 0.5;
    let eigen = SymmetricEigen::new(symmetric);

    let smallest = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > 0.0 && v.is_finite())
        .min_by(|a, b| a.1.total_cmp(b.1));

    match smallest {
        Some((k, lambda)) => eigen.eigenvectors.column(k) / lambda.sqrt(),
        None => {
            let mut e = DVector::zeros(n);
            if n > 0 {
                e[0] = 1.0;
            }
            e
        }
    }
}

/// Registry of bumpers, newest first.
#[derive(Debug, Clone, Default)]
pub struct BumperRegistry {
    bumpers: Vec<Bumper>,
}

impl BumperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bumper: Bumper) {
        self.bumpers.push(bumper);
    }

    pub fn len(&self) -> usize {
        self.bumpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bumpers.is_empty()
    }

    /// Newest bumper first.
    pub fn iter(&self) -> impl Iterator<Item = &Bumper> {
        self.bumpers.iter().rev()
    }

    /// First (newest) bumper containing `p`.
    pub fn first_containing(&self, p: &[f64]) -> Option<&Bumper> {
        self.iter().find(|b| b.contains(p))
    }

    pub fn inside_any(&self, p: &[f64]) -> bool {
        self.first_containing(p).is_some()
    }
}

/// Accepted positions of the batch, rooted at the initial condition.
#[derive(Debug, Clone)]
pub struct StepChain {
    nodes: Vec<Vec<f64>>,
}

impl StepChain {
    pub fn new(root: Vec<f64>) -> Self {
        Self { nodes: vec![root] }
    }

    pub fn push(&mut self, position: Vec<f64>) {
        self.nodes.push(position);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Where the next descent starts.
    pub fn restart_point(&self) -> &[f64] {
        self.nodes.last().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop every node from the first one (after the root) lying inside a
    /// bumper. Returns how many nodes were removed.
    pub fn prune(&mut self, registry: &BumperRegistry) -> usize {
        let cut = self
            .nodes
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, node)| registry.inside_any(node))
            .map(|(i, _)| i);

        match cut {
            Some(i) => {
                let removed = self.nodes.len() - i;
                self.nodes.truncate(i);
                removed
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_bumper(center: &[f64]) -> Bumper {
        // metric = identity when objective == point_count.
        let n = center.len();
        Bumper::new(center, &DMatrix::identity(n, n), 10, 10.0).unwrap()
    }

    #[test]
    fn center_is_inside_and_boundary_is_not() {
        let b = unit_bumper(&[1.0, 2.0]);
        assert_eq!(b.distance(&[1.0, 2.0]), 0.0);
        assert!(b.contains(&[1.0, 2.0]));
        assert!(!b.contains(&[2.0, 2.0]));
        assert!(!b.contains(&[1.0, 5.0]));
    }

    #[test]
    fn metric_scales_with_objective_per_point() {
        let c = DMatrix::from_row_slice(1, 1, &[4.0]);
        // scale = 10 / 40, metric = 4 · 4 = 16.
        let b = Bumper::new(&[0.0], &c, 10, 40.0).unwrap();
        assert!((b.distance(&[0.5]) - 4.0).abs() < 1e-12);
        assert!(Bumper::new(&[0.0], &c, 10, 0.0).is_none());
        assert!(Bumper::new(&[0.0], &c, 10, f64::NAN).is_none());
    }

    #[test]
    fn displacement_moves_away_from_center() {
        let curvature = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 1.0]);
        let b = Bumper::new(&[0.0, 0.0], &curvature, 1, 1.0).unwrap();
        // Longest axis is the second coordinate (smallest eigenvalue 1).
        for p in [[0.0, 0.3], [0.0, -0.3], [0.1, 0.2]] {
            let before = b.distance(&p);
            let push = b.displacement(&p, 2.0);
            let moved = [p[0] - push[0], p[1] - push[1]];
            assert!(b.distance(&moved) > before, "p={p:?}");
            assert!(push[0].abs() < 1e-12);
        }
        let at_center = b.displacement(&[0.0, 0.0], 2.0);
        assert!(at_center.iter().all(|v| v.is_finite()));
        assert!(at_center.norm() > 1.0);
    }

    #[test]
    fn registry_iterates_newest_first() {
        let mut reg = BumperRegistry::new();
        reg.push(unit_bumper(&[0.0]));
        reg.push(unit_bumper(&[0.5]));
        let found = reg.first_containing(&[0.4]).unwrap();
        assert_eq!(found.center()[0], 0.5);
        assert!(!reg.inside_any(&[3.0]));
    }

    #[test]
    fn chain_prunes_from_first_node_inside_a_bumper() {
        let mut chain = StepChain::new(vec![0.0]);
        for x in [5.0, 3.0, 1.2, 0.5, 2.0] {
            chain.push(vec![x]);
        }
        let mut reg = BumperRegistry::new();
        reg.push(unit_bumper(&[1.0]));

        let removed = chain.prune(&reg);
        assert_eq!(removed, 3);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.restart_point(), &[3.0]);
    }

    #[test]
    fn chain_keeps_root_even_when_inside() {
        let mut chain = StepChain::new(vec![0.0]);
        chain.push(vec![0.1]);
        let mut reg = BumperRegistry::new();
        reg.push(unit_bumper(&[0.0]));
        chain.prune(&reg);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.restart_point(), &[0.0]);
    }
}
