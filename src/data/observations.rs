//! Immutable observation store.
//!
//! Observations are kept in input order. Groups are contiguous runs of equal
//! `group` index, and the data-only weighted sums of each group are computed
//! once here so the objective only has to accumulate the model-dependent sums.

use crate::domain::Observation;
use crate::error::AppError;
use crate::math::DataSums;

/// A contiguous run of observations sharing a group index.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSlice {
    pub start: usize,
    pub end: usize,
    pub sums: DataSums,
}

impl GroupSlice {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Debug, Clone)]
pub struct ObservationStore {
    points: Vec<Observation>,
    groups: Vec<GroupSlice>,
}

impl ObservationStore {
    /// Build the store, checking that group indices start at 0 and only ever
    /// stay the same or step up by one.
    pub fn new(points: Vec<Observation>) -> Result<Self, AppError> {
        if points.is_empty() {
            return Err(AppError::data("No observations to fit."));
        }

        let mut groups: Vec<GroupSlice> = Vec::new();
        for (i, p) in points.iter().enumerate() {
            if !(p.x.is_finite() && p.y.is_finite() && p.weight.is_finite() && p.weight > 0.0) {
                return Err(AppError::data(format!(
                    "Observation {i} has a non-finite value or non-positive weight."
                )));
            }

            let next = groups.len();
            if next > 0 && p.group == next - 1 {
                let last = &mut groups[next - 1];
                last.end = i + 1;
                last.sums.add(p.y, p.weight);
            } else if p.group == next {
                let mut sums = DataSums::default();
                sums.add(p.y, p.weight);
                groups.push(GroupSlice {
                    start: i,
                    end: i + 1,
                    sums,
                });
            } else {
                return Err(AppError::config(format!(
                    "Observation {i}: group {} breaks contiguous group order (next group would be {next}).",
                    p.group
                )));
            }
        }

        Ok(Self { points, groups })
    }

    pub fn points(&self) -> &[Observation] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn groups(&self) -> &[GroupSlice] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
