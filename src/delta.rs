//! Displacement deltas.
//!
//! Every observation gets two deltas:
//! - **from zero**: cumulative displacement against the zero measurement
//! - **from prior**: incremental change against the previous observation
//!
//! Sensor or prism replacements must not show up as movement. A replacement
//! observation has no rolling delta and becomes the new prior; for the
//! cumulative delta, the jump it introduces is folded into the reference so
//! the series stays continuous across the replacement.

use serde::Serialize;

use crate::alarm::{evaluate_components, AlarmLimits};
use crate::reference::ReferenceResolver;
use crate::{Components, Dimension, Series};

/// Component differences between two measurements.
///
/// Absent components stay absent; they are never treated as zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Delta {
    pub dx: Option<f64>,
    pub dy: Option<f64>,
    pub dz: Option<f64>,
}

impl Delta {
    pub fn new(dx: Option<f64>, dy: Option<f64>, dz: Option<f64>) -> Self {
        Self { dx, dy, dz }
    }

    /// No component present.
    pub fn is_empty(&self) -> bool {
        self.dx.is_none() && self.dy.is_none() && self.dz.is_none()
    }

    /// Horizontal magnitude; needs both dx and dy.
    pub fn planar(&self) -> Option<f64> {
        Some(self.dx?.hypot(self.dy?))
    }

    /// Euclidean magnitude over the present components.
    pub fn magnitude(&self) -> Option<f64> {
        let present: Vec<f64> = [self.dx, self.dy, self.dz].into_iter().flatten().collect();
        if present.is_empty() {
            return None;
        }
        Some(present.iter().map(|v| v * v).sum::<f64>().sqrt())
    }

    /// Direction of horizontal movement in degrees clockwise from the
    /// y axis (north), in `[0, 360)`.
    pub fn bearing_degrees(&self) -> Option<f64> {
        let (dx, dy) = (self.dx?, self.dy?);
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        Some(dx.atan2(dy).to_degrees().rem_euclid(360.0))
    }

    /// Height change relative to a horizontal base, in percent.
    pub fn grade_percent(&self, base: f64) -> Option<f64> {
        self.grade(base, 100.0)
    }

    /// Height change relative to a horizontal base, in per-mille.
    pub fn grade_per_mille(&self, base: f64) -> Option<f64> {
        self.grade(base, 1000.0)
    }

    fn grade(&self, base: f64, scale: f64) -> Option<f64> {
        if !(base > 0.0) {
            return None;
        }
        Some(self.dz? / base * scale)
    }

    /// Subtract an offset; absent offset components count as zero.
    fn shifted_by(&self, offset: &Delta) -> Delta {
        let shift = |v: Option<f64>, o: Option<f64>| v.map(|v| v - o.unwrap_or(0.0));
        Delta::new(
            shift(self.dx, offset.dx),
            shift(self.dy, offset.dy),
            shift(self.dz, offset.dz),
        )
    }

    /// Add present components of `other` into `self`.
    fn accumulate(&mut self, other: &Delta) {
        let add = |acc: &mut Option<f64>, v: Option<f64>| {
            if let Some(v) = v {
                *acc = Some(acc.unwrap_or(0.0) + v);
            }
        };
        add(&mut self.dx, other.dx);
        add(&mut self.dy, other.dy);
        add(&mut self.dz, other.dz);
    }
}

/// Computes zero-relative and rolling deltas for a series.
#[derive(Debug, Clone, Copy)]
pub struct DeltaCalculator {
    dimension: Dimension,
}

impl DeltaCalculator {
    pub fn new(dimension: Dimension) -> Self {
        Self { dimension }
    }

    /// Recompute both deltas of every observation.
    ///
    /// Expects the zero date to be resolved already.
    pub fn apply(&self, series: &mut Series) {
        let zero_index = series
            .zero_date
            .and_then(|date| series.observations.iter().position(|o| o.timestamp == date));
        let zero_values: Option<Components> = zero_index.map(|i| series.observations[i].values);

        let mut offset = Delta::default();
        let mut prior: Option<Components> = None;

        for (i, obs) in series.observations.iter_mut().enumerate() {
            obs.delta_prior = match prior {
                Some(ref p) if !obs.is_replacement => Some(obs.values.difference(p, self.dimension)),
                _ => None,
            };

            let after_zero = zero_index.is_some_and(|z| i > z);
            if obs.is_replacement && after_zero {
                if let Some(ref p) = prior {
                    offset.accumulate(&obs.values.difference(p, self.dimension));
                }
            }

            obs.delta_zero = zero_values
                .as_ref()
                .map(|z| obs.values.difference(z, self.dimension).shifted_by(&offset));

            prior = Some(obs.values);
        }
    }
}

/// Run the full per-series pipeline: references, deltas, alarm levels.
pub fn derive_series(series: &mut Series, dimension: Dimension, limits: &AlarmLimits) {
    ReferenceResolver::resolve(series);
    DeltaCalculator::new(dimension).apply(series);
    for obs in series.observations.iter_mut() {
        obs.alarms = evaluate_components(obs.delta_zero.as_ref(), limits);
    }
}
