//! Proximity pairing of control points (grade pairs).
//!
//! Two points are paired when their zero positions are strictly inside the
//! configured distance band. A pair carries a *relative* series: at every
//! timestamp both points share, the vector from `a` to `b`. That series runs
//! through the regular reference/delta/alarm pipeline, so the pair's
//! cumulative delta is the change in relative position since the first
//! shared measurement, and its tilt is the height part of that change per
//! meter of distance.
//!
//! ## Algorithm
//! 1. Select candidates: required dimension, usable zero position, at least
//!    two observations
//! 2. Load candidate positions into an R-tree (computed once per candidate)
//! 3. For each candidate, query neighbours within `max_distance`
//! 4. Keep (A, B) only for `name(A) < name(B)` and `min < d < max`
//! 5. Build the relative series over each point's current measurement run
//! 6. Discard pairs with fewer than two shared timestamps
//! 7. Sort by descending |tilt|

use log::debug;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::Serialize;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::alarm::{AlarmLevel, AlarmLimits};
use crate::config::PairingBand;
use crate::delta::derive_series;
use crate::reference::ReferenceResolver;
use crate::temporal::Monitored;
use crate::{Components, ControlPoint, Delta, Dimension, GpsPoint, Observation, Position, Series};

/// Fewer shared timestamps than this make a pair meaningless.
pub const MIN_SHARED_OBSERVATIONS: usize = 2;

/// Two nearby control points analyzed together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pair {
    /// "a/b"
    pub name: String,
    /// Lexicographically smaller point name
    pub a: String,
    pub b: String,
    /// Planar distance between the zero positions (meters)
    pub distance: f64,
    pub midpoint: Position,
    pub midpoint_wgs84: Option<GpsPoint>,
    pub dimension: Dimension,
    /// Relative observations (b - a) at shared timestamps
    pub series: Series,
    /// Cumulative change of the relative vector at the latest shared date
    pub delta: Option<Delta>,
    /// Height-difference change per meter of distance, in per-mille.
    /// Absent for pairs without a height component.
    pub tilt_per_mille: Option<f64>,
}

impl Pair {
    pub fn alarm(&self) -> AlarmLevel {
        self.series.latest_alarm()
    }

    /// True if `name` is one of the two points.
    pub fn involves(&self, name: &str) -> bool {
        self.a == name || self.b == name
    }
}

impl Monitored for Pair {
    fn name(&self) -> &str {
        &self.name
    }

    fn series(&self) -> &Series {
        &self.series
    }
}

/// Candidate position wrapper for R-tree neighbour queries
#[derive(Debug, Clone)]
struct IndexedPosition {
    index: usize,
    coord: [f64; 2],
}

impl RTreeObject for IndexedPosition {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.coord)
    }
}

impl PointDistance for IndexedPosition {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.coord[0] - point[0];
        let dy = self.coord[1] - point[1];
        dx * dx + dy * dy
    }
}

struct Candidate<'a> {
    point: &'a ControlPoint,
    position: Position,
}

/// Finds grade pairs among a set of points.
#[derive(Debug, Clone)]
pub struct PairingEngine {
    band: PairingBand,
    dimension: Dimension,
    limits: AlarmLimits,
}

impl PairingEngine {
    pub fn new(band: PairingBand, dimension: Dimension, limits: AlarmLimits) -> Self {
        Self {
            band,
            dimension,
            limits,
        }
    }

    pub fn band(&self) -> PairingBand {
        self.band
    }

    /// Find all pairs among `points`, most significant first.
    pub fn find_pairs<'a, I>(&self, points: I) -> Vec<Pair>
    where
        I: IntoIterator<Item = &'a ControlPoint>,
    {
        let candidates: Vec<Candidate<'a>> = points
            .into_iter()
            .filter(|p| p.dimension == self.dimension && p.series.len() >= MIN_SHARED_OBSERVATIONS)
            .filter_map(|p| {
                Some(Candidate {
                    point: p,
                    position: p.usable_position()?,
                })
            })
            .collect();

        let rtree = RTree::bulk_load(
            candidates
                .iter()
                .enumerate()
                .map(|(index, c)| IndexedPosition {
                    index,
                    coord: [c.position.x, c.position.y],
                })
                .collect(),
        );

        let max_2 = self.band.max() * self.band.max();
        let pairs_for = |i: usize| -> Vec<Pair> {
            let first = &candidates[i];
            rtree
                .locate_within_distance([first.position.x, first.position.y], max_2)
                .filter_map(|neighbour| {
                    let second = &candidates[neighbour.index];
                    // Canonical order; also excludes pairing a point with itself
                    if first.point.name >= second.point.name {
                        return None;
                    }
                    let distance = first.position.planar_distance(&second.position);
                    if !self.band.contains(distance) {
                        return None;
                    }
                    self.build_pair(first, second, distance)
                })
                .collect()
        };

        #[cfg(feature = "parallel")]
        let mut pairs: Vec<Pair> = (0..candidates.len())
            .into_par_iter()
            .flat_map_iter(pairs_for)
            .collect();

        #[cfg(not(feature = "parallel"))]
        let mut pairs: Vec<Pair> = (0..candidates.len()).flat_map(pairs_for).collect();

        pairs.sort_by(|p, q| {
            ranking_key(q)
                .total_cmp(&ranking_key(p))
                .then_with(|| p.a.cmp(&q.a))
                .then_with(|| p.b.cmp(&q.b))
        });

        debug!(
            "[PairingEngine] {} candidates, {} pairs in band ({}, {})",
            candidates.len(),
            pairs.len(),
            self.band.min(),
            self.band.max()
        );
        pairs
    }

    fn build_pair(&self, a: &Candidate<'_>, b: &Candidate<'_>, distance: f64) -> Option<Pair> {
        let name = format!("{}/{}", a.point.name, b.point.name);
        let shared = relative_observations(
            &name,
            ReferenceResolver::current_run(&a.point.series),
            ReferenceResolver::current_run(&b.point.series),
        );
        if shared.len() < MIN_SHARED_OBSERVATIONS {
            return None;
        }

        let mut series = Series::new(shared);
        derive_series(&mut series, self.dimension, &self.limits);

        let delta = series.latest().and_then(|o| o.delta_zero);
        let tilt_per_mille = delta.and_then(|d| d.grade_per_mille(distance));
        let midpoint_wgs84 = match (a.point.wgs84, b.point.wgs84) {
            (Some(ga), Some(gb)) => Some(ga.midpoint(&gb)),
            _ => None,
        };

        Some(Pair {
            name,
            a: a.point.name.clone(),
            b: b.point.name.clone(),
            distance,
            midpoint: a.position.midpoint(&b.position),
            midpoint_wgs84,
            dimension: self.dimension,
            series,
            delta,
            tilt_per_mille,
        })
    }
}

fn ranking_key(pair: &Pair) -> f64 {
    pair.tilt_per_mille.map(f64::abs).unwrap_or(f64::NEG_INFINITY)
}

/// `b - a` per component; absent on either side stays absent.
fn relative(a: &Components, b: &Components) -> Components {
    let sub = |b: Option<f64>, a: Option<f64>| Some(b? - a?);
    Components {
        x: sub(b.x, a.x),
        y: sub(b.y, a.y),
        z: sub(b.z, a.z),
    }
}

/// Relative observations at timestamps present in both sorted runs. The
/// first shared observation is the pair's zero.
fn relative_observations(name: &str, a: &[Observation], b: &[Observation]) -> Vec<Observation> {
    let mut shared = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].timestamp.cmp(&b[j].timestamp) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                let mut obs = Observation::new(name, a[i].timestamp, relative(&a[i].values, &b[j].values));
                obs.is_zero = shared.is_empty();
                obs.is_replacement = a[i].is_replacement || b[j].is_replacement;
                shared.push(obs);
                i += 1;
                j += 1;
            }
        }
    }
    shared
}
