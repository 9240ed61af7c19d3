//! Authoritative point and observation store.
//!
//! A store is built wholesale from one project load and never updated in
//! place; the next load produces a new store.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::delta::derive_series;
use crate::error::DataWarning;
use crate::{Bounds, ControlPoint, ControlPointRecord, Observation, ObservationRecord};

/// Outcome of building a store: counts plus data-integrity warnings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub points_loaded: u32,
    pub observations_loaded: u32,
    /// Observations referencing unknown points or duplicated timestamps
    pub dropped_observations: u32,
    pub warnings: Vec<DataWarning>,
}

/// WGS-84 location wrapper for R-tree viewport queries
#[derive(Debug, Clone)]
struct PointLocation {
    index: usize,
    lng: f64,
    lat: f64,
}

impl RTreeObject for PointLocation {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

/// Owns the control points of one loaded dataset.
#[derive(Debug, Default)]
pub struct PointStore {
    points: Vec<ControlPoint>,
    index: HashMap<String, usize>,
    spatial_index: RTree<PointLocation>,
}

impl PointStore {
    /// Build a store from loader records.
    ///
    /// Observations are attached to their point by name and sorted by
    /// timestamp. Unknown point names and duplicate timestamps are dropped
    /// and reported; nothing here is fatal.
    pub fn load(
        records: Vec<ControlPointRecord>,
        observations: Vec<ObservationRecord>,
    ) -> (Self, LoadReport) {
        let mut report = LoadReport::default();
        let mut index: HashMap<String, usize> = HashMap::with_capacity(records.len());
        let mut accepted: Vec<ControlPointRecord> = Vec::with_capacity(records.len());

        for record in records {
            if index.contains_key(&record.name) {
                report.warnings.push(DataWarning::DuplicatePoint {
                    point: record.name.clone(),
                });
                continue;
            }
            index.insert(record.name.clone(), accepted.len());
            accepted.push(record);
        }

        let mut buckets: Vec<Vec<Observation>> = vec![Vec::new(); accepted.len()];
        let mut seen: HashSet<(usize, chrono::NaiveDateTime)> = HashSet::with_capacity(observations.len());

        for record in observations {
            let Some(&i) = index.get(&record.point) else {
                report.dropped_observations += 1;
                report.warnings.push(DataWarning::UnknownPoint {
                    point: record.point.clone(),
                    timestamp: record.timestamp,
                });
                continue;
            };
            if !seen.insert((i, record.timestamp)) {
                report.dropped_observations += 1;
                report.warnings.push(DataWarning::DuplicateTimestamp {
                    point: record.point.clone(),
                    timestamp: record.timestamp,
                });
                continue;
            }
            buckets[i].push(Observation::from_record(record));
            report.observations_loaded += 1;
        }

        let points: Vec<ControlPoint> = accepted
            .into_iter()
            .zip(buckets)
            .map(|(record, observations)| ControlPoint::from_record(record, observations))
            .collect();

        for point in &points {
            if point.usable_position().is_none() {
                report.warnings.push(DataWarning::MissingZeroPosition {
                    point: point.name.clone(),
                });
            }
        }

        let locations: Vec<PointLocation> = points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let gps = p.wgs84.filter(|g| g.is_valid())?;
                Some(PointLocation {
                    index: i,
                    lng: gps.longitude,
                    lat: gps.latitude,
                })
            })
            .collect();

        report.points_loaded = points.len() as u32;
        for warning in &report.warnings {
            warn!("[PointStore] {}", warning);
        }
        debug!(
            "[PointStore] Loaded {} points, {} observations ({} dropped)",
            report.points_loaded, report.observations_loaded, report.dropped_observations
        );

        let store = Self {
            points,
            index,
            spatial_index: RTree::bulk_load(locations),
        };
        (store, report)
    }

    /// Resolve references, deltas and alarms for every point.
    pub fn derive(&mut self) {
        #[cfg(feature = "parallel")]
        self.points.par_iter_mut().for_each(|p| {
            derive_series(&mut p.series, p.dimension, &p.limits);
        });

        #[cfg(not(feature = "parallel"))]
        for p in self.points.iter_mut() {
            derive_series(&mut p.series, p.dimension, &p.limits);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ControlPoint> {
        self.index.get(name).map(|&i| &self.points[i])
    }

    /// All points in load order.
    pub fn all(&self) -> &[ControlPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.points.iter().map(|p| p.name.as_str()).collect()
    }

    /// Points tagged with the given origin.
    pub fn points_by_origin(&self, origin: &str) -> Vec<&ControlPoint> {
        self.points.iter().filter(|p| p.origin == origin).collect()
    }

    /// Points whose WGS-84 location lies inside the viewport, in load order.
    pub fn points_in_bounds(&self, bounds: &Bounds) -> Vec<&ControlPoint> {
        let search = AABB::from_corners(
            [bounds.min_lng, bounds.min_lat],
            [bounds.max_lng, bounds.max_lat],
        );
        let mut hits: Vec<usize> = self
            .spatial_index
            .locate_in_envelope(&search)
            .map(|loc| loc.index)
            .collect();
        hits.sort_unstable();
        hits.into_iter().map(|i| &self.points[i]).collect()
    }

    /// Total observation count over all points.
    pub fn observation_count(&self) -> usize {
        self.points.iter().map(|p| p.series.len()).sum()
    }
}
