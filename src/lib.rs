//! # Monitor Engine
//!
//! Time-series and alarm-evaluation engine for geotechnical and geodetic
//! monitoring data.
//!
//! This library provides:
//! - Zero-reference resolution and displacement deltas (cumulative and rolling)
//! - Alarm level evaluation against per-point warning/critical limits
//! - Date-range filtering of points, pairs and groups with bucketed counts
//! - Proximity pairing of points (grade/tilt pairs) and convergence groups
//! - A snapshot-publishing engine with serialized background loads
//!
//! ## Features
//!
//! - **`parallel`** - Run neighbour search and delta computation on rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use monitor_engine::{
//!     AlarmLevel, AlarmLimits, Components, ControlPointRecord, Dimension, LimitPair,
//!     MonitorConfig, MonitoringEngine, ObservationRecord, ProjectData,
//! };
//!
//! let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
//! let t1 = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
//!
//! let mut point = ControlPointRecord::new("P1", Dimension::Height);
//! point.limits = AlarmLimits {
//!     z: Some(LimitPair::new(2.0, 5.0).unwrap()),
//!     ..AlarmLimits::default()
//! };
//!
//! let data = ProjectData {
//!     points: vec![point],
//!     observations: vec![
//!         ObservationRecord::new("P1", t0, Components::height(100.0)).zero(),
//!         ObservationRecord::new("P1", t1, Components::height(102.5)),
//!     ],
//!     groups: vec![],
//! };
//!
//! let engine = MonitoringEngine::new(MonitorConfig::default()).unwrap();
//! engine.load(data).unwrap();
//!
//! let snapshot = engine.snapshot();
//! let p1 = snapshot.dataset().store().get("P1").unwrap();
//! let latest = p1.series.latest().unwrap();
//! assert_eq!(latest.delta_zero.as_ref().unwrap().dz, Some(2.5));
//! assert_eq!(latest.alarm(), AlarmLevel::Warning);
//! ```

use chrono::NaiveDateTime;
use geo::Coord;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{DataWarning, MonitorError, OptionExt, Result};

// Configuration surface consumed from the environment
pub mod config;
pub use config::{DateBucket, MonitorConfig, PairingBand, PairingConfig};

// Alarm limits and stateless evaluation
pub mod alarm;
pub use alarm::{evaluate, evaluate_components, AlarmLevel, AlarmLimits, AlarmSummary, ComponentAlarms, LimitPair};

// Component deltas (cumulative and rolling)
pub mod delta;
pub use delta::{Delta, DeltaCalculator};

// Zero-date and date-span resolution
pub mod reference;
pub use reference::ReferenceResolver;

// Authoritative point/observation model
pub mod store;
pub use store::{LoadReport, PointStore};

// Date-range visibility and range-scoped aggregates
pub mod temporal;
pub use temporal::{DateRange, Monitored, TemporalFilter, TemporalView, VisibleSeries};

// Proximity pairing (grade pairs)
pub mod pairing;
pub use pairing::{Pair, PairingEngine};

// Convergence groups
pub mod grouping;
pub use grouping::{ConvergenceGroup, GroupAggregator, GroupDefinition};

// Snapshot-publishing engine (explicit context, no global state)
pub mod engine;
pub use engine::{
    Dataset, EngineEvent, EngineStats, ListenerId, LoadHandle, LoadOutcome, MonitoringEngine,
    Snapshot,
};

// ============================================================================
// Core Types
// ============================================================================

/// WGS-84 location of a control point.
///
/// Supplied by the project loader; the engine never projects coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Latitude within ±90°, longitude within ±180° (NaN fails both).
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Point halfway between two coordinates (plain average, adequate for
    /// the short spans between paired points).
    pub fn midpoint(&self, other: &GpsPoint) -> GpsPoint {
        GpsPoint::new(
            (self.latitude + other.latitude) / 2.0,
            (self.longitude + other.longitude) / 2.0,
        )
    }
}

/// WGS-84 bounding box: map viewport or extent of a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Smallest box around the valid coordinates; `None` if there are none.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a GpsPoint>,
    {
        points
            .into_iter()
            .filter(|p| p.is_valid())
            .fold(None, |acc: Option<Bounds>, p| {
                Some(match acc {
                    None => Bounds {
                        min_lat: p.latitude,
                        max_lat: p.latitude,
                        min_lng: p.longitude,
                        max_lng: p.longitude,
                    },
                    Some(b) => Bounds {
                        min_lat: b.min_lat.min(p.latitude),
                        max_lat: b.max_lat.max(p.latitude),
                        min_lng: b.min_lng.min(p.longitude),
                        max_lng: b.max_lng.max(p.longitude),
                    },
                })
            })
    }

    /// Check whether a coordinate lies inside (edges included).
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

/// Position in the local plane projection (meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// All three coordinates are usable.
    pub fn is_complete(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Horizontal part as a geo coordinate.
    pub fn coord(&self) -> Coord<f64> {
        Coord {
            x: self.x,
            y: self.y,
        }
    }

    /// Horizontal (planar) distance to another position.
    pub fn planar_distance(&self, other: &Position) -> f64 {
        let d = self.coord() - other.coord();
        d.x.hypot(d.y)
    }

    /// Position halfway between two positions.
    pub fn midpoint(&self, other: &Position) -> Position {
        let mid = (self.coord() + other.coord()) / 2.0;
        Position::new(mid.x, mid.y, (self.z + other.z) / 2.0)
    }
}

/// Measurement axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

/// Which axes a sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Height (or a single scalar) only
    #[default]
    Height,
    /// Horizontal position (or two tilt axes) only
    Plane,
    /// Full 3-D position
    Full3d,
}

impl Dimension {
    /// Axes that carry meaningful values for this dimension.
    pub fn axes(&self) -> &'static [Axis] {
        match self {
            Dimension::Height => &[Axis::Z],
            Dimension::Plane => &[Axis::X, Axis::Y],
            Dimension::Full3d => &[Axis::X, Axis::Y, Axis::Z],
        }
    }

    pub fn includes(&self, axis: Axis) -> bool {
        self.axes().contains(&axis)
    }
}

/// Raw measured values of one observation.
///
/// x/y/z are easting/northing/height for geodetic points, tilt axes for
/// inclinometers; single-value sensors report `z`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Components {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl Components {
    pub fn height(z: f64) -> Self {
        Self {
            z: Some(z),
            ..Self::default()
        }
    }

    pub fn plane(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: None,
        }
    }

    pub fn full(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    pub fn get(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Value on `axis` if the dimension measures it and it is finite.
    pub fn measured(&self, axis: Axis, dimension: Dimension) -> Option<f64> {
        if !dimension.includes(axis) {
            return None;
        }
        self.get(axis).filter(|v| v.is_finite())
    }

    /// Component-wise `self - other`, restricted to the dimension's axes.
    pub fn difference(&self, other: &Components, dimension: Dimension) -> Delta {
        let diff = |axis| Some(self.measured(axis, dimension)? - other.measured(axis, dimension)?);
        Delta::new(diff(Axis::X), diff(Axis::Y), diff(Axis::Z))
    }
}

// ============================================================================
// Input Records
// ============================================================================

/// Control point as delivered by the project loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPointRecord {
    pub name: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub dimension: Dimension,
    #[serde(default)]
    pub zero_position: Option<Position>,
    #[serde(default)]
    pub wgs84: Option<GpsPoint>,
    #[serde(default)]
    pub limits: AlarmLimits,
    /// Never chosen as a convergence group anchor
    #[serde(default)]
    pub anchor_excluded: bool,
}

impl ControlPointRecord {
    pub fn new(name: &str, dimension: Dimension) -> Self {
        Self {
            name: name.to_string(),
            origin: String::new(),
            category: String::new(),
            dimension,
            zero_position: None,
            wgs84: None,
            limits: AlarmLimits::default(),
            anchor_excluded: false,
        }
    }

    pub fn at(mut self, position: Position) -> Self {
        self.zero_position = Some(position);
        self
    }
}

/// Observation as delivered by the project loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub point: String,
    pub timestamp: NaiveDateTime,
    pub values: Components,
    #[serde(default)]
    pub is_zero: bool,
    #[serde(default)]
    pub is_replacement: bool,
}

impl ObservationRecord {
    pub fn new(point: &str, timestamp: NaiveDateTime, values: Components) -> Self {
        Self {
            point: point.to_string(),
            timestamp,
            values,
            is_zero: false,
            is_replacement: false,
        }
    }

    /// Flag as the zero measurement.
    pub fn zero(mut self) -> Self {
        self.is_zero = true;
        self
    }

    /// Flag as a sensor/prism replacement.
    pub fn replacement(mut self) -> Self {
        self.is_replacement = true;
        self
    }
}

/// Everything one load consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectData {
    pub points: Vec<ControlPointRecord>,
    pub observations: Vec<ObservationRecord>,
    #[serde(default)]
    pub groups: Vec<GroupDefinition>,
}

// ============================================================================
// Derived Model
// ============================================================================

/// One measurement event with its derived deltas and alarm levels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Name of the owning control point (lookup only)
    pub point: String,
    pub timestamp: NaiveDateTime,
    pub values: Components,
    pub is_zero: bool,
    pub is_replacement: bool,
    /// Cumulative displacement since the zero measurement
    pub delta_zero: Option<Delta>,
    /// Incremental change since the previous observation
    pub delta_prior: Option<Delta>,
    pub alarms: ComponentAlarms,
}

impl Observation {
    pub fn new(point: &str, timestamp: NaiveDateTime, values: Components) -> Self {
        Self {
            point: point.to_string(),
            timestamp,
            values,
            is_zero: false,
            is_replacement: false,
            delta_zero: None,
            delta_prior: None,
            alarms: ComponentAlarms::default(),
        }
    }

    fn from_record(record: ObservationRecord) -> Self {
        Self {
            is_zero: record.is_zero,
            is_replacement: record.is_replacement,
            ..Self::new(&record.point, record.timestamp, record.values)
        }
    }

    /// Overall alarm level of the cumulative delta.
    pub fn alarm(&self) -> AlarmLevel {
        self.alarms.overall
    }
}

/// Chronological observation list with its reference dates.
///
/// Shared by control points, pairs and convergence groups so the same
/// reference/delta/alarm/temporal pipeline runs over all of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    pub(crate) observations: Vec<Observation>,
    pub(crate) zero_date: Option<NaiveDateTime>,
    pub(crate) first_date: Option<NaiveDateTime>,
    pub(crate) last_date: Option<NaiveDateTime>,
}

impl Series {
    /// Build a series, stably sorting observations by timestamp.
    pub fn new(mut observations: Vec<Observation>) -> Self {
        observations.sort_by_key(|o| o.timestamp);
        Self {
            observations,
            ..Self::default()
        }
    }

    /// All observations in chronological order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Timestamp of the first zero-flagged observation.
    pub fn zero_date(&self) -> Option<NaiveDateTime> {
        self.zero_date
    }

    pub fn first_date(&self) -> Option<NaiveDateTime> {
        self.first_date
    }

    pub fn last_date(&self) -> Option<NaiveDateTime> {
        self.last_date
    }

    /// Observation at an exact timestamp.
    pub fn at(&self, timestamp: NaiveDateTime) -> Option<&Observation> {
        self.observations
            .binary_search_by_key(&timestamp, |o| o.timestamp)
            .ok()
            .map(|i| &self.observations[i])
    }

    pub fn zero_observation(&self) -> Option<&Observation> {
        self.at(self.zero_date?)
    }

    pub fn latest(&self) -> Option<&Observation> {
        self.observations.last()
    }

    /// Alarm level of the latest observation (`NoData` when empty).
    pub fn latest_alarm(&self) -> AlarmLevel {
        self.latest().map(|o| o.alarm()).unwrap_or(AlarmLevel::NoData)
    }
}

/// A monitored physical location with raw and derived data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlPoint {
    pub name: String,
    pub origin: String,
    pub category: String,
    pub dimension: Dimension,
    pub zero_position: Option<Position>,
    pub wgs84: Option<GpsPoint>,
    pub limits: AlarmLimits,
    pub anchor_excluded: bool,
    pub series: Series,
}

impl ControlPoint {
    fn from_record(record: ControlPointRecord, observations: Vec<Observation>) -> Self {
        Self {
            name: record.name,
            origin: record.origin,
            category: record.category,
            dimension: record.dimension,
            zero_position: record.zero_position,
            wgs84: record.wgs84,
            limits: record.limits,
            anchor_excluded: record.anchor_excluded,
            series: Series::new(observations),
        }
    }

    pub fn observations(&self) -> &[Observation] {
        self.series.observations()
    }

    pub fn latest_date(&self) -> Option<NaiveDateTime> {
        self.series.last_date()
    }

    /// Zero position usable for pairing and anchoring.
    pub fn usable_position(&self) -> Option<Position> {
        self.zero_position.filter(|p| p.is_complete())
    }
}
