//! Alarm level evaluation.
//!
//! Each control point carries warning/critical limit pairs per measured
//! component. Evaluating a delta against those limits is a pure function of
//! the two inputs.
//!
//! Boundary policy: a magnitude equal to a threshold has reached that level.
//!
//! ## Example
//! ```rust
//! use monitor_engine::alarm::{evaluate, AlarmLevel, AlarmLimits, LimitPair};
//! use monitor_engine::Delta;
//!
//! let limits = AlarmLimits {
//!     z: Some(LimitPair::new(2.0, 5.0).unwrap()),
//!     ..AlarmLimits::default()
//! };
//! let delta = Delta::new(None, None, Some(-2.0));
//! assert_eq!(evaluate(Some(&delta), &limits), AlarmLevel::Warning);
//! assert_eq!(evaluate(None, &limits), AlarmLevel::NoData);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::{Delta, Series};

/// Discrete alarm severity, ordered from `NoData` to `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmLevel {
    #[default]
    NoData,
    Nominal,
    Warning,
    Critical,
}

impl AlarmLevel {
    /// Numeric code (-1 no data, 0 nominal, 1 warning, 2 critical).
    pub fn as_i8(&self) -> i8 {
        match self {
            AlarmLevel::NoData => -1,
            AlarmLevel::Nominal => 0,
            AlarmLevel::Warning => 1,
            AlarmLevel::Critical => 2,
        }
    }
}

/// Warning and critical thresholds for one component.
///
/// Always valid once constructed: finite, `0 <= warning < critical`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLimitPair")]
pub struct LimitPair {
    warning: f64,
    critical: f64,
}

#[derive(Deserialize)]
struct RawLimitPair {
    warning: f64,
    critical: f64,
}

impl TryFrom<RawLimitPair> for LimitPair {
    type Error = MonitorError;

    fn try_from(raw: RawLimitPair) -> Result<Self> {
        LimitPair::new(raw.warning, raw.critical)
    }
}

impl LimitPair {
    pub fn new(warning: f64, critical: f64) -> Result<Self> {
        if !warning.is_finite() || !critical.is_finite() {
            return Err(MonitorError::InvalidConfig {
                message: format!("alarm limits must be finite ({}, {})", warning, critical),
            });
        }
        if warning < 0.0 || warning >= critical {
            return Err(MonitorError::InvalidConfig {
                message: format!(
                    "alarm limits need 0 <= warning < critical, got {} / {}",
                    warning, critical
                ),
            });
        }
        Ok(Self { warning, critical })
    }

    pub fn warning(&self) -> f64 {
        self.warning
    }

    pub fn critical(&self) -> f64 {
        self.critical
    }

    /// Classify a signed value by its magnitude.
    pub fn classify(&self, value: f64) -> AlarmLevel {
        let magnitude = value.abs();
        if magnitude >= self.critical {
            AlarmLevel::Critical
        } else if magnitude >= self.warning {
            AlarmLevel::Warning
        } else {
            AlarmLevel::Nominal
        }
    }
}

/// Per-component limits owned by a control point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmLimits {
    pub x: Option<LimitPair>,
    pub y: Option<LimitPair>,
    pub z: Option<LimitPair>,
    /// Combined horizontal displacement
    pub planar: Option<LimitPair>,
}

impl AlarmLimits {
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none() && self.planar.is_none()
    }
}

/// Alarm level per component plus the overall (maximum) level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ComponentAlarms {
    pub x: AlarmLevel,
    pub y: AlarmLevel,
    pub z: AlarmLevel,
    pub planar: AlarmLevel,
    pub overall: AlarmLevel,
}

fn component_level(value: Option<f64>, limits: Option<&LimitPair>) -> AlarmLevel {
    match value {
        None => AlarmLevel::NoData,
        Some(v) => limits.map_or(AlarmLevel::Nominal, |pair| pair.classify(v)),
    }
}

/// Evaluate every component of a delta against its limits.
///
/// A present component without configured limits is `Nominal`; an absent
/// component is `NoData`. The overall level is the highest of them.
pub fn evaluate_components(delta: Option<&Delta>, limits: &AlarmLimits) -> ComponentAlarms {
    let Some(delta) = delta else {
        return ComponentAlarms::default();
    };

    let x = component_level(delta.dx, limits.x.as_ref());
    let y = component_level(delta.dy, limits.y.as_ref());
    let z = component_level(delta.dz, limits.z.as_ref());
    let planar = component_level(delta.planar(), limits.planar.as_ref());
    let overall = x.max(y).max(z).max(planar);

    ComponentAlarms {
        x,
        y,
        z,
        planar,
        overall,
    }
}

/// Map a delta to a single alarm level. Absent delta yields `NoData`.
pub fn evaluate(delta: Option<&Delta>, limits: &AlarmLimits) -> AlarmLevel {
    evaluate_components(delta, limits).overall
}

/// Number of series per latest alarm level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AlarmSummary {
    pub no_data: u32,
    pub nominal: u32,
    pub warning: u32,
    pub critical: u32,
}

impl AlarmSummary {
    pub fn from_series<'a, I>(series: I) -> Self
    where
        I: IntoIterator<Item = &'a Series>,
    {
        let mut summary = Self::default();
        for s in series {
            summary.record(s.latest_alarm());
        }
        summary
    }

    pub fn record(&mut self, level: AlarmLevel) {
        match level {
            AlarmLevel::NoData => self.no_data += 1,
            AlarmLevel::Nominal => self.nominal += 1,
            AlarmLevel::Warning => self.warning += 1,
            AlarmLevel::Critical => self.critical += 1,
        }
    }

    /// Highest level recorded at least once.
    pub fn highest(&self) -> AlarmLevel {
        if self.critical > 0 {
            AlarmLevel::Critical
        } else if self.warning > 0 {
            AlarmLevel::Warning
        } else if self.nominal > 0 {
            AlarmLevel::Nominal
        } else {
            AlarmLevel::NoData
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn height_limits(warning: f64, critical: f64) -> AlarmLimits {
        AlarmLimits {
            z: Some(LimitPair::new(warning, critical).unwrap()),
            ..AlarmLimits::default()
        }
    }

    #[test]
    fn test_level_ordering_and_codes() {
        assert!(AlarmLevel::NoData < AlarmLevel::Nominal);
        assert!(AlarmLevel::Warning < AlarmLevel::Critical);
        assert_eq!(AlarmLevel::NoData.as_i8(), -1);
        assert_eq!(AlarmLevel::Critical.as_i8(), 2);
    }

    #[test]
    fn test_limit_pair_validation() {
        assert!(LimitPair::new(2.0, 5.0).is_ok());
        assert!(LimitPair::new(5.0, 5.0).is_err());
        assert!(LimitPair::new(6.0, 5.0).is_err());
        assert!(LimitPair::new(-1.0, 5.0).is_err());
        assert!(LimitPair::new(1.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_limit_pair_deserialization_validates() {
        let ok: LimitPair = serde_json::from_str(r#"{"warning": 1.0, "critical": 3.0}"#).unwrap();
        assert_eq!(ok.critical(), 3.0);
        let bad: std::result::Result<LimitPair, _> =
            serde_json::from_str(r#"{"warning": 3.0, "critical": 1.0}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_height_scenario_reaches_warning() {
        let limits = height_limits(2.0, 5.0);
        let delta = Delta::new(None, None, Some(2.5));
        assert_eq!(evaluate(Some(&delta), &limits), AlarmLevel::Warning);
    }

    #[test]
    fn test_threshold_boundaries_are_closed() {
        let limits = height_limits(2.0, 5.0);
        let at = |v: f64| evaluate(Some(&Delta::new(None, None, Some(v))), &limits);

        assert_eq!(at(1.999), AlarmLevel::Nominal);
        assert_eq!(at(2.0), AlarmLevel::Warning);
        assert_eq!(at(-2.0), AlarmLevel::Warning);
        assert_eq!(at(4.999), AlarmLevel::Warning);
        assert_eq!(at(5.0), AlarmLevel::Critical);
        assert_eq!(at(-7.0), AlarmLevel::Critical);
    }

    #[test]
    fn test_evaluate_is_pure() {
        let limits = height_limits(2.0, 5.0);
        let delta = Delta::new(None, None, Some(5.0));
        let first = evaluate(Some(&delta), &limits);
        for _ in 0..10 {
            assert_eq!(evaluate(Some(&delta), &limits), first);
        }
    }

    #[test]
    fn test_absent_delta_is_no_data() {
        let limits = height_limits(2.0, 5.0);
        assert_eq!(evaluate(None, &limits), AlarmLevel::NoData);

        // Present delta without the limited component
        let delta = Delta::new(None, None, None);
        assert_eq!(evaluate(Some(&delta), &limits), AlarmLevel::NoData);
    }

    #[test]
    fn test_unlimited_component_is_nominal() {
        let delta = Delta::new(Some(100.0), None, None);
        assert_eq!(evaluate(Some(&delta), &AlarmLimits::default()), AlarmLevel::Nominal);
    }

    #[test]
    fn test_planar_limit_uses_combined_magnitude() {
        let limits = AlarmLimits {
            x: Some(LimitPair::new(4.0, 10.0).unwrap()),
            y: Some(LimitPair::new(4.0, 10.0).unwrap()),
            planar: Some(LimitPair::new(4.0, 5.0).unwrap()),
            ..AlarmLimits::default()
        };
        // 3-4-5 triangle: each axis nominal, combined critical
        let delta = Delta::new(Some(3.0), Some(4.0), None);
        let alarms = evaluate_components(Some(&delta), &limits);
        assert_eq!(alarms.x, AlarmLevel::Nominal);
        assert_eq!(alarms.y, AlarmLevel::Warning);
        assert_eq!(alarms.planar, AlarmLevel::Critical);
        assert_eq!(alarms.z, AlarmLevel::NoData);
        assert_eq!(alarms.overall, AlarmLevel::Critical);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = AlarmSummary::default();
        assert_eq!(summary.highest(), AlarmLevel::NoData);
        summary.record(AlarmLevel::Nominal);
        summary.record(AlarmLevel::Warning);
        summary.record(AlarmLevel::Warning);
        assert_eq!(summary.warning, 2);
        assert_eq!(summary.highest(), AlarmLevel::Warning);
    }
}
