//! Engine configuration.
//!
//! Configuration comes from the environment (typically a JSON document next
//! to the project). It is validated once, at the boundary; the core only
//! ever sees validated values.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::alarm::AlarmLimits;
use crate::error::{MonitorError, Result};
use crate::Dimension;

/// Distance band for proximity pairing.
///
/// Open at both ends: a pair at distance `d` is kept iff `min < d < max`.
/// Only constructible with `0 <= min < max`, both finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairingBand {
    min: f64,
    max: f64,
}

impl PairingBand {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(MonitorError::InvalidConfig {
                message: format!("pairing band must be finite ({}, {})", min, max),
            });
        }
        if min < 0.0 || min >= max {
            return Err(MonitorError::InvalidConfig {
                message: format!(
                    "pairing band needs 0 <= min_distance < max_distance, got {} / {}",
                    min, max
                ),
            });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Strictly inside the band.
    pub fn contains(&self, distance: f64) -> bool {
        self.min < distance && distance < self.max
    }
}

/// Configuration for proximity pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Pairs must be farther apart than this (meters).
    /// Default: 0.0
    pub min_distance: f64,

    /// Pairs must be closer than this (meters).
    /// Default: 50.0
    pub max_distance: f64,

    /// Only points of this dimension are paired.
    /// Default: Height (grade pairs compare height differences)
    pub dimension: Dimension,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            min_distance: 0.0,
            max_distance: 50.0,
            dimension: Dimension::Height,
        }
    }
}

/// Granularity of range-scoped observation counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateBucket {
    Day,
    /// ISO week, starting Monday
    Week,
    #[default]
    Month,
    Year,
}

impl DateBucket {
    /// First day of the bucket containing `date`.
    pub fn start_of(&self, date: NaiveDate) -> NaiveDate {
        match self {
            DateBucket::Day => date,
            DateBucket::Week => date
                .checked_sub_signed(Duration::days(date.weekday().num_days_from_monday() as i64))
                .unwrap_or(date),
            DateBucket::Month => date.with_day(1).unwrap_or(date),
            DateBucket::Year => date.with_ordinal(1).unwrap_or(date),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub pairing: PairingConfig,

    /// Limits applied to the relative series of every pair.
    /// Default: none (pairs are Nominal or NoData)
    pub pair_limits: AlarmLimits,

    /// Bucket size for observation counts over the visible range.
    /// Default: Month
    pub bucket: DateBucket,
}

impl MonitorConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MonitorConfig =
            serde_json::from_str(json).map_err(|e| MonitorError::InvalidConfig {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything the core relies on.
    pub fn validate(&self) -> Result<()> {
        self.pairing_band().map(|_| ())
    }

    /// The validated pairing band.
    pub fn pairing_band(&self) -> Result<PairingBand> {
        PairingBand::new(self.pairing.min_distance, self.pairing.max_distance)
    }
}
