//! Unified error handling for the monitoring engine.
//!
//! Two kinds of problems are kept apart here:
//! - [`MonitorError`]: caller-contract violations and invalid configuration,
//!   returned as `Err` at the boundary.
//! - [`DataWarning`]: data-integrity findings in loaded project data. These
//!   never fail a load; they are collected into the load report and logged.

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

/// Error type for monitoring engine operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MonitorError {
    /// Configuration rejected at the boundary
    #[error("Configuration error: {message}")]
    InvalidConfig { message: String },

    /// Date range with start after end
    #[error("Invalid date range: {start} is after {end}")]
    InvalidRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    /// A load was requested while another load holds the dataset
    #[error("A load is already in progress for this dataset")]
    LoadInProgress,

    /// Lookup of a point that is not in the store
    #[error("Unknown control point '{name}'")]
    UnknownPoint { name: String },

    /// Snapshot could not be serialized
    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type alias for monitoring engine operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Extension trait for converting Option to MonitorError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an unknown point error.
    fn ok_or_unknown_point(self, name: &str) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_unknown_point(self, name: &str) -> Result<T> {
        self.ok_or_else(|| MonitorError::UnknownPoint {
            name: name.to_string(),
        })
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| MonitorError::Internal {
            message: message.to_string(),
        })
    }
}

/// Non-fatal data-integrity finding, surfaced next to (never instead of)
/// the loaded data.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataWarning {
    /// Observation references a point name that was not loaded
    #[error("Observation at {timestamp} references unknown point '{point}'")]
    UnknownPoint {
        point: String,
        timestamp: NaiveDateTime,
    },

    /// Second record with an already loaded point name
    #[error("Duplicate control point '{point}' ignored")]
    DuplicatePoint { point: String },

    /// Second observation for the same point and timestamp
    #[error("Duplicate observation for '{point}' at {timestamp} ignored")]
    DuplicateTimestamp {
        point: String,
        timestamp: NaiveDateTime,
    },

    /// Convergence group references a point that is not in the store
    #[error("Group '{group}' references unknown point '{point}'")]
    UnknownGroupMember { group: String, point: String },

    /// Convergence group with no resolvable member
    #[error("Group '{group}' has no resolvable members")]
    EmptyGroup { group: String },

    /// Point cannot be paired or anchor a group
    #[error("Control point '{point}' has no zero position")]
    MissingZeroPosition { point: String },
}
