//! Zero-date and reference bookkeeping for a series.

use crate::{Observation, Series};

/// Resolves the stored zero date and date span of a series.
pub struct ReferenceResolver;

impl ReferenceResolver {
    /// Record the first zero-flagged timestamp and the first/last dates.
    ///
    /// An empty series, or one without a zero flag, leaves the zero date
    /// absent.
    pub fn resolve(series: &mut Series) {
        series.zero_date = series
            .observations
            .iter()
            .find(|o| o.is_zero)
            .map(|o| o.timestamp);
        series.first_date = series.observations.first().map(|o| o.timestamp);
        series.last_date = series.observations.last().map(|o| o.timestamp);
    }

    /// Index of the observation that starts the currently valid measurement
    /// run: the latest zero or replacement observation, or 0.
    pub fn current_run_start(series: &Series) -> usize {
        series
            .observations
            .iter()
            .rposition(|o| o.is_zero || o.is_replacement)
            .unwrap_or(0)
    }

    /// Observations of the currently valid measurement run.
    pub fn current_run(series: &Series) -> &[Observation] {
        let start = Self::current_run_start(series);
        &series.observations[start..]
    }
}
