//! Date-range visibility.
//!
//! A caller-selected range decides which points (and pairs and groups) are
//! visible and which of their observations are shown. Visibility is computed
//! fresh on every range change from the immutable all-raw observations, so
//! re-applying a range always yields the same view.
//!
//! Rule, applied identically to points, pairs and groups:
//! - a series with no observations (never measured) is always visible
//! - otherwise it is visible iff at least one observation lies in the range
//! - visible observations are the in-range ones, in original order

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::DateBucket;
use crate::error::{MonitorError, Result};
use crate::{ControlPoint, Series};

/// Inclusive date-time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl DateRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if start > end {
            return Err(MonitorError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    /// Inclusive at both ends.
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

/// Anything that owns a monitored series: points, pairs, groups.
pub trait Monitored {
    fn name(&self) -> &str;
    fn series(&self) -> &Series;
}

impl Monitored for ControlPoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn series(&self) -> &Series {
        &self.series
    }
}

/// A visible item and its visible observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleSeries {
    /// Position of the item in its source list
    pub index: usize,
    pub name: String,
    /// Strictly increasing indices into the item's all-raw observations
    pub observations: Vec<usize>,
}

/// Applies one date range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalFilter {
    range: Option<DateRange>,
}

impl TemporalFilter {
    /// `None` shows everything.
    pub fn new(range: Option<DateRange>) -> Self {
        Self { range }
    }

    pub fn range(&self) -> Option<DateRange> {
        self.range
    }

    /// Visible observation indices of a series, or `None` if the series is
    /// hidden.
    pub fn visible_indices(&self, series: &Series) -> Option<Vec<usize>> {
        let observations = series.observations();
        let Some(range) = self.range else {
            return Some((0..observations.len()).collect());
        };
        if observations.is_empty() {
            return Some(Vec::new());
        }

        // Observations are sorted, so the in-range part is one contiguous run
        let from = observations.partition_point(|o| o.timestamp < range.start);
        let to = observations.partition_point(|o| o.timestamp <= range.end);
        if from >= to {
            return None;
        }
        Some((from..to).collect())
    }

    pub fn is_visible(&self, series: &Series) -> bool {
        self.visible_indices(series).is_some()
    }

    /// Visible items of a list, in list order.
    pub fn apply<T: Monitored>(&self, items: &[T]) -> Vec<VisibleSeries> {
        items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let observations = self.visible_indices(item.series())?;
                Some(VisibleSeries {
                    index,
                    name: item.name().to_string(),
                    observations,
                })
            })
            .collect()
    }
}

/// Visible points, pairs and groups under one range.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemporalView {
    pub range: Option<DateRange>,
    pub points: Vec<VisibleSeries>,
    pub pairs: Vec<VisibleSeries>,
    pub groups: Vec<VisibleSeries>,
}

impl TemporalView {
    pub fn compute<P, Q, G>(range: Option<DateRange>, points: &[P], pairs: &[Q], groups: &[G]) -> Self
    where
        P: Monitored,
        Q: Monitored,
        G: Monitored,
    {
        let filter = TemporalFilter::new(range);
        Self {
            range,
            points: filter.apply(points),
            pairs: filter.apply(pairs),
            groups: filter.apply(groups),
        }
    }

    /// Visible observation counts of the visible points, per date bucket.
    ///
    /// `points` must be the list the view was computed from.
    pub fn bucket_counts<P: Monitored>(&self, points: &[P], bucket: DateBucket) -> BTreeMap<NaiveDate, usize> {
        let mut counts = BTreeMap::new();
        for visible in &self.points {
            let Some(item) = points.get(visible.index) else {
                continue;
            };
            let observations = item.series().observations();
            for &i in &visible.observations {
                if let Some(obs) = observations.get(i) {
                    *counts.entry(bucket.start_of(obs.timestamp.date())).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    pub fn visible_point_names(&self) -> Vec<&str> {
        self.points.iter().map(|v| v.name.as_str()).collect()
    }
}
