//! Convergence groups.
//!
//! A group is built from a named, comma-separated list of point names. Its
//! series is the union of the members' observations with duplicate-date
//! collapse: synchronized survey campaigns share a nominal timestamp, so
//! only one observation per timestamp survives. Walking the union in
//! (timestamp, position in the reference list) order, the first observation
//! for a timestamp wins. The union then runs through the same
//! reference/delta/alarm pipeline as a single point.

use std::collections::HashSet;

use geo::{BoundingRect, MultiPoint, Point, Rect};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::alarm::{AlarmLevel, AlarmLimits};
use crate::delta::derive_series;
use crate::error::DataWarning;
use crate::store::PointStore;
use crate::temporal::Monitored;
use crate::{Bounds, ControlPoint, Dimension, Observation, Position, Series};

/// A named reference list as delivered by the project loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: String,
    /// Comma-separated point names
    pub members: String,
}

impl GroupDefinition {
    pub fn new(name: &str, members: &str) -> Self {
        Self {
            name: name.to_string(),
            members: members.to_string(),
        }
    }

    /// Trimmed member names in list order, blanks and repeats removed.
    pub fn member_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.members
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty() && seen.insert(*name))
            .collect()
    }
}

/// Points analyzed together as one synthetic point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceGroup {
    pub name: String,
    /// Resolved member names, in reference-list order
    pub members: Vec<String>,
    /// Member with the highest zero elevation, if any member qualifies
    pub anchor: Option<String>,
    pub anchor_position: Option<Position>,
    /// Planar extent of the members' zero positions
    pub bounds: Option<Rect<f64>>,
    /// Map extent of the members' WGS-84 locations
    pub wgs84_bounds: Option<Bounds>,
    pub dimension: Dimension,
    pub limits: AlarmLimits,
    /// Deduplicated union of member observations
    pub series: Series,
}

impl ConvergenceGroup {
    pub fn alarm(&self) -> AlarmLevel {
        self.series.latest_alarm()
    }

    pub fn contains(&self, point: &str) -> bool {
        self.members.iter().any(|m| m == point)
    }
}

impl Monitored for ConvergenceGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn series(&self) -> &Series {
        &self.series
    }
}

/// Builds convergence groups against a loaded store.
pub struct GroupAggregator;

impl GroupAggregator {
    /// Build one group.
    ///
    /// Unknown member names are reported and skipped. A definition without
    /// any resolvable member yields no group.
    pub fn build(
        definition: &GroupDefinition,
        store: &PointStore,
    ) -> (Option<ConvergenceGroup>, Vec<DataWarning>) {
        let mut warnings = Vec::new();
        let mut members: Vec<&ControlPoint> = Vec::new();

        for name in definition.member_names() {
            match store.get(name) {
                Some(point) => members.push(point),
                None => warnings.push(DataWarning::UnknownGroupMember {
                    group: definition.name.clone(),
                    point: name.to_string(),
                }),
            }
        }

        if members.is_empty() {
            warnings.push(DataWarning::EmptyGroup {
                group: definition.name.clone(),
            });
            return (None, warnings);
        }

        let anchor = select_anchor(&members);
        // Dimension and limits follow the anchor; first member as fallback
        let template = anchor.unwrap_or(members[0]);

        let mut series = Series::new(collapse_union(&members));
        derive_series(&mut series, template.dimension, &template.limits);

        debug!(
            "[GroupAggregator] Group '{}': {} members, {} observations, anchor {:?}",
            definition.name,
            members.len(),
            series.len(),
            anchor.map(|a| a.name.as_str())
        );

        let group = ConvergenceGroup {
            name: definition.name.clone(),
            members: members.iter().map(|m| m.name.clone()).collect(),
            anchor: anchor.map(|a| a.name.clone()),
            anchor_position: anchor.and_then(|a| a.usable_position()),
            bounds: member_bounds(&members),
            wgs84_bounds: Bounds::from_points(members.iter().filter_map(|m| m.wgs84.as_ref())),
            dimension: template.dimension,
            limits: template.limits,
            series,
        };
        (Some(group), warnings)
    }

    /// Build every group, collecting all warnings.
    pub fn build_all(
        definitions: &[GroupDefinition],
        store: &PointStore,
    ) -> (Vec<ConvergenceGroup>, Vec<DataWarning>) {
        let mut groups = Vec::with_capacity(definitions.len());
        let mut warnings = Vec::new();

        for definition in definitions {
            let (group, group_warnings) = Self::build(definition, store);
            for warning in &group_warnings {
                warn!("[GroupAggregator] {}", warning);
            }
            warnings.extend(group_warnings);
            groups.extend(group);
        }

        (groups, warnings)
    }
}

/// Member with the maximum zero elevation among members with a usable zero
/// position that are not excluded. Ties go to the earlier list position.
fn select_anchor<'a>(members: &[&'a ControlPoint]) -> Option<&'a ControlPoint> {
    let mut best: Option<(&'a ControlPoint, f64)> = None;
    for &member in members {
        if member.anchor_excluded {
            continue;
        }
        let Some(position) = member.usable_position() else {
            continue;
        };
        if best.map_or(true, |(_, z)| position.z > z) {
            best = Some((member, position.z));
        }
    }
    best.map(|(member, _)| member)
}

/// Union of member observations, one per timestamp.
fn collapse_union(members: &[&ControlPoint]) -> Vec<Observation> {
    let mut union: Vec<(usize, &Observation)> = members
        .iter()
        .enumerate()
        .flat_map(|(rank, m)| m.observations().iter().map(move |o| (rank, o)))
        .collect();
    union.sort_by_key(|(rank, o)| (o.timestamp, *rank));
    union.dedup_by_key(|(_, o)| o.timestamp);
    union.into_iter().map(|(_, o)| o.clone()).collect()
}

fn member_bounds(members: &[&ControlPoint]) -> Option<Rect<f64>> {
    let points: MultiPoint<f64> = members
        .iter()
        .filter_map(|m| m.usable_position())
        .map(|p| Point::from(p.coord()))
        .collect();
    points.bounding_rect()
}
