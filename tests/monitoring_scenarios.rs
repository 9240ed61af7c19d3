//! End-to-end monitoring scenarios through the public engine API.
//!
//! Covers the full pipeline: project load -> references and deltas ->
//! alarms -> pairs and groups -> date-range views -> snapshot export.
//!
//! Run with: `cargo test --test monitoring_scenarios`
//! Logging: `RUST_LOG=debug cargo test --test monitoring_scenarios -- --nocapture`

use chrono::{NaiveDate, NaiveDateTime};
use monitor_engine::{
    evaluate, AlarmLevel, AlarmLimits, Components, ControlPointRecord, DataWarning, DateRange,
    Delta, Dimension, GroupDefinition, LimitPair, LoadOutcome, MonitorConfig, MonitoringEngine,
    ObservationRecord, Position, ProjectData,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ts(month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, month, day)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
}

fn height_point(name: &str, x: f64, y: f64) -> ControlPointRecord {
    ControlPointRecord::new(name, Dimension::Height).at(Position::new(x, y, 400.0))
}

/// Leveling campaign: every point measured on the same three dates.
fn leveling_project(names: &[(&str, f64, f64)]) -> ProjectData {
    let mut points = Vec::new();
    let mut observations = Vec::new();
    for (k, &(name, x, y)) in names.iter().enumerate() {
        points.push(height_point(name, x, y));
        let base = 400.0 + k as f64;
        observations.push(ObservationRecord::new(name, ts(1, 10), Components::height(base)).zero());
        observations.push(ObservationRecord::new(name, ts(2, 10), Components::height(base - 0.001 * k as f64)));
        observations.push(ObservationRecord::new(name, ts(3, 10), Components::height(base - 0.002 * k as f64)));
    }
    ProjectData {
        points,
        observations,
        groups: vec![],
    }
}

fn engine_with(config: MonitorConfig) -> MonitoringEngine {
    init_logging();
    MonitoringEngine::new(config).unwrap()
}

// ============================================================================
// Deltas and References
// ============================================================================

#[test]
fn test_zero_observation_delta_is_zero_vector() {
    let engine = engine_with(MonitorConfig::default());
    let data = ProjectData {
        points: vec![ControlPointRecord::new("P", Dimension::Full3d).at(Position::new(1.0, 2.0, 3.0))],
        observations: vec![
            ObservationRecord::new("P", ts(1, 1), Components::full(2_600_000.0, 1_200_000.0, 420.0)),
            ObservationRecord::new("P", ts(1, 2), Components::full(2_600_000.1, 1_200_000.0, 420.0)).zero(),
            ObservationRecord::new("P", ts(1, 3), Components::full(2_600_000.1, 1_199_999.9, 419.9)),
        ],
        groups: vec![],
    };
    engine.load(data).unwrap();

    let snapshot = engine.snapshot();
    let point = snapshot.dataset().store().get("P").unwrap();
    assert_eq!(point.series.zero_date(), Some(ts(1, 2)));
    let zero = point.series.zero_observation().unwrap();
    assert_eq!(zero.delta_zero, Some(Delta::new(Some(0.0), Some(0.0), Some(0.0))));
}

#[test]
fn test_replacement_scenario() {
    let engine = engine_with(MonitorConfig::default());
    let data = ProjectData {
        points: vec![height_point("P", 0.0, 0.0)],
        observations: vec![
            ObservationRecord::new("P", ts(1, 1), Components::height(10.0)).zero(),
            ObservationRecord::new("P", ts(2, 1), Components::height(10.004)),
            ObservationRecord::new("P", ts(3, 1), Components::height(12.0)).replacement(),
            ObservationRecord::new("P", ts(4, 1), Components::height(12.001)),
        ],
        groups: vec![],
    };
    engine.load(data).unwrap();

    let snapshot = engine.snapshot();
    let observations = snapshot.dataset().store().get("P").unwrap().observations();
    assert!(observations[2].delta_prior.is_none());
    assert!((observations[3].delta_prior.unwrap().dz.unwrap() - 0.001).abs() < 1e-9);
    // The prism change itself is not movement
    assert!((observations[3].delta_zero.unwrap().dz.unwrap() - 0.005).abs() < 1e-9);
}

// ============================================================================
// Alarms
// ============================================================================

#[test]
fn test_alarm_is_pure_and_threshold_inclusive() {
    let limits = AlarmLimits {
        z: Some(LimitPair::new(0.01, 0.02).unwrap()),
        ..AlarmLimits::default()
    };
    let at_warning = Delta::new(None, None, Some(0.01));
    let at_critical = Delta::new(None, None, Some(-0.02));
    let below = Delta::new(None, None, Some(0.0099));

    assert_eq!(evaluate(Some(&at_warning), &limits), AlarmLevel::Warning);
    assert_eq!(evaluate(Some(&at_critical), &limits), AlarmLevel::Critical);
    assert_eq!(evaluate(Some(&below), &limits), AlarmLevel::Nominal);
    assert_eq!(evaluate(None, &limits), AlarmLevel::NoData);

    for _ in 0..3 {
        assert_eq!(evaluate(Some(&at_warning), &limits), AlarmLevel::Warning);
    }
}

// ============================================================================
// Pairs
// ============================================================================

#[test]
fn test_pairs_respect_band_and_symmetry() {
    let mut config = MonitorConfig::default();
    config.pairing.min_distance = 1.0;
    config.pairing.max_distance = 10.0;
    let engine = engine_with(config);

    let grid: Vec<(String, f64, f64)> = (0..5)
        .flat_map(|i| (0..5).map(move |j| (format!("P{}{}", i, j), i as f64 * 4.0, j as f64 * 4.0)))
        .collect();
    let names: Vec<(&str, f64, f64)> = grid.iter().map(|(n, x, y)| (n.as_str(), *x, *y)).collect();
    engine.load(leveling_project(&names)).unwrap();

    let snapshot = engine.snapshot();
    let pairs = snapshot.dataset().pairs();
    assert!(!pairs.is_empty());

    let mut seen = std::collections::HashSet::new();
    for pair in pairs {
        assert!(pair.distance > 1.0 && pair.distance < 10.0);
        assert_ne!(pair.a, pair.b);
        assert!(pair.a < pair.b);
        assert!(seen.insert((pair.a.clone(), pair.b.clone())));
        assert!(!seen.contains(&(pair.b.clone(), pair.a.clone())));
    }

    let tilts: Vec<f64> = pairs.iter().map(|p| p.tilt_per_mille.unwrap().abs()).collect();
    assert!(tilts.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn test_minimal_pair() {
    let mut config = MonitorConfig::default();
    config.pairing.min_distance = 1.0;
    config.pairing.max_distance = 10.0;
    let engine = engine_with(config);
    engine
        .load(leveling_project(&[("A", 0.0, 0.0), ("B", 3.0, 0.0)]))
        .unwrap();

    let snapshot = engine.snapshot();
    let pairs = snapshot.dataset().pairs();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].distance, 3.0);
    assert_eq!(pairs[0].name, "A/B");
}

// ============================================================================
// Groups
// ============================================================================

#[test]
fn test_group_keeps_one_observation_per_timestamp() {
    let engine = engine_with(MonitorConfig::default());
    let mut data = leveling_project(&[("A", 0.0, 0.0), ("B", 1.0, 0.0), ("C", 2.0, 0.0)]);
    data.groups = vec![GroupDefinition::new("Section 12", "A,B,C")];
    engine.load(data).unwrap();

    let snapshot = engine.snapshot();
    let group = snapshot.dataset().group("Section 12").unwrap();
    let at_t1: Vec<_> = group
        .series
        .observations()
        .iter()
        .filter(|o| o.timestamp == ts(1, 10))
        .collect();
    assert_eq!(at_t1.len(), 1);
    assert_eq!(at_t1[0].point, "A");
    assert_eq!(group.series.len(), 3);
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn test_unknown_point_and_member_are_reported() {
    let engine = engine_with(MonitorConfig::default());
    let mut data = leveling_project(&[("A", 0.0, 0.0)]);
    data.observations
        .push(ObservationRecord::new("X", ts(1, 10), Components::height(1.0)));
    data.groups = vec![GroupDefinition::new("G", "A,Y")];

    let report = engine.load(data).unwrap();
    assert_eq!(report.dropped_observations, 1);
    assert!(report.warnings.contains(&DataWarning::UnknownPoint {
        point: "X".to_string(),
        timestamp: ts(1, 10),
    }));
    assert!(report.warnings.contains(&DataWarning::UnknownGroupMember {
        group: "G".to_string(),
        point: "Y".to_string(),
    }));

    // Nothing valid was omitted
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.dataset().store().get("A").unwrap().series.len(), 3);
    assert_eq!(snapshot.dataset().group("G").unwrap().members, vec!["A"]);
}

// ============================================================================
// Date Range
// ============================================================================

#[test]
fn test_range_view_is_subsequence_and_idempotent() {
    let engine = engine_with(MonitorConfig::default());
    let mut data = leveling_project(&[("A", 0.0, 0.0), ("B", 5.0, 0.0)]);
    data.points.push(height_point("NEW", 100.0, 0.0));
    data.groups = vec![GroupDefinition::new("G", "A,B")];
    engine.load(data).unwrap();

    let range = DateRange::new(ts(2, 1), ts(3, 31)).unwrap();
    engine.set_range(Some(range));
    let first = engine.snapshot();

    for visible in &first.view().points {
        assert!(visible.observations.windows(2).all(|w| w[0] < w[1]));
        let point = first.dataset().store().get(&visible.name).unwrap();
        for &i in &visible.observations {
            assert!(range.contains(point.observations()[i].timestamp));
        }
    }
    // Never-measured points stay visible
    assert!(first.view().visible_point_names().contains(&"NEW"));
    assert_eq!(first.visible_pairs().len(), 1);
    assert_eq!(first.visible_groups().len(), 1);

    engine.set_range(Some(range));
    let second = engine.snapshot();
    assert_eq!(first.view(), second.view());
    assert_eq!(first.bucket_counts(), second.bucket_counts());

    let feb = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    assert_eq!(first.bucket_counts().get(&feb), Some(&2));
}

#[test]
fn test_range_outside_data_hides_measured_items() {
    let engine = engine_with(MonitorConfig::default());
    let mut data = leveling_project(&[("A", 0.0, 0.0), ("B", 5.0, 0.0)]);
    data.groups = vec![GroupDefinition::new("G", "A,B")];
    engine.load(data).unwrap();

    engine
        .set_range_bounds(ts(9, 1), ts(9, 30))
        .unwrap();
    let snapshot = engine.snapshot();
    assert!(snapshot.visible_points().is_empty());
    assert!(snapshot.visible_pairs().is_empty());
    assert!(snapshot.visible_groups().is_empty());
    assert!(snapshot.bucket_counts().is_empty());
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_project_and_config_from_json() {
    let config = MonitorConfig::from_json(
        r#"{ "pairing": { "min_distance": 0.5, "max_distance": 20.0 }, "bucket": "week" }"#,
    )
    .unwrap();
    let engine = engine_with(config);

    let data: ProjectData = serde_json::from_str(
        r#"{
            "points": [
                { "name": "K1", "dimension": "height",
                  "zero_position": { "x": 0.0, "y": 0.0, "z": 410.0 },
                  "limits": { "z": { "warning": 0.005, "critical": 0.01 } } },
                { "name": "K2", "dimension": "height",
                  "zero_position": { "x": 6.0, "y": 8.0, "z": 411.0 } }
            ],
            "observations": [
                { "point": "K1", "timestamp": "2024-05-06T07:30:00", "values": { "z": 410.000 }, "is_zero": true },
                { "point": "K1", "timestamp": "2024-05-13T07:30:00", "values": { "z": 409.988 } },
                { "point": "K2", "timestamp": "2024-05-06T07:30:00", "values": { "z": 411.000 }, "is_zero": true },
                { "point": "K2", "timestamp": "2024-05-13T07:30:00", "values": { "z": 411.001 } }
            ],
            "groups": [ { "name": "Portal", "members": "K1, K2" } ]
        }"#,
    )
    .unwrap();
    engine.load(data).unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(
        snapshot.dataset().store().get("K1").unwrap().series.latest_alarm(),
        AlarmLevel::Critical
    );
    let pair = &snapshot.dataset().pairs()[0];
    assert_eq!(pair.distance, 10.0);
    assert!((pair.tilt_per_mille.unwrap() - 1.3).abs() < 1e-6);

    let json: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
    assert_eq!(json["bucket"], "week");
    assert_eq!(json["alarm_summary"]["critical"], 1);
    assert_eq!(json["groups"][0]["name"], "Portal");
}

#[test]
fn test_concurrent_loads_publish_newest() {
    let engine = engine_with(MonitorConfig::default());
    let handles: Vec<_> = (1..=6)
        .map(|n| {
            let names: Vec<String> = (0..n).map(|i| format!("P{}", i)).collect();
            let layout: Vec<(&str, f64, f64)> =
                names.iter().enumerate().map(|(i, s)| (s.as_str(), i as f64, 0.0)).collect();
            engine.spawn_load(leveling_project(&layout))
        })
        .collect();

    let outcomes: Vec<LoadOutcome> = handles.into_iter().map(|h| h.recv().unwrap()).collect();
    assert!(matches!(outcomes.last(), Some(LoadOutcome::Published(_))));

    // Readers only ever see a complete dataset: the newest one
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.dataset().store().len(), 6);
    let published = outcomes
        .iter()
        .filter(|o| matches!(o, LoadOutcome::Published(_)))
        .count() as u64;
    assert_eq!(snapshot.generation(), published);
}
