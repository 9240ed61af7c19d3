//! # Monitoring Engine
//!
//! Stateful engine that owns one monitored dataset and publishes immutable
//! snapshots of it.
//!
//! ## Architecture
//!
//! The engine is an explicit context object (cheap to clone, shared state
//! behind an `Arc`) that manages:
//! - The point store with derived deltas and alarms
//! - Grade pairs and convergence groups
//! - The current date range and the resulting visible subsets
//!
//! Loads and range changes are serialized by a single writer lock. Readers
//! only ever see complete snapshots: every change builds a new [`Snapshot`]
//! and swaps it in atomically. Listeners are told "re-read the snapshot"
//! after each publish, outside the writer lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::thread;

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info};
use serde::Serialize;

use crate::alarm::{AlarmLevel, AlarmSummary};
use crate::config::{DateBucket, MonitorConfig, PairingBand};
use crate::error::{DataWarning, MonitorError, OptionExt, Result};
use crate::grouping::{ConvergenceGroup, GroupAggregator};
use crate::pairing::{Pair, PairingEngine};
use crate::store::{LoadReport, PointStore};
use crate::temporal::{DateRange, Monitored, TemporalView, VisibleSeries};
use crate::{ControlPoint, Observation, ProjectData, Series};

// ============================================================================
// Core Types
// ============================================================================

/// Engine event types for notifying consumers of a new snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Loaded,
    RangeChanged,
}

/// Handle returned by [`MonitoringEngine::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Result of a background load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The load completed and its snapshot is current
    Published(LoadReport),
    /// A newer load was requested; nothing was published
    Superseded,
}

/// Handle for a background load.
pub struct LoadHandle {
    receiver: mpsc::Receiver<LoadOutcome>,
    ticket: u64,
}

impl LoadHandle {
    /// Check if the load is finished (non-blocking).
    pub fn try_recv(&self) -> Option<LoadOutcome> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the load to finish (blocking).
    pub fn recv(self) -> Option<LoadOutcome> {
        self.receiver.recv().ok()
    }

    /// Load request number; later requests supersede earlier ones.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

/// Everything derived from one load. Immutable once published.
#[derive(Debug, Default)]
pub struct Dataset {
    store: PointStore,
    pairs: Vec<Pair>,
    groups: Vec<ConvergenceGroup>,
    report: LoadReport,
}

impl Dataset {
    pub fn store(&self) -> &PointStore {
        &self.store
    }

    /// Pairs, most significant first.
    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }

    pub fn groups(&self) -> &[ConvergenceGroup] {
        &self.groups
    }

    /// Counts and all data warnings of the load (store and groups).
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn pair(&self, name: &str) -> Option<&Pair> {
        self.pairs.iter().find(|p| p.name == name)
    }

    pub fn group(&self, name: &str) -> Option<&ConvergenceGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// A fully materialized, immutable view of the dataset under one range.
#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    dataset: Arc<Dataset>,
    view: TemporalView,
    bucket: DateBucket,
    bucket_counts: BTreeMap<NaiveDate, usize>,
}

impl Snapshot {
    fn build(generation: u64, dataset: Arc<Dataset>, range: Option<DateRange>, bucket: DateBucket) -> Self {
        let points = dataset.store.all();
        let view = TemporalView::compute(range, points, &dataset.pairs, &dataset.groups);
        let bucket_counts = view.bucket_counts(points, bucket);
        Self {
            generation,
            dataset,
            view,
            bucket,
            bucket_counts,
        }
    }

    /// Publish counter; increases with every load or range change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn range(&self) -> Option<DateRange> {
        self.view.range
    }

    pub fn view(&self) -> &TemporalView {
        &self.view
    }

    /// Visible observation counts per bucket.
    pub fn bucket_counts(&self) -> &BTreeMap<NaiveDate, usize> {
        &self.bucket_counts
    }

    pub fn bucket(&self) -> DateBucket {
        self.bucket
    }

    pub fn diagnostics(&self) -> &[DataWarning] {
        &self.dataset.report.warnings
    }

    /// Visible points in load order.
    pub fn visible_points(&self) -> Vec<&ControlPoint> {
        resolve(&self.view.points, self.dataset.store.all())
    }

    /// Visible pairs, most significant first.
    pub fn visible_pairs(&self) -> Vec<&Pair> {
        resolve(&self.view.pairs, &self.dataset.pairs)
    }

    pub fn visible_groups(&self) -> Vec<&ConvergenceGroup> {
        resolve(&self.view.groups, &self.dataset.groups)
    }

    /// Observations of a point inside the current range.
    ///
    /// Empty for a hidden point; an error for a name that is not loaded.
    pub fn visible_observations(&self, name: &str) -> Result<Vec<&Observation>> {
        let point = self.dataset.store.get(name).ok_or_unknown_point(name)?;
        let visible = self.view.points.iter().find(|v| v.name == name);
        Ok(visible
            .map(|v| subset(&point.series, &v.observations))
            .unwrap_or_default())
    }

    /// Latest alarm level of every visible point, counted.
    pub fn alarm_summary(&self) -> AlarmSummary {
        let mut summary = AlarmSummary::default();
        for visible in &self.view.points {
            if let Some(point) = self.dataset.store.all().get(visible.index) {
                summary.record(latest_visible_alarm(&point.series, &visible.observations));
            }
        }
        summary
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            generation: self.generation,
            point_count: self.dataset.store.len() as u32,
            observation_count: self.dataset.store.observation_count() as u32,
            pair_count: self.dataset.pairs.len() as u32,
            group_count: self.dataset.groups.len() as u32,
            visible_point_count: self.view.points.len() as u32,
            visible_pair_count: self.view.pairs.len() as u32,
            visible_group_count: self.view.groups.len() as u32,
            warning_count: self.dataset.report.warnings.len() as u32,
        }
    }

    /// Visible state as JSON for rendering collaborators.
    pub fn to_json(&self) -> Result<String> {
        let store = &self.dataset.store;
        let export = SnapshotExport {
            generation: self.generation,
            range: self.view.range,
            points: export_series(&self.view.points, store.all()),
            pairs: export_series(&self.view.pairs, &self.dataset.pairs),
            groups: export_series(&self.view.groups, &self.dataset.groups),
            bucket: self.bucket,
            bucket_counts: &self.bucket_counts,
            alarm_summary: self.alarm_summary(),
            diagnostics: self.diagnostics(),
        };
        Ok(serde_json::to_string(&export)?)
    }
}

fn resolve<'a, T>(visible: &[VisibleSeries], items: &'a [T]) -> Vec<&'a T> {
    visible.iter().filter_map(|v| items.get(v.index)).collect()
}

fn subset<'a>(series: &'a Series, indices: &[usize]) -> Vec<&'a Observation> {
    let observations = series.observations();
    indices.iter().filter_map(|&i| observations.get(i)).collect()
}

fn latest_visible_alarm(series: &Series, indices: &[usize]) -> AlarmLevel {
    indices
        .last()
        .and_then(|&i| series.observations().get(i))
        .map(|o| o.alarm())
        .unwrap_or(AlarmLevel::NoData)
}

#[derive(Serialize)]
struct SeriesExport<'a> {
    name: &'a str,
    alarm: AlarmLevel,
    observations: Vec<&'a Observation>,
}

#[derive(Serialize)]
struct SnapshotExport<'a> {
    generation: u64,
    range: Option<DateRange>,
    points: Vec<SeriesExport<'a>>,
    pairs: Vec<SeriesExport<'a>>,
    groups: Vec<SeriesExport<'a>>,
    bucket: DateBucket,
    bucket_counts: &'a BTreeMap<NaiveDate, usize>,
    alarm_summary: AlarmSummary,
    diagnostics: &'a [DataWarning],
}

fn export_series<'a, T: Monitored>(
    visible: &[VisibleSeries],
    items: &'a [T],
) -> Vec<SeriesExport<'a>> {
    visible
        .iter()
        .filter_map(|v| {
            let item = items.get(v.index)?;
            Some(SeriesExport {
                name: item.name(),
                alarm: latest_visible_alarm(item.series(), &v.observations),
                observations: subset(item.series(), &v.observations),
            })
        })
        .collect()
}

/// Engine statistics for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub generation: u64,
    pub point_count: u32,
    pub observation_count: u32,
    pub pair_count: u32,
    pub group_count: u32,
    pub visible_point_count: u32,
    pub visible_pair_count: u32,
    pub visible_group_count: u32,
    pub warning_count: u32,
}

// ============================================================================
// Monitoring Engine
// ============================================================================

struct Shared {
    config: MonitorConfig,
    band: PairingBand,
    /// Single writer: held for a whole load or range change
    writer: Mutex<()>,
    /// Latest load request; a load whose ticket is no longer current is
    /// superseded
    tickets: AtomicU64,
    published: RwLock<Arc<Snapshot>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

/// The stateful monitoring engine.
#[derive(Clone)]
pub struct MonitoringEngine {
    shared: Arc<Shared>,
}

impl MonitoringEngine {
    /// Create an engine with an empty dataset.
    ///
    /// Rejects invalid configuration.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        let band = config.pairing_band()?;
        let empty = Snapshot::build(0, Arc::new(Dataset::default()), None, config.bucket);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                band,
                writer: Mutex::new(()),
                tickets: AtomicU64::new(0),
                published: RwLock::new(Arc::new(empty)),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let published = self
            .shared
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&published)
    }

    pub fn stats(&self) -> EngineStats {
        self.snapshot().stats()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load a project synchronously and publish it.
    ///
    /// Fails with [`MonitorError::LoadInProgress`] while another load or
    /// range change holds the dataset. Supersedes background loads still
    /// waiting for the dataset.
    pub fn load(&self, data: ProjectData) -> Result<LoadReport> {
        let guard = match self.shared.writer.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(MonitorError::LoadInProgress),
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        self.shared.tickets.fetch_add(1, Ordering::SeqCst);

        let range = self.snapshot().range();
        let dataset = self
            .build_dataset(data, || false)
            .ok_or_internal("synchronous load was cancelled")?;
        let report = dataset.report.clone();
        self.publish(guard, Arc::new(dataset), range, EngineEvent::Loaded);
        Ok(report)
    }

    /// Load a project on a background thread.
    ///
    /// The newest request wins: an earlier background load that has not
    /// published yet abandons its work at the next stage boundary.
    pub fn spawn_load(&self, data: ProjectData) -> LoadHandle {
        let ticket = self.shared.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel();
        let engine = self.clone();

        thread::spawn(move || {
            let outcome = engine.run_background_load(ticket, data);
            let _ = tx.send(outcome);
        });

        LoadHandle {
            receiver: rx,
            ticket,
        }
    }

    fn run_background_load(&self, ticket: u64, data: ProjectData) -> LoadOutcome {
        let guard = self.lock_writer();
        self.finish_background_load(guard, ticket, data, || self.is_superseded(ticket))
    }

    fn is_superseded(&self, ticket: u64) -> bool {
        self.shared.tickets.load(Ordering::SeqCst) != ticket
    }

    /// Build and publish under the writer lock, checking `superseded` at
    /// every stage boundary.
    fn finish_background_load<F>(
        &self,
        guard: MutexGuard<'_, ()>,
        ticket: u64,
        data: ProjectData,
        superseded: F,
    ) -> LoadOutcome
    where
        F: Fn() -> bool,
    {
        if superseded() {
            debug!("[MonitorEngine] Load #{} superseded before start", ticket);
            return LoadOutcome::Superseded;
        }

        let range = self.snapshot().range();
        match self.build_dataset(data, superseded) {
            Some(dataset) => {
                let report = dataset.report.clone();
                self.publish(guard, Arc::new(dataset), range, EngineEvent::Loaded);
                LoadOutcome::Published(report)
            }
            None => {
                debug!("[MonitorEngine] Load #{} superseded", ticket);
                LoadOutcome::Superseded
            }
        }
    }

    /// Run the load pipeline. Returns `None` as soon as `cancelled` reports
    /// true at a stage boundary.
    fn build_dataset<F>(&self, data: ProjectData, cancelled: F) -> Option<Dataset>
    where
        F: Fn() -> bool,
    {
        let ProjectData {
            points,
            observations,
            groups: definitions,
        } = data;

        let (mut store, mut report) = PointStore::load(points, observations);
        if cancelled() {
            return None;
        }

        store.derive();
        if cancelled() {
            return None;
        }

        // Pairs and groups cover the whole store; the range only decides
        // their visibility
        let pairing = PairingEngine::new(
            self.shared.band,
            self.shared.config.pairing.dimension,
            self.shared.config.pair_limits,
        );
        let pairs = pairing.find_pairs(store.all());
        if cancelled() {
            return None;
        }

        let (groups, group_warnings) = GroupAggregator::build_all(&definitions, &store);
        report.warnings.extend(group_warnings);
        if cancelled() {
            return None;
        }

        debug!(
            "[MonitorEngine] Derived {} points, {} pairs, {} groups",
            store.len(),
            pairs.len(),
            groups.len()
        );

        Some(Dataset {
            store,
            pairs,
            groups,
            report,
        })
    }

    // ========================================================================
    // Date Range
    // ========================================================================

    /// Change the visible date range (`None` shows everything).
    ///
    /// Re-filters synchronously; waits for an in-flight load to finish.
    pub fn set_range(&self, range: Option<DateRange>) {
        let guard = self.lock_writer();
        let dataset = Arc::clone(&self.snapshot().dataset);
        self.publish(guard, dataset, range, EngineEvent::RangeChanged);
    }

    /// Validate and apply an inclusive range.
    pub fn set_range_bounds(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<()> {
        let range = DateRange::new(start, end)?;
        self.set_range(Some(range));
        Ok(())
    }

    /// Current range (`None` = everything visible).
    pub fn range(&self) -> Option<DateRange> {
        self.snapshot().range()
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.shared
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in a new snapshot, release the writer, then notify.
    fn publish(&self, guard: MutexGuard<'_, ()>, dataset: Arc<Dataset>, range: Option<DateRange>, event: EngineEvent) {
        let generation = self.snapshot().generation + 1;
        let snapshot = Snapshot::build(generation, dataset, range, self.shared.config.bucket);

        info!(
            "[MonitorEngine] Published snapshot #{} ({:?}): {} of {} points visible",
            generation,
            event,
            snapshot.view.points.len(),
            snapshot.dataset.store.len()
        );

        {
            let mut published = self
                .shared
                .published
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *published = Arc::new(snapshot);
        }
        drop(guard);

        self.notify(event);
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Register a callback invoked once after every publish.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(EngineEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the id was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: EngineEvent) {
        // Callbacks may re-enter the engine; call them without holding locks
        let listeners: Vec<Listener> = self.listeners().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(event);
        }
    }
}
