//! The foreground side of the engine.
//!
//! `TimeGraphViewer` owns the rows, the current-task registries and the redraw state. Builds and
//! zooms run on background threads and send their results back over a channel. Results are only
//! applied here, in [TimeGraphViewer::process_pending], after the staleness gate accepted them.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::build::{BuildJob, BuildScheduler};
use crate::config::EngineConfig;
use crate::dirty::DirtyCounter;
use crate::filter::PredicateSet;
use crate::gate::StalenessGate;
use crate::listener::HostListener;
use crate::materializer::FilterState;
use crate::message::EngineMessage;
use crate::redraw::{RedrawCoalescer, RedrawState};
use crate::row::RowModel;
use crate::source::DataSource;
use crate::task::{TaskHandle, TaskOutcome, TaskScope, TaskTarget};
use crate::types::{DataSourceId, RowId, Sampling, TimePoint};
use crate::zoom::{clamp_window, run_zoom, zoom_resolution, ZoomJob, ZoomScheduler};

pub struct TimeGraphViewer {
    config: EngineConfig,
    listener: Box<dyn HostListener>,

    sources: HashMap<DataSourceId, Arc<dyn DataSource>>,
    models: HashMap<DataSourceId, RowModel>,
    active: Option<DataSourceId>,

    window: Option<(TimePoint, TimePoint)>,
    pixel_width: i64,
    visible_rows: Option<Vec<RowId>>,

    predicates: Arc<PredicateSet>,
    saved_filters_active: bool,
    /// The predicate set went from non-empty to empty, the next zoom must recompute every row.
    filters_cleared: bool,
    /// Filters became active and no zoom has completed a full scan since.
    full_scan_pending: bool,

    gate: StalenessGate,
    dirty: DirtyCounter,
    redraw: RedrawCoalescer,
    builds: BuildScheduler,
    zoom: ZoomScheduler,

    sender: Sender<EngineMessage>,
    receiver: Receiver<EngineMessage>,
}

impl TimeGraphViewer {
    pub fn new(config: EngineConfig, listener: Box<dyn HostListener>) -> TimeGraphViewer {
        let (sender, receiver) = mpsc::channel();
        let predicates = Arc::new(config.predicate_set());
        let saved_filters_active = config.has_active_filters();
        TimeGraphViewer {
            listener,
            sources: HashMap::new(),
            models: HashMap::new(),
            active: None,
            window: None,
            pixel_width: 0,
            visible_rows: None,
            full_scan_pending: saved_filters_active && config.full_scan,
            predicates,
            saved_filters_active,
            filters_cleared: false,
            gate: StalenessGate::new(),
            dirty: DirtyCounter::new(),
            redraw: RedrawCoalescer::new(),
            builds: BuildScheduler::new(),
            zoom: ZoomScheduler::new(),
            sender,
            receiver,
            config,
        }
    }

    /// Register a data source and start building its rows.
    pub fn open_data_source(&mut self, id: DataSourceId, source: Arc<dyn DataSource>) {
        tracing::info!(data_source = %id, name = source.name(), "data source opened");
        if self.sources.insert(id, source).is_some() {
            // Replaced, whatever was built from the old source is stale.
            self.cancel_build(id);
            self.models.remove(&id);
        }
        self.schedule_build(id);
    }

    /// Make `id` the data source the viewer shows. Returns false for unknown data sources.
    pub fn on_trace_selected(&mut self, id: DataSourceId) -> bool {
        let Some(source) = self.sources.get(&id) else {
            tracing::warn!(data_source = %id, "selected data source is not open");
            return false;
        };
        if self.active == Some(id) {
            return true;
        }

        let bounds = source.bounds();
        self.cancel_zoom();
        self.active = Some(id);
        self.window = Some(bounds);
        self.visible_rows = None;
        tracing::info!(data_source = %id, ?bounds, "data source selected");

        // A running build zooms when it finishes.
        if !self.is_building(id) {
            if let Some(model) = self.models.get_mut(&id) {
                // Zoomed content belongs to whatever window was shown last time.
                model.reset_zoom();
                self.request_zoom(bounds.0, bounds.1);
            } else {
                self.schedule_build(id);
            }
        }
        self.request_redraw();
        true
    }

    /// Forget a data source and its rows.
    pub fn on_trace_closed(&mut self, id: DataSourceId) {
        self.cancel_build(id);
        self.sources.remove(&id);
        self.models.remove(&id);
        if self.active == Some(id) {
            self.cancel_zoom();
            self.active = None;
            self.window = None;
            self.visible_rows = None;
        }
        tracing::info!(data_source = %id, "data source closed");
        self.request_redraw();
    }

    /// Cancel the running build, if any, and build again from scratch, e.g. when the data source
    /// received new data.
    pub fn rebuild(&mut self, id: DataSourceId) -> bool {
        self.cancel_build(id);
        self.schedule_build(id)
    }

    /// Start a build unless one is already running for `id`. Returns whether one was started.
    pub fn schedule_build(&mut self, id: DataSourceId) -> bool {
        let Some(source) = self.sources.get(&id) else {
            tracing::warn!(data_source = %id, "cannot build unknown data source");
            return false;
        };
        if self.builds.is_running(id) {
            tracing::debug!(data_source = %id, "build already running");
            return false;
        }

        let handle = TaskHandle::new(self.gate.next_sequence(), TaskTarget::Build(id));
        let job = BuildJob {
            handle: handle.clone(),
            data_source: id,
            source: Arc::clone(source),
            full_event_buckets: self.config.full_event_buckets,
            sender: self.sender.clone(),
        };
        if !self.builds.schedule(job) {
            return false;
        }

        if self.active == Some(id) {
            // A running zoom reads the data this build replaces.
            self.cancel_zoom();
        }
        self.gate.register(&handle);
        self.dirty.increment();
        self.listener.on_build_started(id);
        true
    }

    pub fn cancel_build(&mut self, id: DataSourceId) {
        if let Some(handle) = self.builds.cancel(id) {
            // Results already queued by the cancelled task must not land anymore.
            self.gate.retire(TaskScope::Build(id), handle.seq());
        }
    }

    pub fn notify_window_changed(&mut self, start: TimePoint, end: TimePoint, pixel_width: i64) {
        self.window = Some((start, end));
        self.pixel_width = pixel_width;
        self.request_zoom(start, end);
    }

    pub fn notify_filter_changed(&mut self, predicates: PredicateSet, saved_filters_active: bool) {
        if predicates.is_empty() && !self.predicates.is_empty() {
            self.filters_cleared = true;
        }
        self.full_scan_pending = saved_filters_active && self.config.full_scan;
        self.predicates = Arc::new(predicates);
        self.saved_filters_active = saved_filters_active;
        tracing::debug!(
            predicates = self.predicates.len(),
            saved_filters_active,
            "filters changed"
        );

        if let Some((start, end)) = self.window {
            self.request_zoom(start, end);
        }
    }

    /// Restrict zooming to these rows, `None` zooms every row of the active data source.
    pub fn notify_visible_rows(&mut self, rows: Option<Vec<RowId>>) {
        self.visible_rows = rows;
        if let Some((start, end)) = self.window {
            self.request_zoom(start, end);
        }
    }

    /// Recompute the visible window. Returns the sequence number of the started task, `None`
    /// when nothing needs to be computed.
    pub fn request_zoom(&mut self, start: TimePoint, end: TimePoint) -> Option<u64> {
        let resolution = zoom_resolution(start, end, self.pixel_width)?;
        let data_source = self.active?;
        if self.is_building(data_source) {
            // The build zooms to the current window when it finishes.
            return None;
        }
        let source = Arc::clone(self.sources.get(&data_source)?);
        let (start, end) = clamp_window(start, end, source.bounds())?;
        let sampling = Sampling::new(start, end, resolution);

        let restart = self.zoom.supersede(sampling);
        let rows = self
            .models
            .get(&data_source)
            .map(|model| model.snapshots(self.visible_rows.as_deref()))
            .unwrap_or_default();

        let handle = TaskHandle::new(self.gate.next_sequence(), TaskTarget::Zoom(sampling));
        let seq = handle.seq();
        let force = !self.predicates.is_empty() || self.filters_cleared;
        let job = ZoomJob {
            handle: handle.clone(),
            sampling,
            data_source,
            source,
            rows,
            filters: FilterState {
                predicates: Arc::clone(&self.predicates),
                saved_filters_active: self.saved_filters_active,
            },
            force,
            full_scan: self.full_scan_pending && self.config.full_scan,
            restart,
            sender: self.sender.clone(),
        };

        self.gate.register(&handle);
        self.zoom.set_live(handle);
        self.dirty.increment();
        self.filters_cleared = false;

        let spawned = thread::Builder::new()
            .name(format!("zoom-{seq}"))
            .spawn(move || run_zoom(job));
        if let Err(err) = spawned {
            tracing::error!(seq, error = %err, "failed to spawn zoom thread");
            self.zoom.finish(seq);
            self.gate.retire(TaskScope::Zoom, seq);
            let _ = self.dirty.decrement();
            return None;
        }
        Some(seq)
    }

    fn cancel_zoom(&mut self) {
        if let Some(handle) = self.zoom.cancel() {
            self.gate.retire(TaskScope::Zoom, handle.seq());
        }
    }

    pub fn request_redraw(&mut self) {
        if self.redraw.request() {
            self.listener.on_redraw_needed();
        }
    }

    /// The host finished painting.
    pub fn redraw_completed(&mut self) {
        if self.redraw.complete() {
            self.listener.on_redraw_needed();
        }
    }

    /// Apply everything background tasks have sent so far. Returns the number of messages
    /// handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.receiver.try_recv() {
            self.handle_message(message);
            handled += 1;
        }
        handled
    }

    /// Apply results until no operation is in flight or `timeout` elapsed. Returns whether the
    /// viewer is quiescent.
    pub fn wait_until_quiescent(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_pending();
            if self.dirty.is_quiescent() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(message) => self.handle_message(message),
                Err(RecvTimeoutError::Timeout) => return self.dirty.is_quiescent(),
                // The viewer holds a sender itself, so this can't happen.
                Err(RecvTimeoutError::Disconnected) => return self.dirty.is_quiescent(),
            }
        }
    }

    fn handle_message(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::Commit {
                scope,
                seq,
                data_source,
                mutation,
            } => {
                let models = &mut self.models;
                let sources = &self.sources;
                self.gate.apply_seq(scope, seq, || match scope {
                    TaskScope::Build(_) if sources.contains_key(&data_source) => {
                        mutation(models.entry(data_source).or_default())
                    }
                    TaskScope::Zoom => {
                        if let Some(model) = models.get_mut(&data_source) {
                            mutation(model)
                        }
                    }
                    TaskScope::Build(_) => {}
                });
            }
            EngineMessage::BuildFinished {
                data_source,
                seq,
                outcome,
            } => self.on_build_task_finished(data_source, seq, outcome),
            EngineMessage::ZoomFinished {
                data_source,
                seq,
                outcome,
                rows,
                full_scan_done,
            } => self.on_zoom_task_finished(data_source, seq, outcome, rows, full_scan_done),
        }
    }

    fn on_build_task_finished(
        &mut self,
        data_source: DataSourceId,
        seq: u64,
        outcome: TaskOutcome,
    ) {
        let _ = self.dirty.decrement();
        if !self.gate.retire(TaskScope::Build(data_source), seq) {
            tracing::debug!(%data_source, seq, ?outcome, "superseded build finished");
            return;
        }

        tracing::info!(%data_source, seq, ?outcome, "build finished");
        self.listener.on_build_finished(data_source);
        if outcome == TaskOutcome::Completed && self.active == Some(data_source) {
            let source_bounds = self.sources.get(&data_source).map(|source| source.bounds());
            if let Some((start, end)) = self.window.or(source_bounds) {
                self.window = Some((start, end));
                self.request_zoom(start, end);
            }
        }
        self.request_redraw();
    }

    fn on_zoom_task_finished(
        &mut self,
        data_source: DataSourceId,
        seq: u64,
        outcome: TaskOutcome,
        rows: Vec<RowId>,
        full_scan_done: bool,
    ) {
        let _ = self.dirty.decrement();
        self.zoom.finish(seq);
        if !self.gate.retire(TaskScope::Zoom, seq) {
            tracing::debug!(%data_source, seq, ?outcome, "superseded zoom finished");
            return;
        }

        if full_scan_done {
            self.full_scan_pending = false;
        }
        self.listener.on_zoom_applied(&rows);
        self.request_redraw();
    }

    pub fn active_data_source(&self) -> Option<DataSourceId> {
        self.active
    }

    pub fn rows(&self, id: DataSourceId) -> Option<&RowModel> {
        self.models.get(&id)
    }

    pub fn active_rows(&self) -> Option<&RowModel> {
        self.models.get(&self.active?)
    }

    pub fn window(&self) -> Option<(TimePoint, TimePoint)> {
        self.window
    }

    pub fn predicates(&self) -> &PredicateSet {
        &self.predicates
    }

    pub fn is_full_scan_pending(&self) -> bool {
        self.full_scan_pending
    }

    pub fn dirty_count(&self) -> u64 {
        self.dirty.value()
    }

    pub fn redraw_state(&self) -> RedrawState {
        self.redraw.state()
    }

    /// Whether a build of `id` is running or its results haven't all been applied yet.
    pub fn is_building(&self, id: DataSourceId) -> bool {
        self.builds.is_running(id) || self.gate.current(TaskScope::Build(id)).is_some()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
