//! Background construction of a data source's row hierarchy.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::filter::PredicateSet;
use crate::materializer::apply_predicates;
use crate::message::EngineMessage;
use crate::row::{build_row_tree, Row, RowModel};
use crate::source::DataSource;
use crate::task::{lock_unpoisoned, run_guarded, TaskHandle, TaskOutcome, TaskScope};
use crate::task_timer::TaskTimer;
use crate::types::{DataSourceId, TimePoint};

type BuildRegistry = Arc<Mutex<HashMap<DataSourceId, TaskHandle>>>;

/// Keeps at most one live build per data source.
#[derive(Debug, Default)]
pub struct BuildScheduler {
    live: BuildRegistry,
}

pub(crate) struct BuildJob {
    pub handle: TaskHandle,
    pub data_source: DataSourceId,
    pub source: Arc<dyn DataSource>,
    pub full_event_buckets: i64,
    pub sender: Sender<EngineMessage>,
}

impl BuildScheduler {
    pub fn new() -> BuildScheduler {
        BuildScheduler::default()
    }

    pub fn is_running(&self, data_source: DataSourceId) -> bool {
        lock_unpoisoned(&self.live).contains_key(&data_source)
    }

    pub fn live(&self, data_source: DataSourceId) -> Option<TaskHandle> {
        lock_unpoisoned(&self.live).get(&data_source).cloned()
    }

    /// Start the job unless a build for the same data source is live. Returns whether it was
    /// started.
    pub(crate) fn schedule(&self, job: BuildJob) -> bool {
        {
            let mut live = lock_unpoisoned(&self.live);
            if live.contains_key(&job.data_source) {
                tracing::debug!(
                    data_source = %job.data_source,
                    "build already running, ignoring request"
                );
                return false;
            }
            live.insert(job.data_source, job.handle.clone());
        }

        let registry = Arc::clone(&self.live);
        let data_source = job.data_source;
        let seq = job.handle.seq();
        let spawned = thread::Builder::new()
            .name(format!("build-{}", data_source.0))
            .spawn(move || run_build(job, registry));

        if let Err(err) = spawned {
            tracing::error!(%data_source, error = %err, "failed to spawn build thread");
            self.finish(data_source, seq);
            return false;
        }
        true
    }

    /// Cancel the live build of `data_source`, if there is one, and return its handle.
    pub fn cancel(&self, data_source: DataSourceId) -> Option<TaskHandle> {
        let handle = lock_unpoisoned(&self.live).remove(&data_source)?;
        handle.cancel();
        tracing::debug!(%data_source, seq = handle.seq(), "build cancelled");
        Some(handle)
    }

    fn finish(&self, data_source: DataSourceId, seq: u64) {
        remove_if_current(&self.live, data_source, seq);
    }
}

/// A finished task removes its own entry, unless it was cancelled and replaced in the meantime.
fn remove_if_current(
    registry: &Mutex<HashMap<DataSourceId, TaskHandle>>,
    data_source: DataSourceId,
    seq: u64,
) {
    let mut live = lock_unpoisoned(registry);
    if live.get(&data_source).map(TaskHandle::seq) == Some(seq) {
        live.remove(&data_source);
    }
}

fn run_build(job: BuildJob, registry: BuildRegistry) {
    let timer = TaskTimer::new(format!("build {}", job.source.name()));
    let outcome = run_guarded("build", job.handle.seq(), TaskOutcome::Failed, || build_rows(&job));
    timer.stop();

    remove_if_current(&registry, job.data_source, job.handle.seq());
    // The viewer may be gone already, nobody is left to care.
    let _ = job.sender.send(EngineMessage::BuildFinished {
        data_source: job.data_source,
        seq: job.handle.seq(),
        outcome,
    });
}

fn build_rows(job: &BuildJob) -> TaskOutcome {
    let entries = match job.source.entries() {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(source = job.source.name(), error = %err, "failed to list rows");
            return TaskOutcome::Failed;
        }
    };
    if job.handle.is_cancelled() {
        return TaskOutcome::Cancelled;
    }

    let roots = build_row_tree(&entries);
    tracing::debug!(
        source = job.source.name(),
        entries = entries.len(),
        roots = roots.len(),
        "row tree assembled"
    );

    if !commit(job, |model| model.clear()) {
        return TaskOutcome::Cancelled;
    }

    for mut root in roots {
        if job.handle.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        root.visit_mut(&mut |row| compute_full_events(job, row));
        if job.handle.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        if !commit(job, move |model| model.push_root(root)) {
            return TaskOutcome::Cancelled;
        }
    }

    TaskOutcome::Completed
}

fn compute_full_events(job: &BuildJob, row: &mut Row) {
    if row.time_start >= row.time_end {
        return;
    }
    let resolution = full_resolution(row.time_start, row.time_end, job.full_event_buckets);
    match job
        .source
        .intervals(row.id, row.time_start, row.time_end, resolution)
    {
        Ok(intervals) => row.full_events = apply_predicates(&intervals, &PredicateSet::new()),
        Err(err) => tracing::warn!(
            source = job.source.name(),
            row = row.id,
            error = %err,
            "failed to query full events"
        ),
    }
}

pub fn full_resolution(start: TimePoint, end: TimePoint, buckets: i64) -> TimePoint {
    (end.saturating_sub(start) / buckets.max(1)).max(1)
}

/// Returns false when the viewer hung up.
fn commit(job: &BuildJob, mutation: impl FnOnce(&mut RowModel) + Send + 'static) -> bool {
    job.sender
        .send(EngineMessage::Commit {
            scope: TaskScope::Build(job.data_source),
            seq: job.handle.seq(),
            data_source: job.data_source,
            mutation: Box::new(mutation),
        })
        .is_ok()
}
