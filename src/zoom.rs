//! Single-flight recomputation of the visible window.
//!
//! A new request cancels the live zoom task and starts a fresh one. Cancellation is cooperative:
//! the task looks at its flag between rows and between phases, never in the middle of a row.
//! Whatever a superseded task still sends is dropped by the staleness gate.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use crate::materializer::{can_skip, materialize, scan_window, FilterState, Materialized};
use crate::message::EngineMessage;
use crate::row::RowSnapshot;
use crate::source::DataSource;
use crate::task::{lock_unpoisoned, run_guarded, TaskHandle, TaskOutcome, TaskScope, TaskTarget};
use crate::types::{DataSourceId, Event, RowId, Sampling, TimePoint};

/// Duration of one pixel, `None` when nothing is visible.
pub fn zoom_resolution(start: TimePoint, end: TimePoint, pixel_width: i64) -> Option<TimePoint> {
    if pixel_width <= 0 || end <= start {
        return None;
    }
    Some((end.saturating_sub(start) / pixel_width).max(1))
}

/// Clamp a window into the data source bounds, `None` if nothing is left.
pub fn clamp_window(
    start: TimePoint,
    end: TimePoint,
    (bounds_start, bounds_end): (TimePoint, TimePoint),
) -> Option<(TimePoint, TimePoint)> {
    let start = start.clamp(bounds_start, bounds_end);
    let end = end.clamp(bounds_start, bounds_end);
    (start < end).then_some((start, end))
}

/// Holds the logically current zoom task.
#[derive(Debug, Default)]
pub struct ZoomScheduler {
    live: Mutex<Option<TaskHandle>>,
}

impl ZoomScheduler {
    pub fn new() -> ZoomScheduler {
        ZoomScheduler::default()
    }

    pub fn live(&self) -> Option<TaskHandle> {
        lock_unpoisoned(&self.live).clone()
    }

    /// Cancel the live task, if any. Returns true when it was computing exactly `target`,
    /// i.e. the new task restarts the same work.
    pub fn supersede(&self, target: Sampling) -> bool {
        let Some(previous) = lock_unpoisoned(&self.live).take() else {
            return false;
        };
        previous.cancel();
        tracing::debug!(seq = previous.seq(), "zoom superseded");
        previous.target() == TaskTarget::Zoom(target)
    }

    pub fn set_live(&self, handle: TaskHandle) {
        *lock_unpoisoned(&self.live) = Some(handle);
    }

    /// Cancel the live task without starting a new one.
    pub fn cancel(&self) -> Option<TaskHandle> {
        let handle = lock_unpoisoned(&self.live).take()?;
        handle.cancel();
        Some(handle)
    }

    /// Forget `seq` if it is still the live task.
    pub fn finish(&self, seq: u64) {
        let mut live = lock_unpoisoned(&self.live);
        if live.as_ref().map(TaskHandle::seq) == Some(seq) {
            *live = None;
        }
    }
}

pub(crate) struct ZoomJob {
    pub handle: TaskHandle,
    pub sampling: Sampling,
    pub data_source: DataSourceId,
    pub source: Arc<dyn DataSource>,
    pub rows: Vec<RowSnapshot>,
    pub filters: FilterState,
    /// Recompute rows even if their sampling already matches.
    pub force: bool,
    /// Run the resolution-1 pass after the coarse one.
    pub full_scan: bool,
    pub restart: bool,
    pub sender: Sender<EngineMessage>,
}

pub(crate) fn run_zoom(job: ZoomJob) {
    tracing::debug!(
        seq = job.handle.seq(),
        sampling = %job.sampling,
        rows = job.rows.len(),
        force = job.force,
        full_scan = job.full_scan,
        restart = job.restart,
        "zoom started"
    );

    let mut committed = Vec::new();
    let (outcome, full_scan_done) =
        run_guarded("zoom", job.handle.seq(), (TaskOutcome::Failed, false), || {
            zoom_passes(&job, &mut committed)
        });

    committed.sort_unstable();
    committed.dedup();
    tracing::debug!(
        seq = job.handle.seq(),
        ?outcome,
        committed = committed.len(),
        "zoom finished"
    );

    let _ = job.sender.send(EngineMessage::ZoomFinished {
        data_source: job.data_source,
        seq: job.handle.seq(),
        outcome,
        rows: committed,
        full_scan_done,
    });
}

/// The coarse pass, then the full scan if asked for. Also returns whether the full scan completed.
fn zoom_passes(job: &ZoomJob, committed: &mut Vec<RowId>) -> (TaskOutcome, bool) {
    let outcome = zoom_pass(job, job.sampling.resolution, committed);
    if outcome != TaskOutcome::Completed || !job.full_scan {
        return (outcome, false);
    }
    let outcome = zoom_pass(job, 1, committed);
    (outcome, outcome == TaskOutcome::Completed)
}

/// One pass over all rows at `resolution`. The coarse pass and the full scan both commit with
/// the viewport's sampling.
fn zoom_pass(job: &ZoomJob, resolution: TimePoint, committed: &mut Vec<RowId>) -> TaskOutcome {
    let cancel = job.handle.cancel_flag();
    for row in &job.rows {
        if cancel.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        if can_skip(row, &job.sampling, job.force) {
            continue;
        }

        let events = match scan_window(row, job.sampling.start, job.sampling.end) {
            None => Vec::new(),
            Some(scan) => {
                match materialize(
                    job.source.as_ref(),
                    row.id,
                    scan,
                    resolution,
                    &job.filters,
                    &cancel,
                ) {
                    Materialized::Events(events) => events,
                    Materialized::Cancelled => return TaskOutcome::Cancelled,
                    Materialized::Failed => continue,
                }
            }
        };

        if !commit_row(job, row.id, events) {
            return TaskOutcome::Cancelled;
        }
        committed.push(row.id);
    }
    TaskOutcome::Completed
}

fn commit_row(job: &ZoomJob, row_id: RowId, events: Vec<Event>) -> bool {
    let sampling = job.sampling;
    job.sender
        .send(EngineMessage::Commit {
            scope: TaskScope::Zoom,
            seq: job.handle.seq(),
            data_source: job.data_source,
            mutation: Box::new(move |model| {
                if let Some(row) = model.find_mut(row_id) {
                    row.zoomed_events = events;
                    row.current_sampling = Some(sampling);
                }
            }),
        })
        .is_ok()
}
