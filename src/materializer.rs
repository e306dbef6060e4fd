//! Turns a row's raw intervals into the event list that gets painted: tags from the filter
//! predicates, then, while saved filters are active, excluded events replaced by gaps so the
//! row stays contiguous.

use std::sync::Arc;

use crate::filter::PredicateSet;
use crate::row::RowSnapshot;
use crate::source::DataSource;
use crate::task::CancelFlag;
use crate::types::{Event, EventTags, Interval, RowId, Sampling, TimePoint};

/// Filter state a zoom task runs with.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    pub predicates: Arc<PredicateSet>,
    /// At least one saved filter is active, excluded events get removed and gap-filled.
    pub saved_filters_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    Events(Vec<Event>),
    /// The task was cancelled while the data source was being queried.
    Cancelled,
    /// The data source failed, the row keeps whatever it had.
    Failed,
}

/// Whether a zoom can leave this row alone. Tags depend on the filters, so a matching sampling
/// is only enough when no filter is active and none was just cleared.
pub fn can_skip(row: &RowSnapshot, sampling: &Sampling, force: bool) -> bool {
    !force && row.current_sampling.as_ref() == Some(sampling)
}

/// The part of the viewport covered by the row, `None` if they don't intersect.
pub fn scan_window(
    row: &RowSnapshot,
    start: TimePoint,
    end: TimePoint,
) -> Option<(TimePoint, TimePoint)> {
    let scan_start = start.max(row.time_start);
    let scan_end = end.min(row.time_end);
    (scan_start < scan_end).then_some((scan_start, scan_end))
}

pub fn apply_predicates(intervals: &[Interval], predicates: &PredicateSet) -> Vec<Event> {
    intervals
        .iter()
        .map(|interval| {
            let tags = if predicates.is_empty() {
                EventTags::empty()
            } else {
                predicates.tags_for(&interval.attributes)
            };
            Event::from_interval(interval, tags)
        })
        .collect()
}

/// Drop excluded events and fill every hole in `[scan_start, scan_end]` with a gap event.
pub fn fill_gaps(mut events: Vec<Event>, scan_start: TimePoint, scan_end: TimePoint) -> Vec<Event> {
    events.retain(|event| !event.tags.contains(EventTags::EXCLUDED));
    events.sort_by_key(|event| event.start);

    let mut filled = Vec::with_capacity(events.len() * 2 + 1);
    let mut cursor = scan_start;
    for event in events {
        if event.start > cursor {
            filled.push(Event::gap(cursor, event.start));
        }
        cursor = cursor.max(event.end());
        filled.push(event);
    }
    if cursor < scan_end {
        filled.push(Event::gap(cursor, scan_end));
    }
    filled
}

/// Query the source for one row and build its event list.
pub fn materialize(
    source: &dyn DataSource,
    row: RowId,
    (scan_start, scan_end): (TimePoint, TimePoint),
    resolution: TimePoint,
    filters: &FilterState,
    cancel: &CancelFlag,
) -> Materialized {
    let intervals = match source.intervals(row, scan_start, scan_end, resolution) {
        Ok(intervals) => intervals,
        Err(err) => {
            tracing::warn!(source = source.name(), row, error = %err, "data source query failed");
            return Materialized::Failed;
        }
    };
    if cancel.is_cancelled() {
        return Materialized::Cancelled;
    }

    let events = apply_predicates(&intervals, &filters.predicates);
    if filters.saved_filters_active {
        Materialized::Events(fill_gaps(events, scan_start, scan_end))
    } else {
        Materialized::Events(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_gaps_covers_leading_middle_and_trailing_holes() {
        let mut excluded = Event::from_interval(&Interval::state(40, 50, "X"), EventTags::EXCLUDED);
        excluded.tags |= EventTags::DIMMED;
        let events = vec![
            Event::from_interval(&Interval::state(20, 30, "B"), EventTags::empty()),
            Event::from_interval(&Interval::state(10, 20, "A"), EventTags::DIMMED),
            excluded,
        ];

        let filled = fill_gaps(events, 0, 60);
        let spans: Vec<(TimePoint, TimePoint, bool)> = filled
            .iter()
            .map(|e| (e.start, e.end(), e.is_gap()))
            .collect();
        assert_eq!(
            spans,
            vec![
                (0, 10, true),
                (10, 20, false),
                (20, 30, false),
                (30, 60, true)
            ]
        );
    }

    #[test]
    fn scan_window_is_clipped_to_row() {
        let row = RowSnapshot {
            id: 1,
            time_start: 100,
            time_end: 200,
            current_sampling: None,
        };
        assert_eq!(scan_window(&row, 0, 150), Some((100, 150)));
        assert_eq!(scan_window(&row, 150, 400), Some((150, 200)));
        assert_eq!(scan_window(&row, 200, 400), None);
        assert_eq!(scan_window(&row, 0, 100), None);
    }

    #[test]
    fn skip_only_when_sampling_matches_and_not_forced() {
        let sampling = Sampling::new(0, 100, 5);
        let mut row = RowSnapshot {
            id: 1,
            time_start: 0,
            time_end: 100,
            current_sampling: None,
        };
        assert!(!can_skip(&row, &sampling, false));
        row.current_sampling = Some(sampling);
        assert!(can_skip(&row, &sampling, false));
        assert!(!can_skip(&row, &sampling, true));
        assert!(!can_skip(&row, &Sampling::new(0, 100, 4), false));
    }
}
