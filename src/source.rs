//! The data source interface consumed by the engine, and an in-memory implementation that the
//! file-backed and synthetic sources are built on.

use std::collections::HashMap;

use anyhow::Result;

use crate::types::{Interval, RowId, TimePoint};

/// One row of the hierarchy a data source exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowEntry {
    pub id: RowId,
    /// `None` for top-level rows.
    pub parent_id: Option<RowId>,
    pub name: String,
    pub start: TimePoint,
    pub end: TimePoint,
}

/// Answers "which states exist in this row between two time points". Implementations can be
/// slow and are called from background threads, concurrently for different rows.
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Overall time range covered by the source.
    fn bounds(&self) -> (TimePoint, TimePoint);

    /// The row hierarchy, parents before or after their children in any order.
    fn entries(&self) -> Result<Vec<RowEntry>>;

    /// States of `row` intersecting `[start, end]`, sorted by start time. `resolution` is the
    /// duration of one pixel, states much shorter than it don't have to be returned individually.
    fn intervals(
        &self,
        row: RowId,
        start: TimePoint,
        end: TimePoint,
        resolution: TimePoint,
    ) -> Result<Vec<Interval>>;
}

/// Down-sample a sorted, contiguous list of intervals to `resolution`.
///
/// Runs of two or more adjacent intervals shorter than `resolution` are merged into a single
/// unstyled interval with no attributes, so the result still tiles the same range.
pub fn sample_intervals(intervals: Vec<Interval>, resolution: TimePoint) -> Vec<Interval> {
    if resolution <= 1 {
        return intervals;
    }

    let mut sampled = Vec::with_capacity(intervals.len());
    let mut short_run: Vec<Interval> = Vec::new();

    for interval in intervals {
        let contiguous = short_run
            .last()
            .map(|last| last.end == interval.start)
            .unwrap_or(true);
        if !contiguous {
            flush_short_run(&mut short_run, &mut sampled);
        }

        if interval.duration() < resolution {
            short_run.push(interval);
        } else {
            flush_short_run(&mut short_run, &mut sampled);
            sampled.push(interval);
        }
    }
    flush_short_run(&mut short_run, &mut sampled);

    sampled
}

fn flush_short_run(short_run: &mut Vec<Interval>, sampled: &mut Vec<Interval>) {
    match short_run.len() {
        0 => {}
        1 => sampled.append(short_run),
        _ => {
            let start = short_run[0].start;
            let end = short_run[short_run.len() - 1].end;
            short_run.clear();
            sampled.push(Interval::new(start, end));
        }
    }
}

/// Rows and their states held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    entries: Vec<RowEntry>,
    intervals: HashMap<RowId, Vec<Interval>>,
    bounds: Option<(TimePoint, TimePoint)>,
}

impl MemorySource {
    pub fn new(name: &str) -> MemorySource {
        MemorySource {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Add a row. Intervals are sorted by start time, the row's time range is extended to cover
    /// all of them.
    pub fn add_row(&mut self, mut entry: RowEntry, mut intervals: Vec<Interval>) {
        intervals.sort_by_key(|interval| interval.start);
        if let (Some(first), Some(last)) = (intervals.first(), intervals.last()) {
            entry.start = entry.start.min(first.start);
            entry.end = entry.end.max(last.end);
        }

        self.bounds = Some(match self.bounds {
            Some((start, end)) => (start.min(entry.start), end.max(entry.end)),
            None => (entry.start, entry.end),
        });
        self.intervals.insert(entry.id, intervals);
        self.entries.push(entry);
    }

    pub fn row_count(&self) -> usize {
        self.entries.len()
    }

    pub fn row_intervals(&self, row: RowId) -> Option<&[Interval]> {
        self.intervals.get(&row).map(Vec::as_slice)
    }
}

impl DataSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn bounds(&self) -> (TimePoint, TimePoint) {
        self.bounds.unwrap_or((0, 0))
    }

    fn entries(&self) -> Result<Vec<RowEntry>> {
        Ok(self.entries.clone())
    }

    fn intervals(
        &self,
        row: RowId,
        start: TimePoint,
        end: TimePoint,
        resolution: TimePoint,
    ) -> Result<Vec<Interval>> {
        let Some(row_intervals) = self.intervals.get(&row) else {
            anyhow::bail!("{}: unknown row {}", self.name, row);
        };

        // Intervals are sorted and don't overlap, so ends are sorted too.
        let first = row_intervals.partition_point(|interval| interval.end <= start);
        let clipped = row_intervals[first..]
            .iter()
            .take_while(|interval| interval.start < end)
            .map(|interval| {
                let mut clipped = interval.clone();
                clipped.start = clipped.start.max(start);
                clipped.end = clipped.end.min(end);
                clipped
            })
            .filter(|interval| interval.start < interval.end)
            .collect();

        Ok(sample_intervals(clipped, resolution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Interval;

    fn entry(id: RowId) -> RowEntry {
        RowEntry {
            id,
            parent_id: None,
            name: format!("row {id}"),
            start: 0,
            end: 0,
        }
    }

    fn is_tiling(intervals: &[Interval], start: TimePoint, end: TimePoint) -> bool {
        intervals.first().map(|i| i.start) == Some(start)
            && intervals.last().map(|i| i.end) == Some(end)
            && intervals.windows(2).all(|w| w[0].end == w[1].start)
    }

    #[test]
    fn query_clips_to_window() {
        let mut source = MemorySource::new("mem");
        source.add_row(
            entry(1),
            vec![
                Interval::state(0, 10, "A"),
                Interval::state(10, 20, "B"),
                Interval::state(20, 30, "C"),
            ],
        );

        assert_eq!(source.bounds(), (0, 30));
        let result = source.intervals(1, 5, 25, 1).unwrap();
        assert_eq!(result.len(), 3);
        assert!(is_tiling(&result, 5, 25));
        assert_eq!(result[1], Interval::state(10, 20, "B"));

        assert!(source.intervals(1, 30, 40, 1).unwrap().is_empty());
        assert!(source.intervals(99, 0, 10, 1).is_err());
    }

    #[test]
    fn sampling_merges_short_runs_and_keeps_tiling() {
        let intervals = vec![
            Interval::state(0, 50, "long"),
            Interval::state(50, 52, "a"),
            Interval::state(52, 53, "b"),
            Interval::state(53, 55, "c"),
            Interval::state(55, 100, "long"),
            Interval::state(100, 101, "lonely"),
            Interval::state(101, 150, "long"),
        ];

        let sampled = sample_intervals(intervals.clone(), 10);
        assert_eq!(sampled.len(), 5);
        assert_eq!(sampled[1], Interval::new(50, 55));
        assert_eq!(sampled[3], Interval::state(100, 101, "lonely"));
        assert!(is_tiling(&sampled, 0, 150));

        assert_eq!(sample_intervals(intervals.clone(), 1), intervals);
    }
}
