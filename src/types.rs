use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;

/// Nanoseconds. Trace files use nanoseconds since the unix epoch, synthetic sources start at 0.
pub type TimePoint = i64;

pub const NANOS_PER_MILLISECOND: TimePoint = 1_000_000;

pub fn time_point_from_unix_nano(unix_nano: u64) -> TimePoint {
    TimePoint::try_from(unix_nano).unwrap_or(TimePoint::MAX)
}

pub fn time_point_to_utc_string(time: TimePoint) -> String {
    let date_time = chrono::DateTime::from_timestamp_nanos(time);
    date_time.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Stable identity of a row inside one data source.
pub type RowId = u64;

/// Searchable attributes of an interval, already converted to text.
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataSourceId(pub u64);

impl fmt::Display for DataSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ds#{}", self.0)
    }
}

/// The viewport a row's zoomed content was computed for.
/// Equality is exact, two samplings that differ by one nanosecond are different.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sampling {
    pub start: TimePoint,
    pub end: TimePoint,
    pub resolution: TimePoint,
}

impl Sampling {
    pub fn new(start: TimePoint, end: TimePoint, resolution: TimePoint) -> Sampling {
        Sampling {
            start,
            end,
            resolution,
        }
    }
}

impl fmt::Display for Sampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}] @{}", self.start, self.end, self.resolution)
    }
}

bitflags! {
    /// Tags assigned to an event by the filter predicates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventTags: u32 {
        const DIMMED = 1 << 0;
        const EXCLUDED = 1 << 1;
        const HIGHLIGHTED = 1 << 2;
        const BOUND = 1 << 3;
    }
}

/// A timed state as returned by a data source, covering `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub start: TimePoint,
    pub end: TimePoint,
    /// Name of the style used to paint this state, `None` for unstyled filler.
    pub style: Option<String>,
    pub attributes: Attributes,
}

impl Interval {
    /// Unstyled interval without attributes.
    pub fn new(start: TimePoint, end: TimePoint) -> Interval {
        Interval {
            start,
            end,
            style: None,
            attributes: Attributes::new(),
        }
    }

    /// Named state. The name is used as the style and is also searchable as the `name` attribute.
    pub fn state(start: TimePoint, end: TimePoint, name: &str) -> Interval {
        let mut attributes = Attributes::new();
        attributes.insert("name".to_string(), name.to_string());
        Interval {
            start,
            end,
            style: Some(name.to_string()),
            attributes,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl ToString) -> Interval {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn duration(&self) -> TimePoint {
        self.end - self.start
    }
}

/// One entry of a row's event list, ready to be painted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub start: TimePoint,
    pub duration: TimePoint,
    pub tags: EventTags,
    pub style: Option<String>,
}

impl Event {
    pub fn from_interval(interval: &Interval, tags: EventTags) -> Event {
        Event {
            start: interval.start,
            duration: interval.duration(),
            tags,
            style: interval.style.clone(),
        }
    }

    /// Synthetic filler keeping a filtered row contiguous.
    pub fn gap(start: TimePoint, end: TimePoint) -> Event {
        Event {
            start,
            duration: end - start,
            tags: EventTags::DIMMED | EventTags::EXCLUDED,
            style: None,
        }
    }

    pub fn end(&self) -> TimePoint {
        self.start + self.duration
    }

    pub fn is_gap(&self) -> bool {
        self.style.is_none() && self.tags.contains(EventTags::DIMMED | EventTags::EXCLUDED)
    }
}

/// Check that events are sorted, don't overlap and leave no holes between them.
pub fn is_contiguous(events: &[Event]) -> bool {
    events.windows(2).all(|pair| pair[0].end() == pair[1].start)
}
