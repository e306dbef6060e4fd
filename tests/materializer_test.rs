use std::sync::Arc;

use proptest::prelude::*;

use timegraph::filter::{Predicate, PredicateSet, Tag};
use timegraph::materializer::{fill_gaps, materialize, FilterState, Materialized};
use timegraph::task::CancelFlag;
use timegraph::types::{is_contiguous, Event, EventTags, Interval, TimePoint};
use timegraph::{FilterExpression, MemorySource};

use test_helpers::*;

fn filters(predicates: PredicateSet, saved_filters_active: bool) -> FilterState {
    FilterState {
        predicates: Arc::new(predicates),
        saved_filters_active,
    }
}

fn exclude_unless(expression: &str) -> PredicateSet {
    let mut set = PredicateSet::new();
    set.insert(
        Tag::Excluded,
        Predicate::Expression(FilterExpression::parse(expression).unwrap()),
    );
    set
}

fn events(result: Materialized) -> Vec<Event> {
    match result {
        Materialized::Events(events) => events,
        other => panic!("expected events, got {:?}", other),
    }
}

fn spans(events: &[Event]) -> Vec<(TimePoint, TimePoint, Option<&str>)> {
    events
        .iter()
        .map(|e| (e.start, e.end(), e.style.as_deref()))
        .collect()
}

#[test]
fn excluded_state_becomes_gap() {
    let source = abc_source();
    let result = materialize(
        &source,
        1,
        (0, 30),
        1,
        &filters(exclude_unless("name != B"), true),
        &CancelFlag::new(),
    );
    let events = events(result);

    assert_eq!(
        spans(&events),
        vec![(0, 10, Some("A")), (10, 20, None), (20, 30, Some("C"))]
    );
    assert!(events[1].is_gap());
    assert!(!events[0].tags.contains(EventTags::EXCLUDED));
    assert!(is_contiguous(&events));
}

#[test]
fn no_filters_returns_source_intervals_unchanged() {
    let source = abc_source();
    let events = events(materialize(
        &source,
        1,
        (0, 30),
        1,
        &FilterState::default(),
        &CancelFlag::new(),
    ));

    assert_eq!(
        spans(&events),
        vec![(0, 10, Some("A")), (10, 20, Some("B")), (20, 30, Some("C"))]
    );
    assert!(events.iter().all(|e| e.tags.is_empty()));
}

#[test]
fn excluding_everything_leaves_one_gap() {
    let source = abc_source();
    let mut set = PredicateSet::new();
    set.insert_fn(Tag::Excluded, |_| false);

    let events = events(materialize(
        &source,
        1,
        (5, 25),
        1,
        &filters(set, true),
        &CancelFlag::new(),
    ));
    assert_eq!(events, vec![Event::gap(5, 25)]);
}

#[test]
fn predicates_without_saved_filters_only_tag() {
    let source = abc_source();
    let events = events(materialize(
        &source,
        1,
        (0, 30),
        1,
        &filters(exclude_unless("name != B"), false),
        &CancelFlag::new(),
    ));

    assert_eq!(events.len(), 3);
    assert!(events[1].tags.contains(EventTags::EXCLUDED));
    assert_eq!(events[1].style.as_deref(), Some("B"));
}

#[test]
fn dimmed_and_excluded_are_negated_other_tags_are_not() {
    let source = abc_source();
    let mut set = PredicateSet::new();
    set.insert(
        Tag::Dimmed,
        Predicate::Expression(FilterExpression::parse("name == A").unwrap()),
    );
    set.insert(
        Tag::Highlighted,
        Predicate::Expression(FilterExpression::parse("name == A").unwrap()),
    );

    let events = events(materialize(
        &source,
        1,
        (0, 30),
        1,
        &filters(set, false),
        &CancelFlag::new(),
    ));

    // A matches: not dimmed, highlighted
    assert_eq!(events[0].tags, EventTags::HIGHLIGHTED);
    // B doesn't match: dimmed, not highlighted
    assert_eq!(events[1].tags, EventTags::DIMMED);
}

#[test]
fn cancelled_while_querying_is_not_committed() {
    let source = abc_source();
    let cancel = CancelFlag::new();
    cancel.cancel();
    let result = materialize(&source, 1, (0, 30), 1, &FilterState::default(), &cancel);
    assert_eq!(result, Materialized::Cancelled);
}

#[test]
fn failing_query_is_reported() {
    let source = MemorySource::new("empty");
    let result = materialize(&source, 42, (0, 30), 1, &FilterState::default(), &CancelFlag::new());
    assert_eq!(result, Materialized::Failed);
}

#[test]
fn aggregated_states_hide_matches_at_coarse_resolution() {
    let mut source = MemorySource::new("fine");
    let intervals: Vec<Interval> = (0..100)
        .map(|i| Interval::state(i * 10, (i + 1) * 10, if i == 50 { "B" } else { "A" }))
        .collect();
    source.add_row(entry(1, "row"), intervals);

    let mut set = PredicateSet::new();
    set.insert(
        Tag::Highlighted,
        Predicate::Expression(FilterExpression::parse("name == B").unwrap()),
    );
    let filters = filters(set, true);

    let coarse = events(materialize(&source, 1, (0, 1000), 100, &filters, &CancelFlag::new()));
    assert_eq!(coarse.len(), 1);
    assert!(coarse[0].style.is_none());
    assert!(!coarse[0].tags.contains(EventTags::HIGHLIGHTED));

    let full = events(materialize(&source, 1, (0, 1000), 1, &filters, &CancelFlag::new()));
    assert_eq!(full.len(), 100);
    let highlighted: Vec<_> = full
        .iter()
        .filter(|e| e.tags.contains(EventTags::HIGHLIGHTED))
        .collect();
    assert_eq!(highlighted.len(), 1);
    assert_eq!(highlighted[0].start, 500);
}

fn arbitrary_events() -> impl Strategy<Value = (Vec<Event>, TimePoint, TimePoint)> {
    // Contiguous states between 0 and the sum of their lengths, some of them excluded.
    prop::collection::vec((1i64..50, any::<bool>(), any::<bool>()), 0..30).prop_map(|states| {
        let mut time = 0;
        let mut events = Vec::new();
        for (length, excluded, skip) in states {
            if !skip {
                let tags = if excluded {
                    EventTags::EXCLUDED
                } else {
                    EventTags::empty()
                };
                events.push(Event::from_interval(
                    &Interval::state(time, time + length, "S"),
                    tags,
                ));
            }
            time += length;
        }
        (events, 0, time + 1)
    })
}

proptest! {
    #[test]
    fn gap_fill_tiles_the_scan_window((events, start, end) in arbitrary_events()) {
        let kept = events
            .iter()
            .filter(|e| !e.tags.contains(EventTags::EXCLUDED))
            .count();
        let filled = fill_gaps(events, start, end);

        prop_assert!(is_contiguous(&filled));
        prop_assert_eq!(filled.first().map(|e| e.start), Some(start));
        prop_assert_eq!(filled.last().map(|e| e.end()), Some(end));
        prop_assert!(filled.iter().all(|e| e.is_gap() || !e.tags.contains(EventTags::EXCLUDED)));
        prop_assert_eq!(filled.iter().filter(|e| !e.is_gap()).count(), kept);
        // no two gaps in a row
        prop_assert!(filled.windows(2).all(|w| !(w[0].is_gap() && w[1].is_gap())));
    }
}
