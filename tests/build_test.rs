use std::sync::Arc;

use timegraph::build::full_resolution;
use timegraph::{DataSourceId, EngineConfig, MemorySource, TimeGraphViewer};

use test_helpers::*;

const DS: DataSourceId = DataSourceId(3);

fn tree_source() -> MemorySource {
    let mut source = MemorySource::new("tree");
    source.add_row(entry(1, "process"), states(&[(0, 100, "ALIVE")]));
    source.add_row(
        child_entry(2, 1, "thread a"),
        states(&[(0, 50, "RUNNING"), (50, 100, "WAIT")]),
    );
    source.add_row(child_entry(3, 1, "thread b"), states(&[(10, 60, "RUNNING")]));
    source.add_row(entry(4, "other process"), states(&[(200, 300, "ALIVE")]));
    source
}

fn viewer() -> TimeGraphViewer {
    TimeGraphViewer::new(EngineConfig::default(), Box::new(RecordingListener::new()))
}

#[test]
fn build_assembles_the_hierarchy() {
    let mut viewer = viewer();
    viewer.open_data_source(DS, Arc::new(tree_source()));
    assert!(viewer.wait_until_quiescent(TIMEOUT));

    let model = viewer.rows(DS).unwrap();
    assert_eq!(model.len(), 4);
    let roots: Vec<&str> = model.roots().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(roots, vec!["process", "other process"]);

    let process = &model.roots()[0];
    let children: Vec<u64> = process.children.iter().map(|r| r.id).collect();
    assert_eq!(children, vec![2, 3]);
    assert_eq!(process.children[0].full_events.len(), 2);
    assert_eq!(model.find(3).unwrap().time_start, 10);
    // Nothing zoomed yet.
    assert!(model.rows().iter().all(|r| r.current_sampling.is_none()));
}

#[test]
fn second_schedule_is_ignored_while_running() {
    let source = Arc::new(BlockingSource::new(tree_source()));
    let listener = RecordingListener::new();
    let mut viewer = TimeGraphViewer::new(EngineConfig::default(), Box::new(listener.clone()));

    source.block();
    viewer.open_data_source(DS, source.clone());
    assert!(source.wait_for_waiting(1));
    assert!(viewer.is_building(DS));
    assert!(!viewer.schedule_build(DS));
    assert_eq!(viewer.dirty_count(), 1);

    source.release();
    assert!(viewer.wait_until_quiescent(TIMEOUT));
    assert!(!viewer.is_building(DS));
    assert_eq!(viewer.rows(DS).unwrap().len(), 4);
    assert_eq!(listener.count(|n| *n == Notification::BuildStarted(DS)), 1);

    // Cancelling a finished build changes nothing.
    viewer.cancel_build(DS);
    assert!(viewer.wait_until_quiescent(TIMEOUT));
    assert_eq!(viewer.rows(DS).unwrap().len(), 4);
}

#[test]
fn cancelled_build_results_are_dropped() {
    let source = Arc::new(BlockingSource::new(tree_source()));
    let mut viewer = viewer();

    source.block();
    viewer.open_data_source(DS, source.clone());
    assert!(source.wait_for_waiting(1));
    viewer.cancel_build(DS);
    source.release();
    assert!(viewer.wait_until_quiescent(TIMEOUT));
    assert!(viewer.rows(DS).is_none());
    assert_eq!(viewer.dirty_count(), 0);

    assert!(viewer.schedule_build(DS));
    assert!(viewer.wait_until_quiescent(TIMEOUT));
    assert_eq!(viewer.rows(DS).unwrap().len(), 4);
}

#[test]
fn rebuild_replaces_rows() {
    let mut viewer = viewer();
    viewer.open_data_source(DS, Arc::new(tree_source()));
    assert!(viewer.wait_until_quiescent(TIMEOUT));

    assert!(viewer.rebuild(DS));
    assert!(viewer.wait_until_quiescent(TIMEOUT));
    assert_eq!(viewer.rows(DS).unwrap().len(), 4);
    assert_eq!(viewer.rows(DS).unwrap().roots().len(), 2);
}

#[test]
fn full_events_use_coarse_resolution() {
    let source = Arc::new(BlockingSource::new(tree_source()));
    let mut viewer = TimeGraphViewer::new(
        EngineConfig {
            full_event_buckets: 10,
            ..Default::default()
        },
        Box::new(RecordingListener::new()),
    );
    viewer.open_data_source(DS, source.clone());
    assert!(viewer.wait_until_quiescent(TIMEOUT));

    let mut calls = source.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            (1, 0, 100, 10),
            (2, 0, 100, 10),
            (3, 10, 60, 5),
            (4, 200, 300, 10)
        ]
    );
    assert_eq!(full_resolution(0, 5, 10), 1);
}
