//! Integration tests for heartbeat trees: shared sequencing across threads,
//! baseline handoff between pipeline stages, and teardown order.

use std::sync::Arc;
use std::thread;

use hbtree::{FnBackend, Heartbeat, HeartbeatBuilder, HeartbeatConfig, ManualClock, Record};

fn config(window: usize, depth: usize) -> HeartbeatConfig {
    HeartbeatConfig::new(window, depth).unwrap()
}

#[test]
fn test_sibling_threads_share_one_sequence() {
    const BEATS: u64 = 500;

    let root = HeartbeatBuilder::new(config(10, 10)).build().unwrap();
    let children: Vec<Heartbeat> = (0..4)
        .map(|_| {
            HeartbeatBuilder::new(config(10, 1_000))
                .build_child(&root)
                .unwrap()
        })
        .collect();

    let handles: Vec<_> = children
        .into_iter()
        .map(|mut child| {
            thread::spawn(move || {
                for i in 0..BEATS {
                    child.beat(i, 1);
                }
                child
            })
        })
        .collect();
    let children: Vec<Heartbeat> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut all_ids = Vec::new();
    for child in &children {
        let ids: Vec<u64> = child
            .history(1_000)
            .iter()
            .map(Record::shared_beat_number)
            .collect();
        assert_eq!(ids.len() as u64, BEATS);
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not increasing");
        all_ids.extend(ids);
    }

    all_ids.sort_unstable();
    let expected: Vec<u64> = (0..4 * BEATS).collect();
    assert_eq!(all_ids, expected, "shared ids must be gap-free");
    assert_eq!(root.shared().event_count(), 4 * BEATS);
}

#[test]
fn test_shared_elapsed_time_spans_all_nodes() {
    let clock = Arc::new(ManualClock::new(1_000));
    let mut root = HeartbeatBuilder::new(config(1, 1))
        .clock(clock.clone())
        .build()
        .unwrap();
    let mut child = HeartbeatBuilder::new(config(1, 1)).build_child(&root).unwrap();

    root.beat(0, 0);
    clock.advance(300);
    child.beat(0, 0);
    clock.advance(200);
    root.beat(1, 1);

    assert_eq!(root.shared().elapsed_ns(), 500);
    assert_eq!(root.shared().last_timestamp(), Some(1_500));
    // The root's own latency ignores the child's heartbeat in between
    assert_eq!(root.current().unwrap().latency(), 500);
}

#[test]
fn test_pipeline_baseline_handoff() {
    let clock = Arc::new(ManualClock::new(0));
    let mut energy = 0.0;
    let mut iteration = HeartbeatBuilder::new(config(4, 8))
        .clock(clock.clone())
        .energy_backend(FnBackend::new("counter", move || {
            energy += 1_000_000.0;
            energy
        }))
        .build()
        .unwrap();
    let mut recv = HeartbeatBuilder::new(config(4, 8)).build_child(&iteration).unwrap();
    let mut work = HeartbeatBuilder::new(config(4, 8)).build_child(&iteration).unwrap();
    let mut send = HeartbeatBuilder::new(config(4, 8)).build_child(&iteration).unwrap();

    for i in 0..3 {
        clock.advance(10);
        recv.beat(i, 1);
        clock.advance(20);
        work.register(i, 1, None, recv.baseline());
        clock.advance(30);
        send.register(i, 1, None, work.baseline());
        iteration.beat(i, 1);
    }

    // Each stage measures from the stage before it
    assert_eq!(work.current().unwrap().latency(), 20);
    assert_eq!(send.current().unwrap().latency(), 30);
    // recv measures from its own previous heartbeat, a full iteration ago
    assert_eq!(recv.current().unwrap().latency(), 60);
    assert_eq!(iteration.current().unwrap().latency(), 60);

    // One energy reading per registration in the tree: work's reading comes
    // one registration after recv's
    assert_eq!(work.current().unwrap().energy(), 1_000_000.0);
    assert_eq!(iteration.current().unwrap().energy(), 4_000_000.0);

    send.finish().unwrap();
    work.finish().unwrap();
    recv.finish().unwrap();
    iteration.finish().unwrap();
}

#[test]
fn test_baseline_from_fresh_node_is_none() {
    let root = HeartbeatBuilder::new(config(1, 1)).build().unwrap();
    assert!(root.baseline().is_none());
}

#[test]
fn test_baseline_moves_across_threads() {
    let clock = Arc::new(ManualClock::new(0));
    let mut upstream = HeartbeatBuilder::new(config(2, 2))
        .clock(clock.clone())
        .build()
        .unwrap();
    let mut downstream = HeartbeatBuilder::new(config(2, 2)).build_child(&upstream).unwrap();

    downstream.beat(0, 0);
    clock.set(1_000);
    upstream.beat(0, 0);
    let baseline = upstream.baseline().unwrap();

    let latency = thread::spawn(move || {
        clock.set(1_250);
        downstream.register(1, 1, None, Some(baseline));
        downstream.current().unwrap().latency()
    })
    .join()
    .unwrap();

    assert_eq!(latency, 250);
}
