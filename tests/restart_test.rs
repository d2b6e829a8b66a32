use std::{
    thread,
    time::{Duration, Instant},
};

use log::LevelFilter;
use weightgraph_rs::{
    engine::Engine,
    types::data_types::{Goff, Weight},
    weights::{OpenState, WeightStore, WEIGHTS_FILE_NAME},
};

mod common;

use crate::common::{
    logging::setup_logger,
    mem_db::MemDB,
    node::{configuration, Node},
    records::{expected_weights, random_dag, record},
    weight_file::{write_clean_flag, write_slot},
};

#[test]
fn resume_after_close_test() {
    setup_logger(LevelFilter::Info);
    let mut node = Node::new();

    let records = random_dag(21, 30);
    let (first, second) = records.split_at(15);
    node.put_all(first);
    node.wait_for_idle();
    let summary = node.engine().hash_state();

    node.restart();
    assert_eq!(node.engine().hash_state(), summary);
    assert_eq!(node.engine().record_count().unwrap(), 15);

    node.put_all(second);
    node.wait_for_idle();

    let expected = expected_weights(&records);
    for rec in &records {
        assert_eq!(node.weight(rec).int(), expected[&rec.hash]);
    }
    assert!(node.engine().list_holes().is_empty());
}

#[test]
fn rebuild_after_crash_test() {
    setup_logger(LevelFilter::Info);
    let mut node = Node::new();

    let a = record("a", &[], 1);
    let b = record("b", &[&a], 2);
    let c = record("c", &[&a], 4);
    let d = record("d", &[&b, &c], 8);
    node.put_all(&[a.clone(), b.clone(), c.clone(), d.clone()]);
    node.wait_for_idle();
    let summary = node.engine().hash_state();
    node.close();

    // Simulate a crash part-way through propagation: the store was never marked clean, and a slot
    // holds a half-propagated weight.
    write_clean_flag(node.dir.path(), 0);
    write_slot(node.dir.path(), 0, 3, 0);

    node.reopen();
    node.wait_for_idle();
    assert_eq!(node.weight(&a), Weight::new(15));
    assert_eq!(node.weight(&b), Weight::new(10));
    assert_eq!(node.weight(&c), Weight::new(12));
    assert_eq!(node.weight(&d), Weight::new(8));
    assert_eq!(node.engine().hash_state(), summary);
    assert!(node.engine().list_holes().is_empty());
}

#[test]
fn missing_weight_store_test() {
    setup_logger(LevelFilter::Info);
    let mut node = Node::new();

    let records = random_dag(4, 25);
    node.put_all(&records);
    node.wait_for_idle();
    node.close();

    // Losing the weight store entirely is recovered from the record store.
    std::fs::remove_file(node.dir.path().join(WEIGHTS_FILE_NAME)).unwrap();
    node.reopen();
    node.wait_for_idle();

    let expected = expected_weights(&records);
    for rec in &records {
        assert_eq!(node.weight(rec).int(), expected[&rec.hash]);
        assert!(node.is_applied(rec));
    }
}

#[test]
fn dangling_records_stay_unapplied_after_rebuild_test() {
    setup_logger(LevelFilter::Info);
    let mut node = Node::new();

    let a = record("a", &[], 2);
    let b = record("b", &[&a], 3);
    let unrelated = record("unrelated", &[], 7);
    node.put_all(&[b.clone(), unrelated.clone()]);
    node.wait_for_idle();
    node.close();

    write_clean_flag(node.dir.path(), 0);
    node.reopen();
    node.wait_for_idle();

    assert!(!node.is_applied(&b));
    assert!(node.is_applied(&unrelated));
    assert!(node.engine().is_dangling(Goff::new(0)));

    node.put(&a);
    node.wait_for_idle();
    assert_eq!(node.weight(&a), Weight::new(5));
}

#[test]
fn drop_closes_cleanly_test() {
    setup_logger(LevelFilter::Info);
    let dir = tempfile::tempdir().unwrap();

    let engine = Engine::open(MemDB::new(), configuration(dir.path(), 16)).unwrap();
    engine.put_record(&record("a", &[], 6)).unwrap();
    while engine.has_pending_graph_work() {
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    drop(engine);

    let (_, state) = WeightStore::open(dir.path(), 16).unwrap();
    assert_eq!(state, OpenState::Clean);
}

#[test]
fn unpersisted_holes_are_reconciled_on_open_test() {
    setup_logger(LevelFilter::Info);
    let mut node = Node::new();

    // Every attempt of the propagation thread to persist the shrunk holes fails, so the store still
    // holds the hole opened when the record was accepted.
    let a = record("a", &[], 4);
    node.db.fail_next_hole_writes(u32::MAX);
    node.put(&a);
    let start = Instant::now();
    while !node.is_applied(&a) {
        assert!(start.elapsed() < Duration::from_secs(30), "record was never applied");
        thread::sleep(Duration::from_millis(2));
    }
    assert!(node.engine().list_holes().is_empty());
    node.close();
    node.db.fail_next_hole_writes(0);

    node.reopen();
    node.wait_for_idle();
    assert!(node.engine().list_holes().is_empty());
    assert!(node.engine().graph_camera().snapshot().holes().unwrap().is_empty());
    assert_eq!(node.weight(&a), Weight::new(4));
    assert_eq!(node.engine().hash_state().record_count, 1);
}

#[test]
fn close_with_queued_work_test() {
    setup_logger(LevelFilter::Info);
    let mut node = Node::new();

    // Close right after accepting the records, without waiting for the propagation thread.
    let records = random_dag(9, 300);
    node.put_all(&records);
    node.close();

    node.reopen();
    node.wait_for_idle();

    let expected = expected_weights(&records);
    for rec in &records {
        assert_eq!(node.weight(rec).int(), expected[&rec.hash]);
        assert!(node.is_applied(rec));
    }
    assert!(node.engine().list_holes().is_empty());
}
