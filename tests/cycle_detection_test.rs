use std::sync::{Arc, Mutex};

use log::LevelFilter;
use weightgraph_rs::{
    engine::{EngineError, EngineSpec},
    types::data_types::{Goff, Weight},
};

mod common;

use crate::common::{
    logging::setup_logger,
    mem_db::MemDB,
    node::{configuration, Node},
    records::{record, record_with_hash},
};

fn cycle_failures(node: &Node) -> Vec<Goff> {
    node.engine()
        .propagation_failures()
        .into_iter()
        .map(|(goff, err)| {
            assert!(matches!(*err, EngineError::GraphCycle { goff: failed } if failed == goff));
            goff
        })
        .collect()
}

#[test]
fn two_record_cycle_test() {
    setup_logger(LevelFilter::Info);
    let node = Node::new();

    // A and B link to each other, which content addressing would normally rule out.
    let a = record_with_hash(0xA, &[0xB], 1);
    let b = record_with_hash(0xB, &[0xA], 1);
    node.put_all(&[a.clone(), b.clone()]);
    node.wait_for_idle();

    assert_eq!(cycle_failures(&node), vec![Goff::new(0), Goff::new(1)]);
    assert!(!node.is_applied(&a));
    assert!(!node.is_applied(&b));
    assert_eq!(node.weight(&a), Weight::new(1));
}

#[test]
fn self_link_test() {
    setup_logger(LevelFilter::Info);
    let node = Node::new();

    let selfish = record_with_hash(0x5, &[0x5], 3);
    node.put(&selfish);
    node.wait_for_idle();

    assert_eq!(cycle_failures(&node), vec![Goff::new(0)]);
    assert!(!node.engine().is_dangling(Goff::new(0)));
    assert!(node.engine().wanted_hashes().is_empty());
    assert!(!node.is_applied(&selfish));
}

#[test]
fn cycle_does_not_block_unrelated_records_test() {
    setup_logger(LevelFilter::Info);
    let node = Node::new();

    let a = record_with_hash(0xA, &[0xC], 1);
    let b = record_with_hash(0xB, &[0xA], 1);
    let c = record_with_hash(0xC, &[0xB], 1);
    // Hangs off the cycle: not part of it, but can never be applied either.
    let d = record_with_hash(0xD, &[0xA], 1);

    let root = record("root", &[], 10);
    let leaf = record("leaf", &[&root], 20);

    node.put_all(&[a.clone(), b.clone(), c.clone(), d.clone(), root.clone(), leaf.clone()]);
    node.wait_for_idle();

    assert_eq!(
        cycle_failures(&node),
        vec![Goff::new(0), Goff::new(1), Goff::new(2)]
    );
    assert!(!node.is_applied(&d));
    assert!(node.is_applied(&root));
    assert!(node.is_applied(&leaf));
    assert_eq!(node.weight(&root), Weight::new(30));
    assert_eq!(node.engine().hash_state().record_count, 2);
}

#[test]
fn detect_cycle_event_test() {
    setup_logger(LevelFilter::Info);

    let detected = Arc::new(Mutex::new(Vec::new()));
    let dir = tempfile::tempdir().unwrap();
    let engine = {
        let detected = detected.clone();
        EngineSpec::builder()
            .kv_store(MemDB::new())
            .configuration(configuration(dir.path(), 16))
            .on_detect_cycle(move |event| detected.lock().unwrap().push(event.hash))
            .build()
            .open()
            .unwrap()
    };

    let selfish = record_with_hash(0x7, &[0x7], 1);
    engine.put_record(&selfish).unwrap();
    while engine.has_pending_graph_work() {
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    engine.close().unwrap();

    assert_eq!(*detected.lock().unwrap(), vec![selfish.hash]);
}
