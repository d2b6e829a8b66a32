use std::sync::{Arc, Mutex};

use log::LevelFilter;
use weightgraph_rs::{
    engine::{Configuration, Engine, EngineSpec, PutRecordResult},
    types::data_types::{Goff, Hole, Weight},
};

mod common;

use crate::common::{
    logging::setup_logger,
    mem_db::MemDB,
    node::{configuration, Node},
    records::{expected_weights, random_dag, record, record_with_hash, shuffled},
};

#[test]
fn diamond_weights_test() {
    setup_logger(LevelFilter::Debug);
    let node = Node::new();

    // A <- B, A <- C, and D links to both B and C.
    let a = record("a", &[], 1);
    let b = record("b", &[&a], 10);
    let c = record("c", &[&a], 100);
    let d = record("d", &[&b, &c], 1000);
    node.put_all(&[a.clone(), b.clone(), c.clone(), d.clone()]);
    node.wait_for_idle();

    // D reaches A through two paths, but contributes to it once.
    assert_eq!(node.weight(&a), Weight::new(1111));
    assert_eq!(node.weight(&b), Weight::new(1010));
    assert_eq!(node.weight(&c), Weight::new(1100));
    assert_eq!(node.weight(&d), Weight::new(1000));
    for rec in [&a, &b, &c, &d] {
        assert!(node.is_applied(rec));
    }

    let summary = node.engine().hash_state();
    assert_eq!(summary.record_count, 4);
    assert_eq!(summary.weight_sum, 1111 + 1010 + 1100 + 1000);
}

#[test]
fn order_independence_test() {
    setup_logger(LevelFilter::Info);

    let records = random_dag(7, 60);
    let expected = expected_weights(&records);

    let in_order = Node::new();
    in_order.put_all(&records);
    in_order.wait_for_idle();

    for seed in [1, 2, 3] {
        let out_of_order = Node::new();
        out_of_order.put_all(&shuffled(&records, seed));
        out_of_order.wait_for_idle();

        // Goffs differ between the two nodes, so weights are compared by hash.
        for rec in &records {
            assert_eq!(in_order.weight(rec).int(), expected[&rec.hash]);
            assert_eq!(out_of_order.weight(rec), in_order.weight(rec));
            assert!(out_of_order.is_applied(rec));
        }
        assert_eq!(
            out_of_order.engine().hash_state(),
            in_order.engine().hash_state()
        );
        assert!(out_of_order.engine().list_holes().is_empty());
    }
}

#[test]
fn idempotence_test() {
    setup_logger(LevelFilter::Info);
    let node = Node::new();

    let a = record("a", &[], 3);
    let b = record("b", &[&a], 4);
    assert_eq!(node.put(&a), PutRecordResult::Inserted(Goff::new(0)));
    assert_eq!(node.put(&b), PutRecordResult::Inserted(Goff::new(1)));
    node.wait_for_idle();
    let summary = node.engine().hash_state();
    let stored_values = node.db.len();

    assert_eq!(node.put(&a), PutRecordResult::AlreadyExists(Goff::new(0)));
    assert_eq!(node.put(&b), PutRecordResult::AlreadyExists(Goff::new(1)));
    node.wait_for_idle();

    assert_eq!(node.engine().record_count().unwrap(), 2);
    assert_eq!(node.engine().hash_state(), summary);
    assert_eq!(node.db.len(), stored_values);
    assert_eq!(node.weight(&a), Weight::new(7));
}

#[test]
fn monotonic_weight_test() {
    setup_logger(LevelFilter::Info);
    let node = Node::new();

    let root = record("root", &[], 1);
    node.put(&root);
    node.wait_for_idle();

    let mut previous = node.weight(&root);
    let mut tip = root.clone();
    for index in 0..20 {
        let next = record(&format!("chain-{}", index), &[&tip], index + 1);
        node.put(&next);
        node.wait_for_idle();

        let current = node.weight(&root);
        assert!(current >= previous);
        assert_eq!(current, previous.saturating_add(next.score));
        previous = current;
        tip = next;
    }
}

#[test]
fn saturating_weight_test() {
    setup_logger(LevelFilter::Info);
    let node = Node::new();

    let a = record("a", &[], u64::MAX - 1);
    let b = record("b", &[&a], 5);
    node.put_all(&[a.clone(), b.clone()]);
    node.wait_for_idle();

    assert_eq!(node.weight(&a), Weight::new(u64::MAX));
    assert_eq!(node.engine().hash_state().weight_sum, u64::MAX);
}

#[test]
fn hole_closure_test() {
    setup_logger(LevelFilter::Info);
    let node = Node::new();

    let a = record("a", &[], 1);
    let b = record("b", &[&a], 1);
    let c = record("c", &[&b], 1);

    // C arrives first and waits for B, so its goff stays inside a hole.
    node.put(&c);
    node.put(&a);
    node.wait_for_idle();
    assert_eq!(
        node.engine().list_holes(),
        vec![Hole {
            start: Goff::new(0),
            count: 1,
            pending: 1
        }]
    );

    node.put(&b);
    node.wait_for_idle();
    assert!(node.engine().list_holes().is_empty());
    assert!(node.engine().graph_camera().snapshot().holes().unwrap().is_empty());
    assert_eq!(node.weight(&a), Weight::new(3));
}

#[test]
fn hole_gap_closure_test() {
    setup_logger(LevelFilter::Info);
    let node = Node::new();

    // Goffs 0 to 2 are applied before the gap opens.
    let roots: Vec<_> = (0..3).map(|index| record(&format!("root-{}", index), &[], 1)).collect();
    node.put_all(&roots);
    node.wait_for_idle();
    assert!(node.engine().list_holes().is_empty());

    // Goffs 3 and 4 wait for records that have not arrived, goff 5 is applied at once.
    let first_missing = record("first-missing", &[], 1);
    let second_missing = record("second-missing", &[], 1);
    let x = record("x", &[&first_missing], 1);
    let y = record("y", &[&second_missing], 1);
    let z = record("z", &[&roots[0]], 1);
    node.put_all(&[x.clone(), y.clone(), z.clone()]);
    node.wait_for_idle();
    assert!(node.is_applied(&z));
    assert_eq!(
        node.engine().list_holes(),
        vec![Hole {
            start: Goff::new(3),
            count: 2,
            pending: 2
        }]
    );

    // Goff 3 is applied; the hole stays open for goff 4.
    node.put(&first_missing);
    node.wait_for_idle();
    assert!(node.is_applied(&x));
    assert!(!node.is_applied(&y));
    assert_eq!(
        node.engine().list_holes(),
        vec![Hole {
            start: Goff::new(4),
            count: 1,
            pending: 1
        }]
    );

    node.put(&second_missing);
    node.wait_for_idle();
    assert!(node.is_applied(&y));
    assert!(node.engine().list_holes().is_empty());
    assert!(node.engine().graph_camera().snapshot().holes().unwrap().is_empty());
}

#[test]
fn record_history_test() {
    setup_logger(LevelFilter::Info);
    let node = Node::new();

    // Two revisions sharing the id "key", and an unrelated record in between.
    let first = record("key", &[], 1);
    let other = record("other", &[], 1);
    let second = record("key", &[&first], 2);
    node.put_all(&[first.clone(), other, second.clone()]);

    assert_eq!(
        node.engine().record_history_by_id(&first.id).unwrap(),
        vec![Goff::new(0), Goff::new(2)]
    );
    let snapshot = node.engine().graph_camera().snapshot();
    let (goff, stored) = snapshot.record_by_hash(&second.hash).unwrap().unwrap();
    assert_eq!(goff, Goff::new(2));
    assert_eq!(stored, second);
}

#[test]
fn event_handlers_test() {
    setup_logger(LevelFilter::Info);

    let applied = Arc::new(Mutex::new(Vec::new()));
    let closed_holes = Arc::new(Mutex::new(0));
    let inserted = Arc::new(Mutex::new(0));

    let dir = tempfile::tempdir().unwrap();
    let engine = {
        let applied = applied.clone();
        let closed_holes = closed_holes.clone();
        let inserted = inserted.clone();
        EngineSpec::builder()
            .kv_store(MemDB::new())
            .configuration(configuration(dir.path(), 16))
            .on_insert_record(move |_| *inserted.lock().unwrap() += 1)
            .on_apply_weight(move |event| applied.lock().unwrap().push(event.goff))
            .on_close_hole(move |_| *closed_holes.lock().unwrap() += 1)
            .build()
            .open()
            .unwrap()
    };

    let a = record("a", &[], 1);
    let b = record("b", &[&a], 1);
    engine.put_record(&a).unwrap();
    engine.put_record(&b).unwrap();
    while engine.has_pending_graph_work() {
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    // Closing drains the event bus.
    engine.close().unwrap();
    assert_eq!(*inserted.lock().unwrap(), 2);
    assert_eq!(*applied.lock().unwrap(), vec![Goff::new(0), Goff::new(1)]);
    assert!(*closed_holes.lock().unwrap() >= 1);
}

#[test]
fn concurrent_ingestion_test() {
    setup_logger(LevelFilter::Info);
    let node = Arc::new(Node::new());

    let records = random_dag(11, 80);
    let expected = expected_weights(&records);

    // Four threads insert interleaved slices of the same graph.
    let handles: Vec<_> = (0..4)
        .map(|thread_index| {
            let node = node.clone();
            let records: Vec<_> = shuffled(&records, thread_index as u64)
                .into_iter()
                .skip(thread_index)
                .step_by(4)
                .collect();
            std::thread::spawn(move || node.put_all(&records))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Slices of different shuffles overlap and miss records. Inserting everything again completes the
    // graph, and the overlapping records are deduplicated.
    node.put_all(&records);
    node.wait_for_idle();

    assert_eq!(node.engine().record_count().unwrap(), records.len() as u64);
    for rec in &records {
        assert_eq!(node.weight(rec).int(), expected[&rec.hash]);
    }
}

#[test]
fn log_events_test() {
    setup_logger(LevelFilter::Info);
    let dir = tempfile::tempdir().unwrap();
    let configuration = Configuration::builder()
        .path(dir.path())
        .initial_weight_capacity(1)
        .work_poll_interval(std::time::Duration::from_millis(5))
        .log_events(true)
        .build();

    // Only the default loggers are registered, so the event bus runs without user handlers.
    let engine = Engine::open(MemDB::new(), configuration).unwrap();
    let a = record("a", &[], 1);
    let b = record("b", &[&a], 1);
    let selfish = record_with_hash(0x9, &[0x9], 1);
    for rec in [&b, &a, &selfish] {
        engine.put_record(rec).unwrap();
    }
    while engine.has_pending_graph_work() {
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    assert_eq!(engine.weight(&a.hash).unwrap().unwrap().weight, Weight::new(2));
    engine.close().unwrap();
}
