use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};

use tempfile::TempDir;
use weightgraph_rs::{
    engine::{Configuration, Engine, PutRecordResult},
    types::{data_types::Weight, record::Record},
    weights::Slot,
};

use crate::common::mem_db::MemDB;

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a configuration for an engine whose weight store lives in `dir`.
pub(crate) fn configuration(dir: &Path, initial_weight_capacity: u64) -> Configuration {
    Configuration::builder()
        .path(dir)
        .initial_weight_capacity(initial_weight_capacity)
        .work_poll_interval(Duration::from_millis(5))
        .write_retry_backoff(Duration::from_millis(1))
        .build()
}

/// An engine together with the key-value store and directory it was opened over.
///
/// The directory is deleted when the node is dropped.
pub(crate) struct Node {
    engine: Option<Engine<MemDB>>,
    pub(crate) db: MemDB,
    pub(crate) dir: TempDir,
}

impl Node {
    pub(crate) fn new() -> Node {
        Node::with_capacity(1024)
    }

    pub(crate) fn with_capacity(initial_weight_capacity: u64) -> Node {
        let db = MemDB::new();
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(db.clone(), configuration(dir.path(), initial_weight_capacity)).unwrap();
        Node {
            engine: Some(engine),
            db,
            dir,
        }
    }

    pub(crate) fn engine(&self) -> &Engine<MemDB> {
        self.engine.as_ref().unwrap()
    }

    /// Close the engine.
    pub(crate) fn close(&mut self) {
        self.engine.take().unwrap().close().unwrap();
    }

    /// Open an engine over the same key-value store and directory.
    pub(crate) fn reopen(&mut self) {
        assert!(self.engine.is_none(), "close the engine before reopening it");
        self.engine = Some(Engine::open(self.db.clone(), configuration(self.dir.path(), 1024)).unwrap());
    }

    pub(crate) fn restart(&mut self) {
        self.close();
        self.reopen();
    }

    pub(crate) fn put(&self, record: &Record) -> PutRecordResult {
        self.engine().put_record(record).unwrap()
    }

    pub(crate) fn put_all(&self, records: &[Record]) {
        for record in records {
            self.put(record);
        }
    }

    /// Block until the propagation thread has no queued work.
    pub(crate) fn wait_for_idle(&self) {
        let start = Instant::now();
        while self.engine().has_pending_graph_work() {
            assert!(
                start.elapsed() < IDLE_TIMEOUT,
                "propagation did not finish in {:?}",
                IDLE_TIMEOUT
            );
            thread::sleep(Duration::from_millis(2));
        }
    }

    pub(crate) fn slot(&self, record: &Record) -> Slot {
        self.engine().weight(&record.hash).unwrap().unwrap()
    }

    pub(crate) fn weight(&self, record: &Record) -> Weight {
        self.slot(record).weight
    }

    pub(crate) fn is_applied(&self, record: &Record) -> bool {
        self.slot(record).applied
    }
}
