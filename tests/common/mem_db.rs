//! A simple, volatile, in-memory implementation of [`KVStore`].

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use weightgraph_rs::graph::{
    pluggables::{KVGet, KVStore, KVStoreError, WriteBatch},
    variables::HOLES,
};

/// An in-memory implementation of [`KVStore`].
///
/// Clones share the same map, so a clone can be used to reopen an engine over the same graph.
#[derive(Clone)]
pub(crate) struct MemDB {
    map: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
    busy_writes: Arc<AtomicU32>,
    failing_hole_writes: Arc<AtomicU32>,
}

impl MemDB {
    /// Create a new, empty `MemDB`.
    pub(crate) fn new() -> MemDB {
        MemDB {
            map: Arc::new(Mutex::new(HashMap::new())),
            busy_writes: Arc::new(AtomicU32::new(0)),
            failing_hole_writes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Make the next `writes` writes fail with [`KVStoreError::Busy`].
    pub(crate) fn fail_next_writes_busy(&self, writes: u32) {
        self.busy_writes.store(writes, Ordering::SeqCst);
    }

    /// Make the next `writes` writes that only update the holes fail with an I/O error. Other writes
    /// are unaffected.
    pub(crate) fn fail_next_hole_writes(&self, writes: u32) {
        self.failing_hole_writes.store(writes, Ordering::SeqCst);
    }

    pub(crate) fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }
}

impl KVStore for MemDB {
    type WriteBatch = MemWriteBatch;
    type Snapshot<'a> = MemDBSnapshot<'a>;

    fn write(&mut self, wb: &Self::WriteBatch) -> Result<(), KVStoreError> {
        let busy = self
            .busy_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |writes| writes.checked_sub(1));
        if busy.is_ok() {
            return Err(KVStoreError::Busy);
        }

        let holes_only = wb.deletions.is_empty()
            && wb.insertions.len() == 1
            && wb.insertions.contains_key(HOLES.as_slice());
        if holes_only
            && self
                .failing_hole_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |writes| writes.checked_sub(1))
                .is_ok()
        {
            return Err(KVStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected failure",
            )));
        }

        let mut map = self.map.lock().unwrap();
        for (key, value) in &wb.insertions {
            map.insert(key.clone(), value.clone());
        }
        for key in &wb.deletions {
            map.remove(key);
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.map.lock().unwrap().clear();
    }

    fn snapshot<'b>(&'b self) -> MemDBSnapshot<'b> {
        MemDBSnapshot(self.map.lock().unwrap())
    }
}

impl KVGet for MemDB {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.lock().unwrap().get(key).cloned()
    }
}

// A simple implementation of [`WriteBatch`].
pub(crate) struct MemWriteBatch {
    insertions: HashMap<Vec<u8>, Vec<u8>>,
    deletions: HashSet<Vec<u8>>,
}

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch {
            insertions: HashMap::new(),
            deletions: HashSet::new(),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        let _ = self.deletions.remove(key);
        self.insertions.insert(key.to_vec(), value.to_vec());
    }

    fn delete(&mut self, key: &[u8]) {
        let _ = self.insertions.remove(key);
        self.deletions.insert(key.to_vec());
    }
}

/// A simple implementation of [`KVGet`] used as `KVStore::Snapshot` for `MemDB`.
pub(crate) struct MemDBSnapshot<'a>(MutexGuard<'a, HashMap<Vec<u8>, Vec<u8>>>);

impl KVGet for MemDBSnapshot<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.get(key).cloned()
    }
}
