/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! General purpose, read-only interface for querying the graph variables.

use crate::types::{
    data_types::{CryptoHash, Goff, Hole, RecordId},
    record::Record,
};

use super::super::pluggables::{KVGet, KVGetError, KVStore};

/// A factory for [`GraphSnapshot`]s.
#[derive(Clone)]
pub struct GraphCamera<K: KVStore>(K);

impl<K: KVStore> GraphCamera<K> {
    pub fn new(kv_store: K) -> Self {
        GraphCamera(kv_store)
    }

    pub fn snapshot(&self) -> GraphSnapshot<K::Snapshot<'_>> {
        GraphSnapshot::new(self.0.snapshot())
    }
}

/// A read-only view into the graph variables that is guaranteed to stay unchanged.
pub struct GraphSnapshot<S: KVGet>(S);

impl<S: KVGet> GraphSnapshot<S> {
    pub(crate) fn new(kv_snapshot: S) -> Self {
        GraphSnapshot(kv_snapshot)
    }

    pub fn record(&self, goff: Goff) -> Result<Option<Record>, KVGetError> {
        self.0.record(goff)
    }

    pub fn record_by_hash(&self, hash: &CryptoHash) -> Result<Option<(Goff, Record)>, KVGetError> {
        match self.0.goff_by_hash(hash)? {
            Some(goff) => Ok(self.0.record(goff)?.map(|record| (goff, record))),
            None => Ok(None),
        }
    }

    pub fn record_exists(&self, hash: &CryptoHash) -> Result<bool, KVGetError> {
        Ok(self.0.goff_by_hash(hash)?.is_some())
    }

    pub fn goff_by_hash(&self, hash: &CryptoHash) -> Result<Option<Goff>, KVGetError> {
        self.0.goff_by_hash(hash)
    }

    /// Get the offsets of every revision of the logical key `id`, in acceptance order.
    pub fn record_history_by_id(&self, id: &RecordId) -> Result<Vec<Goff>, KVGetError> {
        self.0.history_by_id(id)
    }

    pub fn max_goff(&self) -> Result<Option<Goff>, KVGetError> {
        self.0.max_goff()
    }

    /// Get the number of records accepted so far.
    pub fn record_count(&self) -> Result<u64, KVGetError> {
        Ok(self.0.max_goff()?.map_or(0, |goff| goff.int() + 1))
    }

    /// Get the records that link to the record at `goff` and that were accepted after it.
    pub fn dependents(&self, goff: Goff) -> Result<Vec<Goff>, KVGetError> {
        self.0.dependents(goff)
    }

    /// Get the hashes referenced by dangling links, i.e., the records this replica should fetch.
    pub fn wanted_hashes(&self) -> Result<Vec<CryptoHash>, KVGetError> {
        self.0.wanted_hashes()
    }

    /// Get the offsets of the records that link to `missing` and are waiting for it.
    pub fn dangling_holders(&self, missing: &CryptoHash) -> Result<Vec<Goff>, KVGetError> {
        self.0.dangling_holders(missing)
    }

    pub fn holes(&self) -> Result<Vec<Hole>, KVGetError> {
        self.0.holes()
    }
}
