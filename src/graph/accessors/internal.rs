/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Internal read-and-write handle used by the ingestion path and the propagation thread to mutate the
//! graph variables.
//!
//! Every mutation goes through a [`GraphWriteBatch`], which is applied atomically by
//! [`GraphStore::write`]. Writes that fail with [`KVStoreError::Busy`] are retried with exponential
//! backoff according to the store's [`WritePolicy`]; any other failure is surfaced as a
//! [`StorageError`].

use std::{thread, time::Duration};

use borsh::BorshSerialize;
use thiserror::Error;

use crate::{
    peers::{Peer, PotentialPeer},
    types::{
        data_types::{CryptoHash, Goff, Hole, RecordId},
        record::Record,
    },
};

use super::super::{
    pluggables::{KVGetError, KVSetError, KVStore, KVStoreError, Key, WriteBatch},
    variables::{self, concat},
};

/// How writes that fail with [`KVStoreError::Busy`] are retried.
#[derive(Clone, Copy, Debug)]
pub struct WritePolicy {
    /// Maximum number of retries after the first attempt.
    pub retry_limit: u32,
    /// Delay before the first retry. Doubles after every retry.
    pub backoff: Duration,
}

/// Read and write handle into the graph variables.
pub struct GraphStore<K: KVStore> {
    kv_store: K,
    write_policy: WritePolicy,
}

/// Lifecycle methods.
impl<K: KVStore> GraphStore<K> {
    pub(crate) fn new(kv_store: K, write_policy: WritePolicy) -> Self {
        Self {
            kv_store,
            write_policy,
        }
    }

    /// Atomically apply `write_batch`, retrying while the key-value store reports that it is busy.
    pub fn write(
        &mut self,
        write_batch: GraphWriteBatch<K::WriteBatch>,
    ) -> Result<(), StorageError> {
        let mut backoff = self.write_policy.backoff;
        let mut retries = 0;
        loop {
            match self.kv_store.write(&write_batch.0) {
                Ok(()) => return Ok(()),
                Err(KVStoreError::Busy) if retries < self.write_policy.retry_limit => {
                    log::debug!(
                        "Key-value store busy, retrying write in {:?} (retry {})",
                        backoff,
                        retries + 1
                    );
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                    retries += 1;
                }
                Err(err) => return Err(StorageError::KVStoreError(err)),
            }
        }
    }
}

/// Record store queries.
impl<K: KVStore> GraphStore<K> {
    pub fn record_exists(&self, hash: &CryptoHash) -> Result<bool, StorageError> {
        Ok(self.kv_store.goff_by_hash(hash)?.is_some())
    }

    pub fn goff_by_hash(&self, hash: &CryptoHash) -> Result<Option<Goff>, StorageError> {
        Ok(self.kv_store.goff_by_hash(hash)?)
    }

    /// Get the record stored at `goff`, which must exist.
    pub fn record(&self, goff: Goff) -> Result<Record, StorageError> {
        self.kv_store
            .record(goff)?
            .ok_or(StorageError::RecordExpectedButNotFound { goff })
    }

    pub fn record_history_by_id(&self, id: &RecordId) -> Result<Vec<Goff>, StorageError> {
        Ok(self.kv_store.history_by_id(id)?)
    }

    pub fn max_goff(&self) -> Result<Option<Goff>, StorageError> {
        Ok(self.kv_store.max_goff()?)
    }

    pub fn dependents(&self, goff: Goff) -> Result<Vec<Goff>, StorageError> {
        Ok(self.kv_store.dependents(goff)?)
    }

    pub fn dangling_holders(&self, missing: &CryptoHash) -> Result<Vec<Goff>, StorageError> {
        Ok(self.kv_store.dangling_holders(missing)?)
    }

    pub fn unresolved_link_count(&self, goff: Goff) -> Result<u32, StorageError> {
        Ok(self.kv_store.unresolved_link_count(goff)?)
    }

    pub fn wanted_hashes(&self) -> Result<Vec<CryptoHash>, StorageError> {
        Ok(self.kv_store.wanted_hashes()?)
    }

    pub fn holes(&self) -> Result<Vec<Hole>, StorageError> {
        Ok(self.kv_store.holes()?)
    }

    /// Get every offset that may still be waiting for weight application.
    ///
    /// Every record that is not yet weight-applied lies inside a persisted hole, so the offsets covered
    /// by holes are a superset of the pending records. The caller filters out the ones that the weight
    /// store already marks as applied.
    pub fn records_pending_weight_application(&self) -> Result<Vec<Goff>, StorageError> {
        Ok(self
            .kv_store
            .holes()?
            .iter()
            .flat_map(|hole| hole.offsets())
            .collect())
    }

    pub fn peer(&self, key_hash: &CryptoHash) -> Result<Option<Peer>, StorageError> {
        Ok(self.kv_store.peer(key_hash)?)
    }

    pub fn potential_peers(&self) -> Result<Vec<PotentialPeer>, StorageError> {
        Ok(self.kv_store.potential_peers()?)
    }
}

/// Error when reading or writing the graph variables.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when trying to get a value from the underlying [key value store][KVStore].
    #[error(transparent)]
    KVGetError(#[from] KVGetError),

    /// Error when trying to serialize a value into a write batch.
    #[error(transparent)]
    KVSetError(#[from] KVSetError),

    /// Error when the underlying key value store could not apply a write batch.
    #[error("failed to write to the key-value store")]
    KVStoreError(#[source] KVStoreError),

    /// Unable to find a record at a specific goff, even though an invariant that the engine expects to
    /// be maintained suggests that the record should exist.
    #[error("expected a record at goff {goff}, but it was not found")]
    RecordExpectedButNotFound { goff: Goff },
}

/// A batch of graph variable updates, applied atomically by [`GraphStore::write`].
pub struct GraphWriteBatch<W: WriteBatch>(pub(super) W);

fn serialize<T: BorshSerialize>(value: &T, key: impl FnOnce() -> Key) -> Result<Vec<u8>, KVSetError> {
    value
        .try_to_vec()
        .map_err(|err| KVSetError::SerializeValueError {
            key: key(),
            source: err,
        })
}

impl<W: WriteBatch> GraphWriteBatch<W> {
    pub(crate) fn new() -> GraphWriteBatch<W> {
        GraphWriteBatch(W::new())
    }

    /* ↓↓↓ Records ↓↓↓ */

    pub fn set_record(&mut self, goff: Goff, record: &Record) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::RECORDS, &goff.to_be_bytes()),
            &serialize(record, || Key::Record { goff })?,
        );
        Ok(())
    }

    /* ↓↓↓ Goff by Hash ↓↓↓ */

    pub fn set_goff_by_hash(&mut self, hash: &CryptoHash, goff: Goff) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::GOFF_BY_HASH, &hash.bytes()),
            &serialize(&goff, || Key::GoffByHash { hash: *hash })?,
        );
        Ok(())
    }

    /* ↓↓↓ History by Id ↓↓↓ */

    pub fn set_history_by_id(&mut self, id: &RecordId, history: &Vec<Goff>) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::HISTORY_BY_ID, &id.bytes()),
            &serialize(history, || Key::HistoryById { id: *id })?,
        );
        Ok(())
    }

    /* ↓↓↓ Dependents ↓↓↓ */

    pub fn set_dependents(&mut self, goff: Goff, dependents: &Vec<Goff>) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::DEPENDENTS, &goff.to_be_bytes()),
            &serialize(dependents, || Key::Dependents { goff })?,
        );
        Ok(())
    }

    /* ↓↓↓ Dangling Links ↓↓↓ */

    pub fn set_dangling_holders(
        &mut self,
        missing: &CryptoHash,
        holders: &Vec<Goff>,
    ) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::DANGLING_LINKS, &missing.bytes()),
            &serialize(holders, || Key::DanglingLinks { missing: *missing })?,
        );
        Ok(())
    }

    pub fn delete_dangling_holders(&mut self, missing: &CryptoHash) {
        self.0
            .delete(&concat(&variables::DANGLING_LINKS, &missing.bytes()));
    }

    /* ↓↓↓ Unresolved Link Count ↓↓↓ */

    pub fn set_unresolved_link_count(&mut self, goff: Goff, count: u32) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::UNRESOLVED_LINK_COUNT, &goff.to_be_bytes()),
            &serialize(&count, || Key::UnresolvedLinkCount { goff })?,
        );
        Ok(())
    }

    pub fn delete_unresolved_link_count(&mut self, goff: Goff) {
        self.0
            .delete(&concat(&variables::UNRESOLVED_LINK_COUNT, &goff.to_be_bytes()));
    }

    /* ↓↓↓ Wanted Hashes ↓↓↓ */

    pub fn set_wanted_hashes(&mut self, wanted: &Vec<CryptoHash>) -> Result<(), KVSetError> {
        self.0.set(
            &variables::WANTED_HASHES,
            &serialize(wanted, || Key::WantedHashes)?,
        );
        Ok(())
    }

    /* ↓↓↓ Holes ↓↓↓ */

    pub fn set_holes(&mut self, holes: &Vec<Hole>) -> Result<(), KVSetError> {
        self.0
            .set(&variables::HOLES, &serialize(holes, || Key::Holes)?);
        Ok(())
    }

    /* ↓↓↓ Max Goff ↓↓↓ */

    pub fn set_max_goff(&mut self, goff: Goff) -> Result<(), KVSetError> {
        self.0
            .set(&variables::MAX_GOFF, &serialize(&goff, || Key::MaxGoff)?);
        Ok(())
    }

    /* ↓↓↓ Peers ↓↓↓ */

    pub fn set_peer(&mut self, peer: &Peer) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::PEERS, &peer.key_hash.bytes()),
            &serialize(peer, || Key::Peer {
                key_hash: peer.key_hash,
            })?,
        );
        Ok(())
    }

    pub fn set_potential_peers(&mut self, peers: &Vec<PotentialPeer>) -> Result<(), KVSetError> {
        self.0.set(
            &variables::POTENTIAL_PEERS,
            &serialize(peers, || Key::PotentialPeers)?,
        );
        Ok(())
    }
}
