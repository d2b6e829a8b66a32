/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable graph persistence.

use std::fmt::Display;

use borsh::BorshDeserialize;
use thiserror::Error;

use crate::{
    peers::{Peer, PotentialPeer},
    types::{
        data_types::{CryptoHash, Goff, Hole, RecordId},
        record::Record,
    },
};

use super::variables::{self, concat};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + KVGet;

    /// Atomically apply every insertion and deletion in `wb`.
    ///
    /// Implementations return [`KVStoreError::Busy`] for transient conditions (e.g., lock contention in
    /// the underlying database). The engine retries those with backoff; every other error is surfaced.
    fn write(&mut self, wb: &Self::WriteBatch) -> Result<(), KVStoreError>;
    fn clear(&mut self);
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'b>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Get the value stored at `kv_key` and deserialize it, reporting failures against `key`.
    fn get_deserialized<T: BorshDeserialize>(
        &self,
        kv_key: &[u8],
        key: Key,
    ) -> Result<Option<T>, KVGetError> {
        match self.get(kv_key) {
            Some(bytes) => Ok(Some(
                T::deserialize(&mut bytes.as_slice())
                    .map_err(|err| KVGetError::DeserializeValueError { key, source: err })?,
            )),
            None => Ok(None),
        }
    }

    /* ↓↓↓ Records ↓↓↓ */

    fn record(&self, goff: Goff) -> Result<Option<Record>, KVGetError> {
        self.get_deserialized(
            &concat(&variables::RECORDS, &goff.to_be_bytes()),
            Key::Record { goff },
        )
    }

    /* ↓↓↓ Goff by Hash ↓↓↓ */

    fn goff_by_hash(&self, hash: &CryptoHash) -> Result<Option<Goff>, KVGetError> {
        self.get_deserialized(
            &concat(&variables::GOFF_BY_HASH, &hash.bytes()),
            Key::GoffByHash { hash: *hash },
        )
    }

    /* ↓↓↓ History by Id ↓↓↓ */

    fn history_by_id(&self, id: &RecordId) -> Result<Vec<Goff>, KVGetError> {
        Ok(self
            .get_deserialized(
                &concat(&variables::HISTORY_BY_ID, &id.bytes()),
                Key::HistoryById { id: *id },
            )?
            .unwrap_or_default())
    }

    /* ↓↓↓ Dependents ↓↓↓ */

    fn dependents(&self, goff: Goff) -> Result<Vec<Goff>, KVGetError> {
        Ok(self
            .get_deserialized(
                &concat(&variables::DEPENDENTS, &goff.to_be_bytes()),
                Key::Dependents { goff },
            )?
            .unwrap_or_default())
    }

    /* ↓↓↓ Dangling Links ↓↓↓ */

    fn dangling_holders(&self, missing: &CryptoHash) -> Result<Vec<Goff>, KVGetError> {
        Ok(self
            .get_deserialized(
                &concat(&variables::DANGLING_LINKS, &missing.bytes()),
                Key::DanglingLinks { missing: *missing },
            )?
            .unwrap_or_default())
    }

    /* ↓↓↓ Unresolved Link Count ↓↓↓ */

    fn unresolved_link_count(&self, goff: Goff) -> Result<u32, KVGetError> {
        Ok(self
            .get_deserialized(
                &concat(&variables::UNRESOLVED_LINK_COUNT, &goff.to_be_bytes()),
                Key::UnresolvedLinkCount { goff },
            )?
            .unwrap_or(0))
    }

    /* ↓↓↓ Wanted Hashes ↓↓↓ */

    fn wanted_hashes(&self) -> Result<Vec<CryptoHash>, KVGetError> {
        Ok(self
            .get_deserialized(&variables::WANTED_HASHES, Key::WantedHashes)?
            .unwrap_or_default())
    }

    /* ↓↓↓ Holes ↓↓↓ */

    fn holes(&self) -> Result<Vec<Hole>, KVGetError> {
        Ok(self
            .get_deserialized(&variables::HOLES, Key::Holes)?
            .unwrap_or_default())
    }

    /* ↓↓↓ Max Goff ↓↓↓ */

    fn max_goff(&self) -> Result<Option<Goff>, KVGetError> {
        self.get_deserialized(&variables::MAX_GOFF, Key::MaxGoff)
    }

    /* ↓↓↓ Peers ↓↓↓ */

    fn peer(&self, key_hash: &CryptoHash) -> Result<Option<Peer>, KVGetError> {
        self.get_deserialized(
            &concat(&variables::PEERS, &key_hash.bytes()),
            Key::Peer {
                key_hash: *key_hash,
            },
        )
    }

    fn potential_peers(&self) -> Result<Vec<PotentialPeer>, KVGetError> {
        Ok(self
            .get_deserialized(&variables::POTENTIAL_PEERS, Key::PotentialPeers)?
            .unwrap_or_default())
    }
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
#[derive(Debug, Error)]
pub enum KVGetError {
    #[error("failed to deserialize {key}")]
    DeserializeValueError {
        key: Key,
        #[source]
        source: std::io::Error,
    },
}

/// Error when trying to serialize a value before setting it into a [write batch][WriteBatch].
#[derive(Debug, Error)]
pub enum KVSetError {
    #[error("failed to serialize {key}")]
    SerializeValueError {
        key: Key,
        #[source]
        source: std::io::Error,
    },
}

/// Error returned by a [`KVStore`] implementation when a write batch could not be applied.
#[derive(Debug, Error)]
pub enum KVStoreError {
    /// The store is temporarily unable to accept the write. Retried by the engine.
    #[error("key-value store is busy")]
    Busy,
    #[error("key-value store I/O failure")]
    Io(#[from] std::io::Error),
    #[error("key-value store is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug)]
pub enum Key {
    Record { goff: Goff },
    GoffByHash { hash: CryptoHash },
    HistoryById { id: RecordId },
    Dependents { goff: Goff },
    DanglingLinks { missing: CryptoHash },
    UnresolvedLinkCount { goff: Goff },
    WantedHashes,
    Holes,
    MaxGoff,
    Peer { key_hash: CryptoHash },
    PotentialPeers,
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Record { goff } => write!(f, "Record at goff {}", goff),
            Key::GoffByHash { hash } => write!(f, "Goff for record {}", hash),
            Key::HistoryById { id } => write!(f, "History for id {:?}", id),
            Key::Dependents { goff } => write!(f, "Dependents of goff {}", goff),
            Key::DanglingLinks { missing } => write!(f, "Dangling links to {}", missing),
            Key::UnresolvedLinkCount { goff } => {
                write!(f, "Unresolved link count of goff {}", goff)
            }
            Key::WantedHashes => write!(f, "Wanted Hashes"),
            Key::Holes => write!(f, "Holes"),
            Key::MaxGoff => write!(f, "Max Goff"),
            Key::Peer { key_hash } => write!(f, "Peer {}", key_hash),
            Key::PotentialPeers => write!(f, "Potential Peers"),
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}
