/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bookkeeping of the peers this replica has connected to, or heard about.
//!
//! The networking collaborator reports successful outgoing connections and candidate addresses here,
//! and reads them back when it needs to reconnect after a restart. The directory is persisted in the
//! same key-value store as the record graph, but is otherwise independent of it.
//!
//! Logging into the directory is fire-and-forget: failures are logged, never returned, so that a
//! storage hiccup never tears down a healthy connection.

use std::time::SystemTime;

use borsh::{BorshDeserialize, BorshSerialize};
use parking_lot::Mutex;

use crate::{
    graph::{
        accessors::internal::{GraphStore, GraphWriteBatch, StorageError},
        pluggables::KVStore,
    },
    types::data_types::CryptoHash,
};

/// Maximum number of potential peers remembered. When full, the oldest candidate is forgotten first.
pub const MAX_POTENTIAL_PEERS: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AddressType {
    V4,
    V6,
}

impl AddressType {
    /// Number of bytes in an address of this type.
    pub const fn address_len(&self) -> usize {
        match self {
            AddressType::V4 => 4,
            AddressType::V6 => 16,
        }
    }
}

/// A peer that this replica has successfully connected to at least once.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Peer {
    pub key_hash: CryptoHash,
    pub address_type: AddressType,
    pub address: Vec<u8>,
    pub port: u16,
    /// Seconds since the Unix Epoch of the first successful connection. Never updated afterwards.
    pub first_connect: u64,
    /// Seconds since the Unix Epoch of the latest successful connection.
    pub last_connect: u64,
}

/// An address that a peer was reported at, but that this replica has not connected to yet.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PotentialPeer {
    pub key_hash: CryptoHash,
    pub address_type: AddressType,
    pub address: Vec<u8>,
    pub port: u16,
}

pub struct PeerDirectory<K: KVStore> {
    graph_store: Mutex<GraphStore<K>>,
}

impl<K: KVStore> PeerDirectory<K> {
    pub(crate) fn new(graph_store: GraphStore<K>) -> Self {
        Self {
            graph_store: Mutex::new(graph_store),
        }
    }

    /// Record a successful outgoing connection to the peer identified by `key_hash`.
    ///
    /// Returns whether this was the first successful connection to the peer. Returns `false` if the
    /// connection could not be recorded.
    pub fn log_successful_connect(
        &self,
        key_hash: CryptoHash,
        address_type: AddressType,
        address: &[u8],
        port: u16,
    ) -> bool {
        if address.len() != address_type.address_len() {
            log::warn!(
                "Not logging connection to peer {}: {:?} address has {} bytes",
                key_hash,
                address_type,
                address.len()
            );
            return false;
        }

        let now = secs_since_unix_epoch();
        let mut graph_store = self.graph_store.lock();
        let result = (|| -> Result<bool, StorageError> {
            let previous = graph_store.peer(&key_hash)?;
            let first_time = previous.is_none();
            let peer = Peer {
                key_hash,
                address_type,
                address: address.to_vec(),
                port,
                first_connect: previous.map_or(now, |peer| peer.first_connect),
                last_connect: now,
            };

            let mut write_batch = GraphWriteBatch::new();
            write_batch.set_peer(&peer)?;

            // A connected peer is no longer a mere candidate.
            let mut potential_peers = graph_store.potential_peers()?;
            let candidates = potential_peers.len();
            potential_peers.retain(|potential_peer| potential_peer.key_hash != key_hash);
            if potential_peers.len() != candidates {
                write_batch.set_potential_peers(&potential_peers)?;
            }

            graph_store.write(write_batch)?;
            Ok(first_time)
        })();

        result.unwrap_or_else(|err| {
            log::warn!("Failed to log connection to peer {}: {}", key_hash, err);
            false
        })
    }

    /// Remember that the peer identified by `key_hash` may be reachable at `address` and `port`.
    ///
    /// Peers that this replica has already connected to, and candidates that are already remembered,
    /// are ignored.
    pub fn log_potential_peer(
        &self,
        key_hash: CryptoHash,
        address_type: AddressType,
        address: &[u8],
        port: u16,
    ) {
        if address.len() != address_type.address_len() {
            log::warn!(
                "Not logging potential peer {}: {:?} address has {} bytes",
                key_hash,
                address_type,
                address.len()
            );
            return;
        }

        let mut graph_store = self.graph_store.lock();
        let result = (|| -> Result<(), StorageError> {
            if graph_store.peer(&key_hash)?.is_some() {
                return Ok(());
            }

            let candidate = PotentialPeer {
                key_hash,
                address_type,
                address: address.to_vec(),
                port,
            };
            let mut potential_peers = graph_store.potential_peers()?;
            if potential_peers.contains(&candidate) {
                return Ok(());
            }
            potential_peers.push(candidate);
            if potential_peers.len() > MAX_POTENTIAL_PEERS {
                let excess = potential_peers.len() - MAX_POTENTIAL_PEERS;
                potential_peers.drain(..excess);
            }

            let mut write_batch = GraphWriteBatch::new();
            write_batch.set_potential_peers(&potential_peers)?;
            graph_store.write(write_batch)
        })();

        if let Err(err) = result {
            log::warn!("Failed to log potential peer {}: {}", key_hash, err);
        }
    }

    pub fn peer(&self, key_hash: &CryptoHash) -> Result<Option<Peer>, StorageError> {
        self.graph_store.lock().peer(key_hash)
    }

    /// Get the remembered candidates, oldest first.
    pub fn potential_peers(&self) -> Result<Vec<PotentialPeer>, StorageError> {
        self.graph_store.lock().potential_peers()
    }
}

fn secs_since_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
