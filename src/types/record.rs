/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'record' type and its associated methods.

use std::collections::HashSet;

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

use super::data_types::{CryptoHash, RecordId, Score};

/// A content-addressed unit of the record graph.
///
/// Records are immutable once accepted. Their graph offset is not part of the record: it is assigned
/// locally when the record is accepted, and is the key under which the record is stored.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Record {
    pub hash: CryptoHash,
    pub id: RecordId,
    pub links: Vec<CryptoHash>,
    pub score: Score,
}

impl Record {
    /// Create a new record whose hash is computed from its contents and `payload`.
    pub fn new(id: RecordId, links: Vec<CryptoHash>, score: Score, payload: &[u8]) -> Record {
        Record {
            hash: Record::hash(&id, &links, score, payload),
            id,
            links,
            score,
        }
    }

    /// Create a new record with a hash that was computed elsewhere, e.g., by the record parser.
    ///
    /// The engine does not verify `hash`.
    pub fn with_hash(hash: CryptoHash, id: RecordId, links: Vec<CryptoHash>, score: Score) -> Record {
        Record {
            hash,
            id,
            links,
            score,
        }
    }

    pub fn hash(id: &RecordId, links: &[CryptoHash], score: Score, payload: &[u8]) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(id.bytes());
        hasher.update((links.len() as u64).to_le_bytes());
        for link in links {
            hasher.update(link.bytes());
        }
        hasher.update(score.int().to_le_bytes());
        hasher.update(payload);
        CryptoHash::new(hasher.finalize().into())
    }

    /// Iterate through the links of this record, skipping repeated occurrences of the same hash.
    ///
    /// A record that lists the same predecessor twice depends on it once.
    pub fn distinct_links(&self) -> impl Iterator<Item = &CryptoHash> {
        let mut seen = HashSet::with_capacity(self.links.len());
        self.links.iter().filter(move |link| seen.insert(**link))
    }
}
