/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bookkeeping of dangling links and the wanted hashes derived from them.
//!
//! A link is dangling when the record that holds it was accepted before the record it names. Every
//! dangling link is a pair `(holder, missing)`. The set of distinct `missing` hashes is the set of
//! *wanted* hashes: records this replica should fetch from its peers.
//!
//! A holder is blocked, and may not have its weight applied, for as long as any of its links is
//! dangling. Its unresolved link count tracks how many of its distinct links are still missing; partial
//! resolution does not unblock it.
//!
//! # Staging
//!
//! Mutations are first collected in a [`DependencyChanges`] overlay, which is written into the same
//! write batch as the record that caused them. The in-memory state only adopts the overlay, through
//! [`DependencyTracker::commit`], after that batch has been written. A failed write therefore leaves
//! both the key-value store and the in-memory state untouched.
//!
//! Only the ingestion path mutates dependencies, and it does so under the engine's ingestion lock, so
//! at most one overlay is live at any time.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;

use crate::{
    graph::{
        accessors::internal::{GraphStore, GraphWriteBatch, StorageError},
        pluggables::{KVSetError, KVStore, WriteBatch},
    },
    types::data_types::{CryptoHash, Goff},
};

pub struct DependencyTracker {
    state: Mutex<DependencyState>,
}

#[derive(Default)]
struct DependencyState {
    holders_by_missing: HashMap<CryptoHash, Vec<Goff>>,
    unresolved: HashMap<Goff, u32>,
}

impl DependencyTracker {
    /// Load the dangling links persisted in `graph_store`.
    pub fn load<K: KVStore>(graph_store: &GraphStore<K>) -> Result<DependencyTracker, StorageError> {
        let mut state = DependencyState::default();
        for missing in graph_store.wanted_hashes()? {
            let holders = graph_store.dangling_holders(&missing)?;
            for holder in &holders {
                if !state.unresolved.contains_key(holder) {
                    let count = graph_store.unresolved_link_count(*holder)?;
                    state.unresolved.insert(*holder, count);
                }
            }
            state.holders_by_missing.insert(missing, holders);
        }
        Ok(DependencyTracker {
            state: Mutex::new(state),
        })
    }

    /// Record that `holder` links to `missing`, which has not been accepted yet.
    ///
    /// `missing` becomes wanted if it was not already.
    pub fn record_dangling(&self, changes: &mut DependencyChanges, holder: Goff, missing: CryptoHash) {
        let state = self.state.lock();

        let holders = changes
            .holders_by_missing
            .entry(missing)
            .or_insert_with(|| state.holders_by_missing.get(&missing).cloned());
        let holders = holders.get_or_insert_with(Vec::new);
        if !holders.contains(&holder) {
            holders.push(holder);

            let count = changes
                .unresolved
                .entry(holder)
                .or_insert_with(|| state.unresolved.get(&holder).copied());
            *count = Some(count.unwrap_or(0) + 1);
        }
    }

    /// Resolve every dangling link to `hash`, which has just been accepted.
    ///
    /// Deletes the dangling links, decrements the unresolved link count of every holder, and stops
    /// wanting `hash`. Returns every holder, paired with whether that holder has no unresolved links
    /// left.
    pub fn resolve(&self, changes: &mut DependencyChanges, hash: &CryptoHash) -> Vec<(Goff, bool)> {
        let state = self.state.lock();

        let holders = match changes.holders_by_missing.get(hash) {
            Some(staged) => staged.clone().unwrap_or_default(),
            None => state
                .holders_by_missing
                .get(hash)
                .cloned()
                .unwrap_or_default(),
        };
        if holders.is_empty() {
            return Vec::new();
        }
        changes.holders_by_missing.insert(*hash, None);

        holders
            .into_iter()
            .map(|holder| {
                let count = changes
                    .unresolved
                    .entry(holder)
                    .or_insert_with(|| state.unresolved.get(&holder).copied());
                let remaining = count.unwrap_or(0).saturating_sub(1);
                *count = if remaining == 0 { None } else { Some(remaining) };
                (holder, remaining == 0)
            })
            .collect()
    }

    /// Adopt `changes` after they have been durably written.
    pub fn commit(&self, changes: DependencyChanges) {
        let mut state = self.state.lock();
        for (missing, holders) in changes.holders_by_missing {
            match holders {
                Some(holders) => state.holders_by_missing.insert(missing, holders),
                None => state.holders_by_missing.remove(&missing),
            };
        }
        for (holder, count) in changes.unresolved {
            match count {
                Some(count) => state.unresolved.insert(holder, count),
                None => state.unresolved.remove(&holder),
            };
        }
    }

    /// Whether any link of the record at `goff` is still dangling.
    pub fn is_dangling(&self, goff: Goff) -> bool {
        self.state.lock().unresolved.contains_key(&goff)
    }

    pub fn is_wanted(&self, hash: &CryptoHash) -> bool {
        self.state.lock().holders_by_missing.contains_key(hash)
    }

    /// Get the hashes referenced by at least one dangling link, in ascending order.
    pub fn wanted_hashes(&self) -> Vec<CryptoHash> {
        let state = self.state.lock();
        let mut wanted: Vec<CryptoHash> = state.holders_by_missing.keys().copied().collect();
        wanted.sort();
        wanted
    }

    /// Write `changes` into `write_batch`.
    pub fn stage<W: WriteBatch>(
        &self,
        changes: &DependencyChanges,
        write_batch: &mut GraphWriteBatch<W>,
    ) -> Result<(), KVSetError> {
        for (holder, count) in &changes.unresolved {
            match count {
                Some(count) => write_batch.set_unresolved_link_count(*holder, *count)?,
                None => write_batch.delete_unresolved_link_count(*holder),
            }
        }

        if changes.holders_by_missing.is_empty() {
            return Ok(());
        }

        let state = self.state.lock();
        let mut wanted: BTreeSet<CryptoHash> = state.holders_by_missing.keys().copied().collect();
        for (missing, holders) in &changes.holders_by_missing {
            match holders {
                Some(holders) => {
                    write_batch.set_dangling_holders(missing, holders)?;
                    wanted.insert(*missing);
                }
                None => {
                    write_batch.delete_dangling_holders(missing);
                    wanted.remove(missing);
                }
            }
        }
        write_batch.set_wanted_hashes(&wanted.into_iter().collect::<Vec<_>>())
    }
}

/// Dependency mutations that have not been written yet.
///
/// `None` values stand for deletions.
#[derive(Default)]
pub struct DependencyChanges {
    holders_by_missing: HashMap<CryptoHash, Option<Vec<Goff>>>,
    unresolved: HashMap<Goff, Option<u32>>,
}

impl DependencyChanges {
    pub fn new() -> DependencyChanges {
        DependencyChanges::default()
    }
}
