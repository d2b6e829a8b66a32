/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tracking of the ranges of graph offsets whose weight propagation is incomplete.
//!
//! Every accepted record joins a [`Hole`] when it is accepted, and leaves it when its weight is applied.
//! At every point in time, the open holes together with the applied offsets cover `[0, max_goff]`.
//! After a restart, the engine re-queues every unapplied offset inside a persisted hole, so the holes are
//! all that is needed to resume propagation.
//!
//! Holes are kept sorted by `start` and never overlap. A hole whose `pending` count reaches zero is
//! closed, i.e., removed.
//!
//! # Mutating holes
//!
//! Mutations go through a [`HoleSet`], obtained by [`HoleTracker::lock`], which holds the tracker's
//! mutex for as long as it lives. A hole set works on a copy of the holes: the caller writes the copy
//! into a write batch with [`HoleSet::stage`], writes the batch, and then makes the copy current with
//! [`HoleSet::commit`]. Dropping a hole set without committing it discards its mutations.
//!
//! The ingestion path only commits after its write succeeds. The propagation thread shrinks holes for
//! offsets that are already marked applied in the weight store, so it commits even if the write fails,
//! and persists the holes again later. Persisted holes can therefore lag behind the applied flags;
//! [`HoleSet::reconcile`] brings them back in line when an engine is opened.

use parking_lot::{Mutex, MutexGuard};

use crate::{
    graph::{
        accessors::internal::{GraphStore, GraphWriteBatch, StorageError},
        pluggables::{KVSetError, KVStore, WriteBatch},
    },
    types::data_types::{Goff, Hole},
    weights::{WeightStore, WeightStoreError},
};

pub struct HoleTracker {
    holes: Mutex<Vec<Hole>>,
}

impl HoleTracker {
    /// Load the holes persisted in `graph_store`.
    pub fn load<K: KVStore>(graph_store: &GraphStore<K>) -> Result<HoleTracker, StorageError> {
        let mut holes = graph_store.holes()?;
        holes.sort_by_key(|hole| hole.start);
        Ok(HoleTracker {
            holes: Mutex::new(holes),
        })
    }

    /// Get every open hole, ordered by `start`.
    pub fn list_holes(&self) -> Vec<Hole> {
        self.holes.lock().clone()
    }

    /// Block until the holes can be mutated.
    pub fn lock(&self) -> HoleSet<'_> {
        let guard = self.holes.lock();
        let staged = guard.clone();
        HoleSet { guard, staged }
    }
}

/// The result of [`HoleSet::shrink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shrink {
    /// The hole that covered the offset is still open, and now looks like this.
    Shrunk(Hole),
    /// The offset was the last pending offset of this hole, which is now closed.
    Closed(Hole),
    /// No hole covered the offset.
    NotCovered,
}

pub struct HoleSet<'a> {
    guard: MutexGuard<'a, Vec<Hole>>,
    staged: Vec<Hole>,
}

impl HoleSet<'_> {
    /// Register `count` pending offsets starting at `start`, merging them into the open hole that ends
    /// at `start` or begins right after them, if any.
    ///
    /// Returns the hole that now covers the offsets.
    pub fn open_hole(&mut self, start: Goff, count: u64) -> Hole {
        let end = start + count;
        let position = self.staged.partition_point(|hole| hole.start < start);

        let merge_before = position > 0 && self.staged[position - 1].end() == start;
        let merge_after = position < self.staged.len() && self.staged[position].start == end;

        match (merge_before, merge_after) {
            (true, true) => {
                let after = self.staged.remove(position);
                let before = &mut self.staged[position - 1];
                before.count += count + after.count;
                before.pending += count + after.pending;
                *before
            }
            (true, false) => {
                let before = &mut self.staged[position - 1];
                before.count += count;
                before.pending += count;
                *before
            }
            (false, true) => {
                let after = &mut self.staged[position];
                after.start = start;
                after.count += count;
                after.pending += count;
                *after
            }
            (false, false) => {
                let hole = Hole::new(start, count);
                self.staged.insert(position, hole);
                hole
            }
        }
    }

    /// Record that the weight of `goff` has been applied.
    ///
    /// Decrements the pending count of the hole that covers `goff`, then trims applied offsets off both
    /// ends of the hole, or closes it if nothing in it is pending anymore. `goff` must already be
    /// marked applied in `weights`.
    pub fn shrink(&mut self, goff: Goff, weights: &WeightStore) -> Shrink {
        let position = match self.staged.iter().position(|hole| hole.covers(goff)) {
            Some(position) => position,
            None => return Shrink::NotCovered,
        };

        let hole = &mut self.staged[position];
        hole.pending = hole.pending.saturating_sub(1);
        if hole.pending == 0 {
            let closed = self.staged.remove(position);
            return Shrink::Closed(closed);
        }

        // Trimming is best effort: an offset that cannot be read stays inside the hole.
        while hole.count > 0 && is_applied(weights, hole.start) {
            hole.start = hole.start + 1;
            hole.count -= 1;
        }
        while hole.count > 0 && is_applied(weights, Goff::new(hole.end().int() - 1)) {
            hole.count -= 1;
        }

        Shrink::Shrunk(*hole)
    }

    /// Recount every hole against the applied flags in `weights`: applied offsets are trimmed off both
    /// ends, `pending` becomes the number of unapplied offsets, and holes with nothing pending are
    /// closed.
    ///
    /// Returns whether any hole changed.
    pub fn reconcile(&mut self, weights: &WeightStore) -> Result<bool, WeightStoreError> {
        let mut reconciled = Vec::with_capacity(self.staged.len());
        for hole in &self.staged {
            let mut first = None;
            let mut last = None;
            let mut pending = 0;
            for offset in hole.offsets() {
                if !weights.get(offset)?.applied {
                    first.get_or_insert(offset);
                    last = Some(offset);
                    pending += 1;
                }
            }
            if let (Some(first), Some(last)) = (first, last) {
                reconciled.push(Hole {
                    start: first,
                    count: last.int() - first.int() + 1,
                    pending,
                });
            }
        }

        let changed = reconciled != self.staged;
        self.staged = reconciled;
        Ok(changed)
    }

    /// Write the mutated holes into `write_batch`.
    pub fn stage<W: WriteBatch>(&self, write_batch: &mut GraphWriteBatch<W>) -> Result<(), KVSetError> {
        write_batch.set_holes(&self.staged)
    }

    /// Make the mutated holes current and release the tracker.
    pub fn commit(mut self) {
        *self.guard = std::mem::take(&mut self.staged);
    }
}

fn is_applied(weights: &WeightStore, goff: Goff) -> bool {
    weights.get(goff).map_or(false, |slot| slot.applied)
}
