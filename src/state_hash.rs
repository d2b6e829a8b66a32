/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Incremental, order-independent hash over the committed weights.
//!
//! Every applied record contributes the term `SHA-384(hash ‖ weight)` to a 48-byte XOR accumulator.
//! XOR is commutative, so the accumulator only depends on the set of `(hash, weight)` pairs and not on
//! the order in which records were applied. When the weight of an applied record changes, its old term
//! is XORed out and its new term XORed in.
//!
//! Terms are keyed by record hash rather than by goff, because two replicas that received the same
//! records in different orders assign them different goffs.
//!
//! The published digest is `SHA-384(accumulator ‖ record_count ‖ weight_sum)`, with both aggregates
//! little-endian.

use parking_lot::Mutex;
use sha2::{Digest, Sha384};

use crate::types::data_types::{CryptoHash, StateSummary, Weight};

pub struct StateHasher {
    state: Mutex<HashState>,
}

struct HashState {
    accumulator: [u8; 48],
    record_count: u64,
    // Weights only ever grow, so the exact sum never has to be decremented.
    weight_sum: u128,
}

impl StateHasher {
    pub fn new() -> StateHasher {
        StateHasher {
            state: Mutex::new(HashState {
                accumulator: [0; 48],
                record_count: 0,
                weight_sum: 0,
            }),
        }
    }

    /// Add a newly applied record with weight `weight`.
    pub fn commit(&self, hash: &CryptoHash, weight: Weight) {
        let mut state = self.state.lock();
        xor_into(&mut state.accumulator, &term(hash, weight));
        state.record_count += 1;
        state.weight_sum += weight.int() as u128;
    }

    /// Replace the term of an applied record whose weight went from `old` to `new`.
    pub fn reweigh(&self, hash: &CryptoHash, old: Weight, new: Weight) {
        if old == new {
            return;
        }
        let mut state = self.state.lock();
        xor_into(&mut state.accumulator, &term(hash, old));
        xor_into(&mut state.accumulator, &term(hash, new));
        state.weight_sum += new.int().saturating_sub(old.int()) as u128;
    }

    pub fn summary(&self) -> StateSummary {
        let state = self.state.lock();
        let weight_sum = u64::try_from(state.weight_sum).unwrap_or(u64::MAX);

        let mut hasher = Sha384::new();
        hasher.update(state.accumulator);
        hasher.update(state.record_count.to_le_bytes());
        hasher.update(weight_sum.to_le_bytes());

        let mut digest = [0; 48];
        digest.copy_from_slice(&hasher.finalize());
        StateSummary {
            digest,
            weight_sum,
            record_count: state.record_count,
        }
    }
}

impl Default for StateHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn term(hash: &CryptoHash, weight: Weight) -> [u8; 48] {
    let mut hasher = Sha384::new();
    hasher.update(hash.bytes());
    hasher.update(weight.int().to_le_bytes());
    let mut term = [0; 48];
    term.copy_from_slice(&hasher.finalize());
    term
}

fn xor_into(accumulator: &mut [u8; 48], term: &[u8; 48]) {
    accumulator
        .iter_mut()
        .zip(term.iter())
        .for_each(|(byte, term_byte)| *byte ^= term_byte);
}
