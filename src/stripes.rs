/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fine-grained mutual exclusion over graph offsets with a bounded number of locks.
//!
//! Instead of one global lock over the whole graph, offset `goff` is protected by stripe
//! `goff mod STRIPE_COUNT`. Offsets that map to different stripes can be mutated fully in parallel.
//! Unrelated offsets may alias to the same stripe; that only costs contention, never correctness, because
//! the only rule is "hold the stripe of the offset whose weight you are mutating".
//!
//! Holding a stripe is witnessed by a [`StripeGuard`]. The [weight store](crate::weights) demands a
//! guard for every mutation and checks that it [covers](StripeGuard::covers) the mutated offset.

use parking_lot::{Mutex, MutexGuard};

use crate::types::data_types::Goff;

/// Number of stripes. Prime, to decorrelate adjacent offsets.
pub const STRIPE_COUNT: usize = 197;

pub struct StripedLocks {
    stripes: Box<[Mutex<()>]>,
}

impl StripedLocks {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPE_COUNT).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Get the index of the stripe that protects `goff`.
    pub const fn stripe_of(goff: Goff) -> usize {
        (goff.int() % STRIPE_COUNT as u64) as usize
    }

    /// Block until the stripe protecting `goff` is acquired.
    pub fn lock(&self, goff: Goff) -> StripeGuard<'_> {
        let stripe = Self::stripe_of(goff);
        StripeGuard {
            stripe,
            _guard: self.stripes[stripe].lock(),
        }
    }
}

impl Default for StripedLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that a stripe is held. The stripe is released when the guard is dropped.
pub struct StripeGuard<'a> {
    stripe: usize,
    _guard: MutexGuard<'a, ()>,
}

impl StripeGuard<'_> {
    pub fn stripe(&self) -> usize {
        self.stripe
    }

    /// Whether this guard protects `goff`.
    pub fn covers(&self, goff: Goff) -> bool {
        StripedLocks::stripe_of(goff) == self.stripe
    }
}
