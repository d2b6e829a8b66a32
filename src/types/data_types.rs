/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or numbers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::Add,
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};

/// Graph offset: the permanent position of an accepted record in the local append order.
///
/// Graph offsets are assigned by [`put_record`](crate::engine::Engine::put_record) starting from 0,
/// increase by exactly 1 for every accepted record, and are never reused. They are local to a replica:
/// two replicas that receive the same records in different orders assign different offsets to them.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Goff(u64);

impl Goff {
    /// Create a new `Goff` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Goff`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the big-endian representation of this `Goff`.
    ///
    /// Keys derived from graph offsets use big-endian bytes so that byte-ordered key-value stores keep
    /// them in offset order.
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl Display for Goff {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Goff {
    type Output = Goff;
    fn add(self, rhs: u64) -> Self::Output {
        Goff::new(self.0 + rhs)
    }
}

/// Base score assigned to a record by its author.
///
/// The score is an opaque, non-negative input: it does not decay and is never subtracted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Score(u64);

impl Score {
    /// Create a new `Score` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Score`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Cumulative weight of a record: its own score plus the score of every record that transitively
/// links to it, each dependent counted once.
///
/// Weights saturate at [`u64::MAX`] instead of wrapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Weight(u64);

impl Weight {
    /// Create a new `Weight` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Weight`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Add `score` to this weight, saturating at the maximum representable value.
    pub const fn saturating_add(&self, score: Score) -> Self {
        Self(self.0.saturating_add(score.0))
    }
}

impl From<Score> for Weight {
    fn from(score: Score) -> Self {
        Weight(score.0)
    }
}

impl Display for Weight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// 32-byte cryptographic hash that identifies a record by its content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Logical identifier shared by competing or successive revisions of the same key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct RecordId([u8; 32]);

impl RecordId {
    /// Create a new `RecordId` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `RecordId`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

/// A contiguous range of graph offsets, `[start, start + count)`, whose weight propagation is not yet
/// complete.
///
/// `pending` is the number of offsets inside the range that are still waiting to have their weight
/// applied. It is always greater than zero: holes whose pending count reaches zero are closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Hole {
    pub start: Goff,
    pub count: u64,
    pub pending: u64,
}

impl Hole {
    /// Create a new `Hole` covering `count` offsets starting at `start`, all of them pending.
    pub const fn new(start: Goff, count: u64) -> Self {
        Self {
            start,
            count,
            pending: count,
        }
    }

    /// The first offset after the end of this hole.
    pub const fn end(&self) -> Goff {
        Goff::new(self.start.int() + self.count)
    }

    /// Whether `goff` lies inside this hole.
    pub const fn covers(&self, goff: Goff) -> bool {
        goff.int() >= self.start.int() && goff.int() < self.start.int() + self.count
    }

    /// Iterate through every offset inside this hole.
    pub fn offsets(&self) -> impl Iterator<Item = Goff> {
        (self.start.int()..self.end().int()).map(Goff::new)
    }
}

/// Compact summary of the local weight state, used by replicas to detect divergence cheaply.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StateSummary {
    /// SHA-384 digest over the committed `(record hash, weight)` set and the two aggregates below.
    pub digest: [u8; 48],
    /// Sum of the weights of every committed record, saturating.
    pub weight_sum: u64,
    /// Number of committed (weight-applied) records.
    pub record_count: u64,
}

impl Debug for StateSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSummary")
            .field("digest", &STANDARD_NO_PAD.encode(self.digest))
            .field("weight_sum", &self.weight_sum)
            .field("record_count", &self.record_count)
            .finish()
    }
}
