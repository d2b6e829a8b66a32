/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by the engine, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed: an [`InsertRecordEvent`]
//! is only emitted after the record has been durably written, and an [`ApplyWeightEvent`] only after
//! every ancestor has received the record's score.
//!
//! Handlers for these events are registered on the [`EngineSpec`](crate::engine::EngineSpec) builder,
//! and run on a dedicated event bus thread, so a slow handler never stalls ingestion or propagation.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::types::data_types::{CryptoHash, Goff, Weight};

pub enum Event {
    // Ingestion events.
    InsertRecord(InsertRecordEvent),
    ResolveDangling(ResolveDanglingEvent),
    OpenHole(OpenHoleEvent),
    GrowWeightStore(GrowWeightStoreEvent),
    // Propagation events.
    ApplyWeight(ApplyWeightEvent),
    CloseHole(CloseHoleEvent),
    DetectCycle(DetectCycleEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only hangs up after every publisher has stopped.
            let _ = event_publisher.send(event);
        }
    }
}

/// A record was accepted and assigned `goff`.
pub struct InsertRecordEvent {
    pub timestamp: SystemTime,
    pub goff: Goff,
    pub hash: CryptoHash,
    /// Number of the record's distinct links that were dangling when it was accepted.
    pub dangling_links: u32,
}

/// The arrival of `hash` resolved the dangling links of `holders`.
pub struct ResolveDanglingEvent {
    pub timestamp: SystemTime,
    pub hash: CryptoHash,
    pub holders: Vec<Goff>,
}

/// The hole that now covers `[start, start + count)` was opened or extended.
pub struct OpenHoleEvent {
    pub timestamp: SystemTime,
    pub start: Goff,
    pub count: u64,
}

pub struct GrowWeightStoreEvent {
    pub timestamp: SystemTime,
    pub old_capacity: u64,
    pub new_capacity: u64,
}

/// The score of the record at `goff` was added to every one of its ancestors, and the record was marked
/// applied.
pub struct ApplyWeightEvent {
    pub timestamp: SystemTime,
    pub goff: Goff,
    pub hash: CryptoHash,
    pub weight: Weight,
    pub ancestors: u64,
}

/// The last pending offset of the hole that started at `start` was applied.
pub struct CloseHoleEvent {
    pub timestamp: SystemTime,
    pub start: Goff,
    pub count: u64,
}

/// The record at `goff` transitively links to itself. Its propagation is halted.
pub struct DetectCycleEvent {
    pub timestamp: SystemTime,
    pub goff: Goff,
    pub hash: CryptoHash,
}
