/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A weight propagation engine for globally replicated, content-addressed, append-only record graphs.
//!
//! Every record names the records it depends on by their hashes. The engine accepts records in any
//! order, assigns each one a permanent local position (its goff), and propagates every record's score to
//! all of its ancestors once the record's dependencies are locally complete. The resulting weights rank
//! records without a leader or a voting round, and do not depend on the order in which a replica
//! received the records. A compact [state summary](engine::Engine::hash_state) lets replicas detect
//! divergence cheaply.
//!
//! The library user plugs in the key-value store that persists the record graph (see
//! [graph::pluggables]); the engine keeps weights in a memory-mapped file of its own (see [weights]).
//! Start with [engine], which opens and closes engines.

pub mod dependencies;

pub mod engine;

pub mod events;

pub mod graph;

pub mod holes;

pub mod peers;

pub mod state_hash;

pub mod stripes;

pub mod types;

pub mod weights;

pub(crate) mod event_bus;

pub(crate) mod logging;

pub(crate) mod propagation;
