/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The persistent record graph of a replica.
//!
//! # The record graph
//!
//! The record graph is a directed acyclic graph of [Records](crate::types::record::Record). Every record
//! names the records it depends on by listing their hashes in its `links`. Records arrive in any order:
//! a record may link to a hash this replica has not seen yet, in which case the link is "dangling" until
//! the missing record arrives.
//!
//! Next to the records themselves, this module stores the bookkeeping that lets the engine resume weight
//! propagation after a restart without rescanning the whole graph:
//! - the hash → goff index and the id → history index,
//! - the reverse edges ("dependents") used to re-evaluate records once their predecessors are applied,
//! - dangling links, unresolved link counts and wanted hashes,
//! - holes, and the highest assigned goff.
//!
//! The documentation for the [`variables`] submodule lists everything stored by the `graph` module.
//!
//! # Pluggable persistence
//!
//! - The record graph is kept in persistent storage, most probably in the host's filesystem.
//! - Library users get to choose how exactly this is done.
//! - The engine merely requires that whatever the user provides as a persistence mechanism implements
//!   the abstract functionality of a key-value store with atomic, batched writes.
//! - This abstract functionality is made concrete by the traits defined in the [`pluggables`] module.
//!
//! Weights are *not* stored here: they live in the memory-mapped [weight store](crate::weights).
//!
//! # Accessing the record graph
//!
//! Implementations of the pluggable persistence traits get wrapped inside [`accessors`], which put the
//! graph variables in the right places in the key-value store and provide methods for reading and
//! writing them, both from code internal to this library and from user code.

pub mod accessors;

pub mod pluggables;

pub mod variables;
