/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Wrappers around the user-provided key-value store that put the graph variables in the right places.

pub mod internal;

pub mod public;
