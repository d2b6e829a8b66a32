/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each graph variable is stored in the user-provided key-value store.
//!
//! # Storage of graph variables
//!
//! Each variable is stored as **Borsh-serialized values** in one or more keys in the key-value store.
//!
//! ## Single values
//!
//! "Single values" (e.g., max goff, holes) are stored in one-byte, constant keys defined in constants
//! sharing the variable's name.
//!
//! ## Mappings
//!
//! Mappings of the form "`A` -> `B`" (e.g., records, dependents) are stored in multiple keys, each key
//! being the concatenation of a specific constant one-byte prefix sharing the variable's name, and then
//! the bytes of an instance of the `A` type. Graph offsets are written big-endian, hashes and ids as
//! their raw 32 bytes.
//!
//! |Variable|Key|Value|
//! |---|---|---|
//! |Records|`RECORDS` + goff|`Record`|
//! |Goff by hash|`GOFF_BY_HASH` + hash|`Goff`|
//! |History by id|`HISTORY_BY_ID` + id|`Vec<Goff>`, ascending|
//! |Dependents|`DEPENDENTS` + goff|`Vec<Goff>` of records that link to goff|
//! |Dangling links|`DANGLING_LINKS` + missing hash|`Vec<Goff>` of holders|
//! |Unresolved link count|`UNRESOLVED_LINK_COUNT` + goff|`u32`|
//! |Wanted hashes|`WANTED_HASHES`|`Vec<CryptoHash>`, ascending|
//! |Holes|`HOLES`|`Vec<Hole>`, ascending by start|
//! |Max goff|`MAX_GOFF`|`Goff`|
//! |Peers|`PEERS` + key hash|`Peer`|
//! |Potential peers|`POTENTIAL_PEERS`|`Vec<PotentialPeer>`|

// Graph variables
pub const RECORDS: [u8; 1] = [0];
pub const GOFF_BY_HASH: [u8; 1] = [1];
pub const HISTORY_BY_ID: [u8; 1] = [2];
pub const DEPENDENTS: [u8; 1] = [3];
pub const DANGLING_LINKS: [u8; 1] = [4];
pub const UNRESOLVED_LINK_COUNT: [u8; 1] = [5];
pub const WANTED_HASHES: [u8; 1] = [6];
pub const HOLES: [u8; 1] = [7];
pub const MAX_GOFF: [u8; 1] = [8];

// Peer directory variables
pub const PEERS: [u8; 1] = [9];
pub const POTENTIAL_PEERS: [u8; 1] = [10];

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
