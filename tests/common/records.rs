//! Builders for test records and random record graphs.

use std::collections::{HashMap, HashSet};

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use weightgraph_rs::types::{
    data_types::{CryptoHash, RecordId, Score},
    record::Record,
};

/// Get a logical id derived from `name`.
pub(crate) fn id(name: &str) -> RecordId {
    let mut bytes = [0u8; 32];
    for (byte, name_byte) in bytes.iter_mut().zip(name.bytes()) {
        *byte = name_byte;
    }
    RecordId::new(bytes)
}

/// Create a record named `name` that links to `links` and has score `score`.
pub(crate) fn record(name: &str, links: &[&Record], score: u64) -> Record {
    Record::new(
        id(name),
        links.iter().map(|link| link.hash).collect(),
        Score::new(score),
        name.as_bytes(),
    )
}

/// Create a record that links to hashes of records that may not exist yet.
pub(crate) fn record_linking(name: &str, links: &[CryptoHash], score: u64) -> Record {
    Record::new(id(name), links.to_vec(), Score::new(score), name.as_bytes())
}

/// Create a record with a chosen hash. Used to build graphs that content addressing would rule out.
pub(crate) fn record_with_hash(hash_byte: u8, links: &[u8], score: u64) -> Record {
    Record::with_hash(
        CryptoHash::new([hash_byte; 32]),
        id(&format!("forged-{}", hash_byte)),
        links
            .iter()
            .map(|link| CryptoHash::new([*link; 32]))
            .collect(),
        Score::new(score),
    )
}

/// Generate a random record graph of `size` records, in a topological order (every record comes after
/// the records it links to).
pub(crate) fn random_dag(seed: u64, size: usize) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records: Vec<Record> = Vec::with_capacity(size);
    for index in 0..size {
        let link_count = if index == 0 { 0 } else { rng.gen_range(1, index.min(3) + 1) };
        let links: Vec<&Record> = (0..link_count)
            .map(|_| &records[rng.gen_range(0, index)])
            .collect();
        let score = rng.gen_range(1, 100);
        let new_record = record(&format!("record-{}", index), &links, score);
        records.push(new_record);
    }
    records
}

/// Return a copy of `records` in a random order.
pub(crate) fn shuffled(records: &[Record], seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut shuffled = records.to_vec();
    shuffled.shuffle(&mut rng);
    shuffled
}

/// Compute the weight every record should end up with: its own score plus the score of every record
/// that transitively links to it, each counted once.
pub(crate) fn expected_weights(records: &[Record]) -> HashMap<CryptoHash, u64> {
    let by_hash: HashMap<CryptoHash, &Record> =
        records.iter().map(|record| (record.hash, record)).collect();

    let mut weights: HashMap<CryptoHash, u64> = records
        .iter()
        .map(|record| (record.hash, record.score.int()))
        .collect();

    for record in records {
        let mut visited = HashSet::new();
        let mut stack: Vec<CryptoHash> = record.links.clone();
        while let Some(ancestor) = stack.pop() {
            if !visited.insert(ancestor) {
                continue;
            }
            if let Some(ancestor_record) = by_hash.get(&ancestor) {
                *weights.get_mut(&ancestor).unwrap() += record.score.int();
                stack.extend(ancestor_record.links.iter().copied());
            }
        }
    }
    weights
}
