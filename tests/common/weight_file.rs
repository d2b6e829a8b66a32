//! Direct manipulation of a weight store file, to simulate crashes.

use std::{
    fs::OpenOptions,
    io::{Seek, SeekFrom, Write},
    path::Path,
};

use weightgraph_rs::weights::{HEADER_SIZE, SLOT_SIZE, WEIGHTS_FILE_NAME};

const CLEAN_FLAG_OFFSET: u64 = 8;

/// Overwrite the clean flag in the header of the weight store in `dir`.
pub(crate) fn write_clean_flag(dir: &Path, value: u32) {
    write_at(dir, CLEAN_FLAG_OFFSET, &value.to_le_bytes());
}

/// Overwrite the weight and flags of slot `goff` of the weight store in `dir`.
pub(crate) fn write_slot(dir: &Path, goff: u64, weight: u64, flags: u64) {
    let mut bytes = [0u8; SLOT_SIZE as usize];
    bytes[..8].copy_from_slice(&weight.to_le_bytes());
    bytes[8..].copy_from_slice(&flags.to_le_bytes());
    write_at(dir, HEADER_SIZE + goff * SLOT_SIZE, &bytes);
}

fn write_at(dir: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .write(true)
        .open(dir.join(WEIGHTS_FILE_NAME))
        .unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}
