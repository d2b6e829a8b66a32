/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The weight store: a growable, memory-mapped array of weight slots indexed by graph offset.
//!
//! # File layout
//!
//! The weight store lives in a single file, [`WEIGHTS_FILE_NAME`], inside the engine's directory:
//!
//! |Offset|Size|Content|
//! |---|---|---|
//! |0|4|Magic bytes `GWTS`.|
//! |4|4|Layout version, little-endian `u32`.|
//! |8|4|Clean shutdown flag, little-endian `u32` (1 = clean).|
//! |12|4|Reserved.|
//! |16 + 16·goff|8|Weight of `goff`, little-endian `u64`.|
//! |24 + 16·goff|8|Flags of `goff`, little-endian `u64`. Bit 0 is the applied flag.|
//!
//! # Concurrency
//!
//! The mapping is guarded by a single read/write lock. Lookups and slot mutations take the read side, so
//! they proceed concurrently; slots are accessed as atomics, and mutations additionally require the
//! [stripe](crate::stripes) of the mutated offset. The exclusive side is only taken to grow the file and
//! remap it, so no reader ever observes a partial mapping. Growth doubles the capacity to amortize remaps.
//!
//! # Crash detection
//!
//! The engine clears the clean shutdown flag when it opens the store and sets it again after a complete
//! flush on close. A store that is found without the flag may hold partially propagated weights, which
//! the engine then rebuilds from the record graph.

use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use thiserror::Error;

use crate::{
    stripes::StripeGuard,
    types::data_types::{Goff, Score, Weight},
};

pub const WEIGHTS_FILE_NAME: &str = "weights.bin";
pub const HEADER_SIZE: u64 = 16;
pub const SLOT_SIZE: u64 = 16;

const MAGIC: [u8; 4] = *b"GWTS";
const VERSION: u32 = 1;
const CLEAN_FLAG_OFFSET: usize = 8;
const APPLIED: u64 = 1;

/// The weight and applied flag of a single graph offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub weight: Weight,
    pub applied: bool,
}

/// How the weight store file was found when it was opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenState {
    /// The file did not exist, or was empty, and has been created.
    Created,
    /// The file was closed cleanly.
    Clean,
    /// The file was not closed cleanly; its weights may be partially propagated.
    Dirty,
}

pub struct WeightStore {
    path: PathBuf,
    region: RwLock<Region>,
}

impl WeightStore {
    /// Open the weight store inside `dir`, creating it with room for `initial_capacity` slots if it does
    /// not exist.
    pub fn open(dir: &Path, initial_capacity: u64) -> Result<(WeightStore, OpenState), WeightStoreError> {
        let path = dir.join(WEIGHTS_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();

        let (region, state) = if len == 0 {
            let capacity = initial_capacity.max(1);
            file.set_len(HEADER_SIZE + capacity * SLOT_SIZE)?;
            let region = Region::map(file)?;
            region.write_header();
            region.mmap.flush()?;
            (region, OpenState::Created)
        } else {
            if len < HEADER_SIZE || (len - HEADER_SIZE) % SLOT_SIZE != 0 {
                return Err(WeightStoreError::Format(format!(
                    "{} has length {}, which is not a whole number of slots",
                    path.display(),
                    len
                )));
            }
            let region = Region::map(file)?;
            let header = region.header();
            if header[0..4] != MAGIC {
                return Err(WeightStoreError::Format(format!(
                    "{} is not a weight store",
                    path.display()
                )));
            }
            let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            if version != VERSION {
                return Err(WeightStoreError::Format(format!(
                    "{} has layout version {}, expected {}",
                    path.display(),
                    version,
                    VERSION
                )));
            }
            let state = if region.clean_flag().load(Ordering::Acquire) == 1 {
                OpenState::Clean
            } else {
                OpenState::Dirty
            };
            (region, state)
        };

        log::debug!(
            "Opened weight store {} with capacity {} ({:?})",
            path.display(),
            region.capacity,
            state
        );

        Ok((
            WeightStore {
                path,
                region: RwLock::new(region),
            },
            state,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the number of slots currently mapped.
    pub fn capacity(&self) -> u64 {
        self.region.read().capacity
    }

    /// Get the weight and applied flag of `goff`.
    pub fn get(&self, goff: Goff) -> Result<Slot, WeightStoreError> {
        let region = self.region.read();
        let (weight, flags) = region.slot(goff)?;
        Ok(Slot {
            weight: Weight::new(weight.load(Ordering::Acquire)),
            applied: flags.load(Ordering::Acquire) & APPLIED != 0,
        })
    }

    /// Set the weight of `goff` to `weight` and clear its flags.
    ///
    /// Used to create the slot of a newly accepted record, and when rebuilding weights after a crash.
    pub fn initialize_slot(
        &self,
        guard: &StripeGuard,
        goff: Goff,
        weight: Weight,
    ) -> Result<(), WeightStoreError> {
        check_guard(guard, goff)?;
        let region = self.region.read();
        let (slot_weight, flags) = region.slot(goff)?;
        slot_weight.store(weight.int(), Ordering::Release);
        flags.store(0, Ordering::Release);
        Ok(())
    }

    /// Add `score` to the weight of `goff`, saturating at the maximum representable weight.
    ///
    /// Returns the weight before and after the addition.
    pub fn add_weight(
        &self,
        guard: &StripeGuard,
        goff: Goff,
        score: Score,
    ) -> Result<(Weight, Weight), WeightStoreError> {
        check_guard(guard, goff)?;
        let region = self.region.read();
        let (weight, _) = region.slot(goff)?;
        let old = Weight::new(weight.load(Ordering::Acquire));
        let new = old.saturating_add(score);
        weight.store(new.int(), Ordering::Release);
        Ok((old, new))
    }

    /// Mark the weight of `goff` as applied.
    pub fn set_applied(&self, guard: &StripeGuard, goff: Goff) -> Result<(), WeightStoreError> {
        check_guard(guard, goff)?;
        let region = self.region.read();
        let (_, flags) = region.slot(goff)?;
        flags.fetch_or(APPLIED, Ordering::AcqRel);
        Ok(())
    }

    /// Make sure that `goff` has a slot, growing the store if it does not.
    ///
    /// Idempotent. If several callers race to grow the store, exactly one remaps and the others observe
    /// the grown region. Returns the old and new capacities if this call grew the store.
    pub fn ensure_capacity(&self, goff: Goff) -> Result<Option<(u64, u64)>, WeightStoreError> {
        let region = self.region.upgradable_read();
        if goff.int() < region.capacity {
            return Ok(None);
        }

        let mut region = RwLockUpgradableReadGuard::upgrade(region);
        let old_capacity = region.capacity;
        let mut new_capacity = old_capacity.max(1);
        while new_capacity <= goff.int() {
            new_capacity = new_capacity
                .checked_mul(2)
                .ok_or_else(|| WeightStoreError::Grow {
                    requested: u64::MAX,
                    source: io::Error::new(io::ErrorKind::Other, "capacity overflow"),
                })?;
        }
        region
            .grow(new_capacity)
            .map_err(|source| WeightStoreError::Grow {
                requested: new_capacity,
                source,
            })?;

        log::debug!(
            "Grew weight store {} from {} to {} slots",
            self.path.display(),
            old_capacity,
            new_capacity
        );
        Ok(Some((old_capacity, new_capacity)))
    }

    /// Zero every slot.
    pub fn reset(&self) {
        let region = self.region.write();
        for word in region.words() {
            word.store(0, Ordering::Release);
        }
    }

    /// Copy the slots of the first `len` offsets.
    pub fn snapshot(&self, len: u64) -> Result<Vec<Slot>, WeightStoreError> {
        let region = self.region.read();
        (0..len)
            .map(|goff| {
                let (weight, flags) = region.slot(Goff::new(goff))?;
                Ok(Slot {
                    weight: Weight::new(weight.load(Ordering::Acquire)),
                    applied: flags.load(Ordering::Acquire) & APPLIED != 0,
                })
            })
            .collect()
    }

    /// Flush every slot to the file.
    pub fn flush(&self) -> Result<(), WeightStoreError> {
        Ok(self.region.read().mmap.flush()?)
    }

    /// Record that the store has been flushed completely.
    pub fn mark_clean(&self) -> Result<(), WeightStoreError> {
        self.set_clean_flag(1)
    }

    /// Record that the store is in use and may not be flushed completely.
    pub fn mark_dirty(&self) -> Result<(), WeightStoreError> {
        self.set_clean_flag(0)
    }

    fn set_clean_flag(&self, value: u32) -> Result<(), WeightStoreError> {
        let region = self.region.read();
        region.clean_flag().store(value, Ordering::Release);
        Ok(region.mmap.flush_range(0, HEADER_SIZE as usize)?)
    }
}

fn check_guard(guard: &StripeGuard, goff: Goff) -> Result<(), WeightStoreError> {
    if guard.covers(goff) {
        return Ok(());
    }
    debug_assert!(
        false,
        "weight of goff {} mutated while holding stripe {}",
        goff,
        guard.stripe()
    );
    Err(WeightStoreError::ConcurrencyInvariantViolation {
        goff,
        stripe: guard.stripe(),
    })
}

/// A mapping of the weight store file.
///
/// After mapping, every access to the mapped bytes goes through `base`: the header by copy, the slots and
/// the clean flag as atomics.
struct Region {
    file: File,
    mmap: MmapMut,
    base: *mut u8,
    capacity: u64,
}

// Safety: `base` points into `mmap`, which is owned by the region and lives exactly as long as it. All
// concurrent accesses through `base` are atomic.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    fn map(file: File) -> io::Result<Region> {
        // Safety: the file is owned by this region for the lifetime of the mapping, and is not expected to
        // be modified by other processes.
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let base = mmap.as_mut_ptr();
        let capacity = (mmap.len() as u64 - HEADER_SIZE) / SLOT_SIZE;
        Ok(Region {
            file,
            mmap,
            base,
            capacity,
        })
    }

    fn grow(&mut self, new_capacity: u64) -> io::Result<()> {
        self.mmap.flush()?;
        self.file.set_len(HEADER_SIZE + new_capacity * SLOT_SIZE)?;
        // Safety: see `map`.
        let mut mmap = unsafe { MmapOptions::new().map_mut(&self.file)? };
        self.base = mmap.as_mut_ptr();
        self.mmap = mmap;
        self.capacity = new_capacity;
        Ok(())
    }

    fn header(&self) -> [u8; HEADER_SIZE as usize] {
        let mut header = [0; HEADER_SIZE as usize];
        // Safety: the mapping is at least `HEADER_SIZE` bytes long.
        unsafe { std::ptr::copy_nonoverlapping(self.base, header.as_mut_ptr(), header.len()) };
        header
    }

    fn write_header(&self) {
        let mut header = [0; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..8].copy_from_slice(&VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&1u32.to_le_bytes());
        // Safety: the mapping is at least `HEADER_SIZE` bytes long, and is only ever written through
        // `base`.
        unsafe { std::ptr::copy_nonoverlapping(header.as_ptr(), self.base, header.len()) };
    }

    fn clean_flag(&self) -> &AtomicU32 {
        // Safety: the flag lies inside the header and is 4-byte aligned because mappings are page
        // aligned.
        unsafe { &*(self.base.add(CLEAN_FLAG_OFFSET) as *const AtomicU32) }
    }

    /// View every slot as two atomic words: weight, then flags.
    fn words(&self) -> &[AtomicU64] {
        // Safety: the mapping holds `capacity` slots of two 8-byte words after the 16-byte header, and
        // is 8-byte aligned because mappings are page aligned.
        unsafe {
            std::slice::from_raw_parts(
                self.base.add(HEADER_SIZE as usize) as *const AtomicU64,
                (self.capacity * 2) as usize,
            )
        }
    }

    fn slot(&self, goff: Goff) -> Result<(&AtomicU64, &AtomicU64), WeightStoreError> {
        if goff.int() >= self.capacity {
            return Err(WeightStoreError::OutOfRange {
                goff,
                capacity: self.capacity,
            });
        }
        let words = self.words();
        let index = (goff.int() * 2) as usize;
        Ok((&words[index], &words[index + 1]))
    }
}

#[derive(Debug, Error)]
pub enum WeightStoreError {
    #[error("weight store I/O failure")]
    Io(#[from] io::Error),

    #[error("incompatible weight store layout: {0}")]
    Format(String),

    #[error("goff {goff} is beyond the weight store capacity of {capacity} slots")]
    OutOfRange { goff: Goff, capacity: u64 },

    #[error("failed to grow the weight store to {requested} slots")]
    Grow {
        requested: u64,
        #[source]
        source: io::Error,
    },

    #[error("weight of goff {goff} mutated while holding stripe {stripe}")]
    ConcurrencyInvariantViolation { goff: Goff, stripe: usize },
}
