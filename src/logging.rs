/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the engine's
//! [configuration](crate::engine::Configuration).
//!
//! The engine logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how an [ApplyWeight](crate::events::ApplyWeightEvent) is printed:
//!
//! ```text
//! ApplyWeight, 1701329264, 12, fNGCJyk, 40, 3
//! ```
//!
//! In the snippet:
//! - The third value is the goff of the applied record.
//! - The fourth value is the first seven characters of the Base64 encoding of the record's hash.
//! - The fifth value is the record's weight when it was applied.
//! - The sixth value is the number of ancestors that received the record's score.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const INSERT_RECORD: &str = "InsertRecord";
pub const RESOLVE_DANGLING: &str = "ResolveDangling";
pub const OPEN_HOLE: &str = "OpenHole";
pub const GROW_WEIGHT_STORE: &str = "GrowWeightStore";

pub const APPLY_WEIGHT: &str = "ApplyWeight";
pub const CLOSE_HOLE: &str = "CloseHole";
pub const DETECT_CYCLE: &str = "DetectCycle";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertRecordEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_record_event: &InsertRecordEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                INSERT_RECORD,
                secs_since_unix_epoch(insert_record_event.timestamp),
                insert_record_event.goff,
                first_seven_base64_chars(&insert_record_event.hash.bytes()),
                insert_record_event.dangling_links
            )
        };
        Box::new(logger)
    }
}

impl Logger for ResolveDanglingEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |resolve_dangling_event: &ResolveDanglingEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RESOLVE_DANGLING,
                secs_since_unix_epoch(resolve_dangling_event.timestamp),
                first_seven_base64_chars(&resolve_dangling_event.hash.bytes()),
                resolve_dangling_event.holders.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for OpenHoleEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |open_hole_event: &OpenHoleEvent| {
            log::info!(
                "{}, {}, {}, {}",
                OPEN_HOLE,
                secs_since_unix_epoch(open_hole_event.timestamp),
                open_hole_event.start,
                open_hole_event.count
            )
        };
        Box::new(logger)
    }
}

impl Logger for GrowWeightStoreEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |grow_weight_store_event: &GrowWeightStoreEvent| {
            log::info!(
                "{}, {}, {}, {}",
                GROW_WEIGHT_STORE,
                secs_since_unix_epoch(grow_weight_store_event.timestamp),
                grow_weight_store_event.old_capacity,
                grow_weight_store_event.new_capacity
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApplyWeightEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |apply_weight_event: &ApplyWeightEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                APPLY_WEIGHT,
                secs_since_unix_epoch(apply_weight_event.timestamp),
                apply_weight_event.goff,
                first_seven_base64_chars(&apply_weight_event.hash.bytes()),
                apply_weight_event.weight,
                apply_weight_event.ancestors
            )
        };
        Box::new(logger)
    }
}

impl Logger for CloseHoleEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |close_hole_event: &CloseHoleEvent| {
            log::info!(
                "{}, {}, {}, {}",
                CLOSE_HOLE,
                secs_since_unix_epoch(close_hole_event.timestamp),
                close_hole_event.start,
                close_hole_event.count
            )
        };
        Box::new(logger)
    }
}

impl Logger for DetectCycleEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |detect_cycle_event: &DetectCycleEvent| {
            log::info!(
                "{}, {}, {}, {}",
                DETECT_CYCLE,
                secs_since_unix_epoch(detect_cycle_event.timestamp),
                detect_cycle_event.goff,
                first_seven_base64_chars(&detect_cycle_event.hash.bytes())
            )
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

// Timestamps from before the Unix Epoch are printed as 0.
fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
