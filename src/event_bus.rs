/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from the ingestion path and the
//! propagation thread and invokes the user's handlers (and the default loggers) on them.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) insert_record_handlers: Vec<HandlerPtr<InsertRecordEvent>>,
    pub(crate) resolve_dangling_handlers: Vec<HandlerPtr<ResolveDanglingEvent>>,
    pub(crate) open_hole_handlers: Vec<HandlerPtr<OpenHoleEvent>>,
    pub(crate) grow_weight_store_handlers: Vec<HandlerPtr<GrowWeightStoreEvent>>,
    pub(crate) apply_weight_handlers: Vec<HandlerPtr<ApplyWeightEvent>>,
    pub(crate) close_hole_handlers: Vec<HandlerPtr<CloseHoleEvent>>,
    pub(crate) detect_cycle_handlers: Vec<HandlerPtr<DetectCycleEvent>>,
}

/// Collect the user's handler for an event type, plus the default logger if `log_events` is set.
fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    handlers.extend(user_handler);
    handlers
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        insert_record_handler: Option<HandlerPtr<InsertRecordEvent>>,
        resolve_dangling_handler: Option<HandlerPtr<ResolveDanglingEvent>>,
        open_hole_handler: Option<HandlerPtr<OpenHoleEvent>>,
        grow_weight_store_handler: Option<HandlerPtr<GrowWeightStoreEvent>>,
        apply_weight_handler: Option<HandlerPtr<ApplyWeightEvent>>,
        close_hole_handler: Option<HandlerPtr<CloseHoleEvent>>,
        detect_cycle_handler: Option<HandlerPtr<DetectCycleEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            insert_record_handlers: handlers(log_events, insert_record_handler),
            resolve_dangling_handlers: handlers(log_events, resolve_dangling_handler),
            open_hole_handlers: handlers(log_events, open_hole_handler),
            grow_weight_store_handlers: handlers(log_events, grow_weight_store_handler),
            apply_weight_handlers: handlers(log_events, apply_weight_handler),
            close_hole_handlers: handlers(log_events, close_hole_handler),
            detect_cycle_handlers: handlers(log_events, detect_cycle_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insert_record_handlers.is_empty()
            && self.resolve_dangling_handlers.is_empty()
            && self.open_hole_handlers.is_empty()
            && self.grow_weight_store_handlers.is_empty()
            && self.apply_weight_handlers.is_empty()
            && self.close_hole_handlers.is_empty()
            && self.detect_cycle_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertRecord(insert_record_event) => self
                .insert_record_handlers
                .iter()
                .for_each(|handler| handler(&insert_record_event)),

            Event::ResolveDangling(resolve_dangling_event) => self
                .resolve_dangling_handlers
                .iter()
                .for_each(|handler| handler(&resolve_dangling_event)),

            Event::OpenHole(open_hole_event) => self
                .open_hole_handlers
                .iter()
                .for_each(|handler| handler(&open_hole_event)),

            Event::GrowWeightStore(grow_weight_store_event) => self
                .grow_weight_store_handlers
                .iter()
                .for_each(|handler| handler(&grow_weight_store_event)),

            Event::ApplyWeight(apply_weight_event) => self
                .apply_weight_handlers
                .iter()
                .for_each(|handler| handler(&apply_weight_event)),

            Event::CloseHole(close_hole_event) => self
                .close_hole_handlers
                .iter()
                .for_each(|handler| handler(&close_hole_event)),

            Event::DetectCycle(detect_cycle_event) => self
                .detect_cycle_handlers
                .iter()
                .for_each(|handler| handler(&detect_cycle_event)),
        }
    }
}

/// Start the event bus thread.
///
/// The thread fires handlers until it receives a shutdown signal, then fires the handlers of every
/// event still in the channel before exiting.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                event_subscriber
                    .try_iter()
                    .for_each(|event| event_handlers.fire_handlers(event));
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(poll_interval) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
