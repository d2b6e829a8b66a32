/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The propagation thread, which applies the weight of accepted records to their ancestors.
//!
//! The thread drains a queue of candidate goffs fed by [`put_record`](crate::engine::Engine::put_record)
//! and by the engine's startup. A candidate `g` is applied once it is not dangling and every record it
//! links to is applied:
//! 1. Every ancestor of `g` (every record reachable through links) receives `score(g)` exactly once,
//!    under the ancestor's stripe.
//! 2. `g` is marked applied, and leaves its hole.
//! 3. The records that link to `g` become candidates.
//!
//! Since a record is only applied after all of its ancestors, and every ancestor receives every
//! descendant's score exactly once, the final weight of a record is its own score plus the scores of all
//! of its descendants, regardless of the order in which records arrived.
//!
//! A candidate that links to a record that is present but not applied waits for it, unless following
//! unapplied links from that record leads back to the candidate. In that case the candidate is part of a
//! cycle, which can never be applied. Every record on the cycle found is recorded as a propagation
//! failure and dropped, since the other members may have been waiting since before the cycle closed and
//! will not be queued again.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::{
    engine::{EngineError, Shared},
    events::*,
    graph::{
        accessors::internal::{GraphStore, GraphWriteBatch},
        pluggables::KVStore,
    },
    holes::{HoleSet, Shrink},
    types::{data_types::Goff, record::Record},
};

pub(crate) struct PropagationWorker<K: KVStore> {
    graph_store: GraphStore<K>,
    shared: Arc<Shared>,
    event_publisher: Option<Sender<Event>>,
    shutdown_signal: Receiver<()>,
    shutting_down: bool,
    /// Set when the in-memory holes are ahead of the persisted ones.
    unpersisted_holes: bool,
}

/// What happened to a candidate.
enum Outcome {
    Applied,
    Waiting,
    Skipped,
    /// The members of a link cycle through the candidate.
    Cycle(Vec<Goff>),
}

impl<K: KVStore> PropagationWorker<K> {
    pub(crate) fn new(
        graph_store: GraphStore<K>,
        shared: Arc<Shared>,
        event_publisher: Option<Sender<Event>>,
        shutdown_signal: Receiver<()>,
    ) -> Self {
        Self {
            graph_store,
            shared,
            event_publisher,
            shutdown_signal,
            shutting_down: false,
            unpersisted_holes: false,
        }
    }

    pub(crate) fn start(mut self, work: Receiver<Goff>, poll_interval: Duration) -> JoinHandle<()> {
        thread::spawn(move || loop {
            if self.unpersisted_holes {
                self.persist_holes();
            }
            if self.shutdown_requested() {
                return;
            }

            match work.recv_timeout(poll_interval) {
                Ok(goff) => {
                    self.drain(goff);
                    self.shared.queued.fetch_sub(1, Ordering::AcqRel);
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })
    }

    fn shutdown_requested(&mut self) -> bool {
        if !self.shutting_down {
            self.shutting_down = match self.shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => true,
                Err(TryRecvError::Empty) => false,
            };
        }
        self.shutting_down
    }

    /// Process `goff`, then every candidate its application unblocks, transitively.
    ///
    /// Candidates left over when a shutdown is requested are still inside their holes, and will be
    /// re-queued when the engine is next opened.
    fn drain(&mut self, goff: Goff) {
        let mut candidates = VecDeque::from([goff]);
        while let Some(candidate) = candidates.pop_front() {
            if self.shutdown_requested() {
                return;
            }

            match self.process(candidate, &mut candidates) {
                Ok(Outcome::Applied) | Ok(Outcome::Skipped) => (),
                Ok(Outcome::Waiting) => log::trace!("Goff {} is waiting for its links", candidate),
                Ok(Outcome::Cycle(members)) => {
                    for member in members {
                        self.record_cycle(member);
                    }
                }
                Err(err) => {
                    log::error!("Failed to propagate the weight of goff {}: {}", candidate, err);
                    // Some ancestors may already carry the candidate's score.
                    self.shared.tainted.store(true, Ordering::Release);
                    self.shared
                        .failures
                        .lock()
                        .insert(candidate, Arc::new(err));
                }
            }
        }
    }

    fn write_holes(&mut self, holes: &HoleSet<'_>) -> Result<(), EngineError> {
        let mut write_batch = GraphWriteBatch::new();
        holes.stage(&mut write_batch)?;
        self.graph_store.write(write_batch)?;
        Ok(())
    }

    /// Remember to persist the holes later. Counts as pending work until they are persisted.
    fn defer_holes(&mut self) {
        if !self.unpersisted_holes {
            self.unpersisted_holes = true;
            self.shared.queued.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn persist_holes(&mut self) {
        let shared = Arc::clone(&self.shared);
        let holes = shared.holes.lock();
        match self.write_holes(&holes) {
            Ok(()) => {
                self.unpersisted_holes = false;
                self.shared.queued.fetch_sub(1, Ordering::AcqRel);
                log::debug!("Persisted deferred holes");
            }
            Err(err) => log::warn!("Failed to persist deferred holes: {}", err),
        }
    }

    fn record_cycle(&self, goff: Goff) {
        {
            let mut failures = self.shared.failures.lock();
            if failures.contains_key(&goff) {
                return;
            }
            failures.insert(goff, Arc::new(EngineError::GraphCycle { goff }));
        }
        log::warn!("Record at goff {} is part of a link cycle, halting its propagation", goff);
        if let Ok(hash) = self.graph_store.record(goff).map(|record| record.hash) {
            Event::publish(
                &self.event_publisher,
                Event::DetectCycle(DetectCycleEvent {
                    timestamp: SystemTime::now(),
                    goff,
                    hash,
                }),
            );
        }
    }

    fn process(&mut self, goff: Goff, candidates: &mut VecDeque<Goff>) -> Result<Outcome, EngineError> {
        let shared = Arc::clone(&self.shared);

        if shared.failures.lock().contains_key(&goff) || shared.weights.get(goff)?.applied {
            return Ok(Outcome::Skipped);
        }
        if shared.dependencies.is_dangling(goff) {
            return Ok(Outcome::Waiting);
        }

        let record = self.graph_store.record(goff)?;

        // Every direct link must be applied. All of them are checked for cycles before waiting.
        let mut parents = Vec::with_capacity(record.links.len());
        let mut waiting = false;
        for link in record.distinct_links() {
            let parent = match self.graph_store.goff_by_hash(link)? {
                Some(parent) => parent,
                // Accepted after the dangling check; its arrival re-queues this record.
                None => {
                    waiting = true;
                    continue;
                }
            };
            if parent == goff {
                return Ok(Outcome::Cycle(vec![goff]));
            }
            if !shared.weights.get(parent)?.applied {
                if let Some(members) = self.cycle_through(parent, goff)? {
                    return Ok(Outcome::Cycle(members));
                }
                waiting = true;
                continue;
            }
            parents.push(parent);
        }
        if waiting {
            return Ok(Outcome::Waiting);
        }

        let ancestors = self.add_to_ancestors(&record, parents)?;

        let weight = {
            let guard = shared.stripes.lock(goff);
            shared.weights.set_applied(&guard, goff)?;
            shared.weights.get(goff)?.weight
        };
        shared.hasher.commit(&record.hash, weight);

        // `goff` is applied from here on, so the shrink is kept even if it cannot be persisted yet.
        let mut holes = shared.holes.lock();
        let shrink = holes.shrink(goff, &shared.weights);
        let persisted = self.write_holes(&holes);
        holes.commit();
        if let Err(err) = persisted {
            log::warn!("Failed to persist holes after applying goff {}, will retry: {}", goff, err);
            self.defer_holes();
        }

        match shrink {
            Shrink::Closed(hole) => Event::publish(
                &self.event_publisher,
                Event::CloseHole(CloseHoleEvent {
                    timestamp: SystemTime::now(),
                    start: hole.start,
                    count: hole.count,
                }),
            ),
            Shrink::Shrunk(_) => (),
            Shrink::NotCovered => {
                log::warn!("Applied goff {} was not covered by any hole", goff)
            }
        }

        candidates.extend(self.graph_store.dependents(goff)?);

        Event::publish(
            &self.event_publisher,
            Event::ApplyWeight(ApplyWeightEvent {
                timestamp: SystemTime::now(),
                goff,
                hash: record.hash,
                weight,
                ancestors,
            }),
        );

        Ok(Outcome::Applied)
    }

    /// Add the score of `record` to each of its ancestors exactly once, starting from its direct
    /// `parents`. Returns the number of ancestors.
    fn add_to_ancestors(&self, record: &Record, parents: Vec<Goff>) -> Result<u64, EngineError> {
        let mut visited: HashSet<Goff> = parents.iter().copied().collect();
        let mut frontier = VecDeque::from(parents);

        while let Some(ancestor) = frontier.pop_front() {
            let ancestor_record = self.graph_store.record(ancestor)?;

            let (old, new) = {
                let guard = self.shared.stripes.lock(ancestor);
                self.shared.weights.add_weight(&guard, ancestor, record.score)?
            };
            self.shared.hasher.reweigh(&ancestor_record.hash, old, new);

            for link in ancestor_record.distinct_links() {
                if let Some(next) = self.graph_store.goff_by_hash(link)? {
                    if visited.insert(next) {
                        frontier.push_back(next);
                    }
                }
            }
        }

        Ok(visited.len() as u64)
    }

    /// Follow links that point at present but unapplied records from `from`. If they lead to `target`,
    /// returns the records on the path, `target` included.
    fn cycle_through(&self, from: Goff, target: Goff) -> Result<Option<Vec<Goff>>, EngineError> {
        let mut came_from: HashMap<Goff, Goff> = HashMap::new();
        let mut visited = HashSet::from([from]);
        let mut stack = vec![from];

        while let Some(current) = stack.pop() {
            let record = self.graph_store.record(current)?;
            for link in record.distinct_links() {
                let next = match self.graph_store.goff_by_hash(link)? {
                    Some(next) => next,
                    None => continue,
                };
                if next == target {
                    let mut members = vec![target, current];
                    let mut step = current;
                    while let Some(previous) = came_from.get(&step) {
                        members.push(*previous);
                        step = *previous;
                    }
                    return Ok(Some(members));
                }
                if !self.shared.weights.get(next)?.applied && visited.insert(next) {
                    came_from.insert(next, current);
                    stack.push(next);
                }
            }
        }

        Ok(None)
    }
}
