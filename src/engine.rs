/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, open, and close a graph weight engine.
//!
//! An [`Engine`] owns everything needed to maintain the weights of a replica's record graph:
//! - The [record graph](crate::graph) itself, persisted in the library user's key-value store.
//! - The [weight store](crate::weights), a memory-mapped file inside the configured directory.
//! - The in-memory [dependency](crate::dependencies) and [hole](crate::holes) trackers, and the
//!   [state hasher](crate::state_hash).
//! - A propagation thread, which applies weights in the background, and an optional event bus thread,
//!   which runs event handlers.
//!
//! Records are added with [`Engine::put_record`], which returns as soon as the record is durably
//! accepted. Weights are applied asynchronously; [`Engine::has_pending_graph_work`] tells whether the
//! propagation thread still has queued work.
//!
//! ## Opening an engine
//!
//! Here is an example that demonstrates how to build and open an engine using the builder pattern:
//!
//! ```ignore
//! let engine =
//!     EngineSpec::builder()
//!     .kv_store(kv_store)
//!     .configuration(configuration)
//!     .on_apply_weight(apply_weight_handler)
//!     .build()
//!     .open()?;
//! ```
//!
//! ### Required setters
//!
//! - `.kv_store(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_insert_record(...)`
//! - `.on_resolve_dangling(...)`
//! - `.on_open_hole(...)`
//! - `.on_grow_weight_store(...)`
//! - `.on_apply_weight(...)`
//! - `.on_close_hole(...)`
//! - `.on_detect_cycle(...)`
//!
//! The engine's [configuration](Configuration) can also be defined using the builder pattern, for
//! example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .path("/var/lib/weights")
//!     .initial_weight_capacity(1 << 20)
//!     .log_events(true)
//!     .build()
//! ```
//!
//! ## Restarting
//!
//! Closing an engine, explicitly with [`Engine::close`] or implicitly by dropping it, stops its threads
//! between two units of work, flushes the weight store, and marks it clean. Opening an engine over the
//! same key-value store and directory resumes propagation where it stopped. If the weight store was not
//! marked clean, it may hold partially propagated weights; the engine then rebuilds it from the record
//! graph, and propagates every record again. The same happens after a record's propagation failed
//! part-way, since the store is then left dirty on close.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{
    dependencies::{DependencyChanges, DependencyTracker},
    event_bus::*,
    events::*,
    graph::{
        accessors::{
            internal::{GraphStore, GraphWriteBatch, StorageError, WritePolicy},
            public::GraphCamera,
        },
        pluggables::{KVSetError, KVStore},
    },
    holes::HoleTracker,
    peers::PeerDirectory,
    propagation::PropagationWorker,
    state_hash::StateHasher,
    stripes::StripedLocks,
    types::{
        data_types::{CryptoHash, Goff, Hole, RecordId, StateSummary},
        record::Record,
    },
    weights::{OpenState, Slot, WeightStore, WeightStoreError},
};

/// Stores the user-defined parameters required to open an engine, that is:
/// 1. The path of the directory that holds the weight store. Created if it does not exist.
/// 2. The number of weight slots the weight store is created with. The store doubles its capacity
///    whenever it runs out of slots.
/// 3. How long the background threads block waiting for work before checking for a shutdown signal.
/// 4. How many times a key-value store write that fails with [`Busy`](crate::graph::pluggables::KVStoreError::Busy)
///    is retried, and how long the engine waits before the first retry. The wait doubles after every
///    retry.
/// 5. The "Log Events" flag, if set to "true" then events are logged.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.path(...)`

    Optional:
    - `.initial_weight_capacity(...)`
    - `.work_poll_interval(...)`
    - `.write_retry_limit(...)`
    - `.write_retry_backoff(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(into, doc = "Set the directory that holds the weight store. Required."))]
    pub path: PathBuf,
    #[builder(default = 1024, setter(doc = "Set the initial number of weight slots. Optional, defaults to 1024."))]
    pub initial_weight_capacity: u64,
    #[builder(default = Duration::from_millis(50), setter(doc = "Set how long background threads wait for work before checking for shutdown. Optional, defaults to 50ms."))]
    pub work_poll_interval: Duration,
    #[builder(default = 5, setter(doc = "Set how many times a busy key-value store write is retried. Optional, defaults to 5."))]
    pub write_retry_limit: u32,
    #[builder(default = Duration::from_millis(10), setter(doc = "Set the wait before the first retry of a busy write. Optional, defaults to 10ms."))]
    pub write_retry_backoff: Duration,
    #[builder(default = false, setter(doc = "Enable logging of events? Optional, defaults to false."))]
    pub log_events: bool,
}

impl Configuration {
    fn write_policy(&self) -> WritePolicy {
        WritePolicy {
            retry_limit: self.write_retry_limit,
            backoff: self.write_retry_backoff,
        }
    }
}

/// Stores all necessary parameters and trait implementations required to open an [Engine].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building an [EngineSpec]. On the builder call the following methods to construct a valid [EngineSpec].

    Required:
    - `.kv_store(...)`
    - `.configuration(...)`

    Optional:
    - `.on_insert_record(...)`
    - `.on_resolve_dangling(...)`
    - `.on_open_hole(...)`
    - `.on_grow_weight_store(...)`
    - `.on_apply_weight(...)`
    - `.on_close_hole(...)`
    - `.on_detect_cycle(...)`
"))]
pub struct EngineSpec<K: KVStore> {
    // Required parameters
    #[builder(setter(doc = "Set the key-value store that persists the record graph. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the engine's configuration. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&InsertRecordEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertRecordEvent>),
    doc = "Register a handler closure to be invoked after a record is accepted. Optional."))]
    on_insert_record: Option<HandlerPtr<InsertRecordEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ResolveDanglingEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ResolveDanglingEvent>),
    doc = "Register a handler closure to be invoked after an accepted record resolves dangling links. Optional."))]
    on_resolve_dangling: Option<HandlerPtr<ResolveDanglingEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&OpenHoleEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<OpenHoleEvent>),
    doc = "Register a handler closure to be invoked after a hole is opened or extended. Optional."))]
    on_open_hole: Option<HandlerPtr<OpenHoleEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&GrowWeightStoreEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<GrowWeightStoreEvent>),
    doc = "Register a handler closure to be invoked after the weight store grows. Optional."))]
    on_grow_weight_store: Option<HandlerPtr<GrowWeightStoreEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ApplyWeightEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ApplyWeightEvent>),
    doc = "Register a handler closure to be invoked after the weight of a record is applied. Optional."))]
    on_apply_weight: Option<HandlerPtr<ApplyWeightEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CloseHoleEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CloseHoleEvent>),
    doc = "Register a handler closure to be invoked after a hole is closed. Optional."))]
    on_close_hole: Option<HandlerPtr<CloseHoleEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DetectCycleEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DetectCycleEvent>),
    doc = "Register a handler closure to be invoked after a record is found to be part of a link cycle. Optional."))]
    on_detect_cycle: Option<HandlerPtr<DetectCycleEvent>>,
}

impl<K: KVStore> EngineSpec<K> {
    /// Open the engine's storage, start its background threads, and resume any interrupted propagation.
    pub fn open(self) -> Result<Engine<K>, EngineError> {
        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_insert_record,
            self.on_resolve_dangling,
            self.on_open_hole,
            self.on_grow_weight_store,
            self.on_apply_weight,
            self.on_close_hole,
            self.on_detect_cycle,
        );
        Engine::start(self.kv_store, self.configuration, event_handlers)
    }
}

/// The result of a successful [`Engine::put_record`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutRecordResult {
    /// The record was accepted at this goff.
    Inserted(Goff),
    /// A record with the same hash had already been accepted at this goff. Nothing was changed.
    AlreadyExists(Goff),
}

/// State shared between the ingestion path and the propagation thread.
pub(crate) struct Shared {
    pub(crate) weights: WeightStore,
    pub(crate) stripes: StripedLocks,
    pub(crate) dependencies: DependencyTracker,
    pub(crate) holes: HoleTracker,
    pub(crate) hasher: StateHasher,
    pub(crate) failures: Mutex<BTreeMap<Goff, Arc<EngineError>>>,
    /// Number of goffs sent to the propagation thread that it has not finished processing.
    pub(crate) queued: AtomicU64,
    /// Set when propagation failed part-way, so that the weight store must be rebuilt on the next open.
    pub(crate) tainted: AtomicBool,
}

/// A handle to an open graph weight engine. When this value is dropped, the engine is
/// [closed](Engine::close).
pub struct Engine<K: KVStore> {
    // Ingestion lock.
    graph_store: Mutex<GraphStore<K>>,
    graph_camera: GraphCamera<K>,
    peers: PeerDirectory<K>,
    shared: Arc<Shared>,
    refused: AtomicBool,
    closed: bool,
    work_sender: Sender<Goff>,
    event_publisher: Option<Sender<Event>>,
    propagation: Option<JoinHandle<()>>,
    propagation_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore> Engine<K> {
    /// Open an engine without event handlers. Equivalent to building an [`EngineSpec`] with only its
    /// required setters.
    pub fn open(kv_store: K, configuration: Configuration) -> Result<Engine<K>, EngineError> {
        EngineSpec::builder()
            .kv_store(kv_store)
            .configuration(configuration)
            .build()
            .open()
    }

    fn start(
        kv_store: K,
        configuration: Configuration,
        event_handlers: EventHandlers,
    ) -> Result<Engine<K>, EngineError> {
        fs::create_dir_all(&configuration.path).map_err(EngineError::Io)?;
        let write_policy = configuration.write_policy();
        let mut graph_store = GraphStore::new(kv_store.clone(), write_policy);

        let record_count = graph_store.max_goff()?.map_or(0, |max| max.int() + 1);
        let (weights, open_state) = WeightStore::open(
            &configuration.path,
            configuration.initial_weight_capacity.max(record_count),
        )?;
        if record_count > 0 {
            weights.ensure_capacity(Goff::new(record_count - 1))?;
        }
        let stripes = StripedLocks::new();

        if record_count > 0 && open_state != OpenState::Clean {
            log::warn!(
                "Weight store {} was not closed cleanly ({:?}), rebuilding the weights of {} records",
                weights.path().display(),
                open_state,
                record_count
            );
            rebuild_weights(&mut graph_store, &weights, &stripes, record_count)?;
        }
        weights.mark_dirty()?;

        let dependencies = DependencyTracker::load(&graph_store)?;
        let holes = HoleTracker::load(&graph_store)?;
        {
            let mut hole_set = holes.lock();
            if hole_set.reconcile(&weights)? {
                log::info!("Reconciled the persisted holes with the weight store");
                let mut write_batch = GraphWriteBatch::new();
                hole_set.stage(&mut write_batch)?;
                graph_store.write(write_batch)?;
                hole_set.commit();
            }
        }
        let hasher = StateHasher::new();
        for goff in (0..record_count).map(Goff::new) {
            let slot = weights.get(goff)?;
            if slot.applied {
                hasher.commit(&graph_store.record(goff)?.hash, slot.weight);
            }
        }

        let shared = Arc::new(Shared {
            weights,
            stripes,
            dependencies,
            holes,
            hasher,
            failures: Mutex::new(BTreeMap::new()),
            queued: AtomicU64::new(0),
            tainted: AtomicBool::new(false),
        });

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };
        let (event_bus_shutdown, event_bus) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    shutdown_receiver,
                    configuration.work_poll_interval,
                );
                (Some(shutdown), Some(event_bus))
            }
            None => (None, None),
        };

        let (work_sender, work_receiver) = mpsc::channel();
        let (propagation_shutdown, propagation_shutdown_receiver) = mpsc::channel();
        let propagation = PropagationWorker::new(
            GraphStore::new(kv_store.clone(), write_policy),
            Arc::clone(&shared),
            event_publisher.clone(),
            propagation_shutdown_receiver,
        )
        .start(work_receiver, configuration.work_poll_interval);

        let engine = Engine {
            graph_store: Mutex::new(graph_store),
            graph_camera: GraphCamera::new(kv_store.clone()),
            peers: PeerDirectory::new(GraphStore::new(kv_store, write_policy)),
            shared,
            refused: AtomicBool::new(false),
            closed: false,
            work_sender,
            event_publisher,
            propagation: Some(propagation),
            propagation_shutdown,
            event_bus,
            event_bus_shutdown,
        };

        let pending = engine.graph_store.lock().records_pending_weight_application()?;
        let mut resumed = 0;
        for goff in pending {
            if !engine.shared.weights.get(goff)?.applied {
                engine.enqueue(goff)?;
                resumed += 1;
            }
        }
        if resumed > 0 {
            log::info!("Resuming weight propagation of {} records", resumed);
        }

        Ok(engine)
    }

    /// Accept `record` into the record graph.
    ///
    /// Assigns the record the next goff, persists it along with its link bookkeeping in one atomic write,
    /// and queues it for weight propagation. Never waits for the propagation thread.
    pub fn put_record(&self, record: &Record) -> Result<PutRecordResult, EngineError> {
        if self.refused.load(Ordering::Acquire) {
            return Err(EngineError::Refused);
        }

        let mut graph_store = self.graph_store.lock();
        if let Some(goff) = graph_store.goff_by_hash(&record.hash)? {
            return Ok(PutRecordResult::AlreadyExists(goff));
        }
        let goff = graph_store.max_goff()?.map_or(Goff::new(0), |max| max + 1);

        match self.shared.weights.ensure_capacity(goff) {
            Ok(Some((old_capacity, new_capacity))) => Event::publish(
                &self.event_publisher,
                Event::GrowWeightStore(GrowWeightStoreEvent {
                    timestamp: SystemTime::now(),
                    old_capacity,
                    new_capacity,
                }),
            ),
            Ok(None) => (),
            Err(err) => {
                log::error!(
                    "Failed to grow the weight store to hold goff {}, refusing further records: {}",
                    goff,
                    err
                );
                self.refused.store(true, Ordering::Release);
                return Err(EngineError::Capacity {
                    requested: goff.int() + 1,
                    source: err,
                });
            }
        }

        let mut write_batch = GraphWriteBatch::new();
        write_batch.set_record(goff, record)?;
        write_batch.set_goff_by_hash(&record.hash, goff)?;
        let mut history = graph_store.record_history_by_id(&record.id)?;
        history.push(goff);
        write_batch.set_history_by_id(&record.id, &history)?;
        write_batch.set_max_goff(goff)?;

        let mut changes = DependencyChanges::new();
        let mut dangling_links = 0;
        for link in record.distinct_links() {
            match graph_store.goff_by_hash(link)? {
                Some(target) => {
                    let mut dependents = graph_store.dependents(target)?;
                    dependents.push(goff);
                    write_batch.set_dependents(target, &dependents)?;
                }
                None => {
                    self.shared
                        .dependencies
                        .record_dangling(&mut changes, goff, *link);
                    dangling_links += 1;
                }
            }
        }

        let resolved = self
            .shared
            .dependencies
            .resolve(&mut changes, &record.hash);
        let holders: Vec<Goff> = resolved.iter().map(|(holder, _)| *holder).collect();
        let dependents: Vec<Goff> = holders.iter().copied().filter(|holder| *holder != goff).collect();
        if !dependents.is_empty() {
            write_batch.set_dependents(goff, &dependents)?;
        }
        self.shared
            .dependencies
            .stage(&changes, &mut write_batch)?;

        {
            let guard = self.shared.stripes.lock(goff);
            self.shared
                .weights
                .initialize_slot(&guard, goff, record.score.into())?;
        }

        let mut holes = self.shared.holes.lock();
        let hole = holes.open_hole(goff, 1);
        holes.stage(&mut write_batch)?;
        graph_store.write(write_batch)?;
        holes.commit();
        self.shared.dependencies.commit(changes);
        drop(graph_store);

        self.enqueue(goff)?;
        for (holder, satisfied) in &resolved {
            if *satisfied && *holder != goff {
                self.enqueue(*holder)?;
            }
        }

        Event::publish(
            &self.event_publisher,
            Event::InsertRecord(InsertRecordEvent {
                timestamp: SystemTime::now(),
                goff,
                hash: record.hash,
                dangling_links,
            }),
        );
        if !holders.is_empty() {
            Event::publish(
                &self.event_publisher,
                Event::ResolveDangling(ResolveDanglingEvent {
                    timestamp: SystemTime::now(),
                    hash: record.hash,
                    holders,
                }),
            );
        }
        Event::publish(
            &self.event_publisher,
            Event::OpenHole(OpenHoleEvent {
                timestamp: SystemTime::now(),
                start: hole.start,
                count: hole.count,
            }),
        );

        Ok(PutRecordResult::Inserted(goff))
    }

    fn enqueue(&self, goff: Goff) -> Result<(), EngineError> {
        self.shared.queued.fetch_add(1, Ordering::AcqRel);
        if self.work_sender.send(goff).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(EngineError::ShuttingDown);
        }
        Ok(())
    }

    /// Whether the propagation thread has queued work it has not finished.
    ///
    /// Records that wait for dangling links to be resolved are not pending work: they wait for new
    /// records, not for the propagation thread.
    pub fn has_pending_graph_work(&self) -> bool {
        self.shared.queued.load(Ordering::Acquire) > 0
    }

    /// Get a summary of the weights applied so far.
    pub fn hash_state(&self) -> StateSummary {
        self.shared.hasher.summary()
    }

    /// Get the weight slot of the record with `hash`, if it has been accepted.
    ///
    /// The weight is only final once the slot is marked applied and every descendant has arrived.
    pub fn weight(&self, hash: &CryptoHash) -> Result<Option<Slot>, EngineError> {
        // The snapshot must be released before `weight_at` takes another one.
        let goff = self
            .graph_camera
            .snapshot()
            .goff_by_hash(hash)
            .map_err(StorageError::from)?;
        match goff {
            Some(goff) => self.weight_at(goff),
            None => Ok(None),
        }
    }

    /// Get the weight slot of the record at `goff`, if it has been accepted.
    pub fn weight_at(&self, goff: Goff) -> Result<Option<Slot>, EngineError> {
        if goff.int() >= self.record_count()? {
            return Ok(None);
        }
        Ok(Some(self.shared.weights.get(goff)?))
    }

    pub fn record_count(&self) -> Result<u64, EngineError> {
        Ok(self
            .graph_camera
            .snapshot()
            .record_count()
            .map_err(StorageError::from)?)
    }

    /// Whether any link of the record at `goff` is still dangling.
    pub fn is_dangling(&self, goff: Goff) -> bool {
        self.shared.dependencies.is_dangling(goff)
    }

    /// Get the hashes that accepted records link to but that have not been accepted yet.
    pub fn wanted_hashes(&self) -> Vec<CryptoHash> {
        self.shared.dependencies.wanted_hashes()
    }

    pub fn is_wanted(&self, hash: &CryptoHash) -> bool {
        self.shared.dependencies.is_wanted(hash)
    }

    /// Get the open holes, ordered by start.
    pub fn list_holes(&self) -> Vec<Hole> {
        self.shared.holes.list_holes()
    }

    /// Get the goffs of every accepted record with logical id `id`, in acceptance order.
    pub fn record_history_by_id(&self, id: &RecordId) -> Result<Vec<Goff>, EngineError> {
        Ok(self
            .graph_camera
            .snapshot()
            .record_history_by_id(id)
            .map_err(StorageError::from)?)
    }

    /// Get the records whose propagation halted, with the reason.
    pub fn propagation_failures(&self) -> Vec<(Goff, Arc<EngineError>)> {
        self.shared
            .failures
            .lock()
            .iter()
            .map(|(goff, err)| (*goff, Arc::clone(err)))
            .collect()
    }

    /// Returns a [`GraphCamera`] which can be used to peek into the record graph.
    pub fn graph_camera(&self) -> &GraphCamera<K> {
        &self.graph_camera
    }

    pub fn peers(&self) -> &PeerDirectory<K> {
        &self.peers
    }

    /// Stop the background threads, flush the weight store, and mark it clean.
    pub fn close(mut self) -> Result<(), EngineError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // The propagation thread publishes events, so it has to stop before the event bus.
        let _ = self.propagation_shutdown.send(());
        if let Some(propagation) = self.propagation.take() {
            if propagation.join().is_err() {
                log::error!("Propagation thread panicked");
            }
        }

        if let Some(event_bus_shutdown) = self.event_bus_shutdown.take() {
            let _ = event_bus_shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("Event bus thread panicked");
            }
        }

        self.shared.weights.flush()?;
        if self.shared.tainted.load(Ordering::Acquire) {
            log::warn!(
                "Leaving weight store {} dirty so that it is rebuilt on the next open",
                self.shared.weights.path().display()
            );
            return Ok(());
        }
        self.shared.weights.mark_clean()?;
        Ok(())
    }
}

impl<K: KVStore> Drop for Engine<K> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("Failed to close the engine cleanly: {}", err);
        }
    }
}

/// Reset every weight slot to its record's score, and put every record back into a single hole.
fn rebuild_weights<K: KVStore>(
    graph_store: &mut GraphStore<K>,
    weights: &WeightStore,
    stripes: &StripedLocks,
    record_count: u64,
) -> Result<(), EngineError> {
    weights.reset();
    for goff in (0..record_count).map(Goff::new) {
        let record = graph_store.record(goff)?;
        let guard = stripes.lock(goff);
        weights.initialize_slot(&guard, goff, record.score.into())?;
    }
    weights.flush()?;

    let mut write_batch = GraphWriteBatch::new();
    write_batch.set_holes(&vec![Hole::new(Goff::new(0), record_count)])?;
    graph_store.write(write_batch)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to grow the weight store to {requested} slots")]
    Capacity {
        requested: u64,
        #[source]
        source: WeightStoreError,
    },

    #[error("record at goff {goff} transitively links to itself")]
    GraphCycle { goff: Goff },

    #[error("weight of goff {goff} mutated while holding stripe {stripe}")]
    ConcurrencyInvariantViolation { goff: Goff, stripe: usize },

    #[error("weight store I/O failure")]
    Io(#[source] io::Error),

    #[error("incompatible weight store: {0}")]
    Format(String),

    #[error("the engine is shutting down")]
    ShuttingDown,

    #[error("the engine refuses new records after failing to grow the weight store")]
    Refused,
}

impl From<WeightStoreError> for EngineError {
    fn from(err: WeightStoreError) -> Self {
        match err {
            WeightStoreError::Io(err) => EngineError::Io(err),
            WeightStoreError::Format(reason) => EngineError::Format(reason),
            WeightStoreError::ConcurrencyInvariantViolation { goff, stripe } => {
                EngineError::ConcurrencyInvariantViolation { goff, stripe }
            }
            WeightStoreError::OutOfRange { goff, .. } => EngineError::Capacity {
                requested: goff.int() + 1,
                source: err,
            },
            WeightStoreError::Grow { requested, .. } => EngineError::Capacity {
                requested,
                source: err,
            },
        }
    }
}

impl From<KVSetError> for EngineError {
    fn from(err: KVSetError) -> Self {
        EngineError::Storage(StorageError::KVSetError(err))
    }
}
