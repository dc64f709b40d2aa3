//! Worker manager - reconciles bridge events into per-worker UI state

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::control::WorkerControl;
use super::message::{WorkerEvent, WorkerReport};
use super::model::{ReportOutcome, WorkerId, WorkerState};
use crate::{Error, Result};

/// Full state mapping handed to observers
pub type WorkerSnapshot = HashMap<WorkerId, WorkerState>;

type Observer = Arc<dyn Fn(&WorkerSnapshot) + Send + Sync>;

/// Messages held per unknown worker id; its exit is always kept
const UNCLAIMED_EVENT_LIMIT: usize = 64;
/// Unknown worker ids held at once, oldest evicted first
const UNCLAIMED_WORKER_LIMIT: usize = 64;

#[derive(Default)]
struct Observers {
    next_id: u64,
    entries: HashMap<u64, Observer>,
}

#[derive(Default)]
struct ManagerState {
    workers: HashMap<WorkerId, WorkerState>,
    /// Events that arrived before `start_task` recorded their id
    unclaimed: HashMap<WorkerId, Vec<WorkerEvent>>,
    /// Insertion order of `unclaimed`, for eviction
    unclaimed_order: VecDeque<WorkerId>,
    creates_in_flight: usize,
    sequence: u64,
}

impl ManagerState {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Hold an event for an id `start_task` may still record
    fn hold(&mut self, event: WorkerEvent) {
        let worker_id = event.worker_id();

        if !self.unclaimed.contains_key(&worker_id) {
            if self.unclaimed_order.len() >= UNCLAIMED_WORKER_LIMIT {
                if let Some(evicted) = self.unclaimed_order.pop_front() {
                    debug!("Discarding held events for unknown worker {}", evicted);
                    self.unclaimed.remove(&evicted);
                }
            }
            self.unclaimed_order.push_back(worker_id);
        }

        let held = self.unclaimed.entry(worker_id).or_default();
        if event.is_exit() || held.len() < UNCLAIMED_EVENT_LIMIT {
            held.push(event);
        }
    }

    /// Take the events held for `worker_id`
    fn claim(&mut self, worker_id: WorkerId) -> Vec<WorkerEvent> {
        match self.unclaimed.remove(&worker_id) {
            Some(events) => {
                self.unclaimed_order.retain(|id| *id != worker_id);
                events
            }
            None => Vec::new(),
        }
    }

    /// Apply one event; returns a start payload to deliver, if any
    fn apply(&mut self, event: WorkerEvent) -> Option<(WorkerId, Value)> {
        let worker_id = event.worker_id();

        if !self.workers.contains_key(&worker_id) {
            self.hold(event);
            return None;
        }

        let finished_sequence = self.sequence + 1;
        let state = self.workers.get_mut(&worker_id)?;
        let was_running = state.is_running;

        let delivery = match event {
            WorkerEvent::Message { data, .. } => {
                debug!("Message from worker {}: {}", worker_id, data);
                match WorkerReport::from_value(&data) {
                    Some(report) => match state.apply_report(report) {
                        ReportOutcome::Deliver(payload) => Some((worker_id, payload)),
                        ReportOutcome::Updated | ReportOutcome::Ignored => None,
                    },
                    None => {
                        warn!("Unknown message type from worker {}: {}", worker_id, data);
                        None
                    }
                }
            }
            WorkerEvent::Exit { exit_code, .. } => {
                info!("Worker {} exited with code {}", worker_id, exit_code);
                state.apply_exit(exit_code);
                None
            }
        };

        if was_running && !state.is_running {
            state.finished_sequence = Some(finished_sequence);
            self.sequence = finished_sequence;
        }

        delivery
    }

    /// Drop finished states for a script before a new run of it is recorded
    fn evict_finished(&mut self, script_reference: &str) {
        self.workers.retain(|id, state| {
            let stale = state.script_reference == script_reference && !state.is_running;
            if stale {
                debug!("Evicting finished worker {} for {}", id, script_reference);
            }
            !stale
        });
    }
}

/// Counts a `create` call in flight
///
/// When the last pending create finishes, events still held for unknown
/// ids are discarded.
struct CreateInFlight<'a> {
    state: &'a Mutex<ManagerState>,
}

impl<'a> CreateInFlight<'a> {
    fn begin(state: &'a Mutex<ManagerState>) -> Self {
        lock(state).creates_in_flight += 1;
        Self { state }
    }
}

impl Drop for CreateInFlight<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        state.creates_in_flight = state.creates_in_flight.saturating_sub(1);
        if state.creates_in_flight == 0 && !state.unclaimed.is_empty() {
            debug!(
                "Discarding held events for {} unknown worker(s)",
                state.unclaimed.len()
            );
            state.unclaimed.clear();
            state.unclaimed_order.clear();
        }
    }
}

/// Handle returned by [`WorkerManager::subscribe`]
///
/// Unsubscribing is idempotent and also happens on drop.
pub struct Subscription {
    id: u64,
    observers: Weak<Mutex<Observers>>,
    active: AtomicBool,
}

impl Subscription {
    /// Stop receiving notifications
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(observers) = self.observers.upgrade() {
            lock(&observers).entries.remove(&self.id);
        }
    }

    /// Whether the observer is still registered
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Single UI-side owner of worker state
pub struct WorkerManager {
    control: Arc<dyn WorkerControl>,
    state: Mutex<ManagerState>,
    observers: Arc<Mutex<Observers>>,
}

impl WorkerManager {
    /// Create a manager that reaches workers through `control`
    pub fn new(control: Arc<dyn WorkerControl>) -> Self {
        info!("WorkerManager initialized");
        Self {
            control,
            state: Mutex::new(ManagerState::default()),
            observers: Arc::new(Mutex::new(Observers::default())),
        }
    }

    /// Register an observer; it receives the current state immediately
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&WorkerSnapshot) + Send + Sync + 'static,
    {
        let observer: Observer = Arc::new(observer);
        let id = {
            let mut observers = lock(&self.observers);
            observers.next_id += 1;
            let id = observers.next_id;
            observers.entries.insert(id, Arc::clone(&observer));
            id
        };

        observer(&self.snapshot());

        Subscription {
            id,
            observers: Arc::downgrade(&self.observers),
            active: AtomicBool::new(true),
        }
    }

    /// Copy of the current state mapping
    pub fn snapshot(&self) -> WorkerSnapshot {
        lock(&self.state).workers.clone()
    }

    /// Current states ordered by creation
    pub fn states(&self) -> Vec<WorkerState> {
        let mut states: Vec<WorkerState> = lock(&self.state).workers.values().cloned().collect();
        states.sort_by_key(|s| s.sequence);
        states
    }

    /// State of a single worker
    pub fn get(&self, worker_id: WorkerId) -> Option<WorkerState> {
        lock(&self.state).workers.get(&worker_id).cloned()
    }

    /// Most recently created state for a script
    pub fn latest_for(&self, script_reference: &str) -> Option<WorkerState> {
        lock(&self.state)
            .workers
            .values()
            .filter(|s| s.script_reference == script_reference)
            .max_by_key(|s| s.sequence)
            .cloned()
    }

    /// Start a worker for `script_reference`
    ///
    /// `start_payload` is sent once the worker reports ready.
    pub async fn start_task(
        &self,
        script_reference: &str,
        start_payload: Option<Value>,
    ) -> Result<WorkerId> {
        info!("Attempting to start task: {}", script_reference);

        let in_flight = CreateInFlight::begin(&self.state);
        let worker_id = self
            .control
            .create(script_reference)
            .await
            .inspect_err(|e| error!("Failed to start worker for {}: {}", script_reference, e))?;

        let (snapshot, deliveries) = {
            let mut state = lock(&self.state);
            state.evict_finished(script_reference);
            let sequence = state.next_sequence();
            state.workers.insert(
                worker_id,
                WorkerState::new(worker_id, script_reference, start_payload, sequence),
            );

            let early = state.claim(worker_id);
            if !early.is_empty() {
                debug!("Replaying {} early events for worker {}", early.len(), worker_id);
            }
            let mut deliveries: Vec<_> = early
                .into_iter()
                .filter_map(|event| state.apply(event))
                .collect();
            // A worker that already exited gets nothing
            deliveries.retain(|(id, _)| state.workers.get(id).is_some_and(|w| w.is_running));

            (state.workers.clone(), deliveries)
        };
        drop(in_flight);

        info!("Worker {} created for {}", worker_id, script_reference);
        self.notify(&snapshot);
        for (id, payload) in deliveries {
            self.deliver(id, payload).await;
        }

        Ok(worker_id)
    }

    /// Terminate a worker
    ///
    /// On failure the state is marked not-running locally; the exit event
    /// remains authoritative if it still arrives.
    pub async fn stop_task(&self, worker_id: WorkerId) -> Result<()> {
        {
            let mut state = lock(&self.state);
            match state.workers.get_mut(&worker_id) {
                Some(worker) => worker.stop_requested = true,
                None => {
                    warn!("Stop task called for non-existent worker: {}", worker_id);
                    return Err(Error::NotFound(worker_id.to_string()));
                }
            }
        }

        info!("Terminating worker {}", worker_id);
        if let Err(e) = self.control.terminate(worker_id).await {
            error!("Failed to terminate worker {}: {}", worker_id, e);
            let snapshot = {
                let mut state = lock(&self.state);
                let finished_sequence = state.sequence + 1;
                let mut finished = false;
                if let Some(worker) = state.workers.get_mut(&worker_id) {
                    let was_running = worker.is_running;
                    worker.mark_stop_failed(&e.to_string());
                    if was_running && !worker.is_running {
                        worker.finished_sequence = Some(finished_sequence);
                        finished = true;
                    }
                }
                if finished {
                    state.sequence = finished_sequence;
                }
                state.workers.clone()
            };
            self.notify(&snapshot);
            return Err(e);
        }

        Ok(())
    }

    /// Post a message to a running worker
    pub async fn post_message(&self, worker_id: WorkerId, payload: Value) -> Result<()> {
        let running = lock(&self.state)
            .workers
            .get(&worker_id)
            .is_some_and(|w| w.is_running);

        if !running {
            warn!("Cannot post message to inactive worker: {}", worker_id);
            return Err(Error::NotFound(worker_id.to_string()));
        }

        self.control.post_message(worker_id, payload).await
    }

    /// Apply one bridge event and notify observers
    pub async fn handle_event(&self, event: WorkerEvent) {
        let worker_id = event.worker_id();
        let (snapshot, delivery) = {
            let mut state = lock(&self.state);
            let known = state.workers.contains_key(&worker_id);
            let delivery = state.apply(event);
            (known.then(|| state.workers.clone()), delivery)
        };

        if let Some(snapshot) = snapshot {
            self.notify(&snapshot);
        }
        if let Some((id, payload)) = delivery {
            self.deliver(id, payload).await;
        }
    }

    /// Mark workers the host no longer runs as exited
    ///
    /// Only workers without an exit are checked. Their exit code is unknown
    /// and reported as -1 until a real exit event replaces it.
    pub async fn reconcile(&self) {
        let candidates: Vec<WorkerId> = lock(&self.state)
            .workers
            .values()
            .filter(|w| !w.has_exited())
            .map(|w| w.id)
            .collect();
        if candidates.is_empty() {
            return;
        }

        let live: HashSet<WorkerId> = match self.control.live_workers().await {
            Ok(live) => live.into_iter().collect(),
            Err(e) => {
                warn!("Failed to list live workers: {}", e);
                return;
            }
        };

        let snapshot = {
            let mut state = lock(&self.state);
            let mut changed = false;
            for worker_id in candidates.iter().filter(|id| !live.contains(*id)) {
                let finished_sequence = state.sequence + 1;
                let was_running = match state.workers.get_mut(worker_id) {
                    Some(worker) if !worker.has_exited() => {
                        warn!("Worker {} is gone but its exit was missed", worker_id);
                        let was_running = worker.is_running;
                        worker.apply_lost_exit();
                        if was_running {
                            worker.finished_sequence = Some(finished_sequence);
                        }
                        was_running
                    }
                    _ => continue,
                };
                if was_running {
                    state.sequence = finished_sequence;
                }
                changed = true;
            }
            changed.then(|| state.workers.clone())
        };

        if let Some(snapshot) = snapshot {
            self.notify(&snapshot);
        }
    }

    /// Consume the bridge event stream until it closes
    ///
    /// Skipped events are made up for with [`WorkerManager::reconcile`].
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<WorkerEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Worker manager lagged behind, skipped {} events", skipped);
                    self.reconcile().await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Worker event stream closed");
                    break;
                }
            }
        }
    }

    async fn deliver(&self, worker_id: WorkerId, payload: Value) {
        debug!("Worker {} ready, sending start payload", worker_id);
        if let Err(e) = self.control.post_message(worker_id, payload).await {
            warn!("Failed to deliver start payload to {}: {}", worker_id, e);
        }
    }

    fn notify(&self, snapshot: &WorkerSnapshot) {
        let observers: Vec<Observer> = lock(&self.observers).entries.values().cloned().collect();
        for observer in observers {
            observer(snapshot);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
