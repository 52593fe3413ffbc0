use chrono::Utc;
use focuslist_core::{
    protocol::{CreateTaskRequest, UpdateTaskRequest},
    LogEntry, Mutation, MutationKind, Priority, QueuedMutation, SyncError, SyncResult, SyncState,
    Task, TaskId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::{
    config::SyncConfig,
    database::KeyValueStore,
    events::{EventDispatcher, SyncEvent},
    local_store::LocalStore,
    merge::reconcile,
    mutation_log::MutationLog,
    network::{NetworkMonitor, NetworkSignal},
    offline_queue::MutationQueue,
    remote::RemoteTaskStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainPhase {
    Idle,
    Draining,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// Every queued mutation was acknowledged or dropped.
    Completed { processed: usize },
    /// The pass stopped at a transient failure; the rest stays queued.
    Failed { processed: usize, remaining: usize },
    /// The pass stopped at a mutation whose task is still being created.
    Deferred { processed: usize, remaining: usize },
    Empty,
    AlreadyRunning,
    Offline,
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied { tasks: usize },
    Offline,
    Guest,
    DrainInFlight,
    Cooldown,
    PendingMutations,
    /// A drain started while the fetch was in flight.
    Discarded,
    Failed,
}

/// How a public action reaches the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    LocalOnly,
    Queue { request_drain: bool },
    Direct,
}

enum RemoteCall {
    Create { token: Uuid, request: CreateTaskRequest },
    Update { id: String, completed: bool },
    Delete { id: String },
}

enum Step {
    Call(RemoteCall),
    Drop(&'static str),
    Defer,
}

enum Ack {
    Created { token: Uuid, task: Task },
    Updated { id: String, completed: bool },
    Deleted { id: String },
}

enum PassEnd {
    Completed,
    Failed(SyncError),
    Deferred,
}

/// Direct toggles of one task that have not been answered yet.
#[derive(Debug, Clone, Copy)]
struct PendingToggle {
    /// Value sent by the most recent of them.
    completed: bool,
    outstanding: usize,
}

struct EngineState {
    tasks: Vec<Task>,
    queue: MutationQueue,
    log: MutationLog,
    sync_state: SyncState,
    drain: DrainPhase,
    drains_started: u64,
    last_drain_completed: Option<Instant>,
    /// Provisional tasks whose direct create call has not returned yet.
    in_flight_adds: HashSet<Uuid>,
    in_flight_toggles: HashMap<String, PendingToggle>,
}

struct Inner {
    state: Mutex<EngineState>,
    store: LocalStore,
    remote: Option<Arc<dyn RemoteTaskStore>>,
    monitor: NetworkMonitor,
    events: Arc<EventDispatcher>,
    config: SyncConfig,
}

/// Owns the task list, the mutation queue and the mutation log, and keeps
/// them in step with the remote task store.
///
/// Cloning is cheap and yields a handle to the same engine. The state lock
/// is never held across a remote call, so user actions stay responsive
/// while a drain or refresh is waiting on the network.
///
/// Remote calls and drain passes run on their own tokio tasks. Dropping a
/// caller's future (a timeout, a lost `select!` branch) abandons only the
/// wait; the call still settles the engine's bookkeeping when it returns.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub async fn new(
        config: SyncConfig,
        backend: Arc<dyn KeyValueStore>,
        remote: Option<Arc<dyn RemoteTaskStore>>,
        monitor: NetworkMonitor,
    ) -> Self {
        let store = LocalStore::new(backend);
        let tasks = store.load_tasks().await;
        let queue = MutationQueue::load(store.clone(), config.max_pending_mutations).await;
        let log = MutationLog::load(store.clone(), config.log_retention).await;

        let sync_state = match (&remote, monitor.is_online()) {
            (None, _) => SyncState::Local,
            (Some(_), true) => SyncState::Synced,
            (Some(_), false) => SyncState::Offline,
        };

        tracing::info!(
            "Sync engine ready: {} tasks, {} pending mutations, state {}",
            tasks.len(),
            queue.len(),
            sync_state
        );

        let state = EngineState {
            tasks,
            queue,
            log,
            sync_state,
            drain: DrainPhase::Idle,
            drains_started: 0,
            last_drain_completed: None,
            in_flight_adds: HashSet::new(),
            in_flight_toggles: HashMap::new(),
        };

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                store,
                remote,
                monitor,
                events: Arc::new(EventDispatcher::new()),
                config,
            }),
        }
    }

    pub fn event_dispatcher(&self) -> Arc<EventDispatcher> {
        self.inner.events.clone()
    }

    pub fn is_storage_degraded(&self) -> bool {
        self.inner.store.is_degraded()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.inner.state.lock().await.tasks.clone()
    }

    pub async fn sync_state(&self) -> SyncState {
        self.inner.state.lock().await.sync_state
    }

    pub async fn pending_mutations(&self) -> Vec<QueuedMutation> {
        self.inner.state.lock().await.queue.snapshot()
    }

    pub async fn log_entry(&self, id: &str) -> Option<LogEntry> {
        self.inner.state.lock().await.log.get(id).cloned()
    }

    // ---------------------------------------------------------------------
    // Public actions
    // ---------------------------------------------------------------------

    /// Creates a task. It is visible locally right away under a provisional
    /// id; the returned task carries the canonical id if the remote store
    /// acknowledged it during this call.
    pub async fn add_task(&self, text: &str, priority: Priority) -> Task {
        let task = Task::provisional(text, priority);
        let Some(token) = task.id.as_provisional() else {
            return task;
        };

        let remote = {
            let mut state = self.inner.state.lock().await;
            state.tasks.insert(0, task.clone());
            self.inner.store.save_tasks(&state.tasks).await;
            self.inner.events.emit(SyncEvent::TaskAdded {
                id: task.id.clone(),
            });

            match self.inner.route(&state, None) {
                Route::LocalOnly => return task,
                Route::Queue { request_drain } => {
                    let mutation = Mutation::Add {
                        text: text.to_string(),
                        priority,
                    };
                    let queued = QueuedMutation::new(task.id.clone(), mutation);
                    self.inner.enqueue(&mut state, queued, request_drain).await;
                    return task;
                }
                Route::Direct => {}
            }
            let Some(remote) = self.inner.remote.clone() else {
                return task;
            };
            state.in_flight_adds.insert(token);
            remote
        };

        let request = CreateTaskRequest {
            text: text.to_string(),
            priority,
        };
        let engine = self.clone();
        let local = task.clone();
        let call = tokio::spawn(async move { engine.finish_create(remote, request, local).await });

        match call.await {
            Ok(task) => task,
            Err(e) => {
                tracing::error!("Create call for {} aborted: {}", task.id, e);
                let mut state = self.inner.state.lock().await;
                state.in_flight_adds.remove(&token);
                task
            }
        }
    }

    async fn finish_create(
        &self,
        remote: Arc<dyn RemoteTaskStore>,
        request: CreateTaskRequest,
        task: Task,
    ) -> Task {
        let Some(token) = task.id.as_provisional() else {
            return task;
        };
        let result = remote.create(&request).await;

        let mut state = self.inner.state.lock().await;
        state.in_flight_adds.remove(&token);
        match result {
            Ok(created) => {
                let acknowledged = self.inner.apply_create_ack(&mut state, token, created).await;
                self.inner.mark_reachable(&mut state);
                acknowledged.unwrap_or(task)
            }
            Err(e) if e.is_permanent() => {
                tracing::warn!("Remote store rejected new task {}: {}", task.id, e);
                self.inner.mark_reachable(&mut state);
                task
            }
            Err(e) => {
                tracing::warn!("Failed to create task {}, queueing: {}", task.id, e);
                let present = state.tasks.iter().any(|t| t.id == task.id);
                if !present && !state.queue.has_pending(&task.id, MutationKind::Delete) {
                    state.tasks.insert(0, task.clone());
                    self.inner.store.save_tasks(&state.tasks).await;
                    self.inner.events.emit(SyncEvent::TaskAdded {
                        id: task.id.clone(),
                    });
                }
                let mutation = Mutation::Add {
                    text: request.text,
                    priority: request.priority,
                };
                let queued = QueuedMutation::new(task.id.clone(), mutation);
                if state.queue.enqueue_before_dependents(queued).await {
                    self.inner.report_queue_limit(&state);
                }
                self.inner.fall_back_offline(&mut state, &e);
                task
            }
        }
    }

    /// Flips the completed flag of a task.
    pub async fn toggle_task(&self, id: &TaskId) -> SyncResult<Task> {
        let (updated, remote, canonical) = {
            let mut state = self.inner.state.lock().await;
            let Some(task) = state.tasks.iter_mut().find(|task| &task.id == id) else {
                return Err(SyncError::TaskNotFound(id.clone()));
            };
            task.completed = !task.completed;
            let updated = task.clone();
            self.inner.store.save_tasks(&state.tasks).await;
            self.inner.events.emit(SyncEvent::TaskUpdated {
                id: updated.id.clone(),
                completed: updated.completed,
            });

            match self.inner.route(&state, Some(id)) {
                Route::LocalOnly => return Ok(updated),
                Route::Queue { request_drain } => {
                    let mutation = Mutation::Update {
                        completed: updated.completed,
                    };
                    let queued = QueuedMutation::new(id.clone(), mutation);
                    self.inner.enqueue(&mut state, queued, request_drain).await;
                    return Ok(updated);
                }
                Route::Direct => {}
            }
            let (Some(remote), Some(canonical)) = (self.inner.remote.clone(), id.as_canonical())
            else {
                return Ok(updated);
            };
            let canonical = canonical.to_string();
            let pending = state
                .in_flight_toggles
                .entry(canonical.clone())
                .or_insert(PendingToggle {
                    completed: updated.completed,
                    outstanding: 0,
                });
            pending.completed = updated.completed;
            pending.outstanding += 1;
            (updated, remote, canonical)
        };

        let engine = self.clone();
        let sent = updated.clone();
        let id_for_call = canonical.clone();
        let call =
            tokio::spawn(async move { engine.finish_update(remote, id_for_call, sent).await });

        if let Err(e) = call.await {
            tracing::error!("Update call for {} aborted: {}", canonical, e);
            let mut state = self.inner.state.lock().await;
            self.inner.release_toggle(&mut state, &canonical);
        }
        Ok(updated)
    }

    async fn finish_update(&self, remote: Arc<dyn RemoteTaskStore>, id: String, sent: Task) {
        let request = UpdateTaskRequest {
            completed: sent.completed,
        };
        let result = remote.update(&id, &request).await;

        let mut state = self.inner.state.lock().await;
        let settled = self.inner.release_toggle(&mut state, &id);
        match result {
            Ok(()) => {
                let completed = settled.unwrap_or(sent.completed);
                self.inner
                    .record_update(&mut state, &id, completed, Some(&sent))
                    .await;
                if let Some(latest) = settled {
                    self.inner.restore_completed(&mut state, &id, latest).await;
                }
                self.inner.mark_reachable(&mut state);
            }
            Err(e) if e.is_permanent() => {
                tracing::warn!("Remote store rejected update of {}: {}", id, e);
                self.inner.mark_reachable(&mut state);
            }
            Err(e) => {
                tracing::warn!("Failed to update {}, queueing: {}", id, e);
                let target = TaskId::canonical(id.as_str());
                // Queue the latest local value; a newer toggle may have followed.
                let completed = state
                    .tasks
                    .iter()
                    .find(|task| task.id == target)
                    .map_or(sent.completed, |task| task.completed);
                let queued = QueuedMutation::new(target, Mutation::Update { completed });
                self.inner.enqueue(&mut state, queued, false).await;
                self.inner.fall_back_offline(&mut state, &e);
            }
        }
    }

    /// Removes a task locally and from the remote store.
    pub async fn delete_task(&self, id: &TaskId) {
        let (remote, canonical) = {
            let mut state = self.inner.state.lock().await;
            let before = state.tasks.len();
            state.tasks.retain(|task| &task.id != id);
            if state.tasks.len() != before {
                self.inner.store.save_tasks(&state.tasks).await;
                self.inner
                    .events
                    .emit(SyncEvent::TaskRemoved { id: id.clone() });
            }

            match self.inner.route(&state, Some(id)) {
                Route::LocalOnly => return,
                Route::Queue { request_drain } => {
                    let queued = QueuedMutation::new(id.clone(), Mutation::Delete);
                    self.inner.enqueue(&mut state, queued, request_drain).await;
                    return;
                }
                Route::Direct => {}
            }
            match (self.inner.remote.clone(), id.as_canonical()) {
                (Some(remote), Some(canonical)) => (remote, canonical.to_string()),
                _ => return,
            }
        };

        let engine = self.clone();
        let call = tokio::spawn(async move { engine.finish_delete(remote, canonical).await });
        if let Err(e) = call.await {
            tracing::error!("Delete call for {} aborted: {}", id, e);
        }
    }

    async fn finish_delete(&self, remote: Arc<dyn RemoteTaskStore>, id: String) {
        let result = remote.delete(&id).await;

        let mut state = self.inner.state.lock().await;
        match result {
            Ok(()) => {
                self.inner.record_delete(&mut state, &id).await;
                self.inner.mark_reachable(&mut state);
            }
            Err(e) if e.is_permanent() => {
                tracing::warn!("Remote store rejected delete of {}: {}", id, e);
                self.inner.mark_reachable(&mut state);
            }
            Err(e) => {
                tracing::warn!("Failed to delete {}, queueing: {}", id, e);
                let queued = QueuedMutation::new(TaskId::canonical(id), Mutation::Delete);
                self.inner.enqueue(&mut state, queued, false).await;
                self.inner.fall_back_offline(&mut state, &e);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Drain
    // ---------------------------------------------------------------------

    /// Replays the mutation queue against the remote store in FIFO order.
    /// At most one pass runs at a time.
    pub async fn process_queue(&self) -> DrainOutcome {
        let (remote, snapshot) = {
            let mut state = self.inner.state.lock().await;
            if state.drain == DrainPhase::Draining {
                return DrainOutcome::AlreadyRunning;
            }
            let Some(remote) = self.inner.remote.clone() else {
                self.inner.set_state(&mut state, SyncState::Local);
                return DrainOutcome::Guest;
            };
            let online = self.inner.monitor.is_online();
            if state.queue.is_empty() {
                if online {
                    self.inner.set_state(&mut state, SyncState::Synced);
                }
                return DrainOutcome::Empty;
            }
            if !online {
                return DrainOutcome::Offline;
            }

            state.drain = DrainPhase::Draining;
            state.drains_started += 1;
            self.inner.set_state(&mut state, SyncState::Syncing);
            self.inner.events.emit(SyncEvent::SyncStarted {
                pending: state.queue.len(),
            });
            tracing::info!("Draining {} pending mutations", state.queue.len());
            (remote, state.queue.snapshot())
        };

        let engine = self.clone();
        let pass = tokio::spawn(async move { engine.run_pass(remote, snapshot).await });

        match pass.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Drain pass aborted: {}", e);
                let mut state = self.inner.state.lock().await;
                state.drain = DrainPhase::Idle;
                self.inner.set_state(&mut state, SyncState::Offline);
                DrainOutcome::Failed {
                    processed: 0,
                    remaining: state.queue.len(),
                }
            }
        }
    }

    async fn run_pass(
        &self,
        remote: Arc<dyn RemoteTaskStore>,
        snapshot: Vec<QueuedMutation>,
    ) -> DrainOutcome {
        let (processed, end) = self.drain_pass(remote.as_ref(), snapshot).await;

        let mut state = self.inner.state.lock().await;
        state.queue.dequeue_acknowledged(&processed).await;
        state.drain = DrainPhase::Idle;
        let remaining = state.queue.len();

        match end {
            PassEnd::Failed(e) => {
                tracing::warn!(
                    "Drain failed after {} mutations, {} still queued: {}",
                    processed.len(),
                    remaining,
                    e
                );
                self.inner.set_state(&mut state, SyncState::Offline);
                self.inner.events.emit(SyncEvent::SyncError {
                    message: e.to_string(),
                });
                DrainOutcome::Failed {
                    processed: processed.len(),
                    remaining,
                }
            }
            PassEnd::Deferred => {
                // Still `Syncing`: the pending create requests the next pass.
                tracing::info!(
                    "Drain paused after {} mutations, {} waiting on a create call",
                    processed.len(),
                    remaining
                );
                DrainOutcome::Deferred {
                    processed: processed.len(),
                    remaining,
                }
            }
            PassEnd::Completed => {
                state.last_drain_completed = Some(Instant::now());
                self.inner.set_state(&mut state, SyncState::Synced);
                self.inner.events.emit(SyncEvent::SyncCompleted {
                    processed: processed.len(),
                    remaining,
                });
                tracing::info!(
                    "Drain finished: {} processed, {} remaining",
                    processed.len(),
                    remaining
                );
                DrainOutcome::Completed {
                    processed: processed.len(),
                }
            }
        }
    }

    async fn drain_pass(
        &self,
        remote: &dyn RemoteTaskStore,
        snapshot: Vec<QueuedMutation>,
    ) -> (HashSet<Uuid>, PassEnd) {
        let mut id_map: HashMap<Uuid, String> = HashMap::new();
        let mut processed = HashSet::new();

        for queued in snapshot {
            let step = {
                let state = self.inner.state.lock().await;
                // An acknowledgement outside this pass may have retargeted it.
                let live_target = state
                    .queue
                    .iter()
                    .find(|m| m.dedup_token == queued.dedup_token)
                    .map(|m| m.target_id.clone())
                    .unwrap_or_else(|| queued.target_id.clone());
                plan(&queued.mutation, remap(live_target, &id_map), &state)
            };

            let call = match step {
                Step::Call(call) => call,
                Step::Drop(reason) => {
                    tracing::warn!(
                        "Dropping {} for {}: {}",
                        queued.kind(),
                        queued.target_id,
                        reason
                    );
                    processed.insert(queued.dedup_token);
                    continue;
                }
                Step::Defer => {
                    tracing::debug!(
                        "Deferring {} for {} until its task is created",
                        queued.kind(),
                        queued.target_id
                    );
                    return (processed, PassEnd::Deferred);
                }
            };

            match execute(remote, call).await {
                Ok(ack) => {
                    let mut state = self.inner.state.lock().await;
                    if let Ack::Created { token, task } = &ack {
                        if let Some(canonical) = task.id.as_canonical() {
                            id_map.insert(*token, canonical.to_string());
                        }
                    }
                    self.inner.apply_ack(&mut state, ack).await;
                    processed.insert(queued.dedup_token);
                }
                Err(e) if e.is_permanent() => {
                    tracing::warn!(
                        "Dropping {} for {}, rejected by remote store: {}",
                        queued.kind(),
                        queued.target_id,
                        e
                    );
                    processed.insert(queued.dedup_token);
                }
                Err(e) => return (processed, PassEnd::Failed(e)),
            }
        }

        (processed, PassEnd::Completed)
    }

    // ---------------------------------------------------------------------
    // Merge
    // ---------------------------------------------------------------------

    /// Pulls the remote task list and replaces local state with it, after
    /// overlaying recent acknowledged writes and still-pending mutations.
    ///
    /// Unless `force` is set, nothing is fetched while mutations are queued.
    pub async fn refresh(&self, force: bool) -> RefreshOutcome {
        let (remote, drains_seen) = {
            let state = self.inner.state.lock().await;
            let Some(remote) = self.inner.remote.clone() else {
                return RefreshOutcome::Guest;
            };
            if !self.inner.monitor.is_online() {
                return RefreshOutcome::Offline;
            }
            if state.drain == DrainPhase::Draining {
                return RefreshOutcome::DrainInFlight;
            }
            if let Some(completed) = state.last_drain_completed {
                if completed.elapsed() < self.inner.config.refresh_cooldown {
                    return RefreshOutcome::Cooldown;
                }
            }
            if !force && !state.queue.is_empty() {
                return RefreshOutcome::PendingMutations;
            }
            (remote, state.drains_started)
        };

        let fetched = match remote.list().await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!("Failed to fetch tasks: {}", e);
                self.inner.events.emit(SyncEvent::SyncError {
                    message: e.to_string(),
                });
                return RefreshOutcome::Failed;
            }
        };

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        if state.drain == DrainPhase::Draining || state.drains_started != drains_seen {
            tracing::info!("Discarding fetched snapshot, a drain started meanwhile");
            return RefreshOutcome::Discarded;
        }

        state.log.prune(Utc::now()).await;
        let pending = state.queue.snapshot();
        let in_flight: Vec<Task> = state
            .tasks
            .iter()
            .filter(|task| match &task.id {
                TaskId::Provisional(token) => state.in_flight_adds.contains(token),
                TaskId::Canonical(id) => state.in_flight_toggles.contains_key(id),
            })
            .cloned()
            .collect();
        let merged = reconcile(
            fetched,
            &state.log.entries_oldest_first(),
            &pending,
            &in_flight,
            &state.tasks,
        );
        let count = merged.len();
        state.tasks = merged;
        self.inner.store.save_tasks(&state.tasks).await;
        if state.queue.is_empty() {
            self.inner.set_state(state, SyncState::Synced);
        }
        tracing::debug!("Refreshed task list: {} tasks", count);
        RefreshOutcome::Applied { tasks: count }
    }

    // ---------------------------------------------------------------------
    // Signals
    // ---------------------------------------------------------------------

    /// Pushes pending mutations, then pulls.
    pub async fn sync_now(&self) -> (DrainOutcome, RefreshOutcome) {
        let drained = self.process_queue().await;
        let refreshed = self.refresh(false).await;
        (drained, refreshed)
    }

    /// Initial load: push whatever survived the last session, then pull
    /// even if some of it is still queued.
    pub async fn start(&self) -> (DrainOutcome, RefreshOutcome) {
        let drained = self.process_queue().await;
        let refreshed = self.refresh(true).await;
        (drained, refreshed)
    }

    /// Single entry point for connectivity and visibility transitions.
    pub async fn handle_signal(&self, signal: NetworkSignal) {
        tracing::debug!("Handling {:?}", signal);
        let online = self.inner.monitor.is_online();
        match signal {
            NetworkSignal::BecameOnline | NetworkSignal::BecameVisible | NetworkSignal::Focused => {
                if online {
                    self.sync_now().await;
                }
            }
            NetworkSignal::DrainRequested => {
                if online {
                    self.process_queue().await;
                }
            }
            NetworkSignal::BecameOffline => {
                let mut state = self.inner.state.lock().await;
                if self.inner.remote.is_some() {
                    self.inner.set_state(&mut state, SyncState::Offline);
                }
            }
            NetworkSignal::BecameHidden => {}
        }
    }

    /// Processes signals one at a time and refreshes periodically while the
    /// app is visible and online. Returns when the signal channel closes.
    pub async fn run(self, mut signals: mpsc::UnboundedReceiver<NetworkSignal>) {
        let period = self
            .inner
            .config
            .refresh_interval
            .max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    let monitor = &self.inner.monitor;
                    if monitor.is_online() && monitor.is_visible() {
                        self.refresh(false).await;
                    }
                }
            }
        }
        tracing::info!("Signal channel closed, sync loop stopped");
    }

    pub fn spawn(self, signals: mpsc::UnboundedReceiver<NetworkSignal>) -> JoinHandle<()> {
        tokio::spawn(self.run(signals))
    }
}

impl Inner {
    fn route(&self, state: &EngineState, target: Option<&TaskId>) -> Route {
        if self.remote.is_none() {
            return Route::LocalOnly;
        }
        if let Some(TaskId::Provisional(token)) = target {
            let known_remotely = state.in_flight_adds.contains(token)
                || state
                    .queue
                    .has_pending(&TaskId::Provisional(*token), MutationKind::Add);
            if !known_remotely {
                return Route::LocalOnly;
            }
        }

        let online = self.monitor.is_online();
        if !online {
            return Route::Queue {
                request_drain: false,
            };
        }
        // Never let a direct call overtake queued mutations.
        if !state.queue.is_empty() || target.is_some_and(TaskId::is_provisional) {
            return Route::Queue {
                request_drain: true,
            };
        }
        Route::Direct
    }

    async fn enqueue(&self, state: &mut EngineState, queued: QueuedMutation, request_drain: bool) {
        if state.queue.enqueue(queued).await {
            self.report_queue_limit(state);
        }
        if request_drain {
            self.monitor.request_drain();
        }
    }

    fn report_queue_limit(&self, state: &EngineState) {
        let pending = state.queue.len();
        tracing::warn!(
            "{} mutations waiting for the remote store (limit {})",
            pending,
            self.config.max_pending_mutations
        );
        self.events.emit(SyncEvent::QueueLimitExceeded { pending });
    }

    fn set_state(&self, state: &mut EngineState, next: SyncState) {
        if state.sync_state != next {
            tracing::info!("Sync state {} -> {}", state.sync_state, next);
            state.sync_state = next;
            self.events.emit(SyncEvent::StateChanged { state: next });
        }
    }

    /// The remote store answered a direct call. Push anything queued behind
    /// it, or leave `Offline` if nothing is.
    fn mark_reachable(&self, state: &mut EngineState) {
        if state.queue.is_empty() {
            self.set_state(state, SyncState::Synced);
        } else {
            self.monitor.request_drain();
        }
    }

    fn fall_back_offline(&self, state: &mut EngineState, error: &SyncError) {
        self.set_state(state, SyncState::Offline);
        self.events.emit(SyncEvent::SyncError {
            message: error.to_string(),
        });
    }

    /// Counts one direct toggle of `id` as answered. Returns the value of
    /// the most recent toggle once none is outstanding.
    fn release_toggle(&self, state: &mut EngineState, id: &str) -> Option<bool> {
        let pending = state.in_flight_toggles.get_mut(id)?;
        pending.outstanding = pending.outstanding.saturating_sub(1);
        if pending.outstanding > 0 {
            return None;
        }
        state
            .in_flight_toggles
            .remove(id)
            .map(|pending| pending.completed)
    }

    /// Puts an acknowledged completed flag back if a fetch overwrote it.
    async fn restore_completed(&self, state: &mut EngineState, id: &str, completed: bool) {
        let target = TaskId::canonical(id);
        if state.queue.has_pending(&target, MutationKind::Update) {
            return;
        }
        let Some(task) = state
            .tasks
            .iter_mut()
            .find(|task| task.id == target && task.completed != completed)
        else {
            return;
        };
        task.completed = completed;
        self.store.save_tasks(&state.tasks).await;
        self.events.emit(SyncEvent::TaskUpdated {
            id: target,
            completed,
        });
    }

    async fn apply_ack(&self, state: &mut EngineState, ack: Ack) {
        match ack {
            Ack::Created { token, task } => {
                self.apply_create_ack(state, token, task).await;
            }
            Ack::Updated { id, completed } => {
                self.record_update(state, &id, completed, None).await;
            }
            Ack::Deleted { id } => self.record_delete(state, &id).await,
        }
    }

    /// Moves a provisional task to its canonical id. The task list, the
    /// queued mutations and the log entry change together.
    async fn apply_create_ack(
        &self,
        state: &mut EngineState,
        token: Uuid,
        created: Task,
    ) -> Option<Task> {
        let provisional = TaskId::Provisional(token);
        let canonical = created.id.as_canonical()?.to_string();

        state.queue.retarget(token, &canonical).await;

        let current = match state.tasks.iter_mut().find(|task| task.id == provisional) {
            Some(task) => {
                task.id = created.id.clone();
                task.created_at = created.created_at;
                Some(task.clone())
            }
            None if state.queue.has_pending(&created.id, MutationKind::Delete) => None,
            None => {
                // A fetch replaced the list while the create was in flight.
                state.tasks.insert(0, created.clone());
                Some(created.clone())
            }
        };

        self.store.save_tasks(&state.tasks).await;
        state
            .log
            .record(
                &canonical,
                LogEntry::new(MutationKind::Add, Some(current.clone().unwrap_or(created))),
            )
            .await;
        self.events.emit(SyncEvent::TaskIdAssigned {
            provisional,
            canonical: TaskId::Canonical(canonical),
        });
        current
    }

    async fn record_update(
        &self,
        state: &mut EngineState,
        id: &str,
        completed: bool,
        fallback: Option<&Task>,
    ) {
        let canonical = TaskId::canonical(id);
        let item = state
            .tasks
            .iter()
            .find(|task| task.id == canonical)
            .or(fallback)
            .cloned()
            .map(|mut task| {
                task.completed = completed;
                task
            });
        state
            .log
            .record(id, LogEntry::new(MutationKind::Update, item))
            .await;
    }

    async fn record_delete(&self, state: &mut EngineState, id: &str) {
        let canonical = TaskId::canonical(id);
        let before = state.tasks.len();
        state.tasks.retain(|task| task.id != canonical);
        if state.tasks.len() != before {
            self.store.save_tasks(&state.tasks).await;
            self.events.emit(SyncEvent::TaskRemoved { id: canonical });
        }
        state
            .log
            .record(id, LogEntry::new(MutationKind::Delete, None))
            .await;
    }
}

fn remap(target: TaskId, id_map: &HashMap<Uuid, String>) -> TaskId {
    match &target {
        TaskId::Provisional(token) => match id_map.get(token) {
            Some(canonical) => TaskId::canonical(canonical.clone()),
            None => target,
        },
        TaskId::Canonical(_) => target,
    }
}

fn plan(mutation: &Mutation, target: TaskId, state: &EngineState) -> Step {
    match (mutation, target) {
        (Mutation::Add { text, priority }, TaskId::Provisional(token)) => {
            Step::Call(RemoteCall::Create {
                token,
                request: CreateTaskRequest {
                    text: text.clone(),
                    priority: *priority,
                },
            })
        }
        (Mutation::Add { .. }, TaskId::Canonical(_)) => Step::Drop("task already created"),
        (Mutation::Update { completed }, TaskId::Canonical(id)) => {
            Step::Call(RemoteCall::Update {
                id,
                completed: *completed,
            })
        }
        (Mutation::Delete, TaskId::Canonical(id)) => Step::Call(RemoteCall::Delete { id }),
        (_, TaskId::Provisional(token)) if state.in_flight_adds.contains(&token) => Step::Defer,
        (_, TaskId::Provisional(_)) => Step::Drop("task was never created remotely"),
    }
}

async fn execute(remote: &dyn RemoteTaskStore, call: RemoteCall) -> SyncResult<Ack> {
    match call {
        RemoteCall::Create { token, request } => {
            let task = remote.create(&request).await?;
            Ok(Ack::Created { token, task })
        }
        RemoteCall::Update { id, completed } => {
            remote
                .update(&id, &UpdateTaskRequest { completed })
                .await?;
            Ok(Ack::Updated { id, completed })
        }
        RemoteCall::Delete { id } => {
            remote.delete(&id).await?;
            Ok(Ack::Deleted { id })
        }
    }
}
