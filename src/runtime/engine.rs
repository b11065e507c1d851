use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::FlowError;
use crate::runtime::completion::Completion;
use crate::runtime::config::{FlowConfig, FlowHooks, RunCallbacks};
use crate::runtime::task::{IntoTasks, RunState, SyncPolicy, Task, TaskId, TaskOperation};

#[derive(Clone)]
struct TaskSlot {
    id: TaskId,
    task: Arc<Task>,
}

struct FlowState {
    tasks: Vec<TaskSlot>,
    /// Index of the next task the walk will visit
    cursor: usize,
    batch: u64,
    /// Dispatched tasks that have not joined yet
    barrier: usize,
    completed: usize,
    /// Sync task waiting for the barrier to clear (last one parked wins)
    deferred: Option<usize>,
    running: bool,
    callbacks: RunCallbacks,
    next_auto_id: u64,
    /// Skips requested between runs, applied by the next `execute`
    idle_skips: HashSet<TaskId>,
}

impl FlowState {
    fn is_live(&self, batch: u64) -> bool {
        self.running && self.batch == batch
    }
}

pub(crate) struct FlowInner {
    id: Uuid,
    config: FlowConfig,
    hooks: FlowHooks,
    state: Mutex<FlowState>,
    records: DashMap<TaskId, RunState>,
}

enum JoinOutcome {
    Complete(RunCallbacks),
    Release(usize),
    Wait,
}

/// Cooperative task flow.
///
/// Walks its task list in order. Async tasks are dispatched back to back and
/// overlap; a sync task is parked until every outstanding task has joined.
/// Every deferred step (join, retry) runs on a later tokio tick and carries
/// the batch token it was issued under, so `stop` and `restart` silence
/// everything still in flight.
///
/// `Flow` is a cheap handle; clones drive the same flow. All methods that
/// schedule work must be called from inside a tokio runtime.
#[derive(Clone)]
pub struct Flow {
    inner: Arc<FlowInner>,
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.inner.id)
            .field("tasks", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Flow {
    pub fn new(config: FlowConfig) -> Self {
        Self::with_hooks(config, FlowHooks::default())
    }

    pub fn with_hooks(config: FlowConfig, hooks: FlowHooks) -> Self {
        let state = FlowState {
            tasks: Vec::new(),
            cursor: 0,
            batch: 0,
            barrier: 0,
            completed: 0,
            deferred: None,
            running: false,
            callbacks: RunCallbacks::default(),
            next_auto_id: 0,
            idle_skips: HashSet::new(),
        };
        Self {
            inner: Arc::new(FlowInner {
                id: Uuid::new_v4(),
                config,
                hooks,
                state: Mutex::new(state),
                records: DashMap::new(),
            }),
        }
    }

    pub fn builder() -> FlowBuilder {
        FlowBuilder::default()
    }

    pub(crate) fn from_inner(inner: Arc<FlowInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &FlowConfig {
        &self.inner.config
    }

    pub fn len(&self) -> usize {
        self.state().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn batch(&self) -> u64 {
        self.state().batch
    }

    /// Number of dispatched tasks that have not joined yet.
    pub fn in_flight(&self) -> usize {
        self.state().barrier
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.state().tasks.iter().map(|slot| slot.id.clone()).collect()
    }

    pub fn state_of(&self, id: &TaskId) -> Option<RunState> {
        self.inner.records.get(id).map(|r| *r.value())
    }

    // --- Public mutators ---

    /// Starts a run. Does nothing while a run is already active.
    pub fn execute(&self, callbacks: RunCallbacks) -> &Self {
        let (batch, empty) = {
            let mut state = self.state();
            if state.running {
                debug!(flow = %self.inner.id, "Flow already running, execute ignored");
                return self;
            }
            state.batch += 1;
            state.cursor = 0;
            state.completed = 0;
            // Joins from an older batch are dropped, so whatever they left
            // behind can never drain.
            state.barrier = 0;
            state.deferred = None;
            state.running = true;
            state.callbacks = callbacks;

            let skips = std::mem::take(&mut state.idle_skips);
            for slot in &state.tasks {
                let initial = if skips.contains(&slot.id) {
                    RunState::Skipped
                } else {
                    RunState::Pending
                };
                self.set_record(&slot.id, initial);
            }
            (state.batch, state.tasks.is_empty())
        };

        info!(flow = %self.inner.id, batch, "Flow started");
        if empty {
            self.schedule_settle(batch);
        } else {
            self.advance(batch);
        }
        self
    }

    /// Abandons any active run and executes from the first task.
    pub fn restart(&self, callbacks: RunCallbacks) -> &Self {
        self.state().running = false;
        self.execute(callbacks)
    }

    /// Cancels the current run. Outstanding operations keep running but
    /// their completions are ignored, and no terminal callback fires.
    pub fn stop(&self) -> &Self {
        let mut state = self.state();
        state.running = false;
        state.batch += 1;
        info!(flow = %self.inner.id, batch = state.batch, "Flow stopped");
        self
    }

    /// Appends tasks, assigning identities where missing. Rejects the whole
    /// batch if any identity is already taken.
    pub fn push(&self, tasks: impl IntoTasks) -> Result<&Self, FlowError> {
        let resume = {
            let mut state = self.state();
            let mut staged: Vec<TaskSlot> = Vec::new();
            for task in tasks.into_tasks() {
                let id = match task.id.clone() {
                    Some(id) => id,
                    None => loop {
                        let candidate = TaskId::Auto(state.next_auto_id);
                        state.next_auto_id += 1;
                        if !self.inner.records.contains_key(&candidate)
                            && !staged.iter().any(|slot| slot.id == candidate)
                        {
                            break candidate;
                        }
                    },
                };
                if self.inner.records.contains_key(&id) || staged.iter().any(|slot| slot.id == id) {
                    return Err(FlowError::DuplicateTask(id));
                }
                staged.push(TaskSlot {
                    id,
                    task: Arc::new(task),
                });
            }
            if staged.is_empty() {
                return Ok(self);
            }

            let old_len = state.tasks.len();
            for slot in &staged {
                self.set_record(&slot.id, RunState::Pending);
            }
            debug!(flow = %self.inner.id, added = staged.len(), total = old_len + staged.len(), "Tasks pushed");
            state.tasks.extend(staged);

            // The walk already ran off the old end; pick it up again.
            (state.running && state.deferred.is_none() && state.cursor == old_len).then_some(state.batch)
        };

        if let Some(batch) = resume {
            self.advance(batch);
        }
        Ok(self)
    }

    pub fn push_and_execute(&self, tasks: impl IntoTasks, callbacks: RunCallbacks) -> Result<&Self, FlowError> {
        self.push(tasks)?;
        Ok(self.execute(callbacks))
    }

    /// Skips a task. A pending task is passed over when the walk reaches
    /// it; an executing one releases its barrier slot right away and any
    /// later resolution of it is ignored.
    pub fn request_skip(&self, id: &TaskId) -> Result<&Self, FlowError> {
        let batch = {
            let mut state = self.state();
            if !state.tasks.iter().any(|slot| &slot.id == id) {
                return Err(FlowError::UnknownTask(id.clone()));
            }
            if !state.running {
                state.idle_skips.insert(id.clone());
                self.set_record(id, RunState::Skipped);
                return Ok(self);
            }
            match self.record(id) {
                RunState::Pending => {
                    self.set_record(id, RunState::Skipped);
                    debug!(flow = %self.inner.id, task = %id, "Pending task marked skipped");
                    return Ok(self);
                }
                RunState::Executing => {
                    self.set_record(id, RunState::Skipped);
                    state.batch
                }
                _ => return Ok(self),
            }
        };

        info!(flow = %self.inner.id, task = %id, "Executing task skipped");
        self.advance(batch);
        self.schedule_join(batch);
        Ok(self)
    }

    // --- Walk & dispatch ---

    fn advance(&self, batch: u64) {
        loop {
            let index = {
                let mut state = self.state();
                if !state.is_live(batch) {
                    return;
                }
                let index = state.cursor;
                let Some(slot) = state.tasks.get(index).cloned() else {
                    return;
                };
                state.cursor += 1;

                if self.record(&slot.id) != RunState::Skipped && self.is_sync(&slot.task) && state.barrier > 0 {
                    self.park(&mut state, index);
                    return;
                }
                index
            };
            self.start(index, batch, None);
        }
    }

    fn park(&self, state: &mut FlowState, index: usize) {
        if let Some(dropped) = state.deferred.replace(index) {
            let dropped_id = state.tasks[dropped].id.clone();
            self.set_record(&dropped_id, RunState::Skipped);
            state.completed += 1;
            warn!(flow = %self.inner.id, task = %dropped_id, "Parked sync task superseded, dropping it");
        }
        debug!(
            flow = %self.inner.id,
            task = %state.tasks[index].id,
            in_flight = state.barrier,
            "Sync task parked until in-flight tasks join"
        );
    }

    fn dispatch(&self, index: usize, batch: u64) {
        self.start(index, batch, None);
        self.advance(batch);
    }

    /// Runs one attempt of a task. `retry` is `None` for the first attempt,
    /// which is the only one counted in the barrier.
    fn start(&self, index: usize, batch: u64, retry: Option<u32>) {
        let (slot, retries_left) = {
            let mut state = self.state();
            if !state.is_live(batch) {
                return;
            }
            let Some(slot) = state.tasks.get(index).cloned() else {
                return;
            };

            if self.record(&slot.id) == RunState::Skipped {
                if retry.is_none() {
                    // Still joins, so skipping never leaves the barrier raised.
                    state.barrier += 1;
                    drop(state);
                    debug!(flow = %self.inner.id, task = %slot.id, "Skipped task passed over");
                    self.schedule_join(batch);
                }
                return;
            }

            if retry.is_none() {
                state.barrier += 1;
            }
            self.set_record(&slot.id, RunState::Executing);
            let retries_left = retry.unwrap_or(slot.task.retries);
            (slot, retries_left)
        };

        debug!(
            flow = %self.inner.id,
            task = %slot.id,
            batch,
            retries_left,
            retry = retry.is_some(),
            "Dispatching task"
        );

        let completion = Completion::new(Arc::downgrade(&self.inner), index, retries_left, batch);
        match &slot.task.operation {
            TaskOperation::Direct(operation) => operation(completion),
            TaskOperation::SubFlow(flow) => {
                let on_fail = completion.duplicate();
                flow.restart(
                    RunCallbacks::new()
                        .on_complete(move || completion.duplicate().succeed(Vec::new()))
                        .on_fail(move |error| on_fail.duplicate().fail(vec![error.clone()])),
                );
            }
        }
    }

    // --- Completion routing ---

    pub(crate) fn resolve_success(&self, index: usize, retries_left: u32, batch: u64, args: Vec<Value>) {
        let Some(slot) = self.live_slot(index, batch) else {
            return;
        };

        match slot.task.success_value(args) {
            Err(args) => self.resolve_failure(index, retries_left, batch, args),
            Ok(result) => {
                if !self.mark_live(&slot, batch, RunState::Succeeded) {
                    return;
                }
                debug!(flow = %self.inner.id, task = %slot.id, "Task succeeded");
                if let Some(hook) = &self.inner.hooks.on_progress {
                    hook(&slot.id, &result);
                }
                self.schedule_join(batch);
            }
        }
    }

    pub(crate) fn resolve_failure(&self, index: usize, retries_left: u32, batch: u64, args: Vec<Value>) {
        let Some(slot) = self.live_slot(index, batch) else {
            return;
        };
        let error = slot.task.failure_value(args);

        if retries_left > 0 {
            let delay = slot.task.retry_delay.delay_for(retries_left, slot.task.retries);
            warn!(
                flow = %self.inner.id,
                task = %slot.id,
                retries_left,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Task failed, retry scheduled"
            );
            let flow = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                flow.start(index, batch, Some(retries_left - 1));
            });
            return;
        }

        let callbacks = {
            let mut state = self.state();
            if !state.is_live(batch) || self.record(&slot.id) == RunState::Skipped {
                return;
            }
            self.set_record(&slot.id, RunState::Failed);
            if slot.task.continue_on_failure {
                None
            } else {
                state.running = false;
                Some(state.callbacks.clone())
            }
        };

        match callbacks {
            None => {
                warn!(flow = %self.inner.id, task = %slot.id, %error, "Task failed, flow continues");
                self.schedule_join(batch);
            }
            Some(callbacks) => {
                error!(flow = %self.inner.id, task = %slot.id, %error, "Task failed, flow aborted");
                if let Some(hook) = &self.inner.hooks.on_fail {
                    hook(&error);
                }
                if let Some(hook) = &callbacks.on_fail {
                    hook(&error);
                }
            }
        }
    }

    // --- Barrier ---

    fn schedule_join(&self, batch: u64) {
        let flow = self.clone();
        tokio::spawn(async move {
            flow.join(batch);
        });
    }

    fn join(&self, batch: u64) {
        let outcome = {
            let mut state = self.state();
            if !state.is_live(batch) {
                return;
            }
            state.completed += 1;
            if state.completed >= state.tasks.len() {
                state.running = false;
                JoinOutcome::Complete(state.callbacks.clone())
            } else {
                state.barrier = state.barrier.saturating_sub(1);
                let released = if state.barrier == 0 { state.deferred.take() } else { None };
                match released {
                    Some(index) => JoinOutcome::Release(index),
                    None => JoinOutcome::Wait,
                }
            }
        };

        match outcome {
            JoinOutcome::Complete(callbacks) => self.finish(callbacks),
            JoinOutcome::Release(index) => {
                debug!(flow = %self.inner.id, index, "Barrier cleared, releasing parked task");
                self.dispatch(index, batch);
            }
            JoinOutcome::Wait => {}
        }
    }

    fn schedule_settle(&self, batch: u64) {
        let flow = self.clone();
        tokio::spawn(async move {
            flow.settle(batch);
        });
    }

    // Completes a run that has nothing to wait for.
    fn settle(&self, batch: u64) {
        let callbacks = {
            let mut state = self.state();
            if !state.is_live(batch) || state.completed < state.tasks.len() {
                return;
            }
            state.running = false;
            state.callbacks.clone()
        };
        self.finish(callbacks);
    }

    fn finish(&self, callbacks: RunCallbacks) {
        info!(flow = %self.inner.id, "Flow complete");
        if let Some(hook) = &self.inner.hooks.on_complete {
            hook();
        }
        if let Some(hook) = &callbacks.on_complete {
            hook();
        }
    }

    // --- Helpers ---

    fn state(&self) -> MutexGuard<'_, FlowState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_sync(&self, task: &Task) -> bool {
        (self.inner.config.default_sync && task.sync_policy != SyncPolicy::Async)
            || task.sync_policy == SyncPolicy::Sync
    }

    fn record(&self, id: &TaskId) -> RunState {
        self.inner
            .records
            .get(id)
            .map(|r| *r.value())
            .unwrap_or(RunState::Pending)
    }

    fn set_record(&self, id: &TaskId, run_state: RunState) {
        self.inner.records.insert(id.clone(), run_state);
    }

    fn live_slot(&self, index: usize, batch: u64) -> Option<TaskSlot> {
        let state = self.state();
        if !state.is_live(batch) {
            return None;
        }
        let slot = state.tasks.get(index)?.clone();
        (self.record(&slot.id) != RunState::Skipped).then_some(slot)
    }

    fn mark_live(&self, slot: &TaskSlot, batch: u64, run_state: RunState) -> bool {
        let state = self.state();
        if !state.is_live(batch) || self.record(&slot.id) == RunState::Skipped {
            return false;
        }
        self.set_record(&slot.id, run_state);
        true
    }
}

/// Builds a `Flow` with its configuration, hooks and initial tasks.
#[derive(Default)]
pub struct FlowBuilder {
    config: FlowConfig,
    hooks: FlowHooks,
    tasks: Vec<Task>,
}

impl FlowBuilder {
    pub fn config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn default_sync(mut self, enabled: bool) -> Self {
        self.config.default_sync = enabled;
        self
    }

    pub fn hooks(mut self, hooks: FlowHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn on_progress(mut self, f: impl Fn(&TaskId, &Value) + Send + Sync + 'static) -> Self {
        self.hooks = self.hooks.on_progress(f);
        self
    }

    pub fn on_fail(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.hooks = self.hooks.on_fail(f);
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks = self.hooks.on_complete(f);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoTasks) -> Self {
        self.tasks.extend(tasks.into_tasks());
        self
    }

    pub fn build(self) -> Result<Flow, FlowError> {
        let flow = Flow::with_hooks(self.config, self.hooks);
        flow.push(self.tasks)?;
        Ok(flow)
    }
}
