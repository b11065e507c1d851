use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::completion::Completion;
use crate::runtime::config::BackoffConfig;
use crate::runtime::engine::Flow;

pub type OperationFn = Arc<dyn Fn(Completion) + Send + Sync>;
pub type SuccessTransform = Arc<dyn Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync>;
pub type FailureTransform = Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>;
pub type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Identity of a task, unique within one flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    /// Assigned by the flow when the caller gave none
    Auto(u64),
    Named(String),
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Auto(n) => write!(f, "#{}", n),
            TaskId::Named(name) => f.write_str(name),
        }
    }
}

impl From<&str> for TaskId {
    fn from(name: &str) -> Self {
        TaskId::Named(name.to_string())
    }
}

impl From<String> for TaskId {
    fn from(name: String) -> Self {
        TaskId::Named(name)
    }
}

/// Per-task synchrony. `Inherit` follows the flow's `default_sync`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    #[default]
    Inherit,
    Sync,
    Async,
}

impl From<Option<bool>> for SyncPolicy {
    fn from(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => SyncPolicy::Sync,
            Some(false) => SyncPolicy::Async,
            None => SyncPolicy::Inherit,
        }
    }
}

/// Engine-owned progress of a task within the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Executing,
    Succeeded,
    Failed,
    Skipped,
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed | RunState::Skipped)
    }
}

/// How long to wait before re-dispatching a failed task.
#[derive(Clone)]
pub enum RetryDelay {
    Fixed(Duration),
    /// Receives the number of retries still available
    Computed(DelayFn),
    Backoff(BackoffConfig),
}

impl Default for RetryDelay {
    fn default() -> Self {
        RetryDelay::Fixed(Duration::ZERO)
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryDelay::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            RetryDelay::Computed(_) => f.write_str("Computed(..)"),
            RetryDelay::Backoff(cfg) => f.debug_tuple("Backoff").field(cfg).finish(),
        }
    }
}

impl RetryDelay {
    pub fn computed(f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        RetryDelay::Computed(Arc::new(f))
    }

    /// `remaining` is the retry count before this retry is consumed, `budget`
    /// the task's full retry allowance.
    pub fn delay_for(&self, remaining: u32, budget: u32) -> Duration {
        match self {
            RetryDelay::Fixed(d) => *d,
            RetryDelay::Computed(f) => f(remaining),
            RetryDelay::Backoff(cfg) => cfg.delay_for_attempt(budget.saturating_sub(remaining)),
        }
    }
}

/// What a task runs when dispatched.
#[derive(Clone)]
pub enum TaskOperation {
    Direct(OperationFn),
    /// A nested flow, restarted on every dispatch
    SubFlow(Flow),
}

impl fmt::Debug for TaskOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOperation::Direct(_) => f.write_str("Direct(..)"),
            TaskOperation::SubFlow(flow) => f.debug_tuple("SubFlow").field(&flow.id()).finish(),
        }
    }
}

/// Caller-supplied task descriptor. Immutable once pushed into a flow.
#[derive(Clone)]
pub struct Task {
    pub(crate) id: Option<TaskId>,
    pub(crate) operation: TaskOperation,
    pub(crate) sync_policy: SyncPolicy,
    pub(crate) on_success: Option<SuccessTransform>,
    pub(crate) on_failure: Option<FailureTransform>,
    pub(crate) retries: u32,
    pub(crate) retry_delay: RetryDelay,
    pub(crate) continue_on_failure: bool,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("sync_policy", &self.sync_policy)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("continue_on_failure", &self.continue_on_failure)
            .finish()
    }
}

impl Task {
    /// A task around a callback-style operation. The operation must resolve
    /// the `Completion` it receives exactly once per attempt.
    pub fn new(operation: impl Fn(Completion) + Send + Sync + 'static) -> Self {
        Self::with_operation(TaskOperation::Direct(Arc::new(operation)))
    }

    pub fn sub_flow(flow: Flow) -> Self {
        Self::with_operation(TaskOperation::SubFlow(flow))
    }

    /// Wraps a future factory. Each attempt spawns a fresh future on the
    /// current tokio runtime.
    pub fn from_async<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Value>> + Send + 'static,
    {
        Self::new(move |done| {
            let fut = factory();
            tokio::spawn(async move {
                match fut.await {
                    Ok(value) => done.succeed_with(value),
                    Err(error) => done.fail_with(error),
                }
            });
        })
    }

    fn with_operation(operation: TaskOperation) -> Self {
        Self {
            id: None,
            operation,
            sync_policy: SyncPolicy::Inherit,
            on_success: None,
            on_failure: None,
            retries: 0,
            retry_delay: RetryDelay::default(),
            continue_on_failure: false,
        }
    }

    pub fn named(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn sync(self) -> Self {
        self.sync_policy(SyncPolicy::Sync)
    }

    pub fn asynchronous(self) -> Self {
        self.sync_policy(SyncPolicy::Async)
    }

    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = RetryDelay::Fixed(delay);
        self
    }

    pub fn retry_delay_fn(mut self, f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.retry_delay = RetryDelay::computed(f);
        self
    }

    pub fn retry_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.retry_delay = RetryDelay::Backoff(backoff);
        self
    }

    /// Maps the success arguments to the progress value. Returning `Err`
    /// sends the task down the failure path instead.
    pub fn on_success(mut self, f: impl Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Normalizes failure arguments into a single error value.
    pub fn on_failure(mut self, f: impl Fn(Vec<Value>) -> Value + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(f));
        self
    }

    pub fn continue_on_failure(mut self, enabled: bool) -> Self {
        self.continue_on_failure = enabled;
        self
    }

    pub fn id(&self) -> Option<&TaskId> {
        self.id.as_ref()
    }

    pub fn policy(&self) -> SyncPolicy {
        self.sync_policy
    }

    pub fn retry_budget(&self) -> u32 {
        self.retries
    }

    pub(crate) fn success_value(&self, args: Vec<Value>) -> Result<Value, Vec<Value>> {
        match &self.on_success {
            Some(transform) => transform(args.clone()).map_err(|error| {
                let mut args = args;
                args.insert(0, error);
                args
            }),
            None => Ok(collapse(args)),
        }
    }

    pub(crate) fn failure_value(&self, args: Vec<Value>) -> Value {
        match &self.on_failure {
            Some(transform) => transform(args),
            None => args.into_iter().next().unwrap_or(Value::Null),
        }
    }
}

fn collapse(mut args: Vec<Value>) -> Value {
    match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => Value::Array(args),
    }
}

/// Anything `push` accepts: one task or many.
pub trait IntoTasks {
    fn into_tasks(self) -> Vec<Task>;
}

impl IntoTasks for Task {
    fn into_tasks(self) -> Vec<Task> {
        vec![self]
    }
}

impl IntoTasks for Vec<Task> {
    fn into_tasks(self) -> Vec<Task> {
        self
    }
}

impl<const N: usize> IntoTasks for [Task; N] {
    fn into_tasks(self) -> Vec<Task> {
        self.into()
    }
}
