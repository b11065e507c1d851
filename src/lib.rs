//! Cooperative task flows for callback-style async code.
//!
//! A [`Flow`] walks an ordered list of [`Task`]s. Async tasks overlap, sync
//! tasks wait for every outstanding task to join before they start, failed
//! tasks retry with a configurable delay, and the run ends with exactly one
//! of `on_complete` / `on_fail`.

pub mod actions;
pub mod compiler;
pub mod dsl;
pub mod error;
pub mod runtime;

pub use error::FlowError;
pub use runtime::completion::Completion;
pub use runtime::config::{BackoffConfig, FlowConfig, FlowHooks, RunCallbacks};
pub use runtime::engine::{Flow, FlowBuilder};
pub use runtime::task::{IntoTasks, RetryDelay, RunState, SyncPolicy, Task, TaskId, TaskOperation};
