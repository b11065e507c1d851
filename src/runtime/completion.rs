use std::sync::Weak;

use serde_json::Value;

use crate::runtime::engine::{Flow, FlowInner};

/// Handle an operation uses to report its outcome back to the engine.
///
/// Carries the batch token it was issued under; if the flow was stopped or
/// restarted since, resolving it does nothing. Resolving consumes the handle.
pub struct Completion {
    flow: Weak<FlowInner>,
    index: usize,
    retries_left: u32,
    batch: u64,
}

impl Completion {
    pub(crate) fn new(flow: Weak<FlowInner>, index: usize, retries_left: u32, batch: u64) -> Self {
        Self {
            flow,
            index,
            retries_left,
            batch,
        }
    }

    pub fn succeed(self, args: Vec<Value>) {
        if let Some(flow) = self.flow.upgrade().map(Flow::from_inner) {
            flow.resolve_success(self.index, self.retries_left, self.batch, args);
        }
    }

    pub fn fail(self, args: Vec<Value>) {
        if let Some(flow) = self.flow.upgrade().map(Flow::from_inner) {
            flow.resolve_failure(self.index, self.retries_left, self.batch, args);
        }
    }

    pub fn succeed_with(self, value: impl Into<Value>) {
        self.succeed(vec![value.into()])
    }

    pub fn fail_with(self, error: impl Into<Value>) {
        self.fail(vec![error.into()])
    }

    pub fn batch(&self) -> u64 {
        self.batch
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    // Sub-flows need one handle per terminal callback.
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            flow: self.flow.clone(),
            index: self.index,
            retries_left: self.retries_left,
            batch: self.batch,
        }
    }
}
