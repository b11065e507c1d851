use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::task::TaskId;

pub type ProgressHook = Arc<dyn Fn(&TaskId, &Value) + Send + Sync>;
pub type FailHook = Arc<dyn Fn(&Value) + Send + Sync>;
pub type CompleteHook = Arc<dyn Fn() + Send + Sync>;

/// Engine-wide settings that can be read from a plan file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Treat tasks without an explicit policy as synchronous.
    #[serde(default)]
    pub default_sync: bool,
}

/// Flow-level lifecycle hooks, fixed at construction.
#[derive(Clone, Default)]
pub struct FlowHooks {
    pub(crate) on_progress: Option<ProgressHook>,
    pub(crate) on_fail: Option<FailHook>,
    pub(crate) on_complete: Option<CompleteHook>,
}

impl FlowHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per successful task with the transformed result.
    pub fn on_progress(mut self, f: impl Fn(&TaskId, &Value) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_fail(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_fail = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }
}

/// Terminal callbacks for a single run, passed to `execute` / `restart`.
#[derive(Clone, Default)]
pub struct RunCallbacks {
    pub(crate) on_complete: Option<CompleteHook>,
    pub(crate) on_fail: Option<FailHook>,
}

impl RunCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_fail(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_fail = Some(Arc::new(f));
        self
    }
}

/// Exponential backoff between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffConfig {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay for a 0-indexed retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}
