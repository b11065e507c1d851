use serde::{Serialize, Deserialize};
use serde_json::Value;

/// A flow as written in a plan file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowPlan {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub default_sync: bool,
    #[serde(default)]
    pub tasks: Vec<TaskPlan>,
}

/// One task entry. Exactly one of `action` and `flow` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TaskPlan {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub params: Value,
    /// Nested flow run as a single task
    #[serde(default)]
    pub flow: Option<Box<FlowPlan>>,
    /// `true` forces sync, `false` forces async, absent inherits
    #[serde(default)]
    pub sync: Option<bool>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub backoff: Option<BackoffPlan>,
    #[serde(default)]
    pub continue_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffPlan {
    pub initial_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub max_ms: Option<u64>,
}

fn default_multiplier() -> f64 {
    2.0
}
