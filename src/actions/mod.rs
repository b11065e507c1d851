use async_trait::async_trait;
use serde_json::Value;
use anyhow::Result;
use std::fmt::Debug;
use std::sync::Arc;

use crate::runtime::task::Task;

pub mod builtin;

/// A named, reusable operation that plan files refer to by name.
#[async_trait]
pub trait ActionHandler: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, params: Value) -> Result<Value>;
}

impl Task {
    /// Runs `handler` with `params` on every attempt. `Ok` resolves the task
    /// with the returned value, `Err` fails it with the error message.
    pub fn from_action(handler: Arc<dyn ActionHandler>, params: Value) -> Task {
        Task::new(move |done| {
            let handler = handler.clone();
            let params = params.clone();
            tokio::spawn(async move {
                match handler.execute(params).await {
                    Ok(value) => done.succeed_with(value),
                    Err(e) => done.fail_with(e.to_string()),
                }
            });
        })
    }
}
