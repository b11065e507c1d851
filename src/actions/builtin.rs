use async_trait::async_trait;
use serde_json::{Value, json};
use crate::actions::ActionHandler;
use anyhow::{Result, anyhow, bail};
use dashmap::DashMap;
use std::time::Duration;
use tracing::info;

#[derive(Debug)]
pub struct LogAction;

#[async_trait]
impl ActionHandler for LogAction {
    fn name(&self) -> &str {
        "log"
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        if let Some(msg) = params.get("msg").and_then(|v| v.as_str()) {
            info!("[LOG] {}", msg);
            Ok(Value::String(msg.to_string()))
        } else {
            info!("[LOG] {:?}", params);
            Ok(params)
        }
    }
}

/// Returns its `value` param unchanged.
#[derive(Debug)]
pub struct EchoAction;

#[async_trait]
impl ActionHandler for EchoAction {
    fn name(&self) -> &str {
        "echo"
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        Ok(params.get("value").cloned().unwrap_or(Value::Null))
    }
}

#[derive(Debug)]
pub struct SleepAction;

#[async_trait]
impl ActionHandler for SleepAction {
    fn name(&self) -> &str {
        "sleep"
    }

    fn validate(&self, params: &Value) -> Result<()> {
        params
            .get("ms")
            .and_then(|v| v.as_u64())
            .map(|_| ())
            .ok_or_else(|| anyhow!("sleep requires an integer `ms` param"))
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let ms = params.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    }
}

/// Fails the first `times` calls (every call when `times` is absent), then
/// returns `value`. Calls are counted per `key`, or per params when no key
/// is given, so one handler can serve many tasks.
#[derive(Debug, Default)]
pub struct FailAction {
    attempts: DashMap<String, u64>,
}

impl FailAction {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionHandler for FailAction {
    fn name(&self) -> &str {
        "fail"
    }

    fn validate(&self, params: &Value) -> Result<()> {
        match params.get("times") {
            None | Some(Value::Null) => Ok(()),
            Some(v) if v.is_u64() => Ok(()),
            Some(v) => Err(anyhow!("fail `times` must be a non-negative integer, got {}", v)),
        }
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let key = params
            .get("key")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| params.to_string());

        let attempt = {
            let mut count = self.attempts.entry(key).or_insert(0);
            *count += 1;
            *count
        };

        let message = params.get("message").and_then(|v| v.as_str()).unwrap_or("action failed");
        match params.get("times").and_then(|v| v.as_u64()) {
            Some(times) if attempt > times => Ok(params.get("value").cloned().unwrap_or(Value::Null)),
            _ => bail!("{} (attempt {})", message, attempt),
        }
    }
}
