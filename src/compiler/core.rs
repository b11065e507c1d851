use crate::actions::ActionHandler;
use crate::actions::builtin::{EchoAction, FailAction, LogAction, SleepAction};
use crate::dsl::{FlowPlan, TaskPlan};
use crate::error::FlowError;
use crate::runtime::config::{BackoffConfig, FlowConfig, FlowHooks};
use crate::runtime::engine::Flow;
use crate::runtime::task::Task;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Result, Context};
use tracing::debug;

/// Turns a `FlowPlan` into a runnable `Flow`, resolving actions by name.
pub struct Compiler {
    registry: HashMap<String, Arc<dyn ActionHandler>>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            registry: HashMap::new(),
        }
    }

    /// A compiler with `log`, `echo`, `sleep` and `fail` registered.
    pub fn with_builtins() -> Self {
        let mut compiler = Self::new();
        compiler.register(Arc::new(LogAction));
        compiler.register(Arc::new(EchoAction));
        compiler.register(Arc::new(SleepAction));
        compiler.register(Arc::new(FailAction::new()));
        compiler
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.registry.insert(handler.name().to_string(), handler);
    }

    pub fn compile(&self, plan: &FlowPlan) -> Result<Flow> {
        self.compile_with_hooks(plan, FlowHooks::default())
    }

    /// Hooks apply to the top-level flow only; nested flows report through
    /// their parent task.
    pub fn compile_with_hooks(&self, plan: &FlowPlan, hooks: FlowHooks) -> Result<Flow> {
        let mut tasks = Vec::with_capacity(plan.tasks.len());
        for (position, task_plan) in plan.tasks.iter().enumerate() {
            tasks.push(self.compile_task(plan, position, task_plan)?);
        }

        let flow = Flow::builder()
            .config(FlowConfig { default_sync: plan.default_sync })
            .hooks(hooks)
            .tasks(tasks)
            .build()
            .with_context(|| format!("Failed to build flow '{}'", plan.id))?;

        debug!(plan = %plan.id, flow = %flow.id(), tasks = flow.len(), "Plan compiled");
        Ok(flow)
    }

    fn compile_task(&self, plan: &FlowPlan, position: usize, task_plan: &TaskPlan) -> Result<Task> {
        let label = task_plan.id.clone().unwrap_or_else(|| format!("#{}", position));
        let invalid = |reason: String| FlowError::InvalidPlan { reason };

        let task = match (&task_plan.action, &task_plan.flow) {
            (Some(name), None) => {
                let handler = self
                    .registry
                    .get(name)
                    .ok_or_else(|| FlowError::UnknownAction(name.clone()))?;
                handler
                    .validate(&task_plan.params)
                    .with_context(|| format!("Invalid params for task '{}' in '{}'", label, plan.id))?;
                Task::from_action(handler.clone(), task_plan.params.clone())
            }
            (None, Some(nested)) => {
                let sub = self
                    .compile(nested)
                    .with_context(|| format!("Failed to compile nested flow of task '{}'", label))?;
                Task::sub_flow(sub)
            }
            (Some(_), Some(_)) => {
                return Err(invalid(format!("task '{}' sets both `action` and `flow`", label)).into());
            }
            (None, None) => {
                return Err(invalid(format!("task '{}' needs an `action` or a `flow`", label)).into());
            }
        };

        let mut task = task
            .sync_policy(task_plan.sync.into())
            .retries(task_plan.retries)
            .continue_on_failure(task_plan.continue_on_failure);

        if let Some(id) = &task_plan.id {
            task = task.named(id.as_str());
        }

        match (&task_plan.backoff, task_plan.retry_delay_ms) {
            (Some(_), Some(_)) => {
                return Err(invalid(format!("task '{}' sets both `backoff` and `retry_delay_ms`", label)).into());
            }
            (Some(backoff), None) => {
                let mut config = BackoffConfig::default()
                    .with_initial_delay(Duration::from_millis(backoff.initial_ms))
                    .with_multiplier(backoff.multiplier);
                if let Some(max_ms) = backoff.max_ms {
                    config = config.with_max_delay(Duration::from_millis(max_ms));
                }
                task = task.retry_backoff(config);
            }
            (None, Some(ms)) => task = task.retry_delay(Duration::from_millis(ms)),
            (None, None) => {}
        }

        Ok(task)
    }
}
