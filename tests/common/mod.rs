#![allow(dead_code)]

use flowsync::{Completion, RunCallbacks, Task};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Complete,
    Failed(Value),
}

/// Run callbacks that forward the terminal outcome into a channel.
pub fn outcome_channel() -> (RunCallbacks, mpsc::UnboundedReceiver<Outcome>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let fail_tx = tx.clone();
    let callbacks = RunCallbacks::new()
        .on_complete(move || {
            let _ = tx.send(Outcome::Complete);
        })
        .on_fail(move |error| {
            let _ = fail_tx.send(Outcome::Failed(error.clone()));
        });
    (callbacks, rx)
}

pub async fn wait_outcome(rx: &mut mpsc::UnboundedReceiver<Outcome>) -> Outcome {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("flow did not settle in time")
        .expect("outcome channel closed")
}

/// Shared event log written by test tasks.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }
}

/// Logs `start:<name>`, then succeeds with `<name>` after `delay`
/// (immediately and inline when `delay` is zero), logging `end:<name>`.
pub fn timed_task(journal: &Journal, name: &str, delay: Duration) -> Task {
    let journal = journal.clone();
    let tag = name.to_string();
    Task::new(move |done: Completion| {
        journal.push(format!("start:{}", tag));
        if delay.is_zero() {
            journal.push(format!("end:{}", tag));
            done.succeed_with(json!(tag));
            return;
        }
        let journal = journal.clone();
        let tag = tag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            journal.push(format!("end:{}", tag));
            done.succeed_with(json!(tag));
        });
    })
    .named(name)
}

/// Logs `start:<name>` and parks its completion handle in `slot` without
/// ever resolving it.
pub fn held_task(journal: &Journal, name: &str, slot: Arc<Mutex<Option<Completion>>>) -> Task {
    let journal = journal.clone();
    let tag = name.to_string();
    Task::new(move |done| {
        journal.push(format!("start:{}", tag));
        *slot.lock().unwrap() = Some(done);
    })
    .named(name)
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}
