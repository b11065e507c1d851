mod common;

use common::{Outcome, outcome_channel, wait_outcome};
use flowsync::actions::ActionHandler;
use flowsync::actions::builtin::{EchoAction, FailAction};
use flowsync::compiler::core::Compiler;
use flowsync::compiler::loader::parse_plan;
use flowsync::{FlowError, FlowHooks, RunState, TaskId};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

fn recording_hooks() -> (FlowHooks, Arc<Mutex<Vec<(String, Value)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let hooks = FlowHooks::new().on_progress(move |id, result| {
        sink.lock().unwrap().push((id.to_string(), result.clone()));
    });
    (hooks, seen)
}

#[tokio::test]
async fn test_compile_and_run_builtin_plan() {
    let plan = parse_plan(
        r#"
id: "demo"
tasks:
  - id: "hello"
    action: "log"
    params: { msg: "hi" }
  - id: "wait"
    action: "sleep"
    params: { ms: 10 }
  - id: "answer"
    action: "echo"
    sync: true
    params: { value: 42 }
"#,
    )
    .expect("plan parses");

    let (hooks, seen) = recording_hooks();
    let flow = Compiler::with_builtins()
        .compile_with_hooks(&plan, hooks)
        .expect("plan compiles");
    assert_eq!(flow.len(), 3);

    let (callbacks, mut rx) = outcome_channel();
    flow.execute(callbacks);
    assert_eq!(wait_outcome(&mut rx).await, Outcome::Complete);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    // The sync task joins last.
    assert_eq!(seen.last(), Some(&("answer".to_string(), json!(42))));
    assert!(seen.contains(&("hello".to_string(), json!("hi"))));
    assert!(seen.contains(&("wait".to_string(), json!({ "slept_ms": 10 }))));
}

#[tokio::test]
async fn test_fail_action_recovers_with_retries() {
    let plan = parse_plan(
        r#"
id: "flaky"
tasks:
  - id: "unstable"
    action: "fail"
    params: { times: 2, value: "recovered" }
    retries: 2
    retry_delay_ms: 5
"#,
    )
    .expect("plan parses");

    let (hooks, seen) = recording_hooks();
    let flow = Compiler::with_builtins()
        .compile_with_hooks(&plan, hooks)
        .expect("plan compiles");

    let (callbacks, mut rx) = outcome_channel();
    flow.execute(callbacks);
    assert_eq!(wait_outcome(&mut rx).await, Outcome::Complete);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("unstable".to_string(), json!("recovered"))]
    );
}

#[tokio::test]
async fn test_fail_action_without_retries_fails_flow() {
    let plan = parse_plan(
        r#"
id: "broken"
tasks:
  - action: "fail"
    params: { message: "disk full" }
"#,
    )
    .expect("plan parses");

    let flow = Compiler::with_builtins().compile(&plan).expect("plan compiles");
    let (callbacks, mut rx) = outcome_channel();
    flow.execute(callbacks);
    assert_eq!(
        wait_outcome(&mut rx).await,
        Outcome::Failed(json!("disk full (attempt 1)"))
    );
}

#[tokio::test]
async fn test_nested_plan_runs_as_sub_flow() {
    let plan = parse_plan(
        r#"
id: "outer"
tasks:
  - id: "inner"
    flow:
      id: "inner-flow"
      tasks:
        - action: "sleep"
          params: { ms: 5 }
        - action: "echo"
          params: { value: "nested" }
  - id: "last"
    action: "echo"
    sync: true
    params: { value: "after" }
"#,
    )
    .expect("plan parses");

    let flow = Compiler::with_builtins().compile(&plan).expect("plan compiles");
    let (callbacks, mut rx) = outcome_channel();
    flow.execute(callbacks);
    assert_eq!(wait_outcome(&mut rx).await, Outcome::Complete);
    assert_eq!(flow.state_of(&TaskId::from("inner")), Some(RunState::Succeeded));
    assert_eq!(flow.state_of(&TaskId::from("last")), Some(RunState::Succeeded));
}

#[test]
fn test_unknown_action_is_rejected() {
    let plan = parse_plan("id: x\ntasks:\n  - action: teleport\n").expect("plan parses");
    let err = Compiler::with_builtins().compile(&plan).expect_err("unknown action");
    assert_eq!(
        err.downcast_ref::<FlowError>(),
        Some(&FlowError::UnknownAction("teleport".to_string()))
    );
}

#[test]
fn test_task_needs_exactly_one_operation() {
    let both = parse_plan(
        "id: x\ntasks:\n  - action: log\n    flow:\n      id: y\n      tasks: []\n",
    )
    .expect("plan parses");
    let err = Compiler::with_builtins().compile(&both).expect_err("both set");
    assert!(matches!(err.downcast_ref::<FlowError>(), Some(FlowError::InvalidPlan { .. })));

    let neither = parse_plan("id: x\ntasks:\n  - id: empty\n").expect("plan parses");
    let err = Compiler::with_builtins().compile(&neither).expect_err("neither set");
    assert!(matches!(err.downcast_ref::<FlowError>(), Some(FlowError::InvalidPlan { .. })));
}

#[test]
fn test_invalid_params_are_rejected() {
    let plan = parse_plan("id: x\ntasks:\n  - action: sleep\n    params: { ms: soon }\n")
        .expect("plan parses");
    let err = Compiler::with_builtins().compile(&plan).expect_err("bad params");
    assert!(err.to_string().contains("Invalid params"));
}

#[test]
fn test_duplicate_task_ids_are_rejected() {
    let plan = parse_plan(
        "id: x\ntasks:\n  - id: a\n    action: log\n  - id: a\n    action: echo\n",
    )
    .expect("plan parses");
    let err = Compiler::with_builtins().compile(&plan).expect_err("duplicate id");
    assert_eq!(
        err.downcast_ref::<FlowError>(),
        Some(&FlowError::DuplicateTask(TaskId::from("a")))
    );
}

#[tokio::test]
async fn test_custom_handlers_can_be_registered() {
    let mut compiler = Compiler::new();
    compiler.register(Arc::new(EchoAction));
    let plan = parse_plan("id: x\ntasks:\n  - action: log\n").expect("plan parses");
    assert!(compiler.compile(&plan).is_err(), "log is not registered");

    let fail = FailAction::new();
    assert_eq!(fail.name(), "fail");
    assert!(fail.validate(&json!({ "times": "twice" })).is_err());
    assert!(fail.execute(json!({ "key": "k", "times": 1 })).await.is_err());
    assert_eq!(
        fail.execute(json!({ "key": "k", "times": 1, "value": 7 })).await.unwrap(),
        json!(7)
    );
}
