//! End-to-end tests for `HandlerRunner` using `sh` as the interpreter and
//! small shell scripts from `tests/fixtures` as adapters.
#![cfg(unix)]

use anyhow::Result;
use async_trait::async_trait;
use handler_runner::subprocess::ProcessError;
use handler_runner::{
    HandlerRunner, NoticeSink, RecordingSink, RunnerConfig, RunnerError, RunnerState,
    StreamSource,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn config_for(adapter: &str) -> RunnerConfig {
    RunnerConfig::new("sh", "handlers/users.create")
        .with_adapter(fixture(adapter))
        .with_working_dir(env!("CARGO_MANIFEST_DIR"))
}

fn runner_for(config: RunnerConfig) -> (HandlerRunner, RecordingSink) {
    let sink = RecordingSink::new();
    let runner = HandlerRunner::new(config)
        .unwrap()
        .with_sink(Arc::new(sink.clone()));
    (runner, sink)
}

async fn wait_for_state(runner: &HandlerRunner, state: RunnerState) {
    for _ in 0..500 {
        if runner.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("runner never reached {state:?}, stuck at {:?}", runner.state());
}

#[tokio::test]
async fn test_result_round_trips_through_payload_identifier() {
    let (runner, sink) = runner_for(config_for("echo_adapter.sh"));
    let event = json!({"httpMethod": "POST", "body": "{\"name\": \"ada\"}", "n": [1, 2.5, null]});
    let context = json!({"functionName": "create", "awsRequestId": "abc-123"});

    let result = runner.run(event.clone(), context.clone()).await.unwrap();

    assert_eq!(result, json!({"event": event, "context": context}));
    assert_eq!(runner.state(), RunnerState::Resolved);
    assert_eq!(
        sink.lines_from(StreamSource::Stdout),
        vec!["loading handlers/users.create"]
    );
    assert_eq!(
        sink.lines_from(StreamSource::Stderr).concat(),
        "diagnostic from create\n"
    );
}

#[tokio::test]
async fn test_noise_is_forwarded_in_order_and_first_result_wins() {
    let (runner, sink) = runner_for(config_for("chatty_adapter.sh"));

    let result = runner.run(json!({}), json!({})).await.unwrap();

    assert_eq!(result, json!({"status": "first"}));
    assert_eq!(
        sink.lines_from(StreamSource::Stdout),
        vec![
            "first line",
            "print(\"hello",
            "{\"level\": \"INFO\", \"message\": \"structured\"}",
            "before",
        ]
    );
}

#[tokio::test]
async fn test_text_and_result_in_one_stdout_line() {
    let (runner, sink) = runner_for(config_for("carriage_adapter.sh"));

    let result = runner.run(json!({}), json!({})).await.unwrap();

    assert_eq!(result, json!(1));
    assert_eq!(sink.lines_from(StreamSource::Stdout), vec!["before"]);
}

#[tokio::test]
async fn test_null_result_still_resolves() {
    let (runner, _sink) = runner_for(config_for("null_adapter.sh"));
    let result = runner.run(json!({}), json!({})).await.unwrap();
    assert!(result.is_null());
}

#[tokio::test]
async fn test_cleanup_after_resolve_is_idempotent() {
    let (runner, _sink) = runner_for(config_for("null_adapter.sh"));
    runner.run(json!({}), json!({})).await.unwrap();

    runner.cleanup();
    runner.cleanup();
    assert_eq!(runner.state(), RunnerState::Killed);
}

#[tokio::test]
async fn test_child_is_killed_once_result_arrives() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("handler.pid");
    let config = config_for("linger_adapter.sh").with_env("PID_FILE", pid_file.to_string_lossy());
    let (runner, _sink) = runner_for(config);

    let started = std::time::Instant::now();
    let result = runner.run(json!({}), json!({})).await.unwrap();
    assert_eq!(result, json!("done"));
    assert!(started.elapsed() < Duration::from_secs(10));

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let alive = std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .status()
        .unwrap()
        .success();
    assert!(!alive, "handler process {} is still running", pid.trim());
}

#[tokio::test]
async fn test_timeout_without_result() {
    let config = config_for("silent_adapter.sh").with_timeout(Duration::from_millis(500));
    let (runner, sink) = runner_for(config);

    let err = runner.run(json!({}), json!({})).await.unwrap_err();

    assert!(matches!(err, RunnerError::Timeout(d) if d == Duration::from_millis(500)));
    assert_eq!(runner.state(), RunnerState::Failed);
    assert_eq!(sink.lines_from(StreamSource::Stdout), vec!["no result here"]);
}

#[tokio::test]
async fn test_without_timeout_run_stays_pending() {
    let (runner, _sink) = runner_for(config_for("silent_adapter.sh"));

    let pending = tokio::time::timeout(Duration::from_millis(500), runner.run(json!({}), json!({}))).await;
    assert!(pending.is_err(), "run should not complete without a result");
    assert_eq!(runner.state(), RunnerState::Failed);

    runner.cleanup();
    assert_eq!(runner.state(), RunnerState::Killed);
}

async fn process_exits(pid: &str) -> bool {
    for _ in 0..500 {
        let alive = std::process::Command::new("kill")
            .args(["-0", pid])
            .status()
            .unwrap()
            .success();
        if !alive {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_dropped_run_kills_child_and_frees_runner() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("handler.pid");
    let config = config_for("stall_adapter.sh").with_env("PID_FILE", pid_file.to_string_lossy());
    let (runner, _sink) = runner_for(config);

    let dropped = tokio::time::timeout(Duration::from_millis(500), runner.run(json!({}), json!({}))).await;
    assert!(dropped.is_err(), "run should still be pending when dropped");
    assert_eq!(runner.state(), RunnerState::Failed);

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    assert!(
        process_exits(pid.trim()).await,
        "handler process {} is still running",
        pid.trim()
    );

    let second = tokio::time::timeout(Duration::from_millis(300), runner.run(json!({}), json!({}))).await;
    assert!(
        !matches!(second, Ok(Err(RunnerError::InvocationInFlight))),
        "runner still considered busy after the dropped run"
    );
    assert!(second.is_err());
    assert_eq!(runner.state(), RunnerState::Failed);
}

#[tokio::test]
async fn test_cleanup_cancels_pending_run() {
    let (runner, sink) = runner_for(config_for("hang_adapter.sh"));
    let runner = Arc::new(runner);

    let task = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.run(json!({}), json!({})).await })
    };
    wait_for_state(&runner, RunnerState::AwaitingResult).await;

    runner.cleanup();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("run did not finish after cleanup")
        .unwrap();

    assert!(matches!(result, Err(RunnerError::Cancelled)));
    assert_eq!(runner.state(), RunnerState::Killed);
    assert!(sink.lines_from(StreamSource::Stdout).len() <= 1);
}

#[tokio::test]
async fn test_overlapping_run_is_rejected() {
    let (runner, _sink) = runner_for(config_for("hang_adapter.sh"));
    let runner = Arc::new(runner);

    let task = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.run(json!({}), json!({})).await })
    };
    wait_for_state(&runner, RunnerState::AwaitingResult).await;

    let second = runner.run(json!({}), json!({})).await;
    assert!(matches!(second, Err(RunnerError::InvocationInFlight)));

    runner.cleanup();
    let first = task.await.unwrap();
    assert!(matches!(first, Err(RunnerError::Cancelled)));
}

#[tokio::test]
async fn test_runner_can_be_reused_sequentially() {
    let (runner, _sink) = runner_for(config_for("echo_adapter.sh"));

    let first = runner.run(json!({"n": 1}), json!({})).await.unwrap();
    let second = runner.run(json!({"n": 2}), json!({})).await.unwrap();

    assert_eq!(first["event"]["n"], 1);
    assert_eq!(second["event"]["n"], 2);
}

#[tokio::test]
async fn test_environment_arguments_and_working_dir() {
    let config = config_for("env_adapter.sh").with_env("STAGE", "test");
    let (runner, _sink) = runner_for(config);

    let result = runner.run(json!({}), json!({})).await.unwrap();

    assert_eq!(result["stage"], "test");
    assert_eq!(result["path"], "handlers/users");
    assert_eq!(result["name"], "create");
    let cwd = PathBuf::from(result["cwd"].as_str().unwrap());
    assert_eq!(
        cwd.canonicalize().unwrap(),
        Path::new(env!("CARGO_MANIFEST_DIR")).canonicalize().unwrap()
    );
}

#[tokio::test]
async fn test_interpreter_resolved_from_virtual_env() {
    use std::os::unix::fs::PermissionsExt;

    let venv = tempfile::tempdir().unwrap();
    let bin = venv.path().join("bin");
    std::fs::create_dir(&bin).unwrap();
    let interpreter = bin.join("fakepy3");
    std::fs::write(&interpreter, "#!/bin/sh\nexec /bin/sh \"$@\"\n").unwrap();
    std::fs::set_permissions(&interpreter, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut ambient: HashMap<String, String> = std::env::vars().collect();
    ambient.insert("VIRTUAL_ENV".to_string(), venv.path().to_string_lossy().into_owned());

    let mut config = config_for("null_adapter.sh");
    config.runtime = "fakepy3.11".to_string();
    let (runner, _sink) = runner_for(config);
    let runner = runner.with_ambient_env(ambient);
    assert_eq!(runner.interpreter(), "fakepy3");

    let result = runner.run(json!({}), json!({})).await.unwrap();
    assert!(result.is_null());
}

#[tokio::test]
async fn test_missing_interpreter_fails_run() {
    let mut config = config_for("echo_adapter.sh");
    config.runtime = "no-such-interpreter-12345".to_string();
    let (runner, _sink) = runner_for(config);

    let err = runner.run(json!({}), json!({})).await.unwrap_err();

    assert!(matches!(
        err,
        RunnerError::Process(ProcessError::CommandNotFound { .. })
    ));
    assert_eq!(runner.state(), RunnerState::Failed);
}

struct FailingSink;

#[async_trait]
impl NoticeSink for FailingSink {
    async fn notice(&self, _text: &str, _source: StreamSource) -> Result<()> {
        anyhow::bail!("log sink unavailable")
    }
}

#[tokio::test]
async fn test_sink_failure_rejects_invocation() {
    let runner = HandlerRunner::new(config_for("chatty_adapter.sh"))
        .unwrap()
        .with_sink(Arc::new(FailingSink));

    let err = runner.run(json!({}), json!({})).await.unwrap_err();

    assert!(matches!(err, RunnerError::Classification(_)));
    assert!(err.to_string().contains("log sink unavailable"));
    assert_eq!(runner.state(), RunnerState::Failed);
}
