use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};

use super::state::RunnerState;
use crate::config::{
    bundled_adapter_dir, bundled_adapter_path, install_bundled_adapter, HandlerSpec, RunnerConfig,
};
use crate::error::RunnerError;
use crate::subprocess::streaming::{
    DemuxEvent, LineDemultiplexer, NoticeSink, StreamWatchers, TracingSink,
};
use crate::subprocess::{ambient_environment, child_environment, spawn_piped};
use crate::subprocess::{ProcessCommand, ProcessError};

/// Single line written to the handler's stdin
#[derive(Serialize)]
struct InvocationPayload<'a> {
    event: &'a Value,
    context: &'a Value,
}

/// Serialize the payload as one newline-terminated JSON line
pub fn invocation_line(event: &Value, context: &Value) -> Result<String, RunnerError> {
    let mut line = serde_json::to_string(&InvocationPayload { event, context })?;
    line.push('\n');
    Ok(line)
}

/// Derive the interpreter executable from a runtime identifier.
///
/// `python3.12` runs `python3`. Windows installs only ship `python`.
/// A runtime containing a path separator is used as given.
pub fn interpreter_name(runtime: &str) -> String {
    if runtime.contains(['/', '\\']) {
        return runtime.to_string();
    }
    if cfg!(windows) && runtime.starts_with("python") {
        return "python".to_string();
    }
    runtime.split('.').next().unwrap_or(runtime).to_string()
}

struct Slot {
    state: RunnerState,
    /// Incremented per `run`, so a finishing invocation never touches a newer one
    generation: u64,
    child: Option<Child>,
    cancel: Option<oneshot::Sender<()>>,
}

impl Slot {
    fn transition(&mut self, next: RunnerState) {
        if self.state.can_transition_to(next) {
            tracing::trace!("Runner state {:?} -> {:?}", self.state, next);
            self.state = next;
        } else {
            tracing::debug!("Ignoring runner state change {:?} -> {:?}", self.state, next);
        }
    }
}

/// Invokes one handler in a child interpreter and returns its result.
///
/// Each [`run`](Self::run) spawns a fresh child, writes the event and
/// context to its stdin and waits for the result envelope on its stdout.
/// Everything else the child prints goes to the notice sink. The child is
/// killed as soon as the invocation ends, whatever the outcome.
///
/// The runner can be shared (e.g. in an `Arc`) so that [`cleanup`](Self::cleanup)
/// can be called while a `run` is pending.
pub struct HandlerRunner {
    config: RunnerConfig,
    spec: HandlerSpec,
    interpreter: String,
    demux: Arc<LineDemultiplexer>,
    ambient: Option<HashMap<String, String>>,
    slot: Mutex<Slot>,
}

impl HandlerRunner {
    pub fn new(config: RunnerConfig) -> Result<Self, RunnerError> {
        let spec = HandlerSpec::parse(&config.handler)?;
        let interpreter = interpreter_name(&config.runtime);
        tracing::debug!(
            "Runner for {}:{} using interpreter '{}'",
            spec.path.display(),
            spec.name,
            interpreter
        );

        Ok(Self {
            config,
            spec,
            interpreter,
            demux: Arc::new(LineDemultiplexer::new(Arc::new(TracingSink::new()))),
            ambient: None,
            slot: Mutex::new(Slot {
                state: RunnerState::Idle,
                generation: 0,
                child: None,
                cancel: None,
            }),
        })
    }

    /// Send incidental handler output to `sink` instead of `tracing`
    pub fn with_sink(mut self, sink: Arc<dyn NoticeSink>) -> Self {
        let identifier = self.demux.identifier().to_string();
        self.demux = Arc::new(LineDemultiplexer::new(sink).with_identifier(identifier));
        self
    }

    /// Use `env` instead of the current process environment as the base
    /// for the child environment
    pub fn with_ambient_env(mut self, env: HashMap<String, String>) -> Self {
        self.ambient = Some(env);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn handler(&self) -> &HandlerSpec {
        &self.spec
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    pub fn state(&self) -> RunnerState {
        self.slot().state
    }

    /// The adapter script a `run` hands to the interpreter
    pub fn adapter(&self) -> PathBuf {
        self.config.adapter.clone().unwrap_or_else(bundled_adapter_path)
    }

    /// The command a `run` would spawn from `cwd`
    pub fn command(&self, cwd: &Path) -> ProcessCommand {
        let ambient = self.ambient.clone().unwrap_or_else(ambient_environment);

        ProcessCommand {
            program: self.interpreter.clone(),
            args: vec![
                self.config.unbuffered_flag.clone(),
                self.adapter().to_string_lossy().into_owned(),
                self.spec.path_from(cwd).to_string_lossy().into_owned(),
                self.spec.name.clone(),
            ],
            env: child_environment(&ambient, &self.config.environment),
            working_dir: Some(cwd.to_path_buf()),
        }
    }

    /// Invoke the handler with `event` and `context`.
    ///
    /// Resolves with the value of the first result envelope. Fails if
    /// forwarding output fails, the configured timeout elapses, or
    /// [`cleanup`](Self::cleanup) is called first. Without a timeout, a
    /// handler that never emits a result keeps this pending until cleanup.
    /// Dropping the future kills the child and leaves the runner `Failed`.
    pub async fn run(&self, event: Value, context: Value) -> Result<Value, RunnerError> {
        let input = invocation_line(&event, &context)?;
        let (generation, cancelled) = self.begin()?;
        let mut guard = InvocationGuard {
            runner: self,
            generation,
            armed: true,
        };

        let result = self.invoke(generation, input, cancelled).await;
        guard.armed = false;
        self.finish(generation, result.is_ok()).await;
        result
    }

    /// Kill the current child, if any, and cancel a pending `run`.
    ///
    /// Safe to call at any time and any number of times.
    pub fn cleanup(&self) {
        let mut slot = self.slot();
        if let Some(cancel) = slot.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(mut child) = slot.child.take() {
            // Dropping the handle afterwards leaves reaping to tokio.
            if let Err(e) = child.start_kill() {
                tracing::debug!("Handler process already gone: {}", e);
            }
        }
        slot.transition(RunnerState::Killed);
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn working_dir(&self) -> Result<PathBuf, RunnerError> {
        match &self.config.working_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    fn begin(&self) -> Result<(u64, oneshot::Receiver<()>), RunnerError> {
        let mut slot = self.slot();
        if slot.state.is_in_flight() {
            return Err(RunnerError::InvocationInFlight);
        }
        let (tx, rx) = oneshot::channel();
        slot.generation += 1;
        slot.cancel = Some(tx);
        slot.transition(RunnerState::Spawned);
        Ok((slot.generation, rx))
    }

    async fn invoke(
        &self,
        generation: u64,
        input: String,
        cancelled: oneshot::Receiver<()>,
    ) -> Result<Value, RunnerError> {
        let cwd = self.working_dir()?;
        if self.config.adapter.is_none() {
            install_bundled_adapter(&bundled_adapter_dir()).await?;
        }
        let mut child = spawn_piped(&self.command(&cwd))?;

        let stdin = child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ProcessError::MissingPipe("stderr"))?;

        let (events_tx, events_rx) = mpsc::channel(2);
        let watchers = StreamWatchers::attach(stdout, stderr, Arc::clone(&self.demux), events_tx);

        {
            let mut slot = self.slot();
            if slot.generation == generation {
                slot.child = Some(child);
                slot.transition(RunnerState::AwaitingResult);
            } else {
                drop(child);
            }
        }

        // Scheduled only after both watchers exist, so no output can go unobserved.
        tokio::spawn(write_payload(stdin, input));

        let outcome = self.await_outcome(events_rx, cancelled).await;
        watchers.detach();
        outcome
    }

    async fn await_outcome(
        &self,
        mut events: mpsc::Receiver<DemuxEvent>,
        cancelled: oneshot::Receiver<()>,
    ) -> Result<Value, RunnerError> {
        let next_event = async {
            match events.recv().await {
                Some(event) => event,
                None => {
                    tracing::warn!(
                        "Handler {} closed its output without returning a result",
                        self.spec.name
                    );
                    std::future::pending::<DemuxEvent>().await
                }
            }
        };

        let wait = async {
            tokio::select! {
                event = next_event => match event {
                    DemuxEvent::Resolved(value) => Ok(value),
                    DemuxEvent::Failed(e) => Err(RunnerError::Classification(e)),
                },
                _ = cancelled => Err(RunnerError::Cancelled),
            }
        };

        match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or_else(|_| {
                tracing::warn!("Handler {} timed out after {:?}", self.spec.name, limit);
                Err(RunnerError::Timeout(limit))
            }),
            None => wait.await,
        }
    }

    /// Kill the child of an invocation whose `run` was dropped and mark it failed
    fn abandon(&self, generation: u64) {
        let child = {
            let mut slot = self.slot();
            if slot.generation != generation {
                return;
            }
            slot.cancel = None;
            slot.transition(RunnerState::Failed);
            slot.child.take()
        };
        tracing::debug!("Invocation of {} dropped before completion", self.spec.name);

        let Some(mut child) = child else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = child.kill().await {
                        tracing::debug!("Handler process already gone: {}", e);
                    }
                });
            }
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!("Handler process already gone: {}", e);
                }
            }
        }
    }

    async fn finish(&self, generation: u64, succeeded: bool) {
        let child = {
            let mut slot = self.slot();
            if slot.generation != generation {
                return;
            }
            slot.cancel = None;
            slot.transition(if succeeded {
                RunnerState::Resolved
            } else {
                RunnerState::Failed
            });
            slot.child.take()
        };

        if let Some(mut child) = child {
            match child.kill().await {
                Ok(()) => tracing::debug!("Handler process killed"),
                Err(e) => tracing::debug!("Handler process already gone: {}", e),
            }
        }
    }
}

/// Releases the runner when a `run` future is dropped before it finishes,
/// e.g. by an outer `tokio::time::timeout` or `select!`
struct InvocationGuard<'a> {
    runner: &'a HandlerRunner,
    generation: u64,
    armed: bool,
}

impl Drop for InvocationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.runner.abandon(self.generation);
        }
    }
}

async fn write_payload(mut stdin: ChildStdin, input: String) {
    if let Err(e) = stdin.write_all(input.as_bytes()).await {
        tracing::warn!("Failed to write invocation payload to handler stdin: {}", e);
        return;
    }
    if let Err(e) = stdin.flush().await {
        tracing::warn!("Failed to flush handler stdin: {}", e);
    }
    tracing::trace!("Invocation payload written ({} bytes)", input.len());
}
