use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use super::error::ProcessError;

/// Variable exported by an activated Python virtual environment.
pub const VIRTUAL_ENV_VAR: &str = "VIRTUAL_ENV";

/// Directory holding the interpreter inside a virtual environment.
#[cfg(windows)]
pub const VENV_BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
pub const VENV_BIN_DIR: &str = "bin";

#[cfg(windows)]
const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_SEPARATOR: char = ':';

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Complete child environment. The parent environment is not inherited.
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessCommand {
    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Snapshot the current process environment.
///
/// Entries that are not valid UTF-8 are skipped.
pub fn ambient_environment() -> HashMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// Build the environment for a handler process.
///
/// Starts from `ambient`. When `VIRTUAL_ENV` is set there, the venv's
/// executable directory is put in front of `PATH` so its interpreter wins.
/// `overrides` are applied last and take precedence over both.
pub fn child_environment(
    ambient: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env = ambient.clone();

    if let Some(venv) = ambient.get(VIRTUAL_ENV_VAR) {
        let bin_dir = Path::new(venv).join(VENV_BIN_DIR);
        let path = match ambient.get("PATH") {
            Some(existing) => format!("{}{}{}", bin_dir.display(), PATH_SEPARATOR, existing),
            None => bin_dir.display().to_string(),
        };
        tracing::debug!("Virtual environment detected, PATH prefixed with {:?}", bin_dir);
        env.insert("PATH".to_string(), path);
    }

    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Resolve `program` against the `PATH` of the child environment.
pub fn resolve_program(
    program: &str,
    env: &HashMap<String, String>,
    cwd: &Path,
) -> Result<PathBuf, ProcessError> {
    which::which_in(program, env.get("PATH"), cwd).map_err(|source| {
        ProcessError::CommandNotFound {
            program: program.to_string(),
            source,
        }
    })
}

/// Spawn `command` with all three stdio streams piped.
///
/// The child is killed if its handle is dropped, so a handle that goes out
/// of scope never leaves a stray process behind.
pub fn spawn_piped(command: &ProcessCommand) -> Result<Child, ProcessError> {
    log_command_start(command);

    let cwd = match &command.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let program = resolve_program(&command.program, &command.env, &cwd)?;
    tracing::trace!("Resolved '{}' to {:?}", command.program, program);

    let mut cmd = Command::new(&program);
    cmd.args(&command.args)
        .env_clear()
        .envs(&command.env)
        .current_dir(&cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.spawn().map_err(|source| ProcessError::Spawn {
        command: command.display(),
        source,
    })
}

fn log_command_start(command: &ProcessCommand) {
    tracing::debug!("Executing subprocess: {}", command.display());
    tracing::trace!(
        "Environment variables count: {}, total size: {} bytes",
        command.env.len(),
        command
            .env
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum::<usize>()
    );
    if let Some(ref dir) = command.working_dir {
        tracing::trace!("Working directory: {:?}", dir);
    }
}
