use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::RunnerError;

pub mod adapter;
pub mod handler;

pub use adapter::{bundled_adapter_dir, bundled_adapter_path, install_bundled_adapter, BUNDLED_ADAPTER};
pub use handler::HandlerSpec;

/// Interpreter flag requesting unbuffered stdout/stderr
pub const DEFAULT_UNBUFFERED_FLAG: &str = "-u";

fn default_unbuffered_flag() -> String {
    DEFAULT_UNBUFFERED_FLAG.to_string()
}

/// Everything needed to invoke one handler.
///
/// Loaded from TOML:
///
/// ```toml
/// runtime = "python3.12"
/// handler = "src/handlers/users.create"
/// timeout = "30s"
///
/// [environment]
/// STAGE = "dev"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Runtime identifier, e.g. `python3.12`. The interpreter is derived from it.
    pub runtime: String,
    /// Handler in `<path>/<module>.<function>` form
    pub handler: String,
    /// Adapter script run by the interpreter. Unset means the bundled one.
    #[serde(default)]
    pub adapter: Option<PathBuf>,
    #[serde(default = "default_unbuffered_flag")]
    pub unbuffered_flag: String,
    /// How long to wait for a result. Unset means wait until cleanup.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Working directory of the child. Defaults to the current directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Variables set on top of the inherited environment
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl RunnerConfig {
    pub fn new(runtime: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            handler: handler.into(),
            adapter: None,
            unbuffered_flag: default_unbuffered_flag(),
            timeout: None,
            working_dir: None,
            environment: HashMap::new(),
        }
    }

    /// Load a configuration file
    pub async fn load(path: &Path) -> Result<Self, RunnerError> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            RunnerError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: RunnerConfig = toml::from_str(&content)?;
        tracing::debug!("Loaded runner configuration from {}", path.display());
        Ok(config)
    }

    pub fn with_adapter(mut self, adapter: impl Into<PathBuf>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }

    pub fn with_unbuffered_flag(mut self, flag: impl Into<String>) -> Self {
        self.unbuffered_flag = flag.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}
