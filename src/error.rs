use std::time::Duration;

use thiserror::Error;

use crate::subprocess::ProcessError;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid handler '{0}': expected <path>/<module>.<function>")]
    InvalidHandler(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to classify handler output: {0}")]
    Classification(#[from] anyhow::Error),

    #[error("An invocation is already in flight on this runner")]
    InvocationInFlight,

    #[error("Invocation cancelled by cleanup")]
    Cancelled,

    #[error("Handler produced no result within {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Process exit code used by the binary for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidHandler(_) | Self::Config(_) | Self::Toml(_) => 2,
            Self::Process(_) | Self::Io(_) => 3,
            Self::Serialization(_) | Self::Classification(_) => 4,
            Self::Timeout(_) => 5,
            Self::InvocationInFlight | Self::Cancelled => 1,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidHandler(_) | Self::Config(_) | Self::Toml(_) => {
                format!("Configuration problem: {}", self)
            }
            Self::Process(ProcessError::CommandNotFound { program, .. }) => format!(
                "Interpreter '{}' was not found on PATH. Is the virtual environment activated?",
                program
            ),
            Self::Timeout(duration) => format!(
                "The handler did not return a result within {}s",
                duration.as_secs_f64()
            ),
            _ => self.to_string(),
        }
    }
}
