#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {program}")]
    CommandNotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Child process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
