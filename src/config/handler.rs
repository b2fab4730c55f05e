use std::path::{Path, PathBuf};

use crate::error::RunnerError;

/// A handler reference split into file path and entry point.
///
/// `src/handlers/users.create` names the function `create` in
/// `src/handlers/users`. Only the first dot after the last `/` separates
/// the two, so `api/v1.routes.get` is the entry point `routes.get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSpec {
    pub path: PathBuf,
    pub name: String,
}

impl HandlerSpec {
    pub fn parse(handler: &str) -> Result<Self, RunnerError> {
        let file_start = handler.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (dir, file_and_name) = handler.split_at(file_start);

        let (file, name) = file_and_name
            .split_once('.')
            .ok_or_else(|| RunnerError::InvalidHandler(handler.to_string()))?;
        if file.is_empty() || name.is_empty() {
            return Err(RunnerError::InvalidHandler(handler.to_string()));
        }

        Ok(Self {
            path: PathBuf::from(format!("{dir}{file}")),
            name: name.to_string(),
        })
    }

    /// Handler path as seen from `cwd`.
    ///
    /// Absolute paths under `cwd` are made relative; anything else is
    /// returned as given.
    pub fn path_from(&self, cwd: &Path) -> PathBuf {
        self.path
            .strip_prefix(cwd)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.path.clone())
    }
}
