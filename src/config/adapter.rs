//! Bundled Python adapter
//!
//! The default adapter is compiled into the binary and written out on first
//! use, so an installed binary does not depend on the source tree.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Source of the adapter used when no `adapter` is configured
pub const BUNDLED_ADAPTER: &str = include_str!("../../adapters/invoke.py");

const ADAPTER_FILE: &str = "invoke.py";

/// Directory the bundled adapter is installed into, one per crate version
pub fn bundled_adapter_dir() -> PathBuf {
    std::env::temp_dir().join(format!("handler-runner-{}", env!("CARGO_PKG_VERSION")))
}

/// Path of the bundled adapter once installed
pub fn bundled_adapter_path() -> PathBuf {
    bundled_adapter_dir().join(ADAPTER_FILE)
}

/// Write the bundled adapter into `dir` unless an identical copy is there.
///
/// The file is written under a per-process name and renamed into place, so
/// concurrent runners never observe a partial script.
pub async fn install_bundled_adapter(dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(ADAPTER_FILE);
    if let Ok(existing) = fs::read_to_string(&path).await {
        if existing == BUNDLED_ADAPTER {
            return Ok(path);
        }
    }

    fs::create_dir_all(dir).await?;
    let staging = dir.join(format!("{ADAPTER_FILE}.{}.tmp", std::process::id()));
    fs::write(&staging, BUNDLED_ADAPTER).await?;
    fs::rename(&staging, &path).await?;
    tracing::debug!("Installed bundled adapter at {}", path.display());
    Ok(path)
}
