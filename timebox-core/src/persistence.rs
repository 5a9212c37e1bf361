//! Atomic JSON persistence for checkpoints and other state files.
//!
//! Writes go to a `.tmp` sibling and are renamed into place, so a crash
//! mid-write never leaves a truncated checkpoint behind.

use crate::error::{Result, TimeboxError};
use std::path::Path;

/// Serialize `data` as pretty JSON and write it to `path` via [`atomic_write`].
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(data)?;
    atomic_write(path, &json)
}

/// Write `data` to `path` through a temporary sibling, creating parent
/// directories as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a JSON state file. `Ok(None)` when it does not exist.
///
/// A file that exists but does not decode as `T` is reported as a
/// [`TimeboxError::Checkpoint`] naming the file.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&data).map(Some).map_err(|e| {
        TimeboxError::checkpoint(format!("corrupt state file {}: {e}", path.display()))
    })
}
