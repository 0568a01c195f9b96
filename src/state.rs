// =============================================================================
// Persistent state — atomic JSON files with merge-on-load semantics
// =============================================================================
//
// Every mutable document (trade journal, adapter state, optimizer state, farm
// schedule, farm state) is a JSON file written with a tmp + rename pattern so
// a crash mid-write never corrupts it. Loading deserialises with serde
// defaults, so documents written by an older build remain readable after new
// fields are introduced.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

/// Write `value` as pretty JSON to `path` atomically (tmp file + rename).
pub fn save_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();

    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialise state for {}", path.display()))?;

    let tmp_path = path.with_extension("json.tmp");

    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp state to {}", tmp_path.display()))?;

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp state to {}", path.display()))?;

    Ok(())
}

/// Load a JSON document from `path`, or return `T::default()` when the file
/// does not exist or cannot be parsed. Missing fields inside an existing file
/// are filled by the type's serde defaults.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> T {
    let path = path.as_ref();

    if !path.exists() {
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => {
                info!(path = %path.display(), "state loaded");
                value
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "state parse failed, using defaults");
                T::default()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "state read failed, using defaults");
            T::default()
        }
    }
}
