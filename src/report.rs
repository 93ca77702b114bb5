//! JSON report of per-tensor truncation statistics.

use crate::core::validation::QuantStats;
use crate::error::{FakeQuantError, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Write `stats` as a pretty-printed JSON array, creating parent directories.
///
/// The document is rendered in memory first, so `Report` only ever means a
/// serialization problem and every disk error is a `WriteFailure`.
pub fn save_quantization_stats(stats: &[QuantStats], path: &Path) -> Result<()> {
    let write_failure = |source: std::io::Error| FakeQuantError::WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    let mut json = serde_json::to_vec_pretty(stats)?;
    json.push(b'\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_failure)?;
    }
    fs::write(path, json).map_err(write_failure)?;

    info!("quantization stats saved to {}", path.display());
    Ok(())
}
