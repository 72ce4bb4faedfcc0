//! Overlay snapshot persistence (`.harness/status.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::overlay::OverlaySnapshot;

/// Atomically replace the status file with `snapshot`.
pub fn write_status(path: &Path, snapshot: &OverlaySnapshot) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(snapshot).context("serialize overlay status")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

/// Load the last written snapshot. Missing file => `None`.
pub fn load_status(path: &Path) -> Result<Option<OverlaySnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let snapshot =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(snapshot))
}
