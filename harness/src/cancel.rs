//! Cooperative cancellation for a run.
//!
//! Phases poll [`CancelToken::is_cancelled`] between DOM operations. A token
//! trips when the overlay is closed in-process or when the marker file
//! appears (written by `harness-ui` when the overlay is closed there).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    marker: Option<Arc<PathBuf>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that also trips when `marker` exists on disk.
    pub fn with_marker(marker: PathBuf) -> Self {
        Self {
            flag: Arc::default(),
            marker: Some(Arc::new(marker)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        if self.marker.as_deref().is_some_and(|path| path.exists()) {
            self.cancel();
            return true;
        }
        false
    }

    pub fn marker_path(&self) -> Option<&Path> {
        self.marker.as_deref().map(PathBuf::as_path)
    }

    /// Remove a marker left behind by an earlier run.
    pub fn clear_marker(&self) -> Result<()> {
        let Some(path) = self.marker_path() else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
        }
    }
}

/// Write the marker that trips every token watching `path`.
pub fn write_cancel_marker(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, b"cancelled\n").with_context(|| format!("write {}", path.display()))
}
