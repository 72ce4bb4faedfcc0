//! Shared application state for the UI server.

use std::path::PathBuf;
use std::sync::Arc;

use harness::io::layout::HarnessPaths;
use tokio::sync::broadcast;

/// Events broadcast to SSE clients when files under the harness dir change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    StatusChanged,
    ReportAdded { name: String },
    ConfigChanged,
    CatalogChanged,
    /// The cancel marker appeared.
    CancelRequested,
}

#[derive(Clone)]
pub struct AppState {
    pub paths: HarnessPaths,
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
}

impl AppState {
    pub fn new(harness_dir: PathBuf) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            paths: HarnessPaths::at(harness_dir),
            event_tx: Arc::new(event_tx),
        }
    }
}
