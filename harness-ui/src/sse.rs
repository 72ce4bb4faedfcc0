//! Server-Sent Events stream and the harness dir watcher.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::path::Path;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::state::{AppState, ChangeEvent};

#[derive(Serialize)]
struct SsePayload<'a> {
    #[serde(rename = "type")]
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a str>,
}

impl<'a> From<&'a ChangeEvent> for SsePayload<'a> {
    fn from(event: &'a ChangeEvent) -> Self {
        let (event_type, report) = match event {
            ChangeEvent::StatusChanged => ("status_changed", None),
            ChangeEvent::ReportAdded { name } => ("report_added", Some(name.as_str())),
            ChangeEvent::ConfigChanged => ("config_changed", None),
            ChangeEvent::CatalogChanged => ("catalog_changed", None),
            ChangeEvent::CancelRequested => ("cancel_requested", None),
        };
        SsePayload { event_type, report }
    }
}

/// GET /events
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(change_event) => {
                    if let Ok(json) = serde_json::to_string(&SsePayload::from(&change_event)) {
                        yield Ok(Event::default().event("change").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

pub fn start_file_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_file_watcher(state).await {
            warn!(error = %e, "file watcher failed");
        }
    });
}

async fn run_file_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(200)),
    )?;

    let harness_dir = &state.paths.harness_dir;
    if !harness_dir.exists() {
        // Watching needs the directory; a later `harness init` or run fills it.
        std::fs::create_dir_all(harness_dir)?;
    }
    watcher.watch(harness_dir, RecursiveMode::Recursive)?;
    info!(path = %harness_dir.display(), "watching harness directory");

    let mut known_reports = collect_known_reports(&state.paths.reports_dir);

    // Batch at a fixed interval: a run rewrites status.json on every update.
    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(200));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => pending_events.push(event),
            _ = flush_tick.tick() => {
                if pending_events.is_empty() {
                    continue;
                }
                process_events(&state, &pending_events, &mut known_reports);
                pending_events.clear();
            }
        }
    }
}

/// Collapse a batch of watcher events into at most one event of each kind,
/// plus one `ReportAdded` per new report file.
fn process_events(state: &AppState, events: &[NotifyEvent], known_reports: &mut BTreeSet<String>) {
    let paths = &state.paths;
    let mut status_changed = false;
    let mut config_changed = false;
    let mut catalog_changed = false;
    let mut cancel_requested = false;
    let mut new_reports = Vec::new();

    for event in events {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }
        for path in &event.paths {
            if path == &paths.status_path {
                status_changed = true;
            } else if path == &paths.config_path {
                config_changed = true;
            } else if path == &paths.catalog_path {
                catalog_changed = true;
            } else if path == &paths.cancel_path {
                cancel_requested = true;
            } else if let Some(name) = report_name(&paths.reports_dir, path)
                && known_reports.insert(name.clone())
            {
                new_reports.push(name);
            }
        }
    }

    let send = |event: ChangeEvent| {
        debug!(?event, "broadcasting change");
        let _ = state.event_tx.send(event);
    };
    if status_changed {
        send(ChangeEvent::StatusChanged);
    }
    if config_changed {
        send(ChangeEvent::ConfigChanged);
    }
    if catalog_changed {
        send(ChangeEvent::CatalogChanged);
    }
    if cancel_requested {
        send(ChangeEvent::CancelRequested);
    }
    new_reports.sort();
    for name in new_reports {
        send(ChangeEvent::ReportAdded { name });
    }
}

/// File name of a finished report directly under `reports_dir`. Temp files
/// from atomic writes do not qualify.
fn report_name(reports_dir: &Path, path: &Path) -> Option<String> {
    if path.parent()? != reports_dir {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    name.ends_with(".json").then(|| name.to_string())
}

fn collect_known_reports(reports_dir: &Path) -> BTreeSet<String> {
    let Ok(entries) = std::fs::read_dir(reports_dir) else {
        return BTreeSet::new();
    };
    entries
        .flatten()
        .filter_map(|entry| report_name(reports_dir, &entry.path()))
        .collect()
}
