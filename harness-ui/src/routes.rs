//! HTTP route handlers for the UI API.

use std::path::PathBuf;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, Json};
use axum::routing::{get, post};
use harness::cancel::write_cancel_marker;
use harness::core::types::DeploymentReadinessReport;
use harness::io::export::{list_reports, validate_report_file};
use harness::io::status_store::load_status;
use harness::overlay::{OverlaySnapshot, render_html};
use serde::Serialize;
use tracing::{info, warn};

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/reports", get(get_reports))
        .route("/reports/{name}", get(get_report))
        .route("/overlay", get(get_overlay))
        .route("/overlay/close", post(close_overlay))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/status - last overlay snapshot written by a run.
async fn get_status(State(state): State<AppState>) -> Result<Json<OverlaySnapshot>, StatusCode> {
    match load_status(&state.paths.status_path) {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "status unreadable");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Serialize)]
struct ReportsResponse {
    reports: Vec<String>,
}

/// GET /api/reports - exported report file names, oldest first.
async fn get_reports(State(state): State<AppState>) -> Result<Json<ReportsResponse>, StatusCode> {
    let paths = list_reports(&state.paths.reports_dir).map_err(|err| {
        warn!(error = %format!("{err:#}"), "listing reports failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let reports = paths
        .iter()
        .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
        .map(str::to_string)
        .collect();
    Ok(Json(ReportsResponse { reports }))
}

/// GET /api/reports/{name} - one report, validated against the schema.
async fn get_report(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeploymentReadinessReport>, StatusCode> {
    let path = report_path(&state, &name).ok_or(StatusCode::BAD_REQUEST)?;
    if !path.exists() {
        return Err(StatusCode::NOT_FOUND);
    }
    validate_report_file(&path).map(Json).map_err(|err| {
        warn!(report = %name, error = %format!("{err:#}"), "report failed validation");
        StatusCode::UNPROCESSABLE_ENTITY
    })
}

/// GET /api/overlay - the overlay panel rendered from the last snapshot.
async fn get_overlay(State(state): State<AppState>) -> Result<Html<String>, StatusCode> {
    let snapshot = match load_status(&state.paths.status_path) {
        Ok(snapshot) => snapshot.unwrap_or_default(),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "status unreadable");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    render_html(&snapshot).map(Html).map_err(|err| {
        warn!(error = %format!("{err:#}"), "overlay render failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// POST /api/overlay/close - ask the running harness to stop.
async fn close_overlay(State(state): State<AppState>) -> StatusCode {
    match write_cancel_marker(&state.paths.cancel_path) {
        Ok(()) => {
            info!(marker = %state.paths.cancel_path.display(), "cancel requested");
            StatusCode::ACCEPTED
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "writing cancel marker failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Resolve `name` inside the reports dir. Only plain report file names are
/// accepted.
fn report_path(state: &AppState, name: &str) -> Option<PathBuf> {
    let plain = !name.contains(['/', '\\']) && !name.contains("..");
    (plain && name.starts_with("deployment-report-") && name.ends_with(".json"))
        .then(|| state.paths.reports_dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness::cancel::CancelToken;
    use harness::io::export::export_report;
    use harness::io::status_store::write_status;
    use harness::overlay::{Overlay, Phase, PhaseState};
    use harness::readiness::aggregate;

    fn state() -> (tempfile::TempDir, AppState) {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = AppState::new(temp.path().join(".harness"));
        (temp, state)
    }

    #[test]
    fn report_names_must_be_plain_report_files() {
        let (_temp, state) = state();
        assert!(report_path(&state, "deployment-report-20261014T101500Z.json").is_some());
        assert!(report_path(&state, "../config.toml").is_none());
        assert!(report_path(&state, "deployment-report-../../x.json").is_none());
        assert!(report_path(&state, "status.json").is_none());
    }

    #[tokio::test]
    async fn status_is_not_found_before_any_run() {
        let (_temp, state) = state();
        let err = get_status(State(state)).await.unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_and_overlay_reflect_the_snapshot() {
        let (_temp, state) = state();
        let overlay = Overlay::new(CancelToken::new());
        overlay.set_phase(Phase::Discovery, PhaseState::Active);
        overlay.set_progress(1, 4);
        write_status(&state.paths.status_path, &overlay.snapshot()).expect("write status");

        let Json(snapshot) = get_status(State(state.clone())).await.expect("status");
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.percent, 25);

        let Html(html) = get_overlay(State(state)).await.expect("overlay");
        assert!(html.contains("1/4 (25%)"));
        assert!(html.contains("phase-active"));
    }

    #[tokio::test]
    async fn exported_reports_are_listed_and_served() {
        let (_temp, state) = state();
        let report = aggregate(&[], None);
        let path = export_report(&state.paths.reports_dir, &report).expect("export");
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .expect("file name")
            .to_string();

        let Json(listing) = get_reports(State(state.clone())).await.expect("list");
        assert_eq!(listing.reports, vec![name.clone()]);

        let Json(served) = get_report(State(state.clone()), Path(name))
            .await
            .expect("report");
        assert_eq!(served, report);

        let missing = get_report(
            State(state),
            Path("deployment-report-19700101T000000Z.json".to_string()),
        )
        .await
        .unwrap_err();
        assert_eq!(missing, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_report_is_unprocessable() {
        let (_temp, state) = state();
        std::fs::create_dir_all(&state.paths.reports_dir).expect("reports dir");
        let name = "deployment-report-bad.json";
        std::fs::write(state.paths.reports_dir.join(name), "{}").expect("write");
        let err = get_report(State(state), Path(name.to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn closing_the_overlay_trips_a_watching_token() {
        let (_temp, state) = state();
        let token = CancelToken::with_marker(state.paths.cancel_path.clone());
        assert!(!token.is_cancelled());
        assert_eq!(close_overlay(State(state)).await, StatusCode::ACCEPTED);
        assert!(token.is_cancelled());
    }
}
