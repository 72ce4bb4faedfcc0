//! Live status panel for a run.
//!
//! The overlay tracks progress, the phase checklist, per-component status and
//! a short log. Every update is mirrored to `status.json` when a status file
//! is configured so `harness-ui` can serve it. Closing the overlay cancels the
//! run.

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cancel::CancelToken;
use crate::core::types::{QaSummary, Recommendation, ValidationStatus};
use crate::io::status_store::write_status;

/// Entries kept in the overlay log.
pub const LOG_CAPACITY: usize = 15;

const OVERLAY_TEMPLATE: &str = include_str!("../templates/overlay.html.j2");

static TEMPLATES: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("overlay.html", OVERLAY_TEMPLATE)
        .expect("overlay template should be valid");
    env
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Simulation,
    Audit,
    Repair,
    Aggregation,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Discovery,
        Phase::Simulation,
        Phase::Audit,
        Phase::Repair,
        Phase::Aggregation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Discovery => "discovery",
            Phase::Simulation => "simulation",
            Phase::Audit => "audit",
            Phase::Repair => "repair",
            Phase::Aggregation => "aggregation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Pending,
    Active,
    Done,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub phase: Phase,
    pub state: PhaseState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEntry {
    pub component_id: String,
    pub status: ValidationStatus,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at_ms: u64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlaySnapshot {
    pub completed: usize,
    pub total: usize,
    pub percent: u32,
    pub phases: Vec<PhaseEntry>,
    pub items: Vec<ItemEntry>,
    /// Newest first.
    pub log: Vec<LogEntry>,
    pub qa: Option<QaSummary>,
    pub overall_score: Option<f64>,
    pub recommendation: Option<Recommendation>,
    pub closed: bool,
}

impl Default for OverlaySnapshot {
    fn default() -> Self {
        Self {
            completed: 0,
            total: 0,
            percent: 0,
            phases: Phase::ALL
                .into_iter()
                .map(|phase| PhaseEntry {
                    phase,
                    state: PhaseState::Pending,
                })
                .collect(),
            items: Vec::new(),
            log: Vec::new(),
            qa: None,
            overall_score: None,
            recommendation: None,
            closed: false,
        }
    }
}

impl OverlaySnapshot {
    pub fn phase_state(&self, phase: Phase) -> PhaseState {
        self.phases
            .iter()
            .find(|entry| entry.phase == phase)
            .map(|entry| entry.state)
            .unwrap_or(PhaseState::Pending)
    }
}

#[derive(Debug)]
pub struct Overlay {
    state: RefCell<OverlaySnapshot>,
    cancel: CancelToken,
    status_path: Option<PathBuf>,
}

impl Overlay {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            state: RefCell::new(OverlaySnapshot::default()),
            cancel,
            status_path: None,
        }
    }

    /// Mirror every update to `path`.
    pub fn with_status_file(mut self, path: PathBuf) -> Self {
        self.status_path = Some(path);
        self.persist();
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn set_progress(&self, completed: usize, total: usize) {
        self.update(|state| {
            state.completed = completed;
            state.total = total;
            state.percent = if total == 0 {
                100
            } else {
                ((completed as f64 / total as f64) * 100.0).round() as u32
            };
        });
    }

    pub fn set_phase(&self, phase: Phase, phase_state: PhaseState) {
        self.update(|state| {
            if let Some(entry) = state.phases.iter_mut().find(|entry| entry.phase == phase) {
                entry.state = phase_state;
            }
        });
    }

    pub fn set_item(&self, component_id: &str, status: ValidationStatus, detail: &str) {
        self.update(|state| {
            match state
                .items
                .iter_mut()
                .find(|item| item.component_id == component_id)
            {
                Some(item) => {
                    item.status = status;
                    item.detail = detail.to_string();
                }
                None => state.items.push(ItemEntry {
                    component_id: component_id.to_string(),
                    status,
                    detail: detail.to_string(),
                }),
            }
        });
    }

    pub fn note(&self, at_ms: u64, message: &str) {
        self.update(|state| {
            state.log.insert(
                0,
                LogEntry {
                    at_ms,
                    message: message.to_string(),
                },
            );
            state.log.truncate(LOG_CAPACITY);
        });
    }

    pub fn set_qa(&self, summary: QaSummary) {
        self.update(|state| state.qa = Some(summary));
    }

    pub fn set_readiness(&self, overall_score: Option<f64>, recommendation: Recommendation) {
        self.update(|state| {
            state.overall_score = overall_score;
            state.recommendation = Some(recommendation);
        });
    }

    /// Close the panel and cancel the run it reports on.
    pub fn close(&self) {
        self.cancel.cancel();
        self.update(|state| state.closed = true);
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn snapshot(&self) -> OverlaySnapshot {
        self.state.borrow().clone()
    }

    pub fn render_text(&self) -> String {
        render_text(&self.state.borrow())
    }

    pub fn render_html(&self) -> Result<String> {
        render_html(&self.state.borrow())
    }

    fn update(&self, f: impl FnOnce(&mut OverlaySnapshot)) {
        f(&mut self.state.borrow_mut());
        self.persist();
    }

    fn persist(&self) {
        let Some(path) = &self.status_path else {
            return;
        };
        if let Err(err) = write_status(path, &self.state.borrow()) {
            warn!(path = %path.display(), error = %format!("{err:#}"), "overlay status not written");
        }
    }
}

pub fn render_text(snapshot: &OverlaySnapshot) -> String {
    let mut out = format!(
        "Progress: {}/{} ({}%)\n",
        snapshot.completed, snapshot.total, snapshot.percent
    );
    for entry in &snapshot.phases {
        let mark = match entry.state {
            PhaseState::Pending => "[ ]",
            PhaseState::Active => "[~]",
            PhaseState::Done => "[x]",
            PhaseState::Skipped => "[-]",
        };
        out.push_str(&format!("{mark} {}\n", entry.phase.as_str()));
    }
    if let Some(qa) = &snapshot.qa {
        out.push_str(&format!(
            "QA: {} modules, {} failing, {} suggestions\n",
            qa.total,
            qa.failing(),
            qa.suggestions
        ));
    }
    if let Some(recommendation) = snapshot.recommendation {
        let score = snapshot
            .overall_score
            .map(|score| format!("{score:.1}"))
            .unwrap_or_else(|| "n/a".to_string());
        out.push_str(&format!(
            "Readiness: {score} ({})\n",
            recommendation.as_str()
        ));
    }
    if snapshot.closed {
        out.push_str("Overlay closed\n");
    }
    out
}

pub fn render_html(snapshot: &OverlaySnapshot) -> Result<String> {
    let template = TEMPLATES.get_template("overlay.html")?;
    let rendered = template.render(context! {
        completed => snapshot.completed,
        total => snapshot.total,
        percent => snapshot.percent,
        phases => &snapshot.phases,
        items => &snapshot.items,
        log => &snapshot.log,
        qa_failing => snapshot.qa.as_ref().map(QaSummary::failing),
        qa => &snapshot.qa,
        overall_score => snapshot.overall_score.map(|score| format!("{score:.1}")),
        recommendation => snapshot.recommendation.map(Recommendation::as_str),
        closed => snapshot.closed,
    })?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_keeps_newest_fifteen() {
        let overlay = Overlay::new(CancelToken::new());
        for i in 0..20 {
            overlay.note(i, &format!("entry {i}"));
        }
        let snapshot = overlay.snapshot();
        assert_eq!(snapshot.log.len(), LOG_CAPACITY);
        assert_eq!(snapshot.log[0].message, "entry 19");
        assert_eq!(snapshot.log[14].message, "entry 5");
    }

    #[test]
    fn close_cancels_run() {
        let token = CancelToken::new();
        let overlay = Overlay::new(token.clone());
        overlay.close();
        assert!(overlay.is_closed());
        assert!(token.is_cancelled());
    }

    #[test]
    fn items_update_in_place() {
        let overlay = Overlay::new(CancelToken::new());
        overlay.set_item("qnis", ValidationStatus::Active, "checking");
        overlay.set_item("legal", ValidationStatus::Pending, "pending");
        overlay.set_item("qnis", ValidationStatus::Valid, "found");
        let items = overlay.snapshot().items;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].status, ValidationStatus::Valid);
    }

    #[test]
    fn renders_text_and_escaped_html() {
        let overlay = Overlay::new(CancelToken::new());
        overlay.set_progress(1, 4);
        overlay.set_phase(Phase::Discovery, PhaseState::Done);
        overlay.set_item("qnis", ValidationStatus::Invalid, "<missing>");
        overlay.set_readiness(None, Recommendation::NotReady);

        let text = overlay.render_text();
        assert!(text.starts_with("Progress: 1/4 (25%)"));
        assert!(text.contains("[x] discovery"));
        assert!(text.contains("Readiness: n/a (not_ready)"));

        let html = overlay.render_html().expect("render html");
        assert!(html.contains("&lt;missing&gt;"));
        assert!(html.contains("not_ready"));
    }

    #[test]
    fn status_file_mirrors_updates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("status.json");
        let overlay = Overlay::new(CancelToken::new()).with_status_file(path.clone());
        overlay.set_progress(2, 2);
        let stored = crate::io::status_store::load_status(&path)
            .expect("load")
            .expect("snapshot");
        assert_eq!(stored.percent, 100);
    }
}
