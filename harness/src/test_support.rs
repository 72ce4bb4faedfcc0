//! Test-only builders for pages, probers and run contexts.

use std::cell::RefCell;
use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde_json::json;
use tempfile::TempDir;

use crate::cancel::CancelToken;
use crate::context::HarnessContext;
use crate::dom::{Document, ElementSpec, Page};
use crate::guard::{Guard, GuardLimits};
use crate::io::layout::HarnessPaths;
use crate::io::probe::{ProbeResponse, Prober};
use crate::overlay::Overlay;
use crate::readiness::checks::{API_ENDPOINTS, DATA_ENDPOINTS, HEALTH_ENDPOINTS};

/// Sidebar entry whose inline handler opens `module_id`.
pub fn nav_item(module_id: &str) -> ElementSpec {
    ElementSpec::new("div")
        .id(&format!("nav-{module_id}"))
        .class("nav-item")
        .attr("onclick", &format!("showModule('{module_id}')"))
        .text(module_id)
}

/// Hidden module view with a header and `body` as its text.
pub fn module_view(module_id: &str, body: &str) -> ElementSpec {
    ElementSpec::new("div")
        .id(&format!("{module_id}-module"))
        .class("module-view")
        .hidden()
        .child(
            ElementSpec::new("div")
                .class("module-header")
                .child(ElementSpec::new("h2").text(module_id)),
        )
        .child(ElementSpec::new("p").text(body))
}

/// Deterministic filler text of exactly `chars` characters.
pub fn prose(chars: usize) -> String {
    "lorem ipsum dolor sit amet "
        .chars()
        .cycle()
        .take(chars)
        .collect()
}

/// Page with `body` appended under `<body>`.
pub fn page_with(body: Vec<ElementSpec>) -> Page {
    let mut doc = Document::new();
    let root = doc.body();
    for spec in &body {
        doc.insert(root, spec);
    }
    Page::new(doc)
}

/// Fresh state directory with `reports/` created. Keep the `TempDir` alive
/// for as long as the paths are used.
pub fn temp_state() -> Result<(TempDir, HarnessPaths)> {
    let dir = tempfile::tempdir()?;
    let paths = HarnessPaths::new(dir.path());
    paths.ensure_dirs()?;
    Ok((dir, paths))
}

/// A guard on a manual clock plus an overlay, owning what a
/// [`HarnessContext`] borrows.
pub struct TestHarness {
    pub guard: Guard,
    pub overlay: Overlay,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_limits(GuardLimits::default())
    }

    pub fn with_limits(limits: GuardLimits) -> Self {
        Self {
            guard: Guard::manual(limits),
            overlay: Overlay::new(CancelToken::new()),
        }
    }

    pub fn ctx(&self, page: Page) -> HarnessContext<'_> {
        HarnessContext::new(&self.guard, page, &self.overlay)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Prober answering from a fixed route table. Unknown paths fail like a
/// refused connection. Requests are recorded.
#[derive(Debug, Default)]
pub struct FakeProber {
    routes: BTreeMap<String, ProbeResponse>,
    calls: RefCell<Vec<String>>,
}

impl FakeProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every endpoint the battery probes answers 200 with JSON; data
    /// sources return one record.
    pub fn healthy() -> Self {
        let mut prober = Self::new();
        for path in HEALTH_ENDPOINTS.iter().chain(&API_ENDPOINTS) {
            prober = prober.route(path, ProbeResponse::json(200, json!({"status": "ok"})));
        }
        for path in DATA_ENDPOINTS {
            prober = prober.route(path, ProbeResponse::json(200, json!([{"id": 1}])));
        }
        prober
    }

    pub fn route(mut self, path: &str, response: ProbeResponse) -> Self {
        self.routes.insert(path.to_string(), response);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Prober for FakeProber {
    fn get(&self, path: &str) -> Result<ProbeResponse> {
        self.calls.borrow_mut().push(path.to_string());
        match self.routes.get(path) {
            Some(response) => Ok(response.clone()),
            None => bail!("GET {path}: connection refused"),
        }
    }
}
