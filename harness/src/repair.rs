//! Targeted repair agents for defects found by the audit and simulator.
//!
//! Agents edit the live page through the guard. Each one is idempotent and
//! only adds missing structure or handlers; a repair counts as applied only
//! if re-checking the component shows it is no longer failing.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::audit::audit_module;
use crate::context::HarnessContext;
use crate::core::selector::Selector;
use crate::core::types::{AuditOutcome, AuditStatus, RepairOutcome, ValidationStatus, display_name};
use crate::dom::{Action, Document, ElementSpec, EventKind};
use crate::simulate::{
    COLLAPSED_CLASS, LAYOUT_COMPONENT, SimulationReport, layout_scenarios, run_isolated,
};

pub const REPAIR_STYLE_ID: &str = "harness-repair-styles";

/// Viewport width at and below which the repaired sidebar collapses.
const MOBILE_MAX_WIDTH: u32 = 767;

/// Read the page through the guard's query accounting. A throttled read
/// fails the repair rather than passing for an empty page.
fn read_page<T>(ctx: &HarnessContext<'_>, read: impl FnOnce(&Document) -> T) -> Result<T> {
    ctx.guard
        .try_query(|| read(&ctx.page.doc()))
        .context("page query throttled by the guard")
}

const REPAIR_CSS: &str = "@media (max-width: 767px) { .sidebar.collapsed { width: 64px; } \
    .sidebar.collapsed .nav-label { display: none; } } \
    #qnis-map { position: relative; min-height: 400px; }";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "detail", rename_all = "snake_case")]
pub enum DefectKind {
    Audit(AuditStatus),
    Simulation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    pub component_id: String,
    pub kind: DefectKind,
}

impl Defect {
    pub fn audit(component_id: &str, status: AuditStatus) -> Self {
        Self {
            component_id: component_id.to_string(),
            kind: DefectKind::Audit(status),
        }
    }

    fn audit_status(&self) -> Option<AuditStatus> {
        match self.kind {
            DefectKind::Audit(status) => Some(status),
            DefectKind::Simulation(_) => None,
        }
    }
}

/// Failing audits, plus the page-level layout when its simulation failed.
/// Module simulation failures are already covered by their audit status.
pub fn collect_defects(audits: &[AuditOutcome], simulation: &SimulationReport) -> Vec<Defect> {
    let mut defects: Vec<Defect> = audits
        .iter()
        .filter(|outcome| outcome.status.is_failing())
        .map(|outcome| Defect::audit(&outcome.module_id, outcome.status))
        .collect();
    if let Some(layout) = simulation.results.get(LAYOUT_COMPONENT)
        && layout.status == ValidationStatus::Invalid
    {
        defects.push(Defect {
            component_id: LAYOUT_COMPONENT.to_string(),
            kind: DefectKind::Simulation(layout.detail.clone()),
        });
    }
    defects
}

pub trait RepairAgent {
    fn name(&self) -> &'static str;

    fn handles(&self, defect: &Defect) -> bool;

    /// Patch the page. Returns a description of the change, or `None` when
    /// there was nothing to change.
    fn apply(&self, ctx: &HarnessContext<'_>, defect: &Defect) -> Result<Option<String>>;

    /// Re-check the component after `apply`.
    fn verify(&self, ctx: &HarnessContext<'_>, defect: &Defect) -> Verdict {
        let outcome = audit_module(ctx, &defect.component_id);
        Verdict {
            fixed: !outcome.status.is_failing(),
            status: Some(outcome.status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub fixed: bool,
    /// Audit status the component was left in, when the check was an audit.
    pub status: Option<AuditStatus>,
}

pub fn default_agents() -> Vec<Box<dyn RepairAgent>> {
    vec![
        Box::new(ModuleScaffoldRepair),
        Box::new(NavigationRepair),
        Box::new(MapCanvasRepair),
        Box::new(StyleRepair),
    ]
}

/// Builds an empty module view with a header.
pub struct ModuleScaffoldRepair;

impl RepairAgent for ModuleScaffoldRepair {
    fn name(&self) -> &'static str {
        "module_scaffold"
    }

    fn handles(&self, defect: &Defect) -> bool {
        matches!(
            defect.audit_status(),
            Some(AuditStatus::ModuleNotBuilt | AuditStatus::NavigationMissing)
        )
    }

    fn apply(&self, ctx: &HarnessContext<'_>, defect: &Defect) -> Result<Option<String>> {
        let id = defect.component_id.as_str();
        if read_page(ctx, |doc| doc.module_container(id).is_some())? {
            return Ok(None);
        }
        let mut doc = ctx.page.doc_mut();
        let parent = doc
            .select_first(&Selector::Class("main-content".to_string()))
            .unwrap_or_else(|| doc.body());
        let view = ElementSpec::new("div")
            .id(&format!("{id}-module"))
            .class("module-view")
            .hidden()
            .child(
                ElementSpec::new("div")
                    .class("module-header")
                    .child(ElementSpec::new("h2").text(&display_name(id))),
            );
        doc.insert(parent, &view);
        Ok(Some(format!("built #{id}-module view")))
    }
}

/// Rebinds a navigation element's `showModule` handler, or adds a sidebar
/// entry when the module has none.
pub struct NavigationRepair;

impl RepairAgent for NavigationRepair {
    fn name(&self) -> &'static str {
        "navigation"
    }

    fn handles(&self, defect: &Defect) -> bool {
        matches!(
            defect.audit_status(),
            Some(AuditStatus::BrokenInteraction | AuditStatus::NavigationMissing)
        )
    }

    fn apply(&self, ctx: &HarnessContext<'_>, defect: &Defect) -> Result<Option<String>> {
        let id = defect.component_id.as_str();
        let action = Action::show_module(id);
        let existing = read_page(ctx, |doc| {
            doc.navigation_for(id).map(|nav| (nav, doc.label(nav)))
        })?;
        if let Some((nav, label)) = existing {
            if ctx
                .guard
                .add_listener(&ctx.page, nav, EventKind::Click, action)
            {
                return Ok(Some(format!("bound showModule('{id}') to {label}")));
            }
            return Ok(None);
        }

        let nav = {
            let mut doc = ctx.page.doc_mut();
            let sidebar = match doc.select_first(&Selector::Class("sidebar".to_string())) {
                Some(sidebar) => sidebar,
                None => {
                    let body = doc.body();
                    doc.insert(body, &ElementSpec::new("nav").class("sidebar"))
                }
            };
            let item = ElementSpec::new("div")
                .id(&format!("nav-{id}"))
                .class("nav-item")
                .attr("onclick", &format!("showModule('{id}')"))
                .unbound()
                .child(
                    ElementSpec::new("span")
                        .class("nav-label")
                        .text(&display_name(id)),
                );
            doc.insert(sidebar, &item)
        };
        ctx.guard
            .add_listener(&ctx.page, nav, EventKind::Click, action);
        Ok(Some(format!("added #nav-{id} to .sidebar")))
    }
}

/// Recreates the QNIS map canvas and zoom controls.
pub struct MapCanvasRepair;

impl RepairAgent for MapCanvasRepair {
    fn name(&self) -> &'static str {
        "map_canvas"
    }

    fn handles(&self, defect: &Defect) -> bool {
        defect.component_id == "qnis" && defect.audit_status().is_some()
    }

    fn apply(&self, ctx: &HarnessContext<'_>, _defect: &Defect) -> Result<Option<String>> {
        let mut doc = ctx.page.doc_mut();
        let Some(container) = doc.module_container("qnis") else {
            return Ok(None);
        };
        let map = doc
            .select_within(container, &Selector::Id("qnis-map".to_string()))
            .into_iter()
            .next();
        let map = match map {
            Some(map) if !doc.element(map).children.is_empty() => return Ok(None),
            Some(map) => map,
            None => doc.insert(
                container,
                &ElementSpec::new("div").id("qnis-map").class("map-container"),
            ),
        };
        doc.insert(map, &ElementSpec::new("canvas").id("qnis-canvas"));
        doc.insert(
            map,
            &ElementSpec::new("div")
                .class("zoom-controls")
                .child(ElementSpec::new("button").attr("onclick", "zoomIn()").text("+"))
                .child(ElementSpec::new("button").attr("onclick", "zoomOut()").text("-")),
        );
        Ok(Some("rebuilt #qnis-map with canvas and zoom controls".to_string()))
    }
}

/// Injects the repair stylesheet and binds sidebar collapse on resize.
pub struct StyleRepair;

impl RepairAgent for StyleRepair {
    fn name(&self) -> &'static str {
        "style"
    }

    fn handles(&self, defect: &Defect) -> bool {
        defect.component_id == LAYOUT_COMPONENT
    }

    fn apply(&self, ctx: &HarnessContext<'_>, _defect: &Defect) -> Result<Option<String>> {
        let mut changes = Vec::new();
        {
            let mut doc = ctx.page.doc_mut();
            if doc.by_id(REPAIR_STYLE_ID).is_none() {
                let head = doc.head();
                doc.insert(
                    head,
                    &ElementSpec::new("style").id(REPAIR_STYLE_ID).text(REPAIR_CSS),
                );
                changes.push(format!("injected #{REPAIR_STYLE_ID}"));
            }
        }
        let sidebar = read_page(ctx, |doc| {
            doc.select_first(&Selector::Class("sidebar".to_string()))
        })?
        .ok_or_else(|| anyhow!("page has no .sidebar"))?;
        let bound = ctx.guard.add_listener(
            &ctx.page,
            sidebar,
            EventKind::Resize,
            Action::Responsive {
                max_width: MOBILE_MAX_WIDTH,
                class: COLLAPSED_CLASS.to_string(),
            },
        );
        if bound {
            changes.push("bound responsive sidebar collapse".to_string());
        }
        Ok((!changes.is_empty()).then(|| changes.join(", ")))
    }

    fn verify(&self, ctx: &HarnessContext<'_>, _defect: &Defect) -> Verdict {
        let Ok(scenarios) = read_page(ctx, layout_scenarios) else {
            return Verdict {
                fixed: false,
                status: None,
            };
        };
        let fixed = scenarios
            .iter()
            .all(|scenario| run_isolated(ctx, LAYOUT_COMPONENT, scenario).ok);
        Verdict {
            fixed,
            status: None,
        }
    }
}

/// Run one agent against one defect. Errors become `applied: false`.
pub fn repair(
    agent: &dyn RepairAgent,
    ctx: &HarnessContext<'_>,
    defect: &Defect,
) -> (RepairOutcome, Verdict) {
    let outcome = |applied: bool, description: String| RepairOutcome {
        component_id: defect.component_id.clone(),
        agent: agent.name().to_string(),
        applied,
        description,
    };
    let change = match agent.apply(ctx, defect) {
        Ok(change) => change,
        Err(err) => {
            warn!(agent = agent.name(), component = %defect.component_id, error = %format!("{err:#}"), "repair failed");
            let verdict = Verdict {
                fixed: false,
                status: defect.audit_status(),
            };
            return (outcome(false, format!("repair failed: {err:#}")), verdict);
        }
    };
    let verdict = agent.verify(ctx, defect);
    let description = match (&change, verdict.fixed, verdict.status) {
        (Some(change), true, _) => change.clone(),
        (Some(change), false, Some(status)) => format!("{change}; still {}", status.as_str()),
        (Some(change), false, None) => format!("{change}; still failing"),
        (None, true, _) => "already repaired".to_string(),
        (None, false, _) => "nothing to change".to_string(),
    };
    (outcome(change.is_some() && verdict.fixed, description), verdict)
}

/// Offer each defect to the agents in order. After every agent the defect is
/// re-classified, so later agents see the status the earlier ones left.
#[instrument(skip_all, fields(defects = defects.len()))]
pub fn run_repairs(
    ctx: &HarnessContext<'_>,
    agents: &[Box<dyn RepairAgent>],
    defects: &[Defect],
) -> Vec<RepairOutcome> {
    let total = defects.len();
    ctx.overlay.set_progress(0, total);
    let mut outcomes = Vec::new();
    for (index, defect) in defects.iter().enumerate() {
        if ctx.is_cancelled() {
            ctx.note(&format!("repair cancelled after {index} of {total} defects"));
            break;
        }
        let mut current = defect.clone();
        for agent in agents {
            if !agent.handles(&current) {
                continue;
            }
            let (outcome, verdict) = repair(agent.as_ref(), ctx, &current);
            ctx.note(&format!(
                "{} on {}: {}",
                outcome.agent, outcome.component_id, outcome.description
            ));
            outcomes.push(outcome);
            if verdict.fixed {
                break;
            }
            if let Some(status) = verdict.status {
                current.kind = DefectKind::Audit(status);
            }
        }
        ctx.overlay.set_progress(index + 1, total);
    }
    info!(
        attempted = outcomes.len(),
        applied = outcomes.iter().filter(|o| o.applied).count(),
        "repairs finished"
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::dom::{Document, Page};
    use crate::guard::{Guard, GuardLimits};
    use crate::overlay::Overlay;
    use crate::simulate::simulate;

    fn page_with(specs: Vec<ElementSpec>) -> Page {
        let mut doc = Document::new();
        let body = doc.body();
        for spec in &specs {
            doc.insert(body, spec);
        }
        Page::new(doc)
    }

    struct Failing;

    impl RepairAgent for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn handles(&self, _defect: &Defect) -> bool {
            true
        }

        fn apply(&self, _ctx: &HarnessContext<'_>, _defect: &Defect) -> Result<Option<String>> {
            Err(anyhow!("agent exploded"))
        }
    }

    #[test]
    fn broken_navigation_is_rebound() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let page = page_with(vec![
            ElementSpec::new("div")
                .id("nav-legal")
                .attr("onclick", "showModule('legal')")
                .unbound(),
            ElementSpec::new("div").id("legal-module").hidden().text("Legal"),
        ]);
        let ctx = HarnessContext::new(&guard, page, &overlay);
        assert_eq!(audit_module(&ctx, "legal").status, AuditStatus::BrokenInteraction);

        let defect = Defect::audit("legal", AuditStatus::BrokenInteraction);
        let outcomes = run_repairs(&ctx, &default_agents(), std::slice::from_ref(&defect));
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].applied);
        assert_eq!(outcomes[0].description, "bound showModule('legal') to #nav-legal");
        assert!(!audit_module(&ctx, "legal").status.is_failing());

        // Idempotent: a second pass changes nothing.
        let again = run_repairs(&ctx, &default_agents(), &[defect]);
        assert!(!again[0].applied);
        assert_eq!(again[0].description, "already repaired");
        assert_eq!(guard.status().duplicate_listeners, 1);
    }

    #[test]
    fn throttled_page_read_fails_the_repair() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let page = page_with(vec![
            ElementSpec::new("div")
                .id("nav-legal")
                .attr("onclick", "showModule('legal')")
                .unbound(),
            ElementSpec::new("div").id("legal-module").hidden().text("Legal"),
        ]);
        let ctx = HarnessContext::new(&guard, page, &overlay);
        for _ in 0..guard.limits().max_queries {
            guard.query(|| ());
        }

        let defect = Defect::audit("legal", AuditStatus::BrokenInteraction);
        let (outcome, verdict) = repair(&NavigationRepair, &ctx, &defect);
        assert!(!outcome.applied);
        assert!(outcome.description.contains("throttled"));
        assert!(!verdict.fixed);
        assert_eq!(guard.status().duplicate_listeners, 0);
    }

    #[test]
    fn missing_module_is_scaffolded_and_linked() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let page = page_with(vec![ElementSpec::new("nav").class("sidebar")]);
        let ctx = HarnessContext::new(&guard, page.clone(), &overlay);

        let outcomes = run_repairs(
            &ctx,
            &default_agents(),
            &[Defect::audit("voice", AuditStatus::NavigationMissing)],
        );
        let agents: Vec<&str> = outcomes.iter().map(|o| o.agent.as_str()).collect();
        assert_eq!(agents, vec!["module_scaffold", "navigation"]);
        assert!(!outcomes[0].applied);
        assert_eq!(
            outcomes[0].description,
            "built #voice-module view; still broken_interaction"
        );
        assert!(outcomes[1].applied);
        assert_eq!(audit_module(&ctx, "voice").status, AuditStatus::Incomplete);
        assert!(page.doc().by_id("nav-voice").is_some());
    }

    #[test]
    fn qnis_map_is_rebuilt_after_scaffold() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let page = page_with(vec![
            ElementSpec::new("div")
                .id("nav-qnis")
                .attr("onclick", "showModule('qnis')"),
        ]);
        let ctx = HarnessContext::new(&guard, page.clone(), &overlay);
        let outcomes = run_repairs(
            &ctx,
            &default_agents(),
            &[Defect::audit("qnis", AuditStatus::ModuleNotBuilt)],
        );
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].agent, "module_scaffold");

        let map_agent = MapCanvasRepair;
        let (outcome, _) = repair(&map_agent, &ctx, &Defect::audit("qnis", AuditStatus::Incomplete));
        assert_eq!(
            outcome.description,
            "rebuilt #qnis-map with canvas and zoom controls"
        );
        let doc = page.doc();
        let map = doc.by_id("qnis-map").expect("map");
        assert_eq!(doc.select_within(map, &Selector::Tag("button".into())).len(), 2);
    }

    #[test]
    fn layout_defect_gets_styles_and_responsive_sidebar() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let page = page_with(vec![ElementSpec::new("nav").class("sidebar")]);
        let ctx = HarnessContext::new(&guard, page.clone(), &overlay);

        let report = simulate(&ctx, &[]);
        let defects = collect_defects(&[], &report);
        assert_eq!(defects.len(), 1);
        let outcomes = run_repairs(&ctx, &default_agents(), &defects);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].applied, "{}", outcomes[0].description);
        assert!(page.doc().by_id(REPAIR_STYLE_ID).is_some());

        let report = simulate(&ctx, &[]);
        assert_eq!(
            report.results.status_of(LAYOUT_COMPONENT),
            Some(ValidationStatus::Valid)
        );
    }

    #[test]
    fn failing_agent_is_isolated() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let page = page_with(vec![
            ElementSpec::new("div")
                .id("nav-legal")
                .attr("onclick", "showModule('legal')")
                .unbound(),
            ElementSpec::new("div").id("legal-module").hidden(),
        ]);
        let ctx = HarnessContext::new(&guard, page, &overlay);
        let agents: Vec<Box<dyn RepairAgent>> = vec![Box::new(Failing), Box::new(NavigationRepair)];
        let outcomes = run_repairs(
            &ctx,
            &agents,
            &[Defect::audit("legal", AuditStatus::BrokenInteraction)],
        );
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].applied);
        assert_eq!(outcomes[0].description, "repair failed: agent exploded");
        assert!(outcomes[1].applied);
    }
}
