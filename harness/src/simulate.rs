//! Behavior simulator: synthetic clicks, resizes and form submissions.
//!
//! Every scenario in a phase runs against a fork of the page and any timers
//! it scheduled are cleared afterwards, so the verdicts do not depend on the
//! order scenarios ran in.

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::context::HarnessContext;
use crate::core::selector::Selector;
use crate::core::types::{
    ComponentDescriptor, ComponentKind, ScenarioKind, ScenarioOutcome, SimulationScenario,
    ValidationResults, ValidationStatus,
};
use crate::dom::action::dispatch_resize;
use crate::dom::{Document, ElementId, EventKind, Page, Viewport, dispatch};
use crate::guard::Guard;

/// Component id for the page-level responsive scenarios.
pub const LAYOUT_COMPONENT: &str = "layout";

/// Breakpoints for the responsive scenarios: name, width, height.
pub const BREAKPOINTS: [(&str, u32, u32); 3] = [
    ("mobile", 375, 667),
    ("tablet", 768, 1024),
    ("desktop", 1920, 1080),
];

/// Class the sidebar is expected to carry on mobile and drop on desktop.
pub const COLLAPSED_CLASS: &str = "collapsed";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
struct ResizePayload {
    width: u32,
    height: u32,
    expect_class: Option<String>,
    expect_absent_class: Option<String>,
}

/// Overrides the page viewport for the lifetime of the value. Dropping it
/// restores the original size and fires `resize` again.
pub struct ViewportOverride<'a> {
    page: Page,
    guard: &'a Guard,
    original: Viewport,
}

impl<'a> ViewportOverride<'a> {
    pub fn new(page: &Page, guard: &'a Guard, viewport: Viewport) -> Self {
        let original = page.doc().viewport();
        page.doc_mut().set_viewport(viewport);
        dispatch_resize(page, guard);
        Self {
            page: page.clone(),
            guard,
            original,
        }
    }
}

impl Drop for ViewportOverride<'_> {
    fn drop(&mut self) {
        self.page.doc_mut().set_viewport(self.original);
        dispatch_resize(&self.page, self.guard);
    }
}

/// Run `f` with the viewport overridden. The original size is restored even
/// when `f` fails.
pub fn with_viewport<T>(
    ctx: &HarnessContext<'_>,
    viewport: Viewport,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let _override = ViewportOverride::new(&ctx.page, ctx.guard, viewport);
    f()
}

/// Run one scenario against `target` on `ctx.page`.
///
/// Internal failures are reported as a failed outcome, never as an error.
pub fn run_scenario(
    ctx: &HarnessContext<'_>,
    scenario: &SimulationScenario,
    target: ElementId,
) -> ScenarioOutcome {
    let result = match scenario.kind {
        ScenarioKind::Click => Ok(click(ctx, target)),
        ScenarioKind::Resize => resize(ctx, scenario, target),
        ScenarioKind::FormSubmit => Ok(submit(ctx, scenario, target)),
    };
    result.unwrap_or_else(|err| ScenarioOutcome::failed(format!("{err:#}")))
}

/// Run a scenario on a scratch copy of the page, resolving its target
/// within `component_id`'s container first. Timers it scheduled are
/// cancelled before returning.
pub fn run_isolated(
    ctx: &HarnessContext<'_>,
    component_id: &str,
    scenario: &SimulationScenario,
) -> ScenarioOutcome {
    let scratch = ctx.fork();
    let mark = ctx.guard.timer_mark();
    let outcome = match resolve_target(&scratch, component_id, &scenario.target_selector) {
        Ok(target) => run_scenario(&scratch, scenario, target),
        Err(err) => ScenarioOutcome::failed(format!("{err:#}")),
    };
    let cleared = ctx.guard.clear_timers_since(mark);
    if cleared > 0 {
        debug!(component = component_id, cleared, "cleared scenario timers");
    }
    outcome
}

fn resolve_target(ctx: &HarnessContext<'_>, component_id: &str, selector: &str) -> Result<ElementId> {
    let parsed = Selector::parse(selector)?;
    let doc = ctx.page.doc();
    ctx.guard
        .query(|| {
            doc.module_container(component_id)
                .and_then(|scope| doc.select_within(scope, &parsed).into_iter().next())
                .or_else(|| doc.select_first(&parsed))
        })
        .ok_or_else(|| anyhow!("target {selector} not found"))
}

fn click(ctx: &HarnessContext<'_>, target: ElementId) -> ScenarioOutcome {
    let before = ctx.page.doc().signature();
    dispatch(&ctx.page, ctx.guard, target, EventKind::Click);
    observe_change(ctx, &before, "click")
}

fn observe_change(
    ctx: &HarnessContext<'_>,
    before: &crate::dom::StateSignature,
    what: &str,
) -> ScenarioOutcome {
    let change = ctx.wait_until(|| {
        let doc = ctx.page.doc();
        before.first_change(&doc.signature(), &doc)
    });
    match change {
        Some(change) => ScenarioOutcome::ok(format!("{what}: {change}")),
        None => ScenarioOutcome::failed("no observable change"),
    }
}

fn resize(
    ctx: &HarnessContext<'_>,
    scenario: &SimulationScenario,
    target: ElementId,
) -> Result<ScenarioOutcome> {
    let payload: ResizePayload = match &scenario.payload {
        Some(value) => serde_json::from_value(value.clone()).context("parse resize payload")?,
        None => bail!("resize scenario needs a width and height"),
    };
    if payload.width == 0 || payload.height == 0 {
        bail!("resize scenario needs a width and height");
    }
    let viewport = Viewport {
        width: payload.width,
        height: payload.height,
    };
    with_viewport(ctx, viewport, || {
        let doc = ctx.page.doc();
        let element = doc.element(target);
        let label = doc.label(target);
        let size = format!("{}x{}", viewport.width, viewport.height);
        if let Some(class) = &payload.expect_class
            && !element.has_class(class)
        {
            return Ok(ScenarioOutcome::failed(format!(
                "{label} lacks class '{class}' at {size}"
            )));
        }
        if let Some(class) = &payload.expect_absent_class
            && element.has_class(class)
        {
            return Ok(ScenarioOutcome::failed(format!(
                "{label} keeps class '{class}' at {size}"
            )));
        }
        Ok(ScenarioOutcome::ok(format!("layout ok at {size}")))
    })
}

fn form_inputs(doc: &Document, form: ElementId) -> Vec<ElementId> {
    doc.descendants(form)
        .into_iter()
        .filter(|id| {
            matches!(
                doc.element(*id).tag.as_str(),
                "input" | "select" | "textarea"
            )
        })
        .collect()
}

fn submit(ctx: &HarnessContext<'_>, scenario: &SimulationScenario, form: ElementId) -> ScenarioOutcome {
    let inputs = form_inputs(&ctx.page.doc(), form);
    if inputs.is_empty() {
        return ScenarioOutcome::failed("form has no input fields");
    }
    let fields = scenario
        .payload
        .as_ref()
        .and_then(|payload| payload.get("fields"))
        .and_then(Value::as_object);
    if let Some(fields) = fields {
        for input in &inputs {
            let name = ctx.page.doc().element(*input).attr("name").map(str::to_string);
            let Some(value) = name.and_then(|name| fields.get(&name)) else {
                continue;
            };
            let value = value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            ctx.page.doc_mut().set_attr(*input, "value", &value);
            dispatch(&ctx.page, ctx.guard, *input, EventKind::Input);
        }
    }
    let before = ctx.page.doc().signature();
    dispatch(&ctx.page, ctx.guard, form, EventKind::Submit);
    observe_change(ctx, &before, "submit")
}

fn selector_for(doc: &Document, element: ElementId) -> Option<String> {
    let el = doc.element(element);
    if let Some(id) = &el.id {
        return Some(format!("#{id}"));
    }
    if let Some(onclick) = el.attr("onclick")
        && !onclick.contains('"')
    {
        return Some(Selector::attr("onclick", onclick).to_string());
    }
    el.attr("name")
        .map(|name| Selector::attr("name", name).to_string())
}

/// Test values for each named field of `form`.
fn form_payload(doc: &Document, form: ElementId) -> Value {
    let mut fields = serde_json::Map::new();
    for input in form_inputs(doc, form) {
        let element = doc.element(input);
        let Some(name) = element.attr("name") else {
            continue;
        };
        let value = match element.attr("type") {
            Some("email") => "qa@example.com",
            Some("number") => "42",
            Some("tel") => "5555550100",
            _ => "harness test",
        };
        fields.insert(name.to_string(), Value::String(value.to_string()));
    }
    json!({ "fields": fields })
}

/// Scenarios for one component: a navigation click for modules with a
/// navigation element, plus a submit for each form in its container.
pub fn scenarios_for(doc: &Document, component: &ComponentDescriptor) -> Vec<SimulationScenario> {
    if component.kind != ComponentKind::Module {
        return Vec::new();
    }
    let mut scenarios = Vec::new();
    if let Some(selector) = doc
        .navigation_for(&component.id)
        .and_then(|nav| selector_for(doc, nav))
    {
        scenarios.push(SimulationScenario::click(&selector));
    }
    if let Some(container) = doc.module_container(&component.id) {
        for form in doc.select_within(container, &Selector::Tag("form".to_string())) {
            let selector = selector_for(doc, form).unwrap_or_else(|| "form".to_string());
            scenarios.push(SimulationScenario::form_submit(
                &selector,
                Some(form_payload(doc, form)),
            ));
        }
    }
    scenarios
}

/// Responsive scenarios against `.sidebar`, when the page has one.
pub fn layout_scenarios(doc: &Document) -> Vec<SimulationScenario> {
    if doc
        .select_first(&Selector::Class("sidebar".to_string()))
        .is_none()
    {
        return Vec::new();
    }
    BREAKPOINTS
        .iter()
        .map(|(name, width, height)| {
            let mut payload = json!({ "width": width, "height": height });
            match *name {
                "mobile" => payload["expect_class"] = json!(COLLAPSED_CLASS),
                "desktop" => payload["expect_absent_class"] = json!(COLLAPSED_CLASS),
                _ => {}
            }
            SimulationScenario::resize(".sidebar", payload)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRow {
    pub component_id: String,
    pub scenario: SimulationScenario,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub rows: Vec<ScenarioRow>,
    pub results: ValidationResults,
}

impl SimulationReport {
    pub fn failures(&self) -> impl Iterator<Item = &ScenarioRow> {
        self.rows.iter().filter(|row| !row.ok)
    }
}

/// Run the scenario set for every component, then the layout scenarios.
///
/// A component is `Valid` iff all of its scenarios passed.
#[instrument(skip_all, fields(components = components.len()))]
pub fn simulate(ctx: &HarnessContext<'_>, components: &[ComponentDescriptor]) -> SimulationReport {
    let mut report = SimulationReport::default();
    let planned = ctx.guard.try_query(|| {
        let doc = ctx.page.doc();
        let mut plan: Vec<(String, Vec<SimulationScenario>)> = components
            .iter()
            .map(|component| (component.id.clone(), scenarios_for(&doc, component)))
            .collect();
        let layout = layout_scenarios(&doc);
        if !layout.is_empty() {
            plan.push((LAYOUT_COMPONENT.to_string(), layout));
        }
        plan
    });
    // No plan means no scenarios were derived, which is not a pass.
    let Some(plan) = planned else {
        warn!("simulation skipped: page query throttled by the guard");
        for component in components {
            let detail = "page query throttled by the guard";
            report
                .results
                .set(&component.id, ValidationStatus::Invalid, detail, ctx.now_ms());
            ctx.overlay.set_item(&component.id, ValidationStatus::Invalid, detail);
        }
        return report;
    };

    for (id, _) in &plan {
        report
            .results
            .set(id, ValidationStatus::Pending, "pending", ctx.now_ms());
    }
    let total = plan.len();
    ctx.overlay.set_progress(0, total);

    for (index, (id, scenarios)) in plan.iter().enumerate() {
        if ctx.is_cancelled() {
            ctx.note(&format!(
                "simulation cancelled after {index} of {total} components"
            ));
            break;
        }
        report
            .results
            .set(id, ValidationStatus::Active, "simulating", ctx.now_ms());
        let mut failed = Vec::new();
        for scenario in scenarios {
            let outcome = run_isolated(ctx, id, scenario);
            if !outcome.ok {
                failed.push(format!("{}: {}", scenario.target_selector, outcome.detail));
            }
            report.rows.push(ScenarioRow {
                component_id: id.clone(),
                scenario: scenario.clone(),
                ok: outcome.ok,
                detail: outcome.detail,
            });
        }
        let (status, detail) = if scenarios.is_empty() {
            (ValidationStatus::Valid, "no scenarios".to_string())
        } else if failed.is_empty() {
            (
                ValidationStatus::Valid,
                format!("{} scenario(s) passed", scenarios.len()),
            )
        } else {
            (ValidationStatus::Invalid, failed.join("; "))
        };
        report.results.set(id, status, &detail, ctx.now_ms());
        ctx.overlay.set_item(id, status, &detail);
        ctx.overlay.set_progress(index + 1, total);
        ctx.throttle();
    }

    info!(
        scenarios = report.rows.len(),
        failed = report.failures().count(),
        "simulation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::dom::{Action, ElementSpec};
    use crate::guard::GuardLimits;
    use crate::overlay::Overlay;

    fn dashboard(sidebar_responsive: bool) -> Page {
        let mut doc = Document::new();
        let body = doc.body();
        let mut sidebar = ElementSpec::new("nav")
            .class("sidebar")
            .child(
                ElementSpec::new("div")
                    .id("nav-legal")
                    .attr("onclick", "showModule('legal')"),
            )
            .child(
                ElementSpec::new("div")
                    .id("nav-tax")
                    .attr("onclick", "showModule('tax')")
                    .unbound(),
            );
        if sidebar_responsive {
            sidebar = sidebar.on(
                EventKind::Resize,
                Action::Responsive {
                    max_width: 767,
                    class: COLLAPSED_CLASS.into(),
                },
            );
        }
        doc.insert(body, &sidebar);
        doc.insert(
            body,
            &ElementSpec::new("div").id("legal-module").hidden().child(
                ElementSpec::new("form")
                    .id("contract-form")
                    .on(EventKind::Submit, Action::MarkSubmitted)
                    .child(ElementSpec::new("input").attr("name", "client")),
            ),
        );
        doc.insert(
            body,
            &ElementSpec::new("div").id("tax-module").hidden().child(
                ElementSpec::new("form")
                    .id("empty-form")
                    .on(EventKind::Submit, Action::MarkSubmitted),
            ),
        );
        Page::new(doc)
    }

    fn catalog() -> Vec<ComponentDescriptor> {
        vec![
            ComponentDescriptor::module("legal"),
            ComponentDescriptor::module("tax"),
            ComponentDescriptor::tool("lead-cache-system"),
        ]
    }

    #[test]
    fn generates_click_form_and_layout_scenarios() {
        let page = dashboard(true);
        let doc = page.doc();
        let legal = scenarios_for(&doc, &ComponentDescriptor::module("legal"));
        assert_eq!(legal.len(), 2);
        assert_eq!(legal[0], SimulationScenario::click("#nav-legal"));
        assert_eq!(legal[1].kind, ScenarioKind::FormSubmit);
        assert_eq!(
            legal[1].payload.as_ref().expect("payload")["fields"]["client"],
            "harness test"
        );
        assert!(scenarios_for(&doc, &ComponentDescriptor::tool("legal")).is_empty());
        assert_eq!(layout_scenarios(&doc).len(), 3);
    }

    #[test]
    fn simulate_reports_broken_interactions() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let ctx = HarnessContext::new(&guard, dashboard(true), &overlay);
        let report = simulate(&ctx, &catalog());

        let results = &report.results;
        assert_eq!(results.status_of("legal"), Some(ValidationStatus::Valid));
        assert_eq!(results.status_of("tax"), Some(ValidationStatus::Invalid));
        let tax = &results.get("tax").expect("tax").detail;
        assert!(tax.contains("#nav-tax: no observable change"), "{tax}");
        assert!(tax.contains("#empty-form: form has no input fields"), "{tax}");
        assert_eq!(
            results.get("lead-cache-system").expect("tool").detail,
            "no scenarios"
        );
        assert_eq!(results.status_of(LAYOUT_COMPONENT), Some(ValidationStatus::Valid));
        assert!(results.all_terminal());
    }

    #[test]
    fn throttled_planning_marks_every_component_invalid() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let ctx = HarnessContext::new(&guard, dashboard(true), &overlay);
        for _ in 0..guard.limits().max_queries {
            guard.query(|| ());
        }
        let report = simulate(&ctx, &catalog());

        assert!(report.rows.is_empty());
        for component in catalog() {
            let result = report.results.get(&component.id).expect("result");
            assert_eq!(result.status, ValidationStatus::Invalid);
            assert_eq!(result.detail, "page query throttled by the guard");
        }
    }

    #[test]
    fn simulation_is_idempotent_and_leaves_page_untouched() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let page = dashboard(false);
        let before = page.doc().signature();
        let ctx = HarnessContext::new(&guard, page.clone(), &overlay);

        let first = simulate(&ctx, &catalog());
        let second = simulate(&ctx, &catalog());
        let verdicts = |report: &SimulationReport| {
            report
                .rows
                .iter()
                .map(|row| (row.component_id.clone(), row.ok, row.detail.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(verdicts(&first), verdicts(&second));
        assert_eq!(page.doc().signature(), before);
        assert_eq!(guard.status().active_timers, 0);

        let layout = first.results.get(LAYOUT_COMPONENT).expect("layout");
        assert_eq!(layout.status, ValidationStatus::Invalid);
        assert!(layout.detail.contains("lacks class 'collapsed' at 375x667"));
    }

    #[test]
    fn viewport_is_restored_when_scenario_fails() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let page = dashboard(true);
        let ctx = HarnessContext::new(&guard, page.clone(), &overlay);
        let result: Result<()> = with_viewport(
            &ctx,
            Viewport {
                width: 375,
                height: 667,
            },
            || {
                assert_eq!(page.doc().viewport().width, 375);
                bail!("inspection failed")
            },
        );
        assert!(result.is_err());
        assert_eq!(page.doc().viewport(), Viewport::default());
        let sidebar = page
            .doc()
            .select_first(&Selector::Class("sidebar".into()))
            .expect("sidebar");
        assert!(!page.doc().element(sidebar).has_class(COLLAPSED_CLASS));
    }

    #[test]
    fn deferred_handler_is_observed_within_wait() {
        let mut doc = Document::new();
        let body = doc.body();
        doc.insert(
            body,
            &ElementSpec::new("button").id("slow").on(
                EventKind::Click,
                Action::Deferred {
                    delay_ms: 200,
                    action: Box::new(Action::ToggleClass {
                        class: "open".into(),
                        target: None,
                    }),
                },
            ),
        );
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let ctx = HarnessContext::new(&guard, Page::new(doc), &overlay);
        let outcome = run_isolated(&ctx, "none", &SimulationScenario::click("#slow"));
        assert!(outcome.ok, "{}", outcome.detail);
        assert_eq!(outcome.detail, "click: #slow class changed");
    }
}
