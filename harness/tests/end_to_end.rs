//! Whole-pipeline scenarios driven through the library API on virtual time.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use harness::audit::audit_module;
use harness::cancel::{CancelToken, write_cancel_marker};
use harness::context::HarnessContext;
use harness::core::types::{AuditStatus, ComponentDescriptor, Recommendation, ValidationStatus};
use harness::discovery::enumerate;
use harness::dom::{ElementSpec, load_page};
use harness::guard::{Guard, GuardLimits};
use harness::io::config::HarnessConfig;
use harness::overlay::Overlay;
use harness::run::{RunOptions, run_harness};
use harness::test_support::{
    FakeProber, TestHarness, module_view, nav_item, page_with, prose, temp_state,
};

fn fixture(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

#[test]
fn directly_mounted_content_without_navigation_is_content_only() {
    let harness = TestHarness::new();
    let page = page_with(vec![
        ElementSpec::new("div").id("qnis-module").text(&prose(150)),
    ]);
    let ctx = harness.ctx(page);
    let results = enumerate(&ctx, &[ComponentDescriptor::module("qnis")]);
    assert_eq!(results.status_of("qnis"), Some(ValidationStatus::Valid));

    let outcome = audit_module(&ctx, "qnis");
    assert_eq!(outcome.status, AuditStatus::ContentOnly);
    assert!(outcome.suggestions.iter().any(|s| !s.is_empty()));
}

#[test]
fn modules_found_by_discovery_are_never_navigation_missing() {
    let harness = TestHarness::new();
    let page = load_page(&fixture("dashboard.json")).expect("page");
    let ctx = harness.ctx(page);
    let catalog: Vec<ComponentDescriptor> = ["qnis", "legal", "tax", "voice"]
        .into_iter()
        .map(ComponentDescriptor::module)
        .collect();
    let results = enumerate(&ctx, &catalog);
    for result in results.iter() {
        if result.status == ValidationStatus::Valid {
            let outcome = audit_module(&ctx, &result.component_id);
            assert_ne!(
                outcome.status,
                AuditStatus::NavigationMissing,
                "{}",
                result.component_id
            );
        }
    }
}

#[test]
fn missing_module_lowers_business_logic() {
    let harness = TestHarness::new();
    let page = page_with(vec![
        nav_item("qnis"),
        module_view("qnis", &prose(150)),
    ]);
    let ctx = harness.ctx(page);
    let (_temp, paths) = temp_state().expect("state");
    let catalog = vec![
        ComponentDescriptor::module("qnis"),
        ComponentDescriptor::module("tradingbot"),
    ];
    let prober = FakeProber::healthy();
    let options = RunOptions::new(paths.reports_dir.clone())
        .with_prober(&prober)
        .without_repair();
    let outcome = run_harness(&ctx, &catalog, &HarnessConfig::default(), &options);

    assert_eq!(
        outcome.results.status_of("tradingbot"),
        Some(ValidationStatus::Invalid)
    );
    let business = outcome.report.category_scores["business_logic"];
    assert!(business < 100.0, "business_logic = {business}");
    assert!(outcome.repairs.is_empty());
}

#[test]
fn healthy_page_is_ready_and_probes_each_endpoint_once() {
    let harness = TestHarness::new();
    let page = page_with(vec![
        nav_item("qnis"),
        module_view("qnis", &prose(150)),
    ]);
    let ctx = harness.ctx(page);
    let (_temp, paths) = temp_state().expect("state");
    let prober = FakeProber::healthy();
    let options = RunOptions::new(paths.reports_dir.clone()).with_prober(&prober);
    let outcome = run_harness(
        &ctx,
        &[ComponentDescriptor::module("qnis")],
        &HarnessConfig::default(),
        &options,
    );

    assert_eq!(outcome.report.overall_score, Some(100.0));
    assert_eq!(outcome.report.recommendation, Recommendation::Ready);
    assert!(outcome.report.critical_issues.is_empty());
    let mut calls = prober.calls();
    let total = calls.len();
    calls.sort();
    calls.dedup();
    assert_eq!(total, 10);
    assert_eq!(calls.len(), 10);
}

#[test]
fn discovery_results_follow_catalog_order_and_finish() {
    let harness = TestHarness::new();
    let page = load_page(&fixture("dashboard.json")).expect("page");
    let ctx = harness.ctx(page);
    let catalog = vec![
        ComponentDescriptor::module("tax"),
        ComponentDescriptor::module("qnis"),
        ComponentDescriptor::module("voice"),
        ComponentDescriptor::tool("canvas-map-renderer"),
    ];
    let results = enumerate(&ctx, &catalog);
    let ids: Vec<&str> = results.ids().collect();
    assert_eq!(ids, vec!["tax", "qnis", "voice", "canvas-map-renderer"]);
    assert!(results.all_terminal());
    assert_eq!(results.progress_percent(), 100);
    assert_eq!(results.status_of("voice"), Some(ValidationStatus::Invalid));
    assert_eq!(harness.overlay.snapshot().percent, 100);
}

#[test]
fn fixture_run_repairs_broken_modules() {
    let harness = TestHarness::new();
    let page = load_page(&fixture("dashboard.json")).expect("page");
    let ctx = harness.ctx(page.clone());
    let (_temp, paths) = temp_state().expect("state");
    let catalog = vec![
        ComponentDescriptor::module("qnis"),
        ComponentDescriptor::module("legal"),
        ComponentDescriptor::module("tax"),
    ];
    let outcome = run_harness(
        &ctx,
        &catalog,
        &HarnessConfig::default(),
        &RunOptions::new(paths.reports_dir.clone()),
    );

    let applied: Vec<(&str, &str)> = outcome
        .repairs
        .iter()
        .filter(|repair| repair.applied)
        .map(|repair| (repair.component_id.as_str(), repair.agent.as_str()))
        .collect();
    assert_eq!(
        applied,
        vec![("legal", "navigation"), ("tax", "module_scaffold")]
    );
    let statuses: Vec<AuditStatus> = outcome.audits.iter().map(|audit| audit.status).collect();
    assert_eq!(
        statuses,
        vec![
            AuditStatus::Complete,
            AuditStatus::Incomplete,
            AuditStatus::Incomplete
        ]
    );
    assert!(page.doc().by_id("tax-module").is_some());
    // Endpoint probing was off, so the endpoint categories hold the run back.
    assert_ne!(outcome.report.recommendation, Recommendation::Ready);
}

#[test]
fn timer_limit_rejects_the_101st_timeout() {
    let guard = Guard::manual(GuardLimits::default());
    for _ in 0..100 {
        let id = guard.schedule_timeout(Duration::from_secs(60), Box::new(|_: &Guard| Ok(())));
        assert!(id.is_some());
    }
    let rejected = guard.schedule_timeout(Duration::from_secs(60), Box::new(|_: &Guard| Ok(())));
    assert!(rejected.is_none());
    let status = guard.status();
    assert_eq!(status.active_timers, 100);
    assert_eq!(status.rejected_timers, 1);
}

fn recurse(guard: &Guard, calls: &Cell<usize>) {
    guard.with_depth_guard("recurse", || {
        calls.set(calls.get() + 1);
        recurse(guard, calls);
        Ok(())
    });
}

#[test]
fn unbounded_recursion_terminates() {
    let guard = Guard::manual(GuardLimits::default());
    let calls = Cell::new(0);
    recurse(&guard, &calls);
    assert!(calls.get() <= guard.limits().max_depth + 1);
    assert_eq!(guard.status().skipped_calls, 1);
    assert_eq!(guard.state().recursion_depth, 0);
}

#[test]
fn self_rescheduling_timeout_is_bounded_by_the_timer_limit() {
    fn reschedule(guard: &Guard, fired: Rc<Cell<usize>>) {
        let again = Rc::clone(&fired);
        guard.schedule_timeout(
            Duration::from_millis(10),
            Box::new(move |guard: &Guard| {
                again.set(again.get() + 1);
                reschedule(guard, Rc::clone(&again));
                reschedule(guard, Rc::clone(&again));
                Ok(())
            }),
        );
    }
    let guard = Guard::manual(GuardLimits::default());
    let fired = Rc::new(Cell::new(0));
    reschedule(&guard, Rc::clone(&fired));
    for _ in 0..20 {
        guard.sleep(Duration::from_millis(10));
        guard.run_due();
    }
    assert!(guard.status().active_timers <= guard.limits().max_timers);
}

#[test]
fn cancel_marker_stops_the_run() {
    let (_temp, paths) = temp_state().expect("state");
    write_cancel_marker(&paths.cancel_path).expect("marker");

    let guard = Guard::manual(GuardLimits::default());
    let overlay = Overlay::new(CancelToken::with_marker(paths.cancel_path.clone()));
    let page = page_with(vec![nav_item("qnis"), module_view("qnis", &prose(150))]);
    let ctx = HarnessContext::new(&guard, page, &overlay);
    let outcome = run_harness(
        &ctx,
        &[ComponentDescriptor::module("qnis")],
        &HarnessConfig::default(),
        &RunOptions::new(paths.reports_dir.clone()),
    );
    assert!(outcome.cancelled);
    assert_eq!(outcome.report.overall_score, None);
    assert_eq!(outcome.report.recommendation, Recommendation::NotReady);
    assert!(
        outcome.report.critical_issues[0].starts_with("run incomplete: 1 of 1")
    );
}
