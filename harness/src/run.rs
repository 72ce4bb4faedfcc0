//! Full harness run: discovery, simulation, audit, repair, aggregation.
//!
//! Phases run strictly in sequence after the settle delay. Cancellation skips
//! the remaining phases but aggregation always runs, so a cancelled run still
//! yields a (not ready) report.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, instrument};

use crate::audit::audit_all;
use crate::context::HarnessContext;
use crate::core::types::{
    AuditOutcome, ComponentDescriptor, ComponentKind, DeploymentReadinessReport, RepairOutcome,
    ValidationResults,
};
use crate::discovery::enumerate;
use crate::guard::{GuardAudit, GuardStatus};
use crate::io::config::HarnessConfig;
use crate::io::probe::Prober;
use crate::overlay::{Phase, PhaseState};
use crate::readiness::{EnvSource, ProcessEnv, ReadinessInput, aggregate_run, standard_battery};
use crate::repair::{collect_defects, default_agents, run_repairs};
use crate::simulate::{SimulationReport, simulate};

pub struct RunOptions<'a> {
    /// `None` disables endpoint probing.
    pub prober: Option<&'a dyn Prober>,
    pub env: &'a dyn EnvSource,
    pub reports_dir: PathBuf,
    pub repair: bool,
}

impl<'a> RunOptions<'a> {
    pub fn new(reports_dir: PathBuf) -> Self {
        Self {
            prober: None,
            env: &ProcessEnv,
            reports_dir,
            repair: true,
        }
    }

    pub fn with_prober(mut self, prober: &'a dyn Prober) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn with_env(mut self, env: &'a dyn EnvSource) -> Self {
        self.env = env;
        self
    }

    pub fn without_repair(mut self) -> Self {
        self.repair = false;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub results: ValidationResults,
    pub simulation: SimulationReport,
    pub audits: Vec<AuditOutcome>,
    pub repairs: Vec<RepairOutcome>,
    pub report: DeploymentReadinessReport,
    pub guard: GuardStatus,
    pub guard_audit: GuardAudit,
    pub cancelled: bool,
}

/// Mark `phase` active, run it unless the run was cancelled, mark it done.
fn phase<T: Default>(ctx: &HarnessContext<'_>, phase: Phase, run: impl FnOnce() -> T) -> T {
    if ctx.is_cancelled() {
        ctx.overlay.set_phase(phase, PhaseState::Skipped);
        return T::default();
    }
    ctx.overlay.set_phase(phase, PhaseState::Active);
    ctx.note(&format!("{} started", phase.as_str()));
    let out = run();
    let state = if ctx.is_cancelled() {
        PhaseState::Skipped
    } else {
        PhaseState::Done
    };
    ctx.overlay.set_phase(phase, state);
    out
}

#[instrument(skip_all, fields(components = catalog.len()))]
pub fn run_harness(
    ctx: &HarnessContext<'_>,
    catalog: &[ComponentDescriptor],
    config: &HarnessConfig,
    options: &RunOptions<'_>,
) -> RunOutcome {
    let started = ctx.guard.now();
    ctx.settle();

    let mut results = phase(ctx, Phase::Discovery, || enumerate(ctx, catalog));
    if results.is_empty() {
        // Cancelled before discovery: every component is still pending.
        results = ValidationResults::pending(catalog, ctx.now_ms());
    }

    let components: Vec<ComponentDescriptor> = catalog
        .iter()
        .filter(|component| component.kind != ComponentKind::Endpoint)
        .cloned()
        .collect();
    let module_ids: Vec<String> = catalog
        .iter()
        .filter(|component| component.kind == ComponentKind::Module)
        .map(|component| component.id.clone())
        .collect();

    let simulation = phase(ctx, Phase::Simulation, || simulate(ctx, &components));
    let mut audits = phase(ctx, Phase::Audit, || audit_all(ctx, &module_ids));

    let repairs = if options.repair {
        phase(ctx, Phase::Repair, || {
            let defects = collect_defects(&audits, &simulation);
            let repairs = run_repairs(ctx, &default_agents(), &defects);
            let applied = repairs.iter().filter(|repair| repair.applied).count();
            if applied > 0 && !ctx.is_cancelled() {
                ctx.note(&format!("re-validating after {applied} repair(s)"));
                results = enumerate(ctx, catalog);
                audits = audit_all(ctx, &module_ids);
            }
            repairs
        })
    } else {
        ctx.overlay.set_phase(Phase::Repair, PhaseState::Skipped);
        Vec::new()
    };

    // Sampled once: a cancel landing during aggregation must not flip the
    // verdict of a run whose phases all finished.
    let cancelled = ctx.is_cancelled();
    ctx.overlay.set_phase(Phase::Aggregation, PhaseState::Active);
    let run_duration_ms = u64::try_from((ctx.guard.now() - started).as_millis()).unwrap_or(u64::MAX);
    let input = ReadinessInput {
        catalog,
        results: &results,
        simulation: Some(&simulation),
        audits: &audits,
        page: &ctx.page,
        guard: ctx.guard,
        prober: options.prober,
        config,
        env: options.env,
        reports_dir: options.reports_dir.clone(),
        run_duration_ms,
    };
    let report = aggregate_run(&standard_battery(&input), Some(&results), cancelled);
    ctx.overlay
        .set_readiness(report.overall_score, report.recommendation);
    ctx.overlay.set_phase(Phase::Aggregation, PhaseState::Done);

    info!(
        cancelled,
        recommendation = report.recommendation.as_str(),
        duration_ms = run_duration_ms,
        "harness run finished"
    );
    RunOutcome {
        results,
        simulation,
        audits,
        repairs,
        report,
        guard: ctx.guard.status(),
        guard_audit: ctx.guard.audit(),
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cancel::CancelToken;
    use crate::core::types::{AuditStatus, Recommendation, ValidationStatus};
    use crate::dom::{Document, ElementSpec, Page};
    use crate::guard::{Guard, GuardLimits};
    use crate::overlay::Overlay;

    fn page() -> Page {
        let mut doc = Document::new();
        let body = doc.body();
        doc.insert(
            body,
            &ElementSpec::new("nav").class("sidebar").child(
                ElementSpec::new("div")
                    .id("nav-legal")
                    .attr("onclick", "showModule('legal')")
                    .unbound(),
            ),
        );
        doc.insert(
            body,
            &ElementSpec::new("div")
                .id("legal-module")
                .class("module-view")
                .hidden()
                .child(ElementSpec::new("h2").text("Legal")),
        );
        Page::new(doc)
    }

    #[test]
    fn run_repairs_and_revalidates() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let ctx = HarnessContext::new(&guard, page(), &overlay);
        let temp = tempfile::tempdir().expect("tempdir");
        let catalog = vec![ComponentDescriptor::module("legal")];
        let outcome = run_harness(
            &ctx,
            &catalog,
            &HarnessConfig::default(),
            &RunOptions::new(temp.path().join("reports")),
        );

        assert!(!outcome.cancelled);
        assert!(outcome.repairs.iter().any(|repair| repair.applied));
        assert_eq!(outcome.audits[0].status, AuditStatus::Incomplete);
        assert_eq!(outcome.results.status_of("legal"), Some(ValidationStatus::Valid));
        assert!(outcome.report.overall_score.is_some());
        let snapshot = overlay.snapshot();
        for phase in Phase::ALL {
            assert_eq!(snapshot.phase_state(phase), PhaseState::Done, "{phase:?}");
        }
    }

    #[test]
    fn cancel_after_discovery_withholds_overall_score() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let token = overlay.cancel_token().clone();
        // Fires on the first timer pump, which is the simulated click.
        let scheduled = guard.schedule_timeout(
            Duration::ZERO,
            Box::new(move |_: &Guard| {
                token.cancel();
                Ok(())
            }),
        );
        assert!(scheduled.is_some());
        let ctx = HarnessContext::new(&guard, page(), &overlay);
        let temp = tempfile::tempdir().expect("tempdir");
        let outcome = run_harness(
            &ctx,
            &[ComponentDescriptor::module("legal")],
            &HarnessConfig::default(),
            &RunOptions::new(temp.path().join("reports")),
        );

        assert!(outcome.cancelled);
        assert!(outcome.results.all_terminal());
        assert!(outcome.audits.is_empty());
        assert_eq!(outcome.report.overall_score, None);
        assert_eq!(outcome.report.recommendation, Recommendation::NotReady);
        assert!(
            outcome
                .report
                .critical_issues
                .iter()
                .any(|issue| issue.starts_with("run cancelled"))
        );
        let snapshot = overlay.snapshot();
        assert_eq!(snapshot.phase_state(Phase::Discovery), PhaseState::Done);
        assert_eq!(snapshot.phase_state(Phase::Audit), PhaseState::Skipped);
    }

    #[test]
    fn cancelled_run_reports_not_ready() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        overlay.close();
        let ctx = HarnessContext::new(&guard, page(), &overlay);
        let temp = tempfile::tempdir().expect("tempdir");
        let catalog = vec![
            ComponentDescriptor::module("legal"),
            ComponentDescriptor::module("tax"),
        ];
        let outcome = run_harness(
            &ctx,
            &catalog,
            &HarnessConfig::default(),
            &RunOptions::new(temp.path().join("reports")),
        );

        assert!(outcome.cancelled);
        assert_eq!(outcome.results.count(ValidationStatus::Pending), 2);
        assert_eq!(outcome.report.overall_score, None);
        assert_eq!(outcome.report.recommendation, Recommendation::NotReady);
        let snapshot = overlay.snapshot();
        assert_eq!(snapshot.phase_state(Phase::Discovery), PhaseState::Skipped);
        assert_eq!(snapshot.phase_state(Phase::Aggregation), PhaseState::Done);
    }
}
