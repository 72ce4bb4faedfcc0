//! Deployment readiness aggregation.
//!
//! Category checks each return a [`CheckResult`]; the aggregator folds them
//! into a [`DeploymentReadinessReport`]. A failing check never stops the
//! others from running.

pub mod checks;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use tracing::{info, instrument, warn};

use crate::core::scoring::{mean, recommendation_for};
use crate::core::types::{
    CategoryReport, CheckResult, CheckStatus, DeploymentReadinessReport, Recommendation,
    ValidationResults,
};

pub use checks::{EnvSource, ProcessEnv, ReadinessInput, standard_battery};

/// A named readiness category backed by a closure.
pub struct CategoryCheck<'a> {
    name: String,
    run: Box<dyn Fn() -> Result<CheckResult> + 'a>,
}

impl<'a> CategoryCheck<'a> {
    pub fn new(name: &str, run: impl Fn() -> Result<CheckResult> + 'a) -> Self {
        Self {
            name: name.to_string(),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self) -> Result<CheckResult> {
        (self.run)()
    }
}

impl std::fmt::Debug for CategoryCheck<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryCheck")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Fold category checks into a report.
///
/// When `results` holds any non-terminal entry the overall score is `None`
/// and the recommendation is `NotReady`, whatever the categories scored.
pub fn aggregate(
    checks: &[CategoryCheck<'_>],
    results: Option<&ValidationResults>,
) -> DeploymentReadinessReport {
    aggregate_run(checks, results, false)
}

/// [`aggregate`] for a run that may have been cancelled. A cancelled run
/// never gets an overall score: its later phases saw no data, so the
/// categories fed by them are not meaningful.
#[instrument(skip_all, fields(checks = checks.len(), cancelled = cancelled))]
pub fn aggregate_run(
    checks: &[CategoryCheck<'_>],
    results: Option<&ValidationResults>,
    cancelled: bool,
) -> DeploymentReadinessReport {
    let mut critical_issues = Vec::new();
    if let Some(results) = results
        && !results.all_terminal()
    {
        let unfinished = results.len() - results.terminal_count();
        critical_issues.push(format!(
            "run incomplete: {unfinished} of {} components did not reach a terminal status",
            results.len()
        ));
    }
    if cancelled {
        critical_issues.push("run cancelled: remaining phases were skipped".to_string());
    }
    let complete = critical_issues.is_empty();

    let mut category_scores = IndexMap::new();
    let mut categories = Vec::with_capacity(checks.len());
    for check in checks {
        let (result, issue) = match check.run() {
            Ok(result) => {
                let issue = (result.status == CheckStatus::Fail)
                    .then(|| format!("{}: {}", check.name(), result.detail));
                (result, issue)
            }
            Err(err) => {
                warn!(category = check.name(), error = %format!("{err:#}"), "readiness check failed");
                let detail = format!("check failed: {err:#}");
                let issue = format!("{}: {detail}", check.name());
                (CheckResult::fail(detail), Some(issue))
            }
        };
        critical_issues.extend(issue);
        category_scores.insert(check.name().to_string(), result.score);
        categories.push(CategoryReport {
            name: check.name().to_string(),
            status: result.status,
            score: result.score,
            detail: result.detail,
        });
    }

    let scores: Vec<f64> = category_scores.values().copied().collect();
    let overall_score = if complete { mean(&scores) } else { None };
    if complete && overall_score.is_none() {
        critical_issues.push("no readiness checks ran".to_string());
    }
    let recommendation = overall_score.map_or(Recommendation::NotReady, recommendation_for);
    let recommendations = recommendations_for(overall_score, &category_scores, &critical_issues);

    info!(
        overall = ?overall_score,
        recommendation = recommendation.as_str(),
        critical = critical_issues.len(),
        "readiness aggregated"
    );
    DeploymentReadinessReport {
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        category_scores,
        categories,
        overall_score,
        critical_issues,
        recommendation,
        recommendations,
    }
}

fn recommendations_for(
    overall: Option<f64>,
    scores: &IndexMap<String, f64>,
    critical_issues: &[String],
) -> Vec<String> {
    let mut out = Vec::new();
    if overall.is_none_or(|score| score < 85.0) {
        out.push("System requires optimization before production deployment".to_string());
    }
    if scores.get("security").is_some_and(|score| *score < 90.0) {
        out.push("Security measures need strengthening".to_string());
    }
    if scores.get("performance").is_some_and(|score| *score < 80.0) {
        out.push("Performance optimization required".to_string());
    }
    if !critical_issues.is_empty() {
        out.push("Critical issues must be resolved before deployment".to_string());
    }
    if out.is_empty() {
        out.push("System is ready for production deployment".to_string());
    }
    out
}
