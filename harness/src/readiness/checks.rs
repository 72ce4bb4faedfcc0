//! The fixed battery of readiness categories.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::scoring::{mean, ratio_score, status_for_score};
use crate::core::types::{
    AuditOutcome, CheckResult, CheckStatus, ComponentDescriptor, ComponentKind, ValidationResults,
    ValidationStatus,
};
use crate::dom::{Document, Page};
use crate::guard::Guard;
use crate::io::config::HarnessConfig;
use crate::io::probe::{ProbeResponse, Prober};
use crate::readiness::CategoryCheck;
use crate::simulate::SimulationReport;

pub const HEALTH_ENDPOINTS: [&str; 2] = ["/health", "/api/ready"];
pub const DATA_ENDPOINTS: [&str; 3] = ["/cached_leads.json", "/api/qnis/leads", "/api/leads"];
pub const API_ENDPOINTS: [&str; 5] = [
    "/api/dashboard/metrics",
    "/api/metrics",
    "/api/nexus/status",
    "/api/business-metrics",
    "/api/vault/status",
];

/// Markers that must never show up in page text or attributes.
const SECRET_MARKERS: [&str; 4] = ["admin_secret", "password=", "api_key=", "secret_key"];

/// Environment lookups, so tests never touch the process environment.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Everything the battery reads. Probing is disabled when `prober` is `None`.
pub struct ReadinessInput<'a> {
    pub catalog: &'a [ComponentDescriptor],
    pub results: &'a ValidationResults,
    pub simulation: Option<&'a SimulationReport>,
    pub audits: &'a [AuditOutcome],
    pub page: &'a Page,
    pub guard: &'a Guard,
    pub prober: Option<&'a dyn Prober>,
    pub config: &'a HarnessConfig,
    pub env: &'a dyn EnvSource,
    pub reports_dir: PathBuf,
    pub run_duration_ms: u64,
}

/// The ten categories, in report order.
pub fn standard_battery<'a>(input: &'a ReadinessInput<'a>) -> Vec<CategoryCheck<'a>> {
    vec![
        CategoryCheck::new("security", move || security(input)),
        CategoryCheck::new("performance", move || performance(input)),
        CategoryCheck::new("health", move || Ok(endpoints(input.prober, &HEALTH_ENDPOINTS))),
        CategoryCheck::new("business_logic", move || Ok(business_logic(input))),
        CategoryCheck::new("architecture", move || Ok(architecture(input))),
        CategoryCheck::new("data_pipeline", move || Ok(data_pipeline(input.prober))),
        CategoryCheck::new("api", move || Ok(endpoints(input.prober, &API_ENDPOINTS))),
        CategoryCheck::new("assets", move || assets(input)),
        CategoryCheck::new("storage", move || storage(input)),
        CategoryCheck::new("environment", move || Ok(environment(input))),
    ]
}

/// Score a list of named pass/fail tests as a ratio.
fn tally(tests: &[(&str, bool)], all_passed: &str) -> CheckResult {
    let passed = tests.iter().filter(|(_, ok)| *ok).count();
    let Some(score) = ratio_score(passed, tests.len()) else {
        return CheckResult::pass(all_passed);
    };
    let failed: Vec<&str> = tests
        .iter()
        .filter(|(_, ok)| !*ok)
        .map(|(name, _)| *name)
        .collect();
    let detail = if failed.is_empty() {
        all_passed.to_string()
    } else {
        format!("failed: {}", failed.join(", "))
    };
    CheckResult::new(status_for_score(score), score, detail)
}

/// Read the page through the guard's query accounting. A throttled read is
/// an error so the category fails instead of passing on an empty answer.
fn read_page<T>(input: &ReadinessInput<'_>, read: impl FnOnce(&Document) -> T) -> Result<T> {
    input
        .guard
        .try_query(|| read(&input.page.doc()))
        .context("page query throttled by the guard")
}

fn security(input: &ReadinessInput<'_>) -> Result<CheckResult> {
    let (script_markup, leaked_secret) = read_page(input, |doc| {
        let mut script_markup = false;
        let mut leaked_secret = false;
        for id in doc.all() {
            let element = doc.element(id);
            let haystacks = std::iter::once(element.text.as_str())
                .chain(element.attrs.values().map(String::as_str));
            for haystack in haystacks {
                let lowered = haystack.to_lowercase();
                script_markup |= element.tag != "script" && lowered.contains("<script");
                leaked_secret |= SECRET_MARKERS.iter().any(|marker| lowered.contains(marker));
            }
        }
        (script_markup, leaked_secret)
    })?;
    let mut tests = vec![
        ("xss protection", !script_markup),
        ("no leaked secrets", !leaked_secret),
    ];
    let base = input.config.probe.base_url.as_str();
    if !base.is_empty() {
        let https = base.starts_with("https://")
            || base.starts_with("http://localhost")
            || base.starts_with("http://127.0.0.1");
        tests.push(("https enforcement", https));
    }
    Ok(tally(&tests, "all security tests passed"))
}

fn performance(input: &ReadinessInput<'_>) -> Result<CheckResult> {
    let elements = read_page(input, Document::element_count)?;
    let limits = &input.config.readiness;
    let tests = [
        ("dom size", elements < limits.max_dom_elements),
        ("guard headroom", !input.guard.is_saturated()),
        ("run duration", input.run_duration_ms <= limits.max_run_ms),
    ];
    let result = tally(&tests, "all performance tests passed");
    Ok(CheckResult::new(
        result.status,
        result.score,
        format!("{} ({elements} elements, {} ms)", result.detail, input.run_duration_ms),
    ))
}

fn probe(prober: &dyn Prober, path: &str) -> Option<ProbeResponse> {
    prober
        .get(path)
        .map_err(|err| debug!(path, error = %format!("{err:#}"), "probe failed"))
        .ok()
}

fn describe(path: &str, response: Option<&ProbeResponse>) -> String {
    match response {
        Some(response) => format!("{path} ({})", response.status),
        None => format!("{path} (unreachable)"),
    }
}

/// Operational fraction of `paths`.
fn endpoints(prober: Option<&dyn Prober>, paths: &[&str]) -> CheckResult {
    let Some(prober) = prober else {
        return CheckResult::fail("endpoint probing disabled");
    };
    let mut degraded = Vec::new();
    for path in paths {
        let response = probe(prober, path);
        if !response.as_ref().is_some_and(ProbeResponse::is_operational) {
            degraded.push(describe(path, response.as_ref()));
        }
    }
    let operational = paths.len() - degraded.len();
    let score = ratio_score(operational, paths.len()).unwrap_or(100.0);
    let detail = if degraded.is_empty() {
        format!("{operational}/{} endpoints operational", paths.len())
    } else {
        format!("degraded: {}", degraded.join(", "))
    };
    CheckResult::new(status_for_score(score), score, detail)
}

/// Like [`endpoints`], but an empty array only earns half credit.
fn data_pipeline(prober: Option<&dyn Prober>) -> CheckResult {
    let Some(prober) = prober else {
        return CheckResult::fail("endpoint probing disabled");
    };
    let mut scores = Vec::new();
    let mut notes = Vec::new();
    let mut empty = false;
    for path in DATA_ENDPOINTS {
        let response = probe(prober, path);
        let score = match response.as_ref() {
            Some(response) if response.is_operational() => match response.array_len() {
                Some(0) => {
                    empty = true;
                    notes.push(format!("{path} returned no records"));
                    50.0
                }
                _ => 100.0,
            },
            other => {
                notes.push(format!("degraded: {}", describe(path, other)));
                0.0
            }
        };
        scores.push(score);
    }
    let score = mean(&scores).unwrap_or(0.0);
    let mut status = status_for_score(score);
    if empty && status == CheckStatus::Pass {
        status = CheckStatus::Warn;
    }
    let detail = if notes.is_empty() {
        "all data sources returned records".to_string()
    } else {
        notes.join("; ")
    };
    CheckResult::new(status, score, detail)
}

fn business_logic(input: &ReadinessInput<'_>) -> CheckResult {
    let modules: Vec<&ComponentDescriptor> = input
        .catalog
        .iter()
        .filter(|component| component.kind == ComponentKind::Module)
        .collect();
    let valid = modules
        .iter()
        .filter(|module| input.results.status_of(&module.id) == Some(ValidationStatus::Valid))
        .count();
    let Some(score) = ratio_score(valid, modules.len()) else {
        return CheckResult::pass("no modules in catalog");
    };
    let missing: Vec<&str> = modules
        .iter()
        .filter(|module| input.results.status_of(&module.id) != Some(ValidationStatus::Valid))
        .map(|module| module.id.as_str())
        .collect();
    let mut detail = format!("{valid}/{} modules valid", modules.len());
    if !missing.is_empty() {
        detail.push_str(&format!("; invalid: {}", missing.join(", ")));
    }
    CheckResult::new(status_for_score(score), score, detail)
}

/// Modules that passed the audit and scenarios that passed simulation.
fn architecture(input: &ReadinessInput<'_>) -> CheckResult {
    let audit_ok = input
        .audits
        .iter()
        .filter(|outcome| !outcome.status.is_failing())
        .count();
    let (rows, rows_ok) = input.simulation.map_or((0, 0), |report| {
        (report.rows.len(), report.rows.iter().filter(|row| row.ok).count())
    });
    let total = input.audits.len() + rows;
    let Some(score) = ratio_score(audit_ok + rows_ok, total) else {
        return CheckResult::new(CheckStatus::Warn, 50.0, "no audit or simulation data");
    };
    CheckResult::new(
        status_for_score(score),
        score,
        format!(
            "{audit_ok}/{} modules wired, {rows_ok}/{rows} scenarios passed",
            input.audits.len()
        ),
    )
}

fn assets(input: &ReadinessInput<'_>) -> Result<CheckResult> {
    let referenced: Vec<String> = read_page(input, |doc| {
        doc.all()
            .into_iter()
            .filter_map(|id| {
                let element = doc.element(id);
                let reference = match element.tag.as_str() {
                    "link" => element.attr("href"),
                    "script" => element.attr("src"),
                    _ => None,
                };
                reference.map(str::to_string)
            })
            .collect()
    })?;
    let tests: Vec<(&str, bool)> = input
        .config
        .readiness
        .required_assets
        .iter()
        .map(|asset| (asset.as_str(), referenced.contains(asset)))
        .collect();
    Ok(tally(&tests, "all required assets referenced"))
}

fn storage(input: &ReadinessInput<'_>) -> Result<CheckResult> {
    let dir = &input.reports_dir;
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let probe = dir.join(".write-check");
    fs::write(&probe, b"ok").with_context(|| format!("write {}", probe.display()))?;
    fs::remove_file(&probe).with_context(|| format!("remove {}", probe.display()))?;
    Ok(CheckResult::pass(format!("{} writable", dir.display())))
}

fn environment(input: &ReadinessInput<'_>) -> CheckResult {
    let tests: Vec<(&str, bool)> = input
        .config
        .readiness
        .required_env
        .iter()
        .map(|name| {
            let set = input.env.var(name).is_some_and(|value| !value.is_empty());
            (name.as_str(), set)
        })
        .collect();
    tally(&tests, "all required environment variables set")
}
