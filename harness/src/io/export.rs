//! Readiness report export, validated against the bundled JSON schema.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use jsonschema::Draft;
use serde_json::Value;
use tracing::info;

use crate::core::types::DeploymentReadinessReport;

pub const REPORT_SCHEMA: &str = include_str!("../../schemas/readiness_report.schema.json");

const REPORT_PREFIX: &str = "deployment-report-";

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(REPORT_SCHEMA).context("parse report schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| anyhow!("invalid schema: {}", err))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("report schema validation failed: {}", messages.join("; "));
    }
    Ok(())
}

/// `deployment-report-<UTC timestamp>.json`, stamped from `generated_at`.
pub fn report_file_name(report: &DeploymentReadinessReport) -> String {
    let stamp = DateTime::parse_from_rfc3339(&report.generated_at)
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    format!("{REPORT_PREFIX}{}.json", stamp.format("%Y%m%dT%H%M%SZ"))
}

/// Validate and write `report` under `dir`. A report generated in the same
/// second as an existing export gets a numeric suffix.
pub fn export_report(dir: &Path, report: &DeploymentReadinessReport) -> Result<PathBuf> {
    let value = serde_json::to_value(report).context("serialize report")?;
    validate_schema(&value)?;
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let name = report_file_name(report);
    let mut path = dir.join(&name);
    let stem = name.trim_end_matches(".json");
    let mut suffix = 1;
    while path.exists() {
        path = dir.join(format!("{stem}-{suffix}.json"));
        suffix += 1;
    }

    let mut buf = serde_json::to_string_pretty(&value).context("serialize report")?;
    buf.push('\n');
    super::write_atomic(&path, &buf)?;
    info!(path = %path.display(), "report exported");
    Ok(path)
}

/// Parse an exported report, checking it against the schema first.
pub fn validate_report_file(path: &Path) -> Result<DeploymentReadinessReport> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read report {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse report {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate report {}", path.display()))?;
    serde_json::from_value(value).with_context(|| format!("deserialize report {}", path.display()))
}

/// Exported report paths in `dir`, oldest first. A missing dir is empty.
pub fn list_reports(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut reports = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry?.path();
        let is_report = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(REPORT_PREFIX) && name.ends_with(".json"));
        if is_report {
            reports.push(path);
        }
    }
    reports.sort();
    Ok(reports)
}
