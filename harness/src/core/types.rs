//! Shared deterministic types for the harness phases.
//!
//! These types define stable contracts between discovery, simulation, audit,
//! repair and readiness aggregation. They carry no I/O and serialize with
//! stable snake_case names so exported reports stay diffable across runs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// What a catalog entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Module,
    Tool,
    Endpoint,
}

/// Static description of an expected component. Immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub id: String,
    pub kind: ComponentKind,
    pub display_name: String,
}

impl ComponentDescriptor {
    pub fn new(id: &str, kind: ComponentKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            display_name: display_name(id),
        }
    }

    pub fn module(id: &str) -> Self {
        Self::new(id, ComponentKind::Module)
    }

    pub fn tool(id: &str) -> Self {
        Self::new(id, ComponentKind::Tool)
    }
}

/// Human label for a kebab-case id: `lead-generation` -> `Lead Generation`.
pub fn display_name(id: &str) -> String {
    id.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lifecycle of a single component check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Active,
    Valid,
    Invalid,
}

impl ValidationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ValidationStatus::Valid | ValidationStatus::Invalid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Active => "active",
            ValidationStatus::Valid => "valid",
            ValidationStatus::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub component_id: String,
    pub status: ValidationStatus,
    pub detail: String,
    pub timestamp_ms: u64,
}

/// Results keyed by component id, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationResults(IndexMap<String, ValidationResult>);

impl ValidationResults {
    /// One `Pending` result per descriptor, in catalog order.
    pub fn pending(catalog: &[ComponentDescriptor], timestamp_ms: u64) -> Self {
        let mut map = IndexMap::with_capacity(catalog.len());
        for descriptor in catalog {
            map.insert(
                descriptor.id.clone(),
                ValidationResult {
                    component_id: descriptor.id.clone(),
                    status: ValidationStatus::Pending,
                    detail: "pending".to_string(),
                    timestamp_ms,
                },
            );
        }
        Self(map)
    }

    /// Update (or append) the result for `id`. Position is kept on update.
    pub fn set(&mut self, id: &str, status: ValidationStatus, detail: &str, timestamp_ms: u64) {
        let entry = self
            .0
            .entry(id.to_string())
            .or_insert_with(|| ValidationResult {
                component_id: id.to_string(),
                status,
                detail: String::new(),
                timestamp_ms,
            });
        entry.status = status;
        entry.detail = detail.to_string();
        entry.timestamp_ms = timestamp_ms;
    }

    pub fn get(&self, id: &str) -> Option<&ValidationResult> {
        self.0.get(id)
    }

    pub fn status_of(&self, id: &str) -> Option<ValidationStatus> {
        self.0.get(id).map(|result| result.status)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationResult> {
        self.0.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn count(&self, status: ValidationStatus) -> usize {
        self.0.values().filter(|r| r.status == status).count()
    }

    pub fn terminal_count(&self) -> usize {
        self.0.values().filter(|r| r.status.is_terminal()).count()
    }

    pub fn all_terminal(&self) -> bool {
        self.0.values().all(|r| r.status.is_terminal())
    }

    /// Completed share in whole percent, rounded. Empty sets count as done.
    pub fn progress_percent(&self) -> u32 {
        if self.0.is_empty() {
            return 100;
        }
        ((self.terminal_count() as f64 / self.0.len() as f64) * 100.0).round() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    Click,
    Resize,
    FormSubmit,
}

impl ScenarioKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioKind::Click => "click",
            ScenarioKind::Resize => "resize",
            ScenarioKind::FormSubmit => "form_submit",
        }
    }
}

/// One synthetic interaction. Immutable, generated per phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationScenario {
    pub kind: ScenarioKind,
    pub target_selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl SimulationScenario {
    pub fn click(target_selector: &str) -> Self {
        Self {
            kind: ScenarioKind::Click,
            target_selector: target_selector.to_string(),
            payload: None,
        }
    }

    pub fn resize(target_selector: &str, payload: serde_json::Value) -> Self {
        Self {
            kind: ScenarioKind::Resize,
            target_selector: target_selector.to_string(),
            payload: Some(payload),
        }
    }

    pub fn form_submit(target_selector: &str, payload: Option<serde_json::Value>) -> Self {
        Self {
            kind: ScenarioKind::FormSubmit,
            target_selector: target_selector.to_string(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub ok: bool,
    pub detail: String,
}

impl ScenarioOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Structural completeness verdict for a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Complete,
    ContentOnly,
    Incomplete,
    ModuleNotBuilt,
    BrokenInteraction,
    NavigationMissing,
}

impl AuditStatus {
    /// Statuses that make a module eligible for repair.
    pub fn is_failing(self) -> bool {
        matches!(
            self,
            AuditStatus::ModuleNotBuilt
                | AuditStatus::BrokenInteraction
                | AuditStatus::NavigationMissing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Complete => "complete",
            AuditStatus::ContentOnly => "content_only",
            AuditStatus::Incomplete => "incomplete",
            AuditStatus::ModuleNotBuilt => "module_not_built",
            AuditStatus::BrokenInteraction => "broken_interaction",
            AuditStatus::NavigationMissing => "navigation_missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub module_id: String,
    pub status: AuditStatus,
    pub suggestions: Vec<String>,
}

/// Audit counts per status, for the overlay and the architecture check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaSummary {
    pub total: usize,
    pub counts: IndexMap<String, usize>,
    pub suggestions: usize,
}

impl QaSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a AuditOutcome>) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            summary.total += 1;
            summary.suggestions += outcome.suggestions.len();
            *summary
                .counts
                .entry(outcome.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        summary
    }

    pub fn count(&self, status: AuditStatus) -> usize {
        self.counts.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn failing(&self) -> usize {
        [
            AuditStatus::ModuleNotBuilt,
            AuditStatus::BrokenInteraction,
            AuditStatus::NavigationMissing,
        ]
        .into_iter()
        .map(|status| self.count(status))
        .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub component_id: String,
    pub agent: String,
    pub applied: bool,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Result of one readiness category check. `score` is clamped to 0..=100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub score: f64,
    pub detail: String,
}

impl CheckResult {
    /// Scores are clamped to `0..=100`; a non-finite score counts as 0.
    pub fn new(status: CheckStatus, score: f64, detail: impl Into<String>) -> Self {
        let score = if score.is_finite() {
            score.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            status,
            score,
            detail: detail.into(),
        }
    }

    pub fn pass(detail: impl Into<String>) -> Self {
        Self::new(CheckStatus::Pass, 100.0, detail)
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self::new(CheckStatus::Fail, 0.0, detail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Ready,
    Conditional,
    NotReady,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Ready => "ready",
            Recommendation::Conditional => "conditional",
            Recommendation::NotReady => "not_ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryReport {
    pub name: String,
    pub status: CheckStatus,
    pub score: f64,
    pub detail: String,
}

/// Aggregated go/no-go summary. Read-only once built; the next run supersedes it.
///
/// `overall_score` is `None` when any component result fed to the aggregator
/// was still pending or active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentReadinessReport {
    pub generated_at: String,
    pub category_scores: IndexMap<String, f64>,
    pub categories: Vec<CategoryReport>,
    pub overall_score: Option<f64>,
    pub critical_issues: Vec<String>,
    pub recommendation: Recommendation,
    pub recommendations: Vec<String>,
}
