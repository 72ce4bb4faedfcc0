//! Component catalog: the built-in platform inventory and TOML catalogs.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::core::types::{ComponentDescriptor, ComponentKind, display_name};

/// Sidebar modules expected on the dashboard.
pub const DEFAULT_MODULES: &[&str] = &[
    "business",
    "legal",
    "accounting",
    "tax",
    "ai",
    "qnis",
    "leads",
    "analytics",
    "workflow",
    "voice",
    "trading",
    "admin",
    "apikeys",
    "investor",
    "pricing",
    "contact",
    "cta",
    "pitchgen",
    "copybuilder",
    "research",
    "voicecommand",
    "scriptbuilder",
    "memory",
    "watson",
    "overview",
    "leadgen",
    "workflows",
    "tradingbot",
    "whitelabel",
    "emailcampaign",
    "logs",
    "theme",
    "moduleloader",
    "nexus-oversight",
    "lead-generation",
    "automation",
    "watson-command",
    "admin-control",
];

/// Supporting tools that surface as page elements rather than sidebar modules.
pub const DEFAULT_TOOLS: &[&str] = &[
    "api-vault-system",
    "lead-cache-system",
    "dom-binding-verifier",
    "kpi-metrics-injector",
    "real-time-updater",
    "geolocation-services",
    "canvas-map-renderer",
    "lead-marker-system",
    "voice-recognition-engine",
    "lead-processing-pipeline",
];

pub fn default_catalog() -> Vec<ComponentDescriptor> {
    DEFAULT_MODULES
        .iter()
        .map(|id| ComponentDescriptor::module(id))
        .chain(DEFAULT_TOOLS.iter().map(|id| ComponentDescriptor::tool(id)))
        .collect()
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    component: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: String,
    #[serde(default = "default_kind")]
    kind: ComponentKind,
    display_name: Option<String>,
}

fn default_kind() -> ComponentKind {
    ComponentKind::Module
}

/// Parse a catalog TOML document (`[[component]]` tables).
pub fn parse_catalog(contents: &str) -> Result<Vec<ComponentDescriptor>> {
    let file: CatalogFile = toml::from_str(contents).context("parse catalog toml")?;
    let catalog: Vec<ComponentDescriptor> = file
        .component
        .into_iter()
        .map(|entry| ComponentDescriptor {
            display_name: entry
                .display_name
                .unwrap_or_else(|| display_name(&entry.id)),
            id: entry.id,
            kind: entry.kind,
        })
        .collect();
    let errors = validate_catalog(&catalog);
    if !errors.is_empty() {
        bail!("catalog violations:\n- {}", errors.join("\n- "));
    }
    Ok(catalog)
}

pub fn load_catalog(path: &Path) -> Result<Vec<ComponentDescriptor>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_catalog(&contents).with_context(|| format!("load catalog {}", path.display()))
}

/// Check catalog invariants:
/// - ids are non-empty and unique
/// - ids are usable in element ids (no whitespace or quotes)
pub fn validate_catalog(catalog: &[ComponentDescriptor]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (index, descriptor) in catalog.iter().enumerate() {
        if descriptor.id.trim().is_empty() {
            errors.push(format!("component {index}: id must be non-empty"));
            continue;
        }
        if descriptor
            .id
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '"')
        {
            errors.push(format!(
                "component '{}': id must not contain whitespace or quotes",
                descriptor.id
            ));
        }
        if !seen.insert(descriptor.id.as_str()) {
            errors.push(format!("duplicate id '{}'", descriptor.id));
        }
    }
    errors
}
