//! Harness configuration stored under `.harness/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::context::Timing;
use crate::guard::GuardLimits;

/// Harness configuration (TOML).
///
/// Meant to be edited by hand. Missing fields fall back to the defaults the
/// guard and the readiness battery were tuned with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct HarnessConfig {
    pub limits: GuardLimits,
    pub timing: Timing,
    pub probe: ProbeConfig,
    pub readiness: ReadinessConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Base URL the endpoint categories probe. Empty disables probing.
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Environment variables that must be set for `environment` to pass.
    pub required_env: Vec<String>,
    /// Stylesheet/script references that must appear in the page.
    pub required_assets: Vec<String>,
    /// `performance` fails at or above this many elements.
    pub max_dom_elements: usize,
    /// `performance` warns when the run took longer than this.
    pub max_run_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            required_env: Vec::new(),
            required_assets: Vec::new(),
            max_dom_elements: 5_000,
            max_run_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    /// Harness state directory, relative to the working directory.
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".harness"),
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        let mut errors = self.limits.validate();
        if self.timing.poll_interval_ms == 0 {
            errors.push("timing.poll_interval_ms must be > 0".to_string());
        }
        if self.timing.click_wait_ms < self.timing.poll_interval_ms {
            errors.push("timing.click_wait_ms must be >= timing.poll_interval_ms".to_string());
        }
        if !self.probe.base_url.is_empty()
            && !self.probe.base_url.starts_with("http://")
            && !self.probe.base_url.starts_with("https://")
        {
            errors.push("probe.base_url must start with http:// or https://".to_string());
        }
        if self.probe.timeout_ms == 0 {
            errors.push("probe.timeout_ms must be > 0".to_string());
        }
        if self.readiness.max_dom_elements == 0 {
            errors.push("readiness.max_dom_elements must be > 0".to_string());
        }
        if self.output.dir.as_os_str().is_empty() {
            errors.push("output.dir must be non-empty".to_string());
        }
        if errors.is_empty() {
            return Ok(());
        }
        Err(anyhow!("invalid config:\n- {}", errors.join("\n- ")))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        let cfg = HarnessConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HarnessConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HarnessConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
