//! `.harness/` layout and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::core::catalog::default_catalog;
use crate::core::types::ComponentKind;
use crate::io::config::{HarnessConfig, write_config};

/// Canonical paths within a harness state directory.
#[derive(Debug, Clone)]
pub struct HarnessPaths {
    pub harness_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub catalog_path: PathBuf,
    pub status_path: PathBuf,
    pub cancel_path: PathBuf,
    pub reports_dir: PathBuf,
}

impl HarnessPaths {
    /// Paths for `<root>/.harness`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::at(root.as_ref().join(".harness"))
    }

    /// Paths for an explicit state directory.
    pub fn at(harness_dir: impl Into<PathBuf>) -> Self {
        let harness_dir = harness_dir.into();
        Self {
            gitignore_path: harness_dir.join(".gitignore"),
            config_path: harness_dir.join("config.toml"),
            catalog_path: harness_dir.join("catalog.toml"),
            status_path: harness_dir.join("status.json"),
            cancel_path: harness_dir.join("cancel"),
            reports_dir: harness_dir.join("reports"),
            harness_dir,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.harness_dir, &self.reports_dir] {
            fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing harness-owned files.
    pub force: bool,
}

/// Create the state directory with a default config and catalog.
///
/// Fails if the directory already exists unless `options.force` is set.
pub fn init_harness(paths: &HarnessPaths, options: &InitOptions) -> Result<()> {
    if paths.harness_dir.exists() && !paths.harness_dir.is_dir() {
        return Err(anyhow!(
            "harness init: {} exists but is not a directory",
            paths.harness_dir.display()
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "harness init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }
    paths.ensure_dirs()?;
    write_config(&paths.config_path, &HarnessConfig::default())?;
    write_file(&paths.catalog_path, &default_catalog_toml())?;
    write_file(&paths.gitignore_path, HARNESS_GITIGNORE)?;
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

fn default_catalog_toml() -> String {
    let mut out = String::from("# Components the harness expects to find on the page.\n");
    for descriptor in default_catalog() {
        let kind = match descriptor.kind {
            ComponentKind::Module => "module",
            ComponentKind::Tool => "tool",
            ComponentKind::Endpoint => "endpoint",
        };
        out.push_str(&format!(
            "\n[[component]]\nid = \"{}\"\nkind = \"{kind}\"\n",
            descriptor.id
        ));
    }
    out
}

const HARNESS_GITIGNORE: &str = "reports/\nstatus.json\ncancel\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::load_catalog;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = HarnessPaths::new(temp.path());
        init_harness(&paths, &InitOptions { force: false }).expect("init");

        assert!(paths.reports_dir.is_dir());
        assert_eq!(
            load_config(&paths.config_path).expect("config"),
            HarnessConfig::default()
        );
        assert_eq!(
            load_catalog(&paths.catalog_path).expect("catalog"),
            default_catalog()
        );
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("gitignore"),
            HARNESS_GITIGNORE
        );
    }

    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = HarnessPaths::new(temp.path());
        init_harness(&paths, &InitOptions { force: false }).expect("init");
        let err = init_harness(&paths, &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        init_harness(&paths, &InitOptions { force: true }).expect("forced init");
    }
}
