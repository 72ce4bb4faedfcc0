//! Runtime UI integrity harness CLI.
//!
//! Loads a page snapshot, runs the guarded discovery / simulation / audit /
//! repair / aggregation pipeline against it and exports a readiness report
//! under `.harness/reports/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use harness::audit::audit_all;
use harness::cancel::CancelToken;
use harness::context::HarnessContext;
use harness::core::catalog::{default_catalog, load_catalog};
use harness::core::types::{
    ComponentDescriptor, ComponentKind, Recommendation, ValidationStatus,
};
use harness::discovery::enumerate;
use harness::dom::load_page;
use harness::exit_codes;
use harness::guard::{Guard, GuardLimits, ManualClock, SystemClock};
use harness::io::config::{HarnessConfig, load_config};
use harness::io::export::{export_report, validate_report_file};
use harness::io::layout::{HarnessPaths, InitOptions, init_harness};
use harness::io::probe::HttpProber;
use harness::io::status_store::load_status;
use harness::overlay::{self, Overlay};
use harness::run::{RunOptions, run_harness};
use harness::simulate::simulate;

const DEFAULT_DIR: &str = ".harness";

#[derive(Parser)]
#[command(
    name = "harness",
    version,
    about = "Guarded runtime integrity checks and deployment readiness for dashboard pages"
)]
struct Cli {
    /// Harness state directory (config, catalog, status, reports).
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct PageArgs {
    /// Page snapshot (JSON).
    #[arg(long)]
    page: PathBuf,
    /// Component catalog (TOML). Defaults to `<out>/catalog.toml`, then the
    /// built-in catalog.
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Config file (TOML). Defaults to `<out>/config.toml`.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Sleep on the wall clock instead of advancing virtual time.
    #[arg(long)]
    real_time: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.harness/` with a default config and catalog.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Run every phase and export a readiness report.
    Run {
        #[command(flatten)]
        page: PageArgs,
        /// Skip HTTP probing; endpoint categories fail.
        #[arg(long)]
        no_probe: bool,
        /// Report defects without repairing them.
        #[arg(long)]
        no_repair: bool,
        /// Print the full run outcome as JSON instead of the overlay.
        #[arg(long)]
        json: bool,
    },
    /// Resolve each catalog component on the page.
    Enumerate {
        #[command(flatten)]
        page: PageArgs,
    },
    /// Classify module completeness. Audits every catalog module when none
    /// are named.
    Audit {
        #[command(flatten)]
        page: PageArgs,
        modules: Vec<String>,
    },
    /// Run the click, resize and form scenarios.
    Simulate {
        #[command(flatten)]
        page: PageArgs,
    },
    /// Check an exported report against the report schema.
    ValidateReport { path: PathBuf },
    /// Print the catalog in effect.
    Catalog {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Print the overlay of the latest (or running) harness run.
    Status,
}

fn main() {
    harness::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let out = cli.out.clone();
    match cli.command {
        Command::Init { force } => cmd_init(out, force),
        Command::Run {
            page,
            no_probe,
            no_repair,
            json,
        } => cmd_run(out, &page, no_probe, no_repair, json),
        Command::Enumerate { page } => cmd_enumerate(out, &page),
        Command::Audit { page, modules } => cmd_audit(out, &page, modules),
        Command::Simulate { page } => cmd_simulate(out, &page),
        Command::ValidateReport { path } => cmd_validate_report(&path),
        Command::Catalog { catalog } => cmd_catalog(out, catalog.as_deref()),
        Command::Status => cmd_status(out),
    }
}

/// Config, catalog and paths resolved from the CLI flags.
struct Setup {
    paths: HarnessPaths,
    config: HarnessConfig,
    catalog: Vec<ComponentDescriptor>,
}

fn resolve_paths(out: Option<PathBuf>) -> HarnessPaths {
    HarnessPaths::at(out.unwrap_or_else(|| PathBuf::from(DEFAULT_DIR)))
}

fn resolve_catalog(paths: &HarnessPaths, explicit: Option<&Path>) -> Result<Vec<ComponentDescriptor>> {
    match explicit {
        Some(path) => load_catalog(path),
        None if paths.catalog_path.exists() => load_catalog(&paths.catalog_path),
        None => Ok(default_catalog()),
    }
}

fn setup(out: Option<PathBuf>, args: &PageArgs) -> Result<Setup> {
    let explicit_out = out.is_some();
    let paths = resolve_paths(out);
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| paths.config_path.clone());
    let config = load_config(&config_path)?;
    // Without --out, a config may relocate the state directory.
    let paths = if explicit_out || config.output.dir == Path::new(DEFAULT_DIR) {
        paths
    } else {
        HarnessPaths::at(config.output.dir.clone())
    };
    let catalog = resolve_catalog(&paths, args.catalog.as_deref())?;
    Ok(Setup {
        paths,
        config,
        catalog,
    })
}

fn make_guard(limits: GuardLimits, real_time: bool) -> Guard {
    if real_time {
        return Guard::new(limits, Box::new(SystemClock::new()));
    }
    let wall = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
    Guard::new(limits, Box::new(ManualClock::starting_at(wall)))
}

fn cmd_init(out: Option<PathBuf>, force: bool) -> Result<i32> {
    let paths = resolve_paths(out);
    init_harness(&paths, &InitOptions { force })?;
    println!("initialized {}", paths.harness_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(
    out: Option<PathBuf>,
    args: &PageArgs,
    no_probe: bool,
    no_repair: bool,
    json: bool,
) -> Result<i32> {
    let Setup {
        paths,
        config,
        catalog,
    } = setup(out, args)?;
    let page = load_page(&args.page)?;
    paths.ensure_dirs()?;

    let cancel = CancelToken::with_marker(paths.cancel_path.clone());
    cancel.clear_marker()?;
    let overlay = Overlay::new(cancel).with_status_file(paths.status_path.clone());
    let guard = make_guard(config.limits, args.real_time);
    let ctx = HarnessContext::new(&guard, page, &overlay).with_timing(config.timing);

    let prober = if no_probe || config.probe.base_url.is_empty() {
        None
    } else {
        Some(HttpProber::new(&config.probe)?)
    };
    let mut options = RunOptions::new(paths.reports_dir.clone());
    if let Some(prober) = &prober {
        options = options.with_prober(prober);
    }
    if no_repair {
        options = options.without_repair();
    }

    let outcome = run_harness(&ctx, &catalog, &config, &options);
    let report_path = export_report(&paths.reports_dir, &outcome.report)?;

    if json {
        let payload = serde_json::to_string_pretty(&outcome).context("serialize run outcome")?;
        println!("{payload}");
    } else {
        print!("{}", overlay.render_text());
        for issue in &outcome.report.critical_issues {
            println!("critical: {issue}");
        }
        println!("report: {}", report_path.display());
    }
    Ok(match outcome.report.recommendation {
        Recommendation::Ready => exit_codes::OK,
        Recommendation::Conditional => exit_codes::CONDITIONAL,
        Recommendation::NotReady => exit_codes::NOT_READY,
    })
}

fn cmd_enumerate(out: Option<PathBuf>, args: &PageArgs) -> Result<i32> {
    let setup = setup(out, args)?;
    let page = load_page(&args.page)?;
    let guard = make_guard(setup.config.limits, args.real_time);
    let overlay = Overlay::new(CancelToken::new());
    let ctx = HarnessContext::new(&guard, page, &overlay).with_timing(setup.config.timing);

    let results = enumerate(&ctx, &setup.catalog);
    for result in results.iter() {
        println!(
            "{}\t{}\t{}",
            result.component_id,
            result.status.as_str(),
            result.detail
        );
    }
    if results.count(ValidationStatus::Invalid) > 0 {
        return Ok(exit_codes::INVALID);
    }
    Ok(exit_codes::OK)
}

fn cmd_audit(out: Option<PathBuf>, args: &PageArgs, modules: Vec<String>) -> Result<i32> {
    let setup = setup(out, args)?;
    let page = load_page(&args.page)?;
    let modules = if modules.is_empty() {
        setup
            .catalog
            .iter()
            .filter(|component| component.kind == ComponentKind::Module)
            .map(|component| component.id.clone())
            .collect()
    } else {
        modules
    };
    let guard = make_guard(setup.config.limits, args.real_time);
    let overlay = Overlay::new(CancelToken::new());
    let ctx = HarnessContext::new(&guard, page, &overlay).with_timing(setup.config.timing);

    let outcomes = audit_all(&ctx, &modules);
    for outcome in &outcomes {
        println!("{}: {}", outcome.module_id, outcome.status.as_str());
        for suggestion in &outcome.suggestions {
            println!("  - {suggestion}");
        }
    }
    if outcomes.iter().any(|outcome| outcome.status.is_failing()) {
        return Ok(exit_codes::INVALID);
    }
    Ok(exit_codes::OK)
}

fn cmd_simulate(out: Option<PathBuf>, args: &PageArgs) -> Result<i32> {
    let setup = setup(out, args)?;
    let page = load_page(&args.page)?;
    let guard = make_guard(setup.config.limits, args.real_time);
    let overlay = Overlay::new(CancelToken::new());
    let ctx = HarnessContext::new(&guard, page, &overlay).with_timing(setup.config.timing);

    let report = simulate(&ctx, &setup.catalog);
    for row in &report.rows {
        println!(
            "{}\t{} {}\t{}\t{}",
            row.component_id,
            row.scenario.kind.as_str(),
            row.scenario.target_selector,
            if row.ok { "ok" } else { "FAIL" },
            row.detail
        );
    }
    if report.failures().next().is_some() {
        return Ok(exit_codes::INVALID);
    }
    Ok(exit_codes::OK)
}

fn cmd_validate_report(path: &Path) -> Result<i32> {
    let report = validate_report_file(path)?;
    let overall = report
        .overall_score
        .map_or_else(|| "n/a".to_string(), |score| format!("{score:.1}"));
    println!(
        "ok: {} (overall {overall}, {})",
        path.display(),
        report.recommendation.as_str()
    );
    Ok(exit_codes::OK)
}

fn cmd_catalog(out: Option<PathBuf>, explicit: Option<&Path>) -> Result<i32> {
    let paths = resolve_paths(out);
    let catalog = resolve_catalog(&paths, explicit)?;
    for component in &catalog {
        let kind = match component.kind {
            ComponentKind::Module => "module",
            ComponentKind::Tool => "tool",
            ComponentKind::Endpoint => "endpoint",
        };
        println!("{kind}\t{}\t{}", component.id, component.display_name);
    }
    Ok(exit_codes::OK)
}

fn cmd_status(out: Option<PathBuf>) -> Result<i32> {
    let paths = resolve_paths(out);
    let Some(snapshot) = load_status(&paths.status_path)? else {
        bail!("no harness status at {}", paths.status_path.display());
    };
    print!("{}", overlay::render_text(&snapshot));
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["harness", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_flags() {
        let cli = Cli::parse_from([
            "harness",
            "--out",
            "state",
            "run",
            "--page",
            "page.json",
            "--no-probe",
            "--json",
        ]);
        assert_eq!(cli.out, Some(PathBuf::from("state")));
        match cli.command {
            Command::Run {
                page,
                no_probe,
                no_repair,
                json,
            } => {
                assert_eq!(page.page, PathBuf::from("page.json"));
                assert!(no_probe && json && !no_repair);
                assert!(!page.real_time);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_audit_modules() {
        let cli = Cli::parse_from(["harness", "audit", "--page", "p.json", "qnis", "legal"]);
        match cli.command {
            Command::Audit { modules, .. } => assert_eq!(modules, vec!["qnis", "legal"]),
            _ => panic!("expected audit"),
        }
    }

    #[test]
    fn run_requires_page() {
        assert!(Cli::try_parse_from(["harness", "run"]).is_err());
    }
}
