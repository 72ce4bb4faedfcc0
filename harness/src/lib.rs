//! Runtime UI integrity harness.
//!
//! Discovers the modules and tools a page is expected to expose, exercises
//! them with synthetic interactions, audits how complete each module is,
//! repairs what it safely can and aggregates a deployment readiness report.
//!
//! - **[`core`]**: Pure, deterministic logic (shared types, the audit decision
//!   table, scoring, the default catalog, selectors).
//! - **[`io`]**: Side effects (config, HTTP probing, report export, status
//!   persistence).
//!
//! Every phase reaches the page, timers and logging through a [`guard::Guard`]
//! so a misbehaving page cannot run the harness away. [`run::run_harness`]
//! drives the phases in order.

pub mod audit;
pub mod cancel;
pub mod context;
pub mod core;
pub mod discovery;
pub mod dom;
pub mod exit_codes;
pub mod guard;
pub mod io;
pub mod logging;
pub mod overlay;
pub mod readiness;
pub mod repair;
pub mod run;
pub mod simulate;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
