//! Stable exit codes for harness CLI commands.

/// Command succeeded; for `harness run`, the report recommends deployment.
pub const OK: i32 = 0;
/// Invalid input (page, catalog, config, report) or any other error.
pub const INVALID: i32 = 1;
/// `harness run` finished with a `not_ready` recommendation.
pub const NOT_READY: i32 = 2;
/// `harness run` finished with a `conditional` recommendation.
pub const CONDITIONAL: i32 = 3;
