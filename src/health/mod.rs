//! Liveness and readiness checks.
//!
//! ```rust,ignore
//! let checks = CheckerRegistry::new();
//! checks.register_readiness("db", checker_fn(move || {
//!     let pool = pool.clone();
//!     async move { pool.ping().await }
//! }));
//! let report = checks.check_readiness(Duration::from_secs(5)).await;
//! println!("{}", report.render(CheckKind::Readyz));
//! ```

mod checker;
mod registry;
mod report;

pub use checker::{Checker, CheckerFn, ShutdownChecker, checker_fn, manual_checker_fn};
pub use registry::{CheckerRegistry, NamedChecker};
pub use report::{CheckKind, CheckReport, CheckResult, run_checks};
