use super::NamedChecker;
use std::fmt::Write;
use std::time::Duration;
use strum_macros::{Display, EnumString};

/// Which endpoint a report is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CheckKind {
    Livez,
    Readyz,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub error: Option<String>,
}

impl CheckResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of one sweep over a set of checkers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub ok: bool,
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    pub fn failing(&self) -> usize {
        self.results.iter().filter(|r| !r.is_ok()).count()
    }

    /// One line per check followed by a summary line.
    pub fn render(&self, kind: CheckKind) -> String {
        let mut out = String::new();
        for result in &self.results {
            let _ = match &result.error {
                None => writeln!(out, "[+]{} ok", result.name),
                Some(error) => writeln!(out, "[-]{} failed: {}", result.name, error),
            };
        }
        let _ = if self.ok {
            writeln!(out, "{kind} check passed")
        } else {
            writeln!(
                out,
                "{kind} check failed: {}/{} failing",
                self.failing(),
                self.results.len()
            )
        };
        out
    }
}

/// Runs every check concurrently against one shared deadline.
///
/// A check that errors or has not finished by the deadline counts as failed.
pub async fn run_checks(checks: Vec<NamedChecker>, timeout: Duration) -> CheckReport {
    let deadline = tokio::time::Instant::now() + timeout;

    let results = futures::future::join_all(checks.iter().map(|named| async move {
        let error = match tokio::time::timeout_at(deadline, named.checker.check()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(_) => Some(format!("deadline of {timeout:?} exceeded")),
        };
        CheckResult {
            name: named.name.clone(),
            error,
        }
    }))
    .await;

    CheckReport {
        ok: results.iter().all(CheckResult::is_ok),
        results,
    }
}
