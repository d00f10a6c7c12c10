use super::checker::OnceHealthy;
use super::{CheckReport, Checker, run_checks};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

#[derive(Clone)]
pub struct NamedChecker {
    pub name: String,
    pub checker: Arc<dyn Checker>,
}

/// Liveness and readiness checks of one server.
///
/// Registration is append-only and allowed at any time; sweeps run on a
/// snapshot of the list so concurrent registration never races a sweep.
#[derive(Default)]
pub struct CheckerRegistry {
    liveness: RwLock<Vec<NamedChecker>>,
    readiness: RwLock<Vec<NamedChecker>>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_liveness(&self, name: impl Into<String>, checker: impl Checker) {
        let name = name.into();
        tracing::debug!(check = %name, "Registered liveness check");
        self.liveness
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(NamedChecker {
                name,
                checker: Arc::new(checker),
            });
    }

    /// Registers a readiness check; non-manual checks stop running once they pass.
    pub fn register_readiness(&self, name: impl Into<String>, checker: impl Checker) {
        let name = name.into();
        let manual = checker.is_manual();
        let checker: Arc<dyn Checker> = if manual {
            Arc::new(checker)
        } else {
            Arc::new(OnceHealthy::new(Arc::new(checker)))
        };
        tracing::debug!(check = %name, manual, "Registered readiness check");
        self.readiness
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(NamedChecker { name, checker });
    }

    pub fn liveness_checks(&self) -> Vec<NamedChecker> {
        self.liveness
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn readiness_checks(&self) -> Vec<NamedChecker> {
        self.readiness
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn check_liveness(&self, timeout: Duration) -> CheckReport {
        run_checks(self.liveness_checks(), timeout).await
    }

    pub async fn check_readiness(&self, timeout: Duration) -> CheckReport {
        run_checks(self.readiness_checks(), timeout).await
    }
}
