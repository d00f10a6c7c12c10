use crate::error::{Error, Result};
use crate::health::{Checker, CheckerRegistry, ShutdownChecker};
use crate::interceptor::{InterceptorRegistration, OrderedInterceptors, order_interceptors};
use axum::Router;
use axum::routing::{MethodRouter, get};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use super::try_route;

/// Paths served by the debug mux itself.
pub const RESERVED_DEBUG_PATHS: [&str; 5] = ["/livez", "/readyz", "/metrics", "/debug/graph", "/debug/vars"];

/// Name of the readiness check that fails once draining starts.
pub const SHUTDOWN_CHECK: &str = "shutdown";

/// Per-server registrations: health checks, interceptors, debug handlers and
/// the metrics registry.
///
/// Interceptors and debug handlers are fixed once the server runs; checks may
/// be added at any time.
pub struct Registry {
    checkers: CheckerRegistry,
    interceptors: RwLock<Vec<InterceptorRegistration>>,
    debug_handlers: RwLock<BTreeMap<String, MethodRouter>>,
    metrics: prometheus::Registry,
    shutdown: ShutdownChecker,
    running: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let checkers = CheckerRegistry::new();
        let shutdown = ShutdownChecker::new();
        checkers.register_readiness(SHUTDOWN_CHECK, shutdown.clone());
        Self {
            checkers,
            interceptors: RwLock::new(Vec::new()),
            debug_handlers: RwLock::new(BTreeMap::new()),
            metrics: prometheus::Registry::new(),
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    pub fn checkers(&self) -> &CheckerRegistry {
        &self.checkers
    }

    pub fn register_liveness(&self, name: impl Into<String>, checker: impl Checker) {
        self.checkers.register_liveness(name, checker);
    }

    pub fn register_readiness(&self, name: impl Into<String>, checker: impl Checker) {
        self.checkers.register_readiness(name, checker);
    }

    pub fn add_interceptor(&self, registration: InterceptorRegistration) -> Result<()> {
        // Checked under the lock `start` holds while it snapshots the list.
        let mut interceptors = self.interceptors.write().unwrap_or_else(PoisonError::into_inner);
        self.assert_not_running(&format!("add_interceptor({})", registration.name()))?;
        interceptors.push(registration);
        Ok(())
    }

    /// Serve `handler` on the debug mux under `path`.
    ///
    /// The path is checked against axum's route syntax and against every
    /// route already on the debug mux, so a bad path fails here and not when
    /// the server starts.
    pub fn add_debug_handler(&self, path: impl Into<String>, handler: MethodRouter) -> Result<()> {
        let path = path.into();
        let mut handlers = self
            .debug_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.assert_not_running(&format!("add_debug_handler({path})"))?;

        check_debug_path(&path)?;
        if RESERVED_DEBUG_PATHS.contains(&path.as_str()) || handlers.contains_key(&path) {
            return Err(Error::DuplicateDebugHandler { path });
        }

        let mut trial = Router::new();
        for reserved in RESERVED_DEBUG_PATHS {
            trial = trial.route(reserved, get(|| async {}));
        }
        for (existing, existing_handler) in handlers.iter() {
            trial = trial.route(existing, existing_handler.clone());
        }
        if let Err(message) = try_route(trial, &path, handler.clone()) {
            return Err(Error::Config {
                key: "debug handler path".to_string(),
                message: format!("{path:?}: {message}"),
            });
        }

        tracing::debug!(path = %path, "Registered debug handler");
        handlers.insert(path, handler);
        Ok(())
    }

    pub fn metrics(&self) -> &prometheus::Registry {
        &self.metrics
    }

    pub fn shutdown_checker(&self) -> &ShutdownChecker {
        &self.shutdown
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn assert_not_running(&self, what: &str) -> Result<()> {
        if self.is_running() {
            return Err(Error::RegistrationClosed {
                what: what.to_string(),
            });
        }
        Ok(())
    }

    /// Orders the registered interceptors and closes registration.
    pub(crate) fn start(&self) -> Result<OrderedInterceptors> {
        let interceptors = self.interceptors.write().unwrap_or_else(PoisonError::into_inner);
        let _handlers = self.debug_handlers.write().unwrap_or_else(PoisonError::into_inner);
        let ordered = order_interceptors(&interceptors)?;
        self.running.store(true, Ordering::SeqCst);
        Ok(ordered)
    }

    pub(crate) fn debug_handlers(&self) -> Vec<(String, MethodRouter)> {
        self.debug_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(path, handler)| (path.clone(), handler.clone()))
            .collect()
    }
}

fn check_debug_path(path: &str) -> Result<()> {
    let invalid = |message: String| Error::Config {
        key: "debug handler path".to_string(),
        message,
    };
    if !path.starts_with('/') {
        return Err(invalid(format!("{path:?} must start with '/'")));
    }
    for segment in path.split('/') {
        if segment.starts_with(':') || segment.starts_with('*') {
            return Err(invalid(format!(
                "{path:?}: segment {segment:?} uses the old capture syntax, write `{{name}}` or `{{*name}}`"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_debug_handler_paths() {
        let registry = Registry::new();
        registry.add_debug_handler("/debug/pprof", get(|| async { "profile" })).unwrap();

        let err = registry
            .add_debug_handler("/debug/pprof", get(|| async { "again" }))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateDebugHandler { .. }));

        let err = registry.add_debug_handler("/livez", get(|| async { "" })).unwrap_err();
        assert!(matches!(err, Error::DuplicateDebugHandler { .. }));

        let err = registry.add_debug_handler("nope", get(|| async { "" })).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        assert_eq!(registry.debug_handlers().len(), 1);
    }

    #[test]
    fn test_debug_handler_paths_axum_would_reject() {
        let registry = Registry::new();

        for path in ["/debug/:id", "/debug/*rest", "/debug/{id", "/debug/{*rest}/tail"] {
            let err = registry.add_debug_handler(path, get(|| async { "" })).unwrap_err();
            assert!(matches!(err, Error::Config { .. }), "{path}: {err}");
        }

        registry.add_debug_handler("/debug/jobs/{id}", get(|| async { "job" })).unwrap();
        let err = registry
            .add_debug_handler("/debug/jobs/{name}", get(|| async { "job" }))
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }), "{err}");

        assert_eq!(registry.debug_handlers().len(), 1);
        assert!(!registry.is_running());
    }

    #[test]
    fn test_registration_closed_after_start() {
        let registry = Registry::new();
        registry.add_interceptor(InterceptorRegistration::new("audit")).unwrap();

        let ordered = registry.start().unwrap();
        assert_eq!(ordered.names, vec!["request-id", "audit"]);
        assert!(registry.is_running());

        let err = registry
            .add_interceptor(InterceptorRegistration::new("late"))
            .unwrap_err();
        assert!(matches!(err, Error::RegistrationClosed { .. }));
        let err = registry
            .add_debug_handler("/debug/late", get(|| async { "" }))
            .unwrap_err();
        assert!(matches!(err, Error::RegistrationClosed { .. }));
    }

    #[test]
    fn test_accepted_interceptors_are_all_ordered() {
        let registry = Registry::new();
        let barrier = std::sync::Barrier::new(9);

        let (ordered, accepted) = std::thread::scope(|scope| {
            let adders: Vec<_> = (0..8)
                .map(|i| {
                    let registry = &registry;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        registry.add_interceptor(InterceptorRegistration::new(format!("i{i}")))
                    })
                })
                .collect();
            barrier.wait();
            let ordered = registry.start().unwrap();
            let accepted: Vec<_> = adders
                .into_iter()
                .map(|adder| adder.join().unwrap())
                .filter(Result::is_ok)
                .collect();
            (ordered, accepted.len())
        });

        // Every registration either made it into the chain or saw the close.
        let accepted_after = registry
            .interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        assert_eq!(accepted, accepted_after);
        assert_eq!(ordered.names.len(), accepted + 1);
    }

    #[test]
    fn test_interceptor_cycle_fails_start() {
        let registry = Registry::new();
        registry
            .add_interceptor(InterceptorRegistration::new("a").after("b"))
            .unwrap();
        registry
            .add_interceptor(InterceptorRegistration::new("b").after("a"))
            .unwrap();

        assert!(matches!(registry.start(), Err(Error::InterceptorCycle { .. })));
        assert!(!registry.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_check_flips_readiness() {
        let registry = Registry::new();
        let timeout = Duration::from_secs(1);
        assert!(registry.checkers().check_readiness(timeout).await.ok);

        registry.shutdown_checker().begin_shutdown();
        let report = registry.checkers().check_readiness(timeout).await;
        assert!(!report.ok);
        assert_eq!(report.results[0].name, SHUTDOWN_CHECK);
    }
}
