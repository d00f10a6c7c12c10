//! Application Bootstrap
//!
//! Wires configuration, the dependency graph, health checks, interceptors and
//! server resources together, runs the initializers and starts the server.

use super::{
    Closer, DrainHook, ExitReason, LifecycleError, ServerResources, ShutdownSignal, drain_hook, shutdown_signal,
};
use crate::config::{ConfigService, ServerConfig};
use crate::di::{Context, DependencyGraph, Initializer, Provider};
use crate::error::{Error, Result};
use crate::health::Checker;
use crate::interceptor::InterceptorRegistration;
use crate::server::{Registry, Server};
use axum::Router;
use axum::routing::MethodRouter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A fully initialized application, ready to serve
///
/// # Example
///
/// ```rust,ignore
/// use servecore::prelude::*;
///
/// #[tokio::main]
/// async fn main() {
///     let app = Application::builder()
///         .config_service(&ConfigService::new())
///         .provider(Provider::singleton("db", "Pool", |_ctx| async { Pool::connect().await }))
///         .initializer(Initializer::new("db", |ctx| async move { migrate(ctx).await }))
///         .build()
///         .await
///         .expect("Failed to initialize application");
///
///     let reason = app.serve(router).await.expect("server failed");
///     std::process::exit(reason.exit_code());
/// }
/// ```
pub struct Application {
    config: Arc<ServerConfig>,
    graph: Arc<DependencyGraph>,
    registry: Arc<Registry>,
    resources: Arc<ServerResources>,
    context: Context,
    drain_hook: Option<DrainHook>,
}

impl Application {
    /// Create a new application builder
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn resources(&self) -> &Arc<ServerResources> {
        &self.resources
    }

    /// The root context every initializer and instantiation starts from
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Resolve `provider` from the root context
    pub async fn instantiate<T: Send + Sync + 'static>(&self, provider: &Provider<T>) -> Result<Arc<T>> {
        self.graph.instantiate(&self.context, provider).await
    }

    /// Bind the configured ports without serving yet
    pub async fn bind(&self) -> Result<Server> {
        let server = Server::bind(
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.graph),
            Arc::clone(&self.resources),
        )
        .await?;
        Ok(match &self.drain_hook {
            Some(hook) => server.with_drain_hook(Arc::clone(hook)),
            None => server,
        })
    }

    /// Serve `router` until SIGTERM or Ctrl+C
    pub async fn serve(&self, router: Router) -> Result<ExitReason> {
        self.serve_until(router, shutdown_signal()).await
    }

    /// Serve `router` until `signal` resolves
    ///
    /// The root context is cancelled once serving ends, however it ends.
    pub async fn serve_until<F>(&self, router: Router, signal: F) -> Result<ExitReason>
    where
        F: Future<Output = ShutdownSignal> + Send,
    {
        let result = match self.bind().await {
            Ok(server) => server.run_until(router, signal).await,
            Err(e) => Err(e),
        };
        self.context.cancellation().cancel();
        result
    }

    /// Close server resources without serving
    ///
    /// For tools that initialize the graph, do some work and exit.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down application...");
        self.context.cancellation().cancel();
        self.resources.close().await?;
        tracing::info!("Application shutdown complete");
        Ok(())
    }
}

/// Builder for Application
///
/// Registration errors are kept and reported by [`build`](Self::build), so
/// the chain reads top to bottom.
pub struct ApplicationBuilder {
    config: ServerConfig,
    graph: DependencyGraph,
    registry: Registry,
    resources: ServerResources,
    init_timeout: Option<Duration>,
    drain_hook: Option<DrainHook>,
    error: Option<Error>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    /// Create a new application builder
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            graph: DependencyGraph::new(),
            registry: Registry::new(),
            resources: ServerResources::new(),
            init_timeout: None,
            drain_hook: None,
            error: None,
        }
    }

    /// The registry the server will use, e.g. to register metrics collectors
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn record(mut self, result: Result<()>) -> Self {
        if self.error.is_none() {
            self.error = result.err();
        }
        self
    }

    /// Use `config` as is
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Read the server configuration from `config`
    pub fn config_service(mut self, config: &ConfigService) -> Self {
        match ServerConfig::from_config(config) {
            Ok(server) => {
                self.config = server;
                self
            }
            Err(e) => self.record(Err(e)),
        }
    }

    /// Use `graph` instead of an empty one, e.g. to change the slow threshold
    pub fn graph(mut self, graph: DependencyGraph) -> Self {
        self.graph = graph;
        self
    }

    /// Set a timeout for running the initializers
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    pub fn provider<T: Send + Sync + 'static>(self, provider: Provider<T>) -> Self {
        let result = self.graph.add_provider(provider);
        self.record(result)
    }

    pub fn initializer(self, initializer: Initializer) -> Self {
        let result = self.graph.add_initializer(initializer);
        self.record(result)
    }

    pub fn liveness(self, name: impl Into<String>, checker: impl Checker) -> Self {
        self.registry.register_liveness(name, checker);
        self
    }

    pub fn readiness(self, name: impl Into<String>, checker: impl Checker) -> Self {
        self.registry.register_readiness(name, checker);
        self
    }

    pub fn interceptor(self, registration: InterceptorRegistration) -> Self {
        let result = self.registry.add_interceptor(registration);
        self.record(result)
    }

    pub fn debug_handler(self, path: impl Into<String>, handler: MethodRouter) -> Self {
        let result = self.registry.add_debug_handler(path, handler);
        self.record(result)
    }

    /// Run `drain` on SIGTERM instead of waiting out the drain timeout
    pub fn drain_hook<F, Fut>(mut self, drain: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.drain_hook = Some(drain_hook(drain));
        self
    }

    /// Push a resource to close at shutdown
    pub fn closer(self, name: impl Into<String>, closer: impl Closer) -> Self {
        let result = self.resources.add(name, closer).map_err(Error::from);
        self.record(result)
    }

    /// Everything up to, but not including, running the initializers
    pub fn prepare(self) -> Result<Application> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(Application {
            config: Arc::new(self.config),
            graph: Arc::new(self.graph),
            registry: Arc::new(self.registry),
            resources: Arc::new(self.resources),
            context: Context::new(),
            drain_hook: self.drain_hook,
        })
    }

    /// Build the application and run every initializer
    ///
    /// # Errors
    ///
    /// Returns the first registration error, an ordering error, or the first
    /// failing initializer.
    pub async fn build(self) -> Result<Application> {
        let init_timeout = self.init_timeout;
        let app = self.prepare()?;

        tracing::info!("Starting application initialization...");
        let run = app.graph.run_initializers(&app.context);
        match init_timeout {
            Some(timeout) => tokio::time::timeout(timeout, run).await.map_err(|_| {
                LifecycleError::timeout("run_initializers", format!("Timeout after {:?}", timeout))
            })??,
            None => run.await?,
        }
        tracing::info!("Application initialization complete");

        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::checker_fn;
    use crate::lifecycle::closer_fn;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_build_runs_initializers_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let push = |name: &'static str| {
            let order = Arc::clone(&order);
            move |_ctx: Context| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().unwrap().push(name);
                    Ok(())
                }
            }
        };

        let app = Application::builder()
            .config(ServerConfig::local())
            .initializer(Initializer::new("web", push("web")).after("db"))
            .initializer(Initializer::new("db", push("db")))
            .build()
            .await
            .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["db", "web"]);
        assert!(app.graph().snapshot().initialized);
    }

    #[tokio::test]
    async fn test_first_registration_error_is_reported() {
        let result = Application::builder()
            .provider(Provider::singleton("db", "Pool", |_ctx| async { Ok(1u8) }))
            .provider(Provider::singleton("db", "Pool", |_ctx| async { Ok(2u8) }))
            .interceptor(InterceptorRegistration::new("audit"))
            .build()
            .await;

        assert!(matches!(result, Err(Error::DuplicateProvider { .. })));
    }

    #[tokio::test]
    async fn test_init_timeout() {
        let result = Application::builder()
            .init_timeout(Duration::from_millis(20))
            .initializer(Initializer::new("slow", |_ctx| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }))
            .build()
            .await;

        assert!(matches!(
            result,
            Err(Error::Lifecycle(LifecycleError::Timeout { .. }))
        ));
    }

    #[tokio::test]
    async fn test_prepare_does_not_run_initializers() {
        let app = Application::builder()
            .initializer(Initializer::new("db", |_ctx| async { Err(anyhow::anyhow!("not yet")) }))
            .readiness("db", checker_fn(|| async { Ok(()) }))
            .prepare()
            .unwrap();

        assert!(!app.graph().snapshot().initialized);
        let err = app.graph().run_initializers(app.context()).await.unwrap_err();
        assert!(matches!(err, Error::Initializer { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_closes_resources() {
        let closed = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&closed);
        let app = Application::builder()
            .closer(
                "flag",
                closer_fn(move || {
                    let flag = Arc::clone(&flag);
                    async move {
                        *flag.lock().unwrap() = true;
                        Ok(())
                    }
                }),
            )
            .prepare()
            .unwrap();

        app.shutdown().await.unwrap();
        assert!(*closed.lock().unwrap());
        assert!(app.context().is_cancelled());
    }

    #[tokio::test]
    async fn test_serve_cancels_root_context() {
        let app = Application::builder()
            .config(ServerConfig::local())
            .prepare()
            .unwrap();
        let context = app.context().clone();

        let reason = app
            .serve_until(Router::new(), async { ShutdownSignal::Interrupt })
            .await
            .unwrap();

        assert_eq!(reason, ExitReason::Interrupted);
        assert!(context.is_cancelled());
    }
}
