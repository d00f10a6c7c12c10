//! Multiplexed server
//!
//! One port carries both the debug mux (HTTP/1: `/livez`, `/readyz`,
//! `/metrics`, debug handlers) and the service router (HTTP/2 and anything
//! else). Optional extra ports serve either side as plain HTTP.
//!
//! # Shutdown
//!
//! ```text
//! SIGTERM ─► readiness fails ("shutdown started")
//!         ─► drain hook, or wait drain_timeout
//!         ─► listeners stop, server resources close (LIFO)
//!         ─► ExitReason::Drained
//!
//! SIGINT  ─► ExitReason::Interrupted
//! any signal in DEVELOPMENT ─► ExitReason::Terminated, no drain
//! ```

mod debug;
mod mux;
mod registry;

pub use debug::{BoundListener, DebugVars};
pub use mux::{HTTP2_PREFACE, Protocol, classify};
pub use registry::{RESERVED_DEBUG_PATHS, Registry, SHUTDOWN_CHECK};

use crate::config::ServerConfig;
use crate::di::DependencyGraph;
use crate::error::{Error, Result};
use crate::interceptor::InterceptorLayer;
use crate::lifecycle::{DrainHook, ExitReason, ServerResources, ShutdownSignal, shutdown_signal};
use axum::Router;
use axum::routing::{MethodRouter, get};
use chrono::Utc;
use debug::DebugState;
use mux::ChannelListener;
use std::any::Any;
use std::future::{Future, IntoFuture};
use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const CONNECTION_BACKLOG: usize = 128;

/// A bound, not yet serving, server.
pub struct Server {
    config: Arc<ServerConfig>,
    registry: Arc<Registry>,
    graph: Arc<DependencyGraph>,
    resources: Arc<ServerResources>,
    drain_hook: Option<DrainHook>,
    listener: TcpListener,
    http_listener: Option<TcpListener>,
    gateway_listener: Option<TcpListener>,
}

async fn bind(addr: String) -> Result<TcpListener> {
    TcpListener::bind(&addr)
        .await
        .map_err(|source| Error::Bind { addr, source })
}

impl Server {
    /// Bind every configured port.
    pub async fn bind(
        config: Arc<ServerConfig>,
        registry: Arc<Registry>,
        graph: Arc<DependencyGraph>,
        resources: Arc<ServerResources>,
    ) -> Result<Self> {
        let listener = bind(config.listen_addr()).await?;
        let http_listener = match config.http_port {
            Some(port) => Some(bind(config.addr_for(port)).await?),
            None => None,
        };
        let gateway_listener = match config.gateway_port {
            Some(port) => Some(bind(config.addr_for(port)).await?),
            None => None,
        };

        Ok(Self {
            config,
            registry,
            graph,
            resources,
            drain_hook: None,
            listener,
            http_listener,
            gateway_listener,
        })
    }

    /// Run `hook` on SIGTERM instead of waiting out the drain timeout.
    pub fn with_drain_hook(mut self, hook: DrainHook) -> Self {
        self.drain_hook = Some(hook);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn http_addr(&self) -> Result<Option<SocketAddr>> {
        Ok(self.http_listener.as_ref().map(TcpListener::local_addr).transpose()?)
    }

    pub fn gateway_addr(&self) -> Result<Option<SocketAddr>> {
        Ok(self.gateway_listener.as_ref().map(TcpListener::local_addr).transpose()?)
    }

    /// Serve `router` until SIGTERM or Ctrl+C.
    pub async fn run(self, router: Router) -> Result<ExitReason> {
        self.run_until(router, shutdown_signal()).await
    }

    /// Serve `router` until `signal` resolves.
    ///
    /// Registration on the graph and the registry closes once this starts.
    /// Server resources are closed on every exit, including startup errors.
    pub async fn run_until<F>(self, router: Router, signal: F) -> Result<ExitReason>
    where
        F: Future<Output = ShutdownSignal> + Send,
    {
        let resources = Arc::clone(&self.resources);
        let result = self.serve(router, signal).await;

        if let Err(e) = resources.close().await {
            tracing::error!(error = %e, "Error while closing server resources");
        }
        match &result {
            Ok(reason) => tracing::info!(?reason, "Server stopped"),
            Err(e) => tracing::error!(error = %e, "Server failed"),
        }
        result
    }

    async fn serve<F>(self, router: Router, signal: F) -> Result<ExitReason>
    where
        F: Future<Output = ShutdownSignal> + Send,
    {
        let Server {
            config,
            registry,
            graph,
            resources: _,
            drain_hook,
            listener,
            http_listener,
            gateway_listener,
        } = self;

        let health_registry = Arc::clone(&registry);
        let health_timeout = config.health_check_timeout;
        let service_router = try_route(
            router,
            "/health",
            get(move || debug::serving_status(Arc::clone(&health_registry), health_timeout)),
        )
        .map_err(|message| Error::Config {
            key: "service router".to_string(),
            message,
        })?;

        let ordered = registry.start()?;
        graph.seal();

        let addr = listener.local_addr()?;
        let mut listeners = vec![BoundListener {
            role: "mux",
            addr: addr.to_string(),
        }];
        for (role, extra) in [("http", &http_listener), ("gateway", &gateway_listener)] {
            if let Some(extra) = extra {
                listeners.push(BoundListener {
                    role,
                    addr: extra.local_addr()?.to_string(),
                });
            }
        }
        for listener in &listeners {
            tracing::info!(role = listener.role, addr = %listener.addr, "Listening");
        }

        let debug_router = debug::router(DebugState {
            registry: Arc::clone(&registry),
            graph: Arc::clone(&graph),
            vars: Arc::new(DebugVars {
                started_at: Utc::now(),
                environment_purpose: config.environment_purpose,
                listeners,
            }),
            health_check_timeout: config.health_check_timeout,
        });

        let service_router = service_router.layer(InterceptorLayer::new(ordered));

        let stop = CancellationToken::new();
        let mut tasks: JoinSet<(&'static str, io::Result<()>)> = JoinSet::new();

        let (http1_tx, http1_listener) = ChannelListener::new(addr, CONNECTION_BACKLOG);
        let (other_tx, other_listener) = ChannelListener::new(addr, CONNECTION_BACKLOG);
        tasks.spawn(tagged(
            "mux",
            mux::run(listener, config.sniff_timeout, http1_tx, other_tx, stop.clone()),
        ));
        tasks.spawn(tagged(
            "debug",
            axum::serve(http1_listener, debug_router.clone())
                .with_graceful_shutdown(stop.clone().cancelled_owned())
                .into_future(),
        ));
        tasks.spawn(tagged(
            "service",
            axum::serve(other_listener, service_router.clone())
                .with_graceful_shutdown(stop.clone().cancelled_owned())
                .into_future(),
        ));
        if let Some(listener) = http_listener {
            tasks.spawn(tagged(
                "http",
                axum::serve(listener, debug_router)
                    .with_graceful_shutdown(stop.clone().cancelled_owned())
                    .into_future(),
            ));
        }
        if let Some(listener) = gateway_listener {
            tasks.spawn(tagged(
                "gateway",
                axum::serve(listener, service_router)
                    .with_graceful_shutdown(stop.clone().cancelled_owned())
                    .into_future(),
            ));
        }

        let received = tokio::select! {
            received = signal => received,
            Some(joined) = tasks.join_next() => {
                stop.cancel();
                tasks.shutdown().await;
                let (role, message) = match joined {
                    Ok((role, Ok(()))) => (role, "stopped unexpectedly".to_string()),
                    Ok((role, Err(e))) => (role, e.to_string()),
                    Err(e) => ("task", e.to_string()),
                };
                tracing::error!(role, error = %message, "Listener failed");
                return Err(Error::Serve {
                    role: role.to_string(),
                    message,
                });
            }
        };

        let reason = if config.is_development() {
            tracing::info!(signal = %received, "Development mode, skipping drain");
            ExitReason::Terminated(received)
        } else if received == ShutdownSignal::Interrupt {
            ExitReason::Interrupted
        } else {
            drain(&registry, drain_hook.as_ref(), &config).await;
            ExitReason::Drained
        };

        stop.cancel();
        if reason == ExitReason::Drained {
            let grace = config.drain_timeout;
            if tokio::time::timeout(grace, async { while tasks.join_next().await.is_some() {} })
                .await
                .is_err()
            {
                tracing::warn!(?grace, "Listeners did not stop in time, aborting");
            }
        }
        tasks.shutdown().await;
        Ok(reason)
    }
}

/// `router.route(path, handler)`, with axum's panic on an invalid or
/// conflicting path returned as its message.
pub(crate) fn try_route<S>(
    router: Router<S>,
    path: &str,
    handler: MethodRouter<S>,
) -> std::result::Result<Router<S>, String>
where
    S: Clone + Send + Sync + 'static,
{
    panic::catch_unwind(AssertUnwindSafe(|| router.route(path, handler))).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "route rejected".to_string()
    }
}

async fn drain(registry: &Registry, hook: Option<&DrainHook>, config: &ServerConfig) {
    registry.shutdown_checker().begin_shutdown();
    tracing::info!("Draining");
    match hook {
        Some(hook) => {
            if let Err(e) = hook().await {
                tracing::error!(error = %format!("{e:#}"), "Drain hook failed");
            }
        }
        None => tokio::time::sleep(config.drain_timeout).await,
    }
    tracing::info!("Drain complete");
}

async fn tagged<F>(role: &'static str, serve: F) -> (&'static str, io::Result<()>)
where
    F: Future<Output = io::Result<()>>,
{
    (role, serve.await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_route_returns_conflicts_as_errors() {
        let router = try_route(Router::<()>::new(), "/health", get(|| async { "ok" })).unwrap();

        let message = try_route(router, "/health", get(|| async { "again" })).unwrap_err();
        assert!(message.contains("/health"), "{message}");

        let message = try_route(Router::<()>::new(), "/items/:id", get(|| async { "" })).unwrap_err();
        assert!(!message.is_empty());
    }
}
