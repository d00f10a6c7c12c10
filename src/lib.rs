//! # Servecore
//!
//! Startup, health and serving plumbing for Rust network services.
//!
//! ## Features
//!
//! - **Dependency Graph**: Named initializers ordered by `after` edges, and
//!   singleton/scoped providers resolved through a cancellable [`di::Context`]
//! - **Health Checks**: Liveness and readiness checkers rendered the
//!   Kubernetes `/livez` and `/readyz` way
//! - **Single-port Serving**: HTTP/1 debug traffic and the service router
//!   share one port, split by sniffing the first bytes of each connection
//! - **Interceptors**: Named, ordered middleware with a request-id node
//!   every other interceptor can depend on
//! - **Graceful Shutdown**: SIGTERM flips readiness, drains and closes server
//!   resources last-in first-out
//! - **Keyboard Dispatcher**: Ack-gated key handlers for terminal UIs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use servecore::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = Application::builder()
//!         .config_service(&ConfigService::new())
//!         .initializer(Initializer::new("db", |_ctx| async { Ok(()) }))
//!         .readiness("db", checker_fn(|| async { Ok(()) }))
//!         .interceptor(
//!             InterceptorRegistration::new("logging")
//!                 .after(REQUEST_ID_INTERCEPTOR)
//!                 .interceptor(LoggingInterceptor),
//!         )
//!         .build()
//!         .await?;
//!
//!     let router = Router::new().route("/hello", get(|| async { "hello" }));
//!     let reason = app.serve(router).await?;
//!     std::process::exit(reason.exit_code());
//! }
//! ```

pub mod config;
pub mod di;
pub mod error;
pub mod health;
pub mod interceptor;
pub mod keyboard;
pub mod lifecycle;
pub mod server;

// Re-export core types
pub use config::{ConfigService, EnvironmentPurpose, ServerConfig};
pub use di::{Context, DependencyGraph, Initializer, Provider};
pub use error::{Error, Result};
pub use lifecycle::{Application, ApplicationBuilder, ExitReason};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use servecore::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigService, EnvironmentPurpose, ServerConfig};
    pub use crate::di::{Context, DependencyGraph, Initializer, InstantiationPath, Provider, Scope};
    pub use crate::error::{Error, Result};
    pub use crate::health::{Checker, ShutdownChecker, checker_fn};
    pub use crate::interceptor::{
        Interceptor, InterceptorRegistration, InterceptorResult, LoggingInterceptor,
        MetricsInterceptor, Next, REQUEST_ID_INTERCEPTOR, RequestId, TracingInterceptor,
    };
    pub use crate::keyboard::{Control, Dispatcher, Event, Handler, KeyPress, Operation, Stack};
    pub use crate::lifecycle::{
        Application, ApplicationBuilder, Closer, ExitReason, ServerResources, ShutdownSignal,
        closer_fn, shutdown_signal,
    };
    pub use crate::server::{Registry, Server};
    pub use async_trait::async_trait;
    pub use axum::{
        Router,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
    };
    pub use std::sync::Arc;
}
