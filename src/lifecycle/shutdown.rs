//! Graceful Shutdown
//!
//! Waits for OS signals and describes how the process should exit.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use strum_macros::Display;
use tokio::signal;

/// The signal that ended the serve loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ShutdownSignal {
    #[strum(serialize = "SIGTERM")]
    Terminate,
    #[strum(serialize = "SIGINT")]
    Interrupt,
}

/// Why the server stopped. The composition root turns this into an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// SIGTERM handled: readiness flipped, drain finished, resources closed.
    Drained,
    /// SIGINT outside development mode.
    Interrupted,
    /// Any signal in development mode; draining was skipped.
    Terminated(ShutdownSignal),
}

impl ExitReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Drained => 0,
            ExitReason::Interrupted => 1,
            ExitReason::Terminated(ShutdownSignal::Terminate) => 0,
            ExitReason::Terminated(ShutdownSignal::Interrupt) => 1,
        }
    }
}

/// User hook that replaces the fixed drain wait on SIGTERM.
pub type DrainHook = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap a closure as a [`DrainHook`]
pub fn drain_hook<F, Fut>(drain: F) -> DrainHook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(drain()))
}

/// Completes with the first of Ctrl+C or SIGTERM
///
/// A handler that cannot be installed is logged and never fires.
///
/// # Example
///
/// ```rust,ignore
/// use servecore::lifecycle::{shutdown_signal, ShutdownSignal};
///
/// match shutdown_signal().await {
///     ShutdownSignal::Terminate => drain().await,
///     ShutdownSignal::Interrupt => {}
/// }
/// ```
pub async fn shutdown_signal() -> ShutdownSignal {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => ShutdownSignal::Interrupt,
        _ = terminate => ShutdownSignal::Terminate,
    };
    tracing::info!(signal = %received, "Received shutdown signal");
    received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitReason::Drained.exit_code(), 0);
        assert_eq!(ExitReason::Interrupted.exit_code(), 1);
        assert_eq!(ExitReason::Terminated(ShutdownSignal::Terminate).exit_code(), 0);
        assert_eq!(ExitReason::Terminated(ShutdownSignal::Interrupt).exit_code(), 1);
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
    }

    #[tokio::test]
    async fn test_drain_hook_wraps_closure() {
        let hook = drain_hook(|| async { Err(anyhow::anyhow!("still busy")) });
        let err = hook().await.unwrap_err();
        assert_eq!(err.to_string(), "still busy");
    }
}
