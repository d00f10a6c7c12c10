//! Resource teardown trait
//!
//! Anything that holds an OS resource (a pool, a file, a client) and must be
//! released at shutdown implements [`Closer`] and is pushed onto
//! [`ServerResources`](super::ServerResources).

use async_trait::async_trait;
use std::future::Future;

/// Releases a resource at shutdown.
///
/// # Example
///
/// ```rust,ignore
/// use servecore::lifecycle::Closer;
/// use async_trait::async_trait;
///
/// #[async_trait]
/// impl Closer for DatabasePool {
///     async fn close(&self) -> anyhow::Result<()> {
///         self.inner.close().await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Closer: Send + Sync + 'static {
    async fn close(&self) -> anyhow::Result<()>;
}

/// A [`Closer`] backed by a closure.
pub struct CloserFn<F> {
    close: F,
}

/// Wraps `close` as a [`Closer`].
pub fn closer_fn<F, Fut>(close: F) -> CloserFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    CloserFn { close }
}

#[async_trait]
impl<F, Fut> Closer for CloserFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn close(&self) -> anyhow::Result<()> {
        (self.close)().await
    }
}
