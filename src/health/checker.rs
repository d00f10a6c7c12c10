use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A named liveness or readiness probe.
///
/// Readiness checkers are memoized by the registry: once a check succeeds it
/// is never run again. Checkers that need to become unhealthy again return
/// `true` from [`is_manual`](Checker::is_manual) and are run on every sweep.
#[async_trait]
pub trait Checker: Send + Sync + 'static {
    async fn check(&self) -> anyhow::Result<()>;

    fn is_manual(&self) -> bool {
        false
    }
}

/// Adapts an async closure into a [`Checker`].
pub struct CheckerFn<F> {
    check: F,
    manual: bool,
}

/// A checker backed by `check`, memoized when registered for readiness.
pub fn checker_fn<F, Fut>(check: F) -> CheckerFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    CheckerFn {
        check,
        manual: false,
    }
}

/// A checker that controls its own state and is run on every sweep.
pub fn manual_checker_fn<F, Fut>(check: F) -> CheckerFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    CheckerFn {
        check,
        manual: true,
    }
}

#[async_trait]
impl<F, Fut> Checker for CheckerFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn check(&self) -> anyhow::Result<()> {
        (self.check)().await
    }

    fn is_manual(&self) -> bool {
        self.manual
    }
}

/// Runs the wrapped checker until it first succeeds, then reports success forever.
pub(crate) struct OnceHealthy {
    inner: Arc<dyn Checker>,
    healthy: AtomicBool,
}

impl OnceHealthy {
    pub(crate) fn new(inner: Arc<dyn Checker>) -> Self {
        Self {
            inner,
            healthy: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Checker for OnceHealthy {
    async fn check(&self) -> anyhow::Result<()> {
        if self.healthy.load(Ordering::Acquire) {
            return Ok(());
        }
        self.inner.check().await?;
        self.healthy.store(true, Ordering::Release);
        Ok(())
    }
}

/// Readiness check that fails permanently once shutdown has begun.
#[derive(Clone, Default)]
pub struct ShutdownChecker {
    started: Arc<AtomicBool>,
}

impl ShutdownChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_shutdown(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Checker for ShutdownChecker {
    async fn check(&self) -> anyhow::Result<()> {
        if self.is_shutting_down() {
            anyhow::bail!("shutdown started");
        }
        Ok(())
    }

    fn is_manual(&self) -> bool {
        true
    }
}
