use super::{Context, PackageName};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

type InitFn = Arc<dyn Fn(Context) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Startup work owned by a package, ordered against other packages by
/// `before`/`after` hints.
#[derive(Clone)]
pub struct Initializer {
    package: PackageName,
    before: Vec<PackageName>,
    after: Vec<PackageName>,
    run: InitFn,
}

impl Initializer {
    pub fn new<F, Fut>(package: impl Into<PackageName>, run: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            package: package.into(),
            before: Vec::new(),
            after: Vec::new(),
            run: Arc::new(move |ctx| Box::pin(run(ctx))),
        }
    }

    /// Runs this initializer before `package`'s.
    pub fn before(mut self, package: impl Into<PackageName>) -> Self {
        self.before.push(package.into());
        self
    }

    /// Runs this initializer after `package`'s.
    pub fn after(mut self, package: impl Into<PackageName>) -> Self {
        self.after.push(package.into());
        self
    }

    pub fn package(&self) -> &PackageName {
        &self.package
    }

    pub fn before_packages(&self) -> &[PackageName] {
        &self.before
    }

    pub fn after_packages(&self) -> &[PackageName] {
        &self.after
    }

    pub(crate) fn run(&self, ctx: Context) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.run)(ctx)
    }
}

impl std::fmt::Debug for Initializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initializer")
            .field("package", &self.package)
            .field("before", &self.before)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}
