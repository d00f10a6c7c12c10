use super::{Context, PackageName, ProviderKey};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

type ProvideFn<T> = Arc<dyn Fn(Context) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// How long a provided value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Built once per graph and shared by every caller.
    Singleton,
    /// Built again on every instantiation.
    Scoped,
}

/// Builds values of type `T` for the key `(package, type_name)`.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Provider::singleton("db", "Pool", |_ctx| async { Pool::connect().await });
/// graph.add_provider(pool.clone())?;
/// let pool: Arc<Pool> = graph.instantiate(&ctx, &pool).await?;
/// ```
pub struct Provider<T> {
    key: ProviderKey,
    scope: Scope,
    provide: ProvideFn<T>,
}

impl<T: Send + Sync + 'static> Provider<T> {
    pub fn new<F, Fut>(key: ProviderKey, scope: Scope, provide: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            key,
            scope,
            provide: Arc::new(move |ctx| Box::pin(provide(ctx))),
        }
    }

    pub fn singleton<F, Fut>(
        package: impl Into<PackageName>,
        type_name: impl Into<String>,
        provide: F,
    ) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(ProviderKey::new(package, type_name), Scope::Singleton, provide)
    }

    pub fn scoped<F, Fut>(
        package: impl Into<PackageName>,
        type_name: impl Into<String>,
        provide: F,
    ) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(ProviderKey::new(package, type_name), Scope::Scoped, provide)
    }
}

impl<T> Provider<T> {
    pub fn key(&self) -> &ProviderKey {
        &self.key
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub(crate) fn provide(&self, ctx: Context) -> BoxFuture<'static, anyhow::Result<T>> {
        (self.provide)(ctx)
    }
}

impl<T> Clone for Provider<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            scope: self.scope,
            provide: Arc::clone(&self.provide),
        }
    }
}
