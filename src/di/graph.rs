use super::toposort::toposort;
use super::{Context, Initializer, PackageName, Provider, ProviderKey, Scope};
use crate::error::{Error, Result, SharedError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Instantiations slower than this are reported with a warning.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(100);

type AnyValue = Arc<dyn Any + Send + Sync>;

struct Built {
    value: AnyValue,
    type_name: &'static str,
}

type Memo = Arc<OnceCell<std::result::Result<Built, SharedError>>>;

struct ProviderEntry {
    type_id: TypeId,
    type_name: &'static str,
    scope: Scope,
    /// The registered `Provider<T>`, erased.
    provider: AnyValue,
}

/// Registered providers and initializers of one process (or one test).
///
/// Providers are keyed by `(package, type_name)`. Singleton values are built
/// at most once and shared; scoped values are built on every request.
/// Initializers are ordered from their `before`/`after` hints and run once.
pub struct DependencyGraph {
    providers: DashMap<ProviderKey, ProviderEntry>,
    singletons: DashMap<ProviderKey, Memo>,
    initializers: Mutex<Vec<Initializer>>,
    initialized: AtomicBool,
    sealed: AtomicBool,
    slow_threshold: Duration,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::with_slow_threshold(DEFAULT_SLOW_THRESHOLD)
    }

    pub fn with_slow_threshold(slow_threshold: Duration) -> Self {
        Self {
            providers: DashMap::new(),
            singletons: DashMap::new(),
            initializers: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
            sealed: AtomicBool::new(false),
            slow_threshold,
        }
    }

    /// Registers `provider` under its key. Each key may be registered once.
    pub fn add_provider<T: Send + Sync + 'static>(&self, provider: Provider<T>) -> Result<()> {
        self.assert_not_running("add_provider")?;

        let key = provider.key().clone();
        match self.providers.entry(key.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateProvider { key }),
            Entry::Vacant(slot) => {
                tracing::debug!(provider = %key, scope = ?provider.scope(), "Registered provider");
                slot.insert(ProviderEntry {
                    type_id: TypeId::of::<T>(),
                    type_name: std::any::type_name::<T>(),
                    scope: provider.scope(),
                    provider: Arc::new(provider),
                });
                Ok(())
            }
        }
    }

    /// Queues an initializer. Ordering is only computed by [`run_initializers`](Self::run_initializers).
    pub fn add_initializer(&self, initializer: Initializer) -> Result<()> {
        self.assert_not_running("add_initializer")?;
        let mut initializers = self.initializers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.initialized.load(Ordering::SeqCst) {
            return Err(Error::RegistrationClosed {
                what: format!("add_initializer({})", initializer.package()),
            });
        }
        initializers.push(initializer);
        Ok(())
    }

    pub fn contains(&self, key: &ProviderKey) -> bool {
        self.providers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Closes the registration window; later registrations fail with
    /// [`Error::RegistrationClosed`].
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn assert_not_running(&self, what: &str) -> Result<()> {
        if self.sealed.load(Ordering::SeqCst) {
            return Err(Error::RegistrationClosed {
                what: what.to_string(),
            });
        }
        Ok(())
    }

    /// Resolves the value of `provider`.
    ///
    /// Singletons are built on first use and every later call observes the
    /// same value or the same error; concurrent first callers wait for one
    /// build. Scoped providers are built on every call.
    pub async fn instantiate<T: Send + Sync + 'static>(
        &self,
        ctx: &Context,
        provider: &Provider<T>,
    ) -> Result<Arc<T>> {
        let key = provider.key();
        if ctx.is_resolving(key) {
            let mut chain: Vec<String> = ctx.resolving_chain().iter().map(ToString::to_string).collect();
            chain.push(key.to_string());
            return Err(Error::InstantiationCycle {
                cycle: chain.join(" -> "),
            });
        }
        self.check_registered_type::<T>(key)?;

        match provider.scope() {
            Scope::Scoped => self
                .build(ctx, provider)
                .await
                .map(Arc::new)
                .map_err(|e| Error::Instantiation {
                    key: key.clone(),
                    source: SharedError::new(e),
                }),
            Scope::Singleton => {
                let memo = self.singletons.entry(key.clone()).or_default().clone();
                let built = memo
                    .get_or_init(|| async {
                        self.build(ctx, provider)
                            .await
                            .map(|value| Built {
                                value: Arc::new(value) as AnyValue,
                                type_name: std::any::type_name::<T>(),
                            })
                            .map_err(SharedError::new)
                    })
                    .await;

                match built {
                    Ok(built) => {
                        built
                            .value
                            .clone()
                            .downcast::<T>()
                            .map_err(|_| Error::ProviderTypeMismatch {
                                key: key.clone(),
                                registered: built.type_name,
                                requested: std::any::type_name::<T>(),
                            })
                    }
                    Err(source) => Err(Error::Instantiation {
                        key: key.clone(),
                        source: source.clone(),
                    }),
                }
            }
        }
    }

    /// Resolves `provider` and hands the value to `continuation`, together
    /// with a context scoped to the provider's package.
    pub async fn instantiate_with<T, R, F, Fut>(
        &self,
        ctx: &Context,
        provider: &Provider<T>,
        continuation: F,
    ) -> Result<R>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Context, Arc<T>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let value = self.instantiate(ctx, provider).await?;
        continuation(ctx.enter(&provider.key().package), value).await
    }

    /// Resolves a provider previously registered with [`add_provider`](Self::add_provider).
    pub async fn resolve<T: Send + Sync + 'static>(
        &self,
        ctx: &Context,
        key: &ProviderKey,
    ) -> Result<Arc<T>> {
        let provider = {
            let entry = self
                .providers
                .get(key)
                .ok_or_else(|| Error::ProviderNotFound { key: key.clone() })?;
            entry
                .provider
                .clone()
                .downcast::<Provider<T>>()
                .map_err(|_| Error::ProviderTypeMismatch {
                    key: key.clone(),
                    registered: entry.type_name,
                    requested: std::any::type_name::<T>(),
                })?
        };
        self.instantiate(ctx, &provider).await
    }

    /// Computes the initializer order without running anything.
    pub fn initialization_order(&self) -> Result<Vec<PackageName>> {
        let initializers = self.initializers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sort_initializers(&initializers)?
            .iter()
            .map(|init| init.package().clone())
            .collect())
    }

    /// Runs every queued initializer once, sequentially, in dependency order.
    ///
    /// The order is validated before the first initializer runs: duplicate
    /// packages, references to unknown packages and cycles are reported
    /// without side effects. The first failing initializer stops the run.
    pub async fn run_initializers(&self, ctx: &Context) -> Result<()> {
        let sorted = {
            let initializers = self.initializers.lock().unwrap_or_else(PoisonError::into_inner);
            if self.initialized.load(Ordering::SeqCst) {
                return Err(Error::RegistrationClosed {
                    what: "run_initializers".to_string(),
                });
            }
            let sorted = sort_initializers(&initializers)?;
            // Only a valid order closes registration.
            self.initialized.store(true, Ordering::SeqCst);
            sorted
        };
        tracing::info!(count = sorted.len(), "Running initializers...");

        for init in &sorted {
            let package = init.package();
            let started = Instant::now();
            tracing::debug!(%package, "Initializing");

            init.run(ctx.enter(package)).await.map_err(|source| {
                tracing::error!(%package, error = %source, "Initializer failed");
                Error::Initializer {
                    package: package.clone(),
                    source,
                }
            })?;

            tracing::info!(
                %package,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Initialized"
            );
        }

        tracing::info!(count = sorted.len(), "Initializers complete");
        Ok(())
    }

    /// Registered providers and the planned initializer order, for debug output.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut providers: Vec<ProviderInfo> = self
            .providers
            .iter()
            .map(|entry| ProviderInfo {
                key: entry.key().clone(),
                type_name: entry.type_name,
                scope: entry.scope,
                instantiated: self
                    .singletons
                    .get(entry.key())
                    .is_some_and(|memo| memo.initialized()),
            })
            .collect();
        providers.sort_by(|a, b| a.key.cmp(&b.key));

        let (initializers, ordering_error) = match self.initialization_order() {
            Ok(order) => (order, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };

        GraphSnapshot {
            providers,
            initializers,
            ordering_error,
            initialized: self.initialized.load(Ordering::SeqCst),
        }
    }

    fn check_registered_type<T: 'static>(&self, key: &ProviderKey) -> Result<()> {
        match self.providers.get(key) {
            Some(entry) if entry.type_id != TypeId::of::<T>() => Err(Error::ProviderTypeMismatch {
                key: key.clone(),
                registered: entry.type_name,
                requested: std::any::type_name::<T>(),
            }),
            _ => Ok(()),
        }
    }

    async fn build<T: Send + Sync + 'static>(
        &self,
        ctx: &Context,
        provider: &Provider<T>,
    ) -> anyhow::Result<T> {
        let key = provider.key();
        let started = Instant::now();
        let result = provider.provide(ctx.resolving(key)).await;
        let elapsed = started.elapsed();

        if elapsed > self.slow_threshold {
            tracing::warn!(
                package = %key.package,
                type_name = %key.type_name,
                path = %ctx.path(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow provider instantiation"
            );
        } else {
            tracing::debug!(provider = %key, elapsed_us = elapsed.as_micros() as u64, "Instantiated");
        }
        result
    }
}

/// Orders `initializers` by their `before`/`after` hints.
///
/// Fails on duplicate packages, references to unknown packages and cycles.
fn sort_initializers(initializers: &[Initializer]) -> Result<Vec<Initializer>> {
    let mut index: HashMap<&PackageName, usize> = HashMap::with_capacity(initializers.len());
    for (i, init) in initializers.iter().enumerate() {
        if index.insert(init.package(), i).is_some() {
            return Err(Error::DuplicateInitializer {
                package: init.package().clone(),
            });
        }
    }

    let lookup = |owner: &Initializer, package: &PackageName| {
        index
            .get(package)
            .copied()
            .ok_or_else(|| Error::UnknownInitializer {
                package: owner.package().clone(),
                missing: package.clone(),
            })
    };

    let mut edges = Vec::new();
    for (i, init) in initializers.iter().enumerate() {
        for after in init.after_packages() {
            edges.push((lookup(init, after)?, i));
        }
        for before in init.before_packages() {
            edges.push((i, lookup(init, before)?));
        }
    }

    let order = toposort(initializers.len(), &edges).map_err(|cycle| Error::InitializerCycle {
        packages: cycle
            .into_iter()
            .map(|i| initializers[i].package().clone())
            .collect(),
    })?;

    Ok(order.into_iter().map(|i| initializers[i].clone()).collect())
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub key: ProviderKey,
    pub type_name: &'static str,
    pub scope: Scope,
    pub instantiated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub providers: Vec<ProviderInfo>,
    pub initializers: Vec<PackageName>,
    pub ordering_error: Option<String>,
    pub initialized: bool,
}
