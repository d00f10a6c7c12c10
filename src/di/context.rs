use super::path::Chain;
use super::{InstantiationPath, PackageName, ProviderKey};
use tokio_util::sync::CancellationToken;

/// Per-call-chain metadata handed to providers, initializers and checks.
///
/// Cloning is cheap; deriving a child context never changes the parent.
#[derive(Clone, Default)]
pub struct Context {
    path: InstantiationPath,
    resolving: Chain<ProviderKey>,
    cancel: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn path(&self) -> &InstantiationPath {
        &self.path
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Child context whose path ends in `package`.
    pub fn enter(&self, package: &PackageName) -> Self {
        Self {
            path: self.path.append(package.clone()),
            resolving: self.resolving.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub(crate) fn is_resolving(&self, key: &ProviderKey) -> bool {
        self.resolving.iter_rev().any(|k| k == key)
    }

    pub(crate) fn resolving(&self, key: &ProviderKey) -> Self {
        Self {
            path: self.path.append(key.package.clone()),
            resolving: self.resolving.append(key.clone()),
            cancel: self.cancel.clone(),
        }
    }

    pub(crate) fn resolving_chain(&self) -> Vec<ProviderKey> {
        self.resolving.to_vec().into_iter().cloned().collect()
    }
}
