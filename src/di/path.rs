use super::PackageName;
use std::fmt;
use std::sync::Arc;

/// Immutable singly linked list whose tails are shared between values.
///
/// Appending allocates one node and never touches the existing chain, so a
/// value handed to a nested call can not be observed changing by its caller.
pub(crate) struct Chain<T> {
    head: Option<Arc<Link<T>>>,
    len: usize,
}

struct Link<T> {
    value: T,
    parent: Option<Arc<Link<T>>>,
}

impl<T> Chain<T> {
    pub(crate) fn new() -> Self {
        Self { head: None, len: 0 }
    }

    pub(crate) fn append(&self, value: T) -> Self {
        Self {
            head: Some(Arc::new(Link {
                value,
                parent: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn last(&self) -> Option<&T> {
        self.head.as_deref().map(|link| &link.value)
    }

    /// Iterates from the most recently appended value back to the first.
    pub(crate) fn iter_rev(&self) -> impl Iterator<Item = &T> {
        let mut cursor = self.head.as_deref();
        std::iter::from_fn(move || {
            let link = cursor?;
            cursor = link.parent.as_deref();
            Some(&link.value)
        })
    }

    pub(crate) fn to_vec(&self) -> Vec<&T> {
        let mut values: Vec<&T> = self.iter_rev().collect();
        values.reverse();
        values
    }
}

impl<T> Clone for Chain<T> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The packages traversed to reach the current instantiation, outermost first.
///
/// Used to scope check names and to describe where a failing provider was
/// requested from.
#[derive(Clone, Default)]
pub struct InstantiationPath {
    chain: Chain<PackageName>,
}

impl InstantiationPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new path with `package` appended; `self` is left untouched.
    pub fn append(&self, package: impl Into<PackageName>) -> Self {
        Self {
            chain: self.chain.append(package.into()),
        }
    }

    pub fn last(&self) -> Option<&PackageName> {
        self.chain.last()
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.len() == 0
    }
}

impl fmt::Display for InstantiationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self.chain.to_vec().into_iter().map(PackageName::as_str).collect();
        f.write_str(&parts.join(" -> "))
    }
}

impl fmt::Debug for InstantiationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.chain.to_vec()).finish()
    }
}
