//! Server Resources
//!
//! A stack of closers released in reverse registration order at shutdown.

use super::{Closer, LifecycleError, Result, closer_fn};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

struct Resource {
    name: String,
    closer: Arc<dyn Closer>,
}

#[derive(Default)]
struct Stack {
    resources: Vec<Resource>,
    closed: bool,
}

/// Resources opened during startup, closed LIFO at shutdown.
///
/// A resource opened later may depend on one opened earlier, so the last one
/// in is the first one out.
///
/// # Example
///
/// ```rust,ignore
/// use servecore::lifecycle::{ServerResources, closer_fn};
///
/// let resources = ServerResources::new();
/// resources.add("db", closer_fn(move || async move { pool.close().await; Ok(()) }))?;
/// resources.add("cache", closer_fn(move || async move { cache.flush().await }))?;
///
/// // ... serve ...
///
/// resources.close().await?; // closes "cache", then "db"
/// ```
#[derive(Default)]
pub struct ServerResources {
    stack: Mutex<Stack>,
}

impl ServerResources {
    /// Create an empty resource stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a resource. Fails once [`close`](Self::close) has started.
    pub fn add(&self, name: impl Into<String>, closer: impl Closer) -> Result<()> {
        let name = name.into();
        let mut stack = self.stack.lock().unwrap_or_else(PoisonError::into_inner);
        if stack.closed {
            return Err(LifecycleError::AlreadyClosed(name));
        }
        tracing::debug!(resource = %name, "Registered server resource");
        stack.resources.push(Resource {
            name,
            closer: Arc::new(closer),
        });
        Ok(())
    }

    /// Push a closure as a resource
    pub fn add_fn<F, Fut>(&self, name: impl Into<String>, close: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add(name, closer_fn(close))
    }

    pub fn len(&self) -> usize {
        self.stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resources
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner).closed
    }

    /// Close every resource, last registered first.
    ///
    /// The stack is taken under the lock and the closers run outside it.
    /// Every closer runs even if an earlier one failed; the first failure is
    /// returned. Calling `close` again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let resources = {
            let mut stack = self.stack.lock().unwrap_or_else(PoisonError::into_inner);
            stack.closed = true;
            std::mem::take(&mut stack.resources)
        };

        tracing::info!(count = resources.len(), "Closing server resources");

        let mut first_error = None;
        for resource in resources.into_iter().rev() {
            tracing::debug!(resource = %resource.name, "Closing");
            if let Err(e) = resource.closer.close().await {
                tracing::error!(resource = %resource.name, error = %e, "Failed to close resource");
                first_error.get_or_insert_with(|| LifecycleError::close_failed(&resource.name, format!("{e:#}")));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close every resource, giving up after `timeout`
    pub async fn close_with_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.close())
            .await
            .map_err(|_| LifecycleError::timeout("close", format!("Timeout after {:?}", timeout)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(order: &Arc<Mutex<Vec<usize>>>, id: usize) -> impl Closer {
        let order = Arc::clone(order);
        closer_fn(move || {
            let order = Arc::clone(&order);
            async move {
                order.lock().unwrap().push(id);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_close_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let resources = ServerResources::new();
        for i in 0..3 {
            resources.add(format!("resource-{i}"), recording(&order, i)).unwrap();
        }
        assert_eq!(resources.len(), 3);

        resources.close().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
        assert!(resources.is_empty());
        assert!(resources.is_closed());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_remaining_closers() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let resources = ServerResources::new();
        resources.add("first", recording(&order, 0)).unwrap();
        resources
            .add_fn("broken", || async { Err(anyhow::anyhow!("socket already gone")) })
            .unwrap();
        resources.add("last", recording(&order, 2)).unwrap();

        let err = resources.close().await.unwrap_err();
        assert!(matches!(err, LifecycleError::CloseFailed { ref name, .. } if name == "broken"));
        assert_eq!(*order.lock().unwrap(), vec![2, 0]);
    }

    #[tokio::test]
    async fn test_add_after_close_fails_and_second_close_is_noop() {
        let resources = ServerResources::new();
        resources.close().await.unwrap();

        let err = resources.add_fn("late", || async { Ok(()) }).unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyClosed(ref name) if name == "late"));
        resources.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_with_timeout() {
        let resources = ServerResources::new();
        resources
            .add_fn("stuck", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .unwrap();

        let err = resources
            .close_with_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Timeout { .. }));
    }
}
