use super::{Interceptor, RequestIdInterceptor};
use crate::di::toposort::toposort;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the built-in request-id node, ordered after every tracing interceptor.
pub const REQUEST_ID_INTERCEPTOR: &str = "request-id";

/// One interceptor registration: a name, the names it must run after, and
/// the unary and/or streaming implementation.
#[derive(Clone)]
pub struct InterceptorRegistration {
    name: String,
    after: Vec<String>,
    tracing: bool,
    unary: Option<Arc<dyn Interceptor>>,
    streaming: Option<Arc<dyn Interceptor>>,
}

impl InterceptorRegistration {
    /// `name` may be empty; a synthetic name is assigned when ordering.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            after: Vec::new(),
            tracing: false,
            unary: None,
            streaming: None,
        }
    }

    /// Uses `interceptor` for both unary and streaming requests.
    pub fn interceptor(self, interceptor: impl Interceptor) -> Self {
        let shared: Arc<dyn Interceptor> = Arc::new(interceptor);
        Self {
            unary: Some(Arc::clone(&shared)),
            streaming: Some(shared),
            ..self
        }
    }

    pub fn unary(mut self, interceptor: impl Interceptor) -> Self {
        self.unary = Some(Arc::new(interceptor));
        self
    }

    pub fn streaming(mut self, interceptor: impl Interceptor) -> Self {
        self.streaming = Some(Arc::new(interceptor));
        self
    }

    pub fn after(mut self, name: impl Into<String>) -> Self {
        self.after.push(name.into());
        self
    }

    /// Marks this as a tracing interceptor; request-id allocation runs after it.
    pub fn tracing(mut self) -> Self {
        self.tracing = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Interceptors in execution order, split by request kind.
#[derive(Clone, Default)]
pub struct OrderedInterceptors {
    pub names: Vec<String>,
    pub unary: Vec<Arc<dyn Interceptor>>,
    pub streaming: Vec<Arc<dyn Interceptor>>,
}

impl fmt::Debug for OrderedInterceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedInterceptors")
            .field("names", &self.names)
            .field("unary", &self.unary.len())
            .field("streaming", &self.streaming.len())
            .finish()
    }
}

/// Orders `registrations` by their `after` constraints.
///
/// The request-id node is always part of the result. Names listed in `after`
/// that nobody registered are ignored with a warning; a cycle is an error.
pub fn order_interceptors(registrations: &[InterceptorRegistration]) -> Result<OrderedInterceptors> {
    // Node 0 is the request-id node; registration i is node i + 1.
    let mut names = Vec::with_capacity(registrations.len() + 1);
    names.push(REQUEST_ID_INTERCEPTOR.to_string());
    for (i, registration) in registrations.iter().enumerate() {
        if registration.name.is_empty() {
            names.push(format!("interceptor-{i}"));
        } else {
            names.push(registration.name.clone());
        }
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(names.len());
    for (node, name) in names.iter().enumerate() {
        if index.insert(name.as_str(), node).is_some() {
            return Err(Error::DuplicateInterceptor { name: name.clone() });
        }
    }

    let mut edges = Vec::new();
    for (i, registration) in registrations.iter().enumerate() {
        let node = i + 1;
        for after in &registration.after {
            match index.get(after.as_str()) {
                Some(&before) => edges.push((before, node)),
                None => tracing::warn!(
                    interceptor = %names[node],
                    after = %after,
                    "Ignoring ordering constraint on unregistered interceptor"
                ),
            }
        }
        if registration.tracing {
            edges.push((node, 0));
        }
    }

    let order = toposort(names.len(), &edges).map_err(|cycle| Error::InterceptorCycle {
        names: cycle.into_iter().map(|node| names[node].clone()).collect(),
    })?;

    let request_id: Arc<dyn Interceptor> = Arc::new(RequestIdInterceptor);
    let mut ordered = OrderedInterceptors::default();
    for node in order {
        ordered.names.push(names[node].clone());
        if node == 0 {
            ordered.unary.push(Arc::clone(&request_id));
            ordered.streaming.push(Arc::clone(&request_id));
            continue;
        }
        let registration = &registrations[node - 1];
        if let Some(unary) = &registration.unary {
            ordered.unary.push(Arc::clone(unary));
        }
        if let Some(streaming) = &registration.streaming {
            ordered.streaming.push(Arc::clone(streaming));
        }
    }

    tracing::debug!(order = ?ordered.names, "Ordered interceptors");
    Ok(ordered)
}
