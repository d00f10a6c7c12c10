use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response};
use futures::future::BoxFuture;
use std::sync::Arc;

mod layer;
mod logging;
mod metrics;
mod order;
mod request_id;
mod trace;

pub use layer::{InterceptorLayer, InterceptorService};
pub use logging::LoggingInterceptor;
pub use metrics::MetricsInterceptor;
pub use order::{InterceptorRegistration, OrderedInterceptors, REQUEST_ID_INTERCEPTOR, order_interceptors};
pub use request_id::{REQUEST_ID_HEADER, RequestId, RequestIdInterceptor};
pub use trace::TracingInterceptor;

/// standard return type for Interceptors
pub type InterceptorResult = Result<Response, InterceptorError>;

/// A type-erased error for interceptors
pub type InterceptorError = Box<dyn std::error::Error + Send + Sync>;

type Endpoint = Box<dyn FnOnce(Request<Body>) -> BoxFuture<'static, InterceptorResult> + Send>;

/// The rest of the chain: the remaining interceptors followed by the endpoint.
pub struct Next {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    position: usize,
    endpoint: Endpoint,
}

impl Next {
    /// A chain with no interceptors left, ending in `endpoint`.
    pub fn new<F>(endpoint: F) -> Self
    where
        F: FnOnce(Request<Body>) -> BoxFuture<'static, InterceptorResult> + Send + 'static,
    {
        Self::chain(Arc::from(Vec::new()), Box::new(endpoint))
    }

    pub(crate) fn chain(interceptors: Arc<[Arc<dyn Interceptor>]>, endpoint: Endpoint) -> Self {
        Self {
            interceptors,
            position: 0,
            endpoint,
        }
    }

    /// Execute the next handler
    pub async fn run(self, request: Request<Body>) -> InterceptorResult {
        match self.interceptors.get(self.position).cloned() {
            Some(interceptor) => {
                let rest = Next {
                    interceptors: self.interceptors,
                    position: self.position + 1,
                    endpoint: self.endpoint,
                };
                interceptor.intercept(request, rest).await
            }
            None => (self.endpoint)(request).await,
        }
    }
}

/// The Interceptor trait
///
/// Interceptors can inspect/modify the request before it reaches the handler,
/// and inspect/modify the response after the handler returns.
///
/// # Example
/// ```rust,ignore
/// struct AuditInterceptor;
///
/// #[async_trait]
/// impl Interceptor for AuditInterceptor {
///     async fn intercept(&self, req: Request<Body>, next: Next) -> InterceptorResult {
///         tracing::info!(path = %req.uri().path(), "audit");
///         next.run(req).await
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn intercept(&self, request: Request<Body>, next: Next) -> InterceptorResult;
}
