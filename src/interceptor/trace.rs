use crate::interceptor::{Interceptor, InterceptorResult, Next};
use async_trait::async_trait;
use axum::{body::Body, http::Request};
use tracing::Instrument;

/// Opens a `request` span around the rest of the chain.
///
/// Register it with [`InterceptorRegistration::tracing`](super::InterceptorRegistration::tracing)
/// so the request-id interceptor runs inside the span and can record the id on it.
#[derive(Clone, Default)]
pub struct TracingInterceptor;

#[async_trait]
impl Interceptor for TracingInterceptor {
    async fn intercept(&self, request: Request<Body>, next: Next) -> InterceptorResult {
        let span = tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = tracing::field::Empty,
        );
        next.run(request).instrument(span).await
    }
}
