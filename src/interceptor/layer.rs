use crate::interceptor::{Interceptor, InterceptorResult, Next, OrderedInterceptors};
use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower Layer running the ordered interceptor chains in front of a service.
#[derive(Clone)]
pub struct InterceptorLayer {
    unary: Arc<[Arc<dyn Interceptor>]>,
    streaming: Arc<[Arc<dyn Interceptor>]>,
}

impl InterceptorLayer {
    pub fn new(ordered: OrderedInterceptors) -> Self {
        Self {
            unary: Arc::from(ordered.unary),
            streaming: Arc::from(ordered.streaming),
        }
    }
}

impl<S> Layer<S> for InterceptorLayer {
    type Service = InterceptorService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InterceptorService {
            inner,
            unary: Arc::clone(&self.unary),
            streaming: Arc::clone(&self.streaming),
        }
    }
}

#[derive(Clone)]
pub struct InterceptorService<S> {
    inner: S,
    unary: Arc<[Arc<dyn Interceptor>]>,
    streaming: Arc<[Arc<dyn Interceptor>]>,
}

/// Requests carrying an open-ended body take the streaming chain.
fn is_streaming(request: &Request<Body>) -> bool {
    let has_body_method = request.method() == Method::POST
        || request.method() == Method::PUT
        || request.method() == Method::PATCH;
    has_body_method && !request.headers().contains_key(header::CONTENT_LENGTH)
}

impl<S> Service<Request<Body>> for InterceptorService<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let chain = if is_streaming(&request) {
            Arc::clone(&self.streaming)
        } else {
            Arc::clone(&self.unary)
        };

        // Keep the service that was driven to readiness for this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let endpoint = Box::new(move |req: Request<Body>| -> BoxFuture<'static, InterceptorResult> {
                Box::pin(async move {
                    let response = inner.call(req).await.unwrap_or_else(|never| match never {});
                    Ok(response)
                })
            });

            match Next::chain(chain, endpoint).run(request).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    tracing::error!(error = %e, "Interceptor rejected request");
                    Ok((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())
                }
            }
        })
    }
}
