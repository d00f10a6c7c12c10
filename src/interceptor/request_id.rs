use crate::interceptor::{Interceptor, InterceptorResult, Next};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderValue, Request},
};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The id allocated for the current request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Allocates a request id unless the caller supplied one, and echoes it back.
#[derive(Clone, Default)]
pub struct RequestIdInterceptor;

#[async_trait]
impl Interceptor for RequestIdInterceptor {
    async fn intercept(&self, mut request: Request<Body>, next: Next) -> InterceptorResult {
        let id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        tracing::Span::current().record("request_id", id.as_str());
        let header = HeaderValue::from_str(&id)?;
        request.headers_mut().insert(REQUEST_ID_HEADER, header.clone());
        request.extensions_mut().insert(RequestId(id));

        let mut response = next.run(request).await?;
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Router, routing::get};
    use tower::ServiceExt;

    async fn echo_id(Extension(id): Extension<RequestId>) -> String {
        id.0
    }

    fn app() -> Router {
        let ordered = crate::interceptor::order_interceptors(&[]).unwrap();
        Router::new()
            .route("/id", get(echo_id))
            .layer(crate::interceptor::InterceptorLayer::new(ordered))
    }

    #[tokio::test]
    async fn test_allocates_uuid() {
        let response = app()
            .oneshot(Request::get("/id").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let header = response.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string();
        assert!(Uuid::parse_str(&header).is_ok());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, header.as_bytes());
    }

    #[tokio::test]
    async fn test_keeps_caller_id() {
        let response = app()
            .oneshot(
                Request::get("/id")
                    .header(REQUEST_ID_HEADER, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc-123");
    }
}
