use crate::interceptor::{Interceptor, InterceptorResult, Next};
use async_trait::async_trait;
use axum::{body::Body, http::Request};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Instant;

/// Counts requests and observes their latency, labelled by method and status.
#[derive(Clone)]
pub struct MetricsInterceptor {
    requests: IntCounterVec,
    latency: HistogramVec,
}

impl MetricsInterceptor {
    /// Create the collectors and register them with `registry`.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Requests handled, by method and status"),
            &["method", "status"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "Request latency in seconds"),
            &["method", "status"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        Ok(Self { requests, latency })
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    async fn intercept(&self, request: Request<Body>, next: Next) -> InterceptorResult {
        let method = request.method().as_str().to_string();
        let start = Instant::now();
        let result = next.run(request).await;

        let status = match &result {
            Ok(response) => response.status().as_u16().to_string(),
            Err(_) => "error".to_string(),
        };
        let labels = [method.as_str(), status.as_str()];
        self.requests.with_label_values(&labels).inc();
        self.latency
            .with_label_values(&labels)
            .observe(start.elapsed().as_secs_f64());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{InterceptorLayer, InterceptorRegistration, order_interceptors};
    use axum::{Router, http::StatusCode, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_counts_requests_by_status() {
        let registry = Registry::new();
        let metrics = MetricsInterceptor::new(&registry).unwrap();
        let ordered =
            order_interceptors(&[InterceptorRegistration::new("metrics").interceptor(metrics.clone())]).unwrap();
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/busy", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .layer(InterceptorLayer::new(ordered));

        for _ in 0..3 {
            app.clone()
                .oneshot(Request::get("/ok").body(Body::empty()).unwrap())
                .await
                .unwrap();
        }
        app.oneshot(Request::get("/busy").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(metrics.requests.with_label_values(&["GET", "200"]).get(), 3);
        assert_eq!(metrics.requests.with_label_values(&["GET", "503"]).get(), 1);
        assert!(!registry.gather().is_empty());
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        MetricsInterceptor::new(&registry).unwrap();
        assert!(MetricsInterceptor::new(&registry).is_err());
    }
}
