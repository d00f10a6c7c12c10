use super::Registry;
use crate::config::EnvironmentPurpose;
use crate::di::DependencyGraph;
use crate::health::{CheckKind, CheckReport};
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A listener the server bound, as shown on `/debug/vars`.
#[derive(Debug, Clone, Serialize)]
pub struct BoundListener {
    pub role: &'static str,
    pub addr: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugVars {
    pub started_at: DateTime<Utc>,
    pub environment_purpose: EnvironmentPurpose,
    pub listeners: Vec<BoundListener>,
}

#[derive(Clone)]
pub(crate) struct DebugState {
    pub(crate) registry: Arc<Registry>,
    pub(crate) graph: Arc<DependencyGraph>,
    pub(crate) vars: Arc<DebugVars>,
    pub(crate) health_check_timeout: Duration,
}

/// The debug mux: health, metrics, introspection and registered debug handlers.
pub(crate) fn router(state: DebugState) -> Router {
    let handlers = state.registry.debug_handlers();
    let mut router = Router::new()
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/debug/graph", get(graph))
        .route("/debug/vars", get(vars))
        .with_state(state);
    for (path, handler) in handlers {
        router = router.route(&path, handler);
    }
    router
}

fn health_response(kind: CheckKind, report: CheckReport) -> Response {
    let status = if report.ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, report.render(kind)).into_response()
}

async fn livez(State(state): State<DebugState>) -> Response {
    let report = state
        .registry
        .checkers()
        .check_liveness(state.health_check_timeout)
        .await;
    health_response(CheckKind::Livez, report)
}

async fn readyz(State(state): State<DebugState>) -> Response {
    let report = state
        .registry
        .checkers()
        .check_readiness(state.health_check_timeout)
        .await;
    if !report.ok {
        tracing::debug!(failing = report.failing(), "Readiness check failed");
    }
    health_response(CheckKind::Readyz, report)
}

async fn metrics(State(state): State<DebugState>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.registry.metrics().gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

async fn graph(State(state): State<DebugState>) -> Response {
    Json(state.graph.snapshot()).into_response()
}

async fn vars(State(state): State<DebugState>) -> Json<DebugVars> {
    Json(DebugVars::clone(&state.vars))
}

/// The service-side health route: `SERVING` iff every readiness check passes.
pub(crate) async fn serving_status(registry: Arc<Registry>, timeout: Duration) -> Response {
    let report = registry.checkers().check_readiness(timeout).await;
    if report.ok {
        (StatusCode::OK, "SERVING").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_SERVING").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{Initializer, Provider};
    use crate::health::checker_fn;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> DebugState {
        DebugState {
            registry: Arc::new(Registry::new()),
            graph: Arc::new(DependencyGraph::new()),
            vars: Arc::new(DebugVars {
                started_at: Utc::now(),
                environment_purpose: EnvironmentPurpose::Testing,
                listeners: vec![BoundListener {
                    role: "mux",
                    addr: "127.0.0.1:8080".to_string(),
                }],
            }),
            health_check_timeout: Duration::from_secs(1),
        }
    }

    async fn get_text(router: Router, path: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_livez_and_readyz_text() {
        let state = state();
        state
            .registry
            .register_liveness("loop", checker_fn(|| async { Ok(()) }));
        state
            .registry
            .register_readiness("db", checker_fn(|| async { Err(anyhow::anyhow!("connection refused")) }));

        let (status, body) = get_text(router(state.clone()), "/livez").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[+]loop ok\nlivez check passed\n");

        let (status, body) = get_text(router(state), "/readyz").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            "[+]shutdown ok\n[-]db failed: connection refused\nreadyz check failed: 1/2 failing\n"
        );
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let state = state();
        let counter = prometheus::IntCounter::new("jobs_total", "Jobs run").unwrap();
        state.registry.metrics().register(Box::new(counter.clone())).unwrap();
        counter.inc_by(3);

        let (status, body) = get_text(router(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("jobs_total 3"));
    }

    #[tokio::test]
    async fn test_graph_and_vars_json() {
        let state = state();
        state
            .graph
            .add_provider(Provider::singleton("db", "Pool", |_ctx| async { Ok(1u32) }))
            .unwrap();
        state
            .graph
            .add_initializer(Initializer::new("db", |_ctx| async { Ok(()) }))
            .unwrap();

        let (status, body) = get_text(router(state.clone()), "/debug/graph").await;
        assert_eq!(status, StatusCode::OK);
        let graph: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(graph["providers"][0]["key"]["package"], "db");
        assert_eq!(graph["initializers"][0], "db");

        let (_, body) = get_text(router(state), "/debug/vars").await;
        let vars: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(vars["environment_purpose"], "TESTING");
        assert_eq!(vars["listeners"][0]["role"], "mux");
    }

    #[tokio::test]
    async fn test_registered_debug_handler_is_served() {
        let state = state();
        state
            .registry
            .add_debug_handler("/debug/build", get(|| async { "v1.2.3" }))
            .unwrap();

        let (status, body) = get_text(router(state), "/debug/build").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "v1.2.3");
    }
}
