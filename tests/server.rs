use servecore::config::{EnvironmentPurpose, ServerConfig};
use servecore::health::checker_fn;
use servecore::lifecycle::{Application, ExitReason, ShutdownSignal, closer_fn};
use servecore::server::HTTP2_PREFACE;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use axum::Router;
use axum::routing::get;

type Served = JoinHandle<servecore::Result<ExitReason>>;

async fn serve(app: Application) -> (SocketAddr, oneshot::Sender<ShutdownSignal>, Served) {
    let server = app.bind().await.unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    let router = Router::new().route("/hello", get(|| async { "hello" }));
    let handle = tokio::spawn(server.run_until(router, async move {
        rx.await.unwrap_or(ShutdownSignal::Terminate)
    }));
    (addr, tx, handle)
}

async fn http1_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn local_app() -> servecore::lifecycle::ApplicationBuilder {
    Application::builder().config(ServerConfig {
        environment_purpose: EnvironmentPurpose::Testing,
        ..ServerConfig::local()
    })
}

#[tokio::test]
async fn test_http1_reaches_debug_mux() {
    let app = local_app()
        .liveness("loop", checker_fn(|| async { Ok(()) }))
        .build()
        .await
        .unwrap();
    let (addr, stop, served) = serve(app).await;

    let response = http1_get(addr, "/livez").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("[+]loop ok\nlivez check passed\n"), "{response}");

    // /health belongs to the service router, not the debug mux.
    let response = http1_get(addr, "/health").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    stop.send(ShutdownSignal::Terminate).unwrap();
    assert_eq!(served.await.unwrap().unwrap(), ExitReason::Drained);
}

#[tokio::test]
async fn test_http2_preface_reaches_service_router() {
    let app = local_app().build().await.unwrap();
    let (addr, stop, served) = serve(app).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(HTTP2_PREFACE).await.unwrap();
    // Empty SETTINGS frame.
    stream.write_all(&[0, 0, 0, 0x04, 0, 0, 0, 0, 0]).await.unwrap();

    let mut header = [0u8; 9];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut header))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(header[3], 0x04, "server must answer with SETTINGS");
    drop(stream);

    stop.send(ShutdownSignal::Terminate).unwrap();
    assert_eq!(served.await.unwrap().unwrap(), ExitReason::Drained);
}

#[tokio::test]
async fn test_extra_ports_serve_each_side() {
    let app = local_app()
        .config(ServerConfig {
            http_port: Some(0),
            gateway_port: Some(0),
            environment_purpose: EnvironmentPurpose::Testing,
            ..ServerConfig::local()
        })
        .build()
        .await
        .unwrap();
    let server = app.bind().await.unwrap();
    let http = server.http_addr().unwrap().unwrap();
    let gateway = server.gateway_addr().unwrap().unwrap();
    let (tx, rx) = oneshot::channel();
    let router = Router::new().route("/hello", get(|| async { "hello" }));
    let served = tokio::spawn(server.run_until(router, async move {
        rx.await.unwrap_or(ShutdownSignal::Terminate)
    }));

    let response = http1_get(http, "/readyz").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");

    let response = http1_get(gateway, "/hello").await;
    assert!(response.ends_with("hello"), "{response}");
    assert!(response.contains("x-request-id:"), "{response}");

    let response = http1_get(gateway, "/health").await;
    assert!(response.ends_with("SERVING"), "{response}");

    tx.send(ShutdownSignal::Terminate).unwrap();
    assert_eq!(served.await.unwrap().unwrap(), ExitReason::Drained);
}

#[tokio::test]
async fn test_sigterm_drains_then_closes_resources_in_reverse() {
    let closed = Arc::new(Mutex::new(Vec::new()));
    let push = |name: &'static str| {
        let closed = Arc::clone(&closed);
        closer_fn(move || {
            let closed = Arc::clone(&closed);
            async move {
                closed.lock().unwrap().push(name);
                Ok(())
            }
        })
    };

    let app = local_app()
        .closer("db", push("db"))
        .closer("cache", push("cache"))
        .build()
        .await
        .unwrap();
    let registry = Arc::clone(app.registry());

    let (addr, stop, served) = serve(app).await;
    let response = http1_get(addr, "/readyz").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(closed.lock().unwrap().is_empty());

    stop.send(ShutdownSignal::Terminate).unwrap();
    assert_eq!(served.await.unwrap().unwrap(), ExitReason::Drained);

    assert_eq!(*closed.lock().unwrap(), vec!["cache", "db"]);
    let report = registry
        .checkers()
        .check_readiness(Duration::from_secs(1))
        .await;
    assert!(!report.ok);
    assert_eq!(
        report.render(servecore::health::CheckKind::Readyz),
        "[-]shutdown failed: shutdown started\nreadyz check failed: 1/1 failing\n"
    );
}

#[tokio::test]
async fn test_drain_hook_runs_after_readiness_flips() {
    let flipped = Arc::new(Mutex::new(None));
    let app = local_app().prepare().unwrap();
    let registry = Arc::clone(app.registry());
    let seen = Arc::clone(&flipped);
    let server = app
        .bind()
        .await
        .unwrap()
        .with_drain_hook(servecore::lifecycle::drain_hook(move || {
            let seen = Arc::clone(&seen);
            let registry = Arc::clone(&registry);
            async move {
                *seen.lock().unwrap() = Some(registry.shutdown_checker().is_shutting_down());
                Ok(())
            }
        }));

    let reason = server
        .run_until(Router::new(), async { ShutdownSignal::Terminate })
        .await
        .unwrap();
    assert_eq!(reason, ExitReason::Drained);
    assert_eq!(*flipped.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn test_development_mode_skips_drain() {
    let app = Application::builder()
        .config(ServerConfig {
            environment_purpose: EnvironmentPurpose::Development,
            drain_timeout: Duration::from_secs(60),
            ..ServerConfig::local()
        })
        .prepare()
        .unwrap();
    let registry = Arc::clone(app.registry());

    let reason = tokio::time::timeout(
        Duration::from_secs(5),
        app.serve_until(Router::new(), async { ShutdownSignal::Terminate }),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(reason, ExitReason::Terminated(ShutdownSignal::Terminate));
    assert!(!registry.shutdown_checker().is_shutting_down());
}

#[tokio::test]
async fn test_interrupt_exits_without_drain() {
    let app = Application::builder()
        .config(ServerConfig {
            environment_purpose: EnvironmentPurpose::Production,
            drain_timeout: Duration::from_secs(60),
            ..ServerConfig::local()
        })
        .prepare()
        .unwrap();

    let reason = tokio::time::timeout(
        Duration::from_secs(5),
        app.serve_until(Router::new(), async { ShutdownSignal::Interrupt }),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(reason, ExitReason::Interrupted);
    assert_eq!(reason.exit_code(), 1);
}

#[tokio::test]
async fn test_registration_closes_once_serving() {
    let app = local_app().build().await.unwrap();
    let registry = Arc::clone(app.registry());
    let (_addr, stop, served) = serve(app).await;

    // Wait for the server to start.
    while !registry.is_running() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let err = registry
        .add_debug_handler("/debug/late", get(|| async { "late" }))
        .unwrap_err();
    assert!(matches!(err, servecore::Error::RegistrationClosed { .. }));

    stop.send(ShutdownSignal::Terminate).unwrap();
    served.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_conflicting_health_route_fails_and_still_closes() {
    let closed = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&closed);
    let app = local_app()
        .closer(
            "db",
            closer_fn(move || {
                let flag = Arc::clone(&flag);
                async move {
                    *flag.lock().unwrap() = true;
                    Ok(())
                }
            }),
        )
        .build()
        .await
        .unwrap();
    let registry = Arc::clone(app.registry());

    let router = Router::new().route("/health", get(|| async { "mine" }));
    let err = app
        .serve_until(router, async { ShutdownSignal::Terminate })
        .await
        .unwrap_err();

    assert!(
        matches!(err, servecore::Error::Config { ref key, .. } if key == "service router"),
        "{err}"
    );
    assert!(*closed.lock().unwrap());
    assert!(!registry.is_running());
}
