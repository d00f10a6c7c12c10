use axum::{Json, extract::State, routing::get};
use serde::Serialize;
use servecore::di::ProviderKey;
use servecore::keyboard::keys_from_reader;
use servecore::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod status;

use status::StatusHandler;

/// Counts greetings; stands in for a real backend client.
struct Greeter {
    greeted: AtomicU64,
}

#[derive(Serialize)]
struct Greeting {
    message: String,
    count: u64,
}

async fn hello(State(greeter): State<Arc<Greeter>>) -> Json<Greeting> {
    let count = greeter.greeted.fetch_add(1, Ordering::Relaxed) + 1;
    Json(Greeting {
        message: "hello".to_string(),
        count,
    })
}

fn greeter_key() -> ProviderKey {
    ProviderKey::new("greeter", "Greeter")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    tracing::info!("Starting example server...");

    let builder = Application::builder().config_service(&ConfigService::new());
    let metrics = MetricsInterceptor::new(builder.registry().metrics())?;

    let app = builder
        .init_timeout(Duration::from_secs(30))
        .provider(Provider::singleton("greeter", "Greeter", |_ctx| async {
            Ok(Greeter {
                greeted: AtomicU64::new(0),
            })
        }))
        .initializer(Initializer::new("greeter", |ctx: Context| async move {
            tracing::info!(path = %ctx.path(), "Warming up greeter");
            Ok(())
        }))
        .initializer(Initializer::new("server", |_ctx| async { Ok(()) }).after("greeter"))
        .readiness("greeter", checker_fn(|| async { Ok(()) }))
        .interceptor(InterceptorRegistration::new("tracing").tracing().interceptor(TracingInterceptor))
        .interceptor(
            InterceptorRegistration::new("logging")
                .after(REQUEST_ID_INTERCEPTOR)
                .interceptor(LoggingInterceptor),
        )
        .interceptor(InterceptorRegistration::new("metrics").after("logging").interceptor(metrics))
        .debug_handler("/debug/version", get(|| async { env!("CARGO_PKG_VERSION") }))
        .closer(
            "greeter",
            closer_fn(|| async {
                tracing::info!("Greeter closed");
                Ok(())
            }),
        )
        .build()
        .await?;

    let greeter: Arc<Greeter> = app.graph().resolve(app.context(), &greeter_key()).await?;
    let router = Router::new()
        .route("/hello", get(hello))
        .with_state(greeter);

    let keyboard = CancellationToken::new();
    if app.config().is_development() {
        spawn_keyboard(keyboard.clone())?;
    }

    let reason = app.serve(router).await?;
    keyboard.cancel();

    tracing::info!(?reason, "Example server stopped");
    std::process::exit(reason.exit_code());
}

fn spawn_keyboard(cancel: CancellationToken) -> Result<()> {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(StatusHandler)?;

    let (stack_tx, stack_rx) = mpsc::channel(1);
    let (keys_tx, keys_rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let _ = stack_tx
            .send(Stack {
                name: "local".to_string(),
                services: vec!["greeter".to_string()],
            })
            .await;
    });

    let reader = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = keys_from_reader(tokio::io::stdin(), keys_tx, reader).await {
            tracing::warn!(error = %e, "Keyboard input closed");
        }
    });
    tokio::spawn(async move {
        let report = dispatcher.run(stack_rx, keys_rx, cancel).await;
        if !report.completed() {
            tracing::warn!(aborted = ?report.aborted, "Keyboard handlers aborted");
        }
    });
    Ok(())
}
