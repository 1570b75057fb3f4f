//! HTTP route handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::registry::{register_all_backends, ProviderRegistry};
use crate::backend::ExecuteOptions;
use crate::config::Config;

use super::providers;
use super::types::{DonePayload, HealthResponse};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub registry: ProviderRegistry,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/models", get(providers::list_models))
        .route("/api/models/resolve", get(providers::resolve_model))
        .route("/api/providers", get(providers::list_providers))
        .route("/api/providers/:name", get(providers::get_provider))
        .route("/api/execute", post(execute))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let mut registry = ProviderRegistry::new();
    register_all_backends(&mut registry, &config);

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState { config, registry });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: state.registry.list_providers().len(),
    })
}

fn json_event(name: &str, payload: &impl Serialize) -> Event {
    match Event::default().event(name).json_data(payload) {
        Ok(event) => event,
        Err(e) => Event::default()
            .event("error")
            .data(format!("failed to encode {} event: {}", name, e)),
    }
}

/// Run a prompt and stream `message` events, at most one `error`, then `done`.
///
/// Closing the connection cancels the execution.
async fn execute(
    State(state): State<Arc<AppState>>,
    Json(mut options): Json<ExecuteOptions>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let execution_id = Uuid::new_v4();
    if options.cwd.is_none() {
        options.cwd = Some(state.config.working_dir.clone());
    }
    let cancel = CancellationToken::new();
    options.cancel = cancel.clone();

    info!(
        execution_id = %execution_id,
        model = %options.model,
        "Execution requested"
    );
    let mut messages = state
        .registry
        .execute(options)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    // The guard lives in the response body; dropping the body cancels.
    let guard = cancel.drop_guard();
    let stream = async_stream::stream! {
        let _guard = guard;
        let mut count = 0;
        let mut failed = false;
        while let Some(item) = messages.next().await {
            match item {
                Ok(message) => {
                    count += 1;
                    yield Ok::<_, Infallible>(json_event("message", &message));
                }
                Err(err) => {
                    failed = true;
                    warn!(execution_id = %execution_id, code = %err.code, "Execution failed: {}", err.to_message());
                    yield Ok(json_event("error", &err));
                }
            }
        }
        info!(execution_id = %execution_id, messages = count, failed, "Execution finished");
        yield Ok(json_event("done", &DonePayload {
            execution_id: execution_id.to_string(),
            messages: count,
            failed,
        }));
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}
