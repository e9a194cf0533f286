//! Serve — HTTP exposition of the metric families.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::runtime::stop::shutdown_signal;
use crate::state::AppState;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);
    let metrics_path = state.config.server.metrics_path.clone();

    Router::new()
        .route(&metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    request_timeout,
                )),
        )
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl+C / SIGTERM.
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let metrics_path = state.config.server.metrics_path.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("✓ varnishlog exporter is ready!");
    info!("  - Metrics: http://{}{}", addr, metrics_path);
    info!("  - Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

/// Landing page linking to the metrics path
async fn root_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>Varnishlog Exporter</title></head>\n\
         <body>\n\
         <h1>Varnishlog Exporter</h1>\n\
         <p><a href='{path}'>Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        path = state.config.server.metrics_path
    ))
}

/// Health check handler - healthy while every log source is streaming
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = state.all_streaming();
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let sources: serde_json::Map<String, serde_json::Value> = state
        .sources
        .iter()
        .map(|s| (s.name.clone(), json!(s.current())))
        .collect();

    (
        status_code,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
            "sources": sources,
        })),
    )
}
