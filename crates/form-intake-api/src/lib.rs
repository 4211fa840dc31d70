//! # Form Intake HTTP Service
//!
//! HTTP server that receives form-provider webhooks and runs them through the
//! [`IntakePipeline`].
//!
//! This service provides:
//! - The webhook endpoint, answering with the pipeline's status and JSON body
//! - A health check endpoint
//! - A Prometheus metrics endpoint

pub mod config;
pub mod errors;
pub mod metrics;

pub use config::{
    IntakeConfig, LoggingConfig, ServerConfig, ServiceConfig, WebhookConfig, CONFIG_FILE_ENV,
};
pub use errors::{ConfigError, ServiceError};
pub use metrics::ServiceMetrics;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use bytes::Bytes;
use form_intake_core::{CorrelationId, IntakePipeline, WebhookDelivery};
use serde::{Deserialize, Serialize};
use std::{future::IntoFuture, sync::Arc, time::Duration};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, instrument, warn};

/// Header echoed back so callers can correlate logs.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: Arc<ServiceConfig>,

    /// Intake pipeline with its injected sinks
    pub pipeline: Arc<IntakePipeline>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ServiceConfig,
        pipeline: IntakePipeline,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            metrics,
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;

    let mut router = Router::new()
        .route(&state.config.webhook.endpoint_path, post(handle_webhook))
        .route("/health", get(handle_health_check))
        .route("/metrics", get(metrics_endpoint))
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(middleware::from_fn(request_logging_middleware));

    if server.enable_compression {
        router = router.layer(CompressionLayer::new());
    }
    if server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start HTTP server
///
/// Serves until SIGINT or SIGTERM, then lets in-flight requests finish for
/// at most `server.shutdown_timeout_seconds`.
pub async fn start_server(
    config: ServiceConfig,
    pipeline: IntakePipeline,
) -> Result<(), ServiceError> {
    let metrics = ServiceMetrics::new().map_err(|e| {
        ServiceError::Configuration(ConfigError::Invalid {
            message: format!("Failed to initialize metrics: {}", e),
        })
    })?;

    let address = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);

    let app = create_router(AppState::new(config, pipeline, metrics));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    info!(address = %address, "Starting HTTP server");

    let shutdown_started = Arc::new(tokio::sync::Notify::new());
    let notify = shutdown_started.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!(
                timeout_seconds = shutdown_timeout.as_secs(),
                "Initiating graceful shutdown"
            );
            notify.notify_one();
        })
        .into_future();

    let drain_deadline = async {
        shutdown_started.notified().await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|e| ServiceError::ServerFailed {
                message: e.to_string(),
            })?;
        }
        _ = drain_deadline => {
            warn!("Graceful shutdown timed out; abandoning in-flight requests");
        }
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Handle a form-provider webhook delivery.
///
/// The body is taken as raw bytes so the signature is checked against exactly
/// what was sent. The response status and body come from the pipeline, and
/// the pipeline's correlation id is returned in [`CORRELATION_HEADER`].
#[instrument(skip(state, headers, body), fields(body_size = body.len()))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = std::time::Instant::now();
    state.metrics.webhook_requests_total.inc();

    let signature = headers
        .get(state.config.webhook.signature_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let delivery = WebhookDelivery::new(body, signature).with_correlation_id(correlation_id);
    let result = state.pipeline.handle(&delivery).await;

    state.metrics.record_result(&result, start.elapsed());

    let status = StatusCode::from_u16(result.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(result.body)).into_response();
    if let Some(id) = result.correlation_id {
        set_correlation_header(&mut response, id);
    }
    response
}

/// Basic health check endpoint
#[instrument(skip_all)]
async fn handle_health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.render().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Correlation and request logging middleware
///
/// Adopts the caller's `x-correlation-id` when it is a UUID and otherwise
/// assigns a new one. The id is handed to handlers as a request extension,
/// recorded on the request span and returned in the response header.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = std::time::Instant::now();

    let supplied = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok());
    let correlation_id = match supplied.map(str::parse::<CorrelationId>) {
        Some(Ok(id)) => id,
        Some(Err(_)) => {
            debug!("Ignoring correlation id that is not a UUID");
            CorrelationId::new()
        }
        None => CorrelationId::new(),
    };

    tracing::Span::current().record("correlation_id", tracing::field::display(correlation_id));
    request.extensions_mut().insert(correlation_id);

    let mut response = next.run(request).await;
    if !response.headers().contains_key(CORRELATION_HEADER) {
        set_correlation_header(&mut response, correlation_id);
    }

    let status = response.status();
    let duration_ms = start.elapsed().as_millis() as u64;
    match status.as_u16() {
        500..=u16::MAX => error!(status = status.as_u16(), duration_ms, "Request failed"),
        400..=499 => warn!(status = status.as_u16(), duration_ms, "Request rejected"),
        _ => info!(status = status.as_u16(), duration_ms, "Request completed"),
    }

    response
}

fn set_correlation_header(response: &mut Response, correlation_id: CorrelationId) {
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
