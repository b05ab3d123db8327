//! HTTP server for the scrape and management endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use modbus_exporter_core::{SafeConfig, Transport, build_workload, collect};
use serde::Deserialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ExporterConfig;
use crate::exposition::{CONTENT_TYPE, TextExposition};
use crate::reload::ReloadHandle;
use crate::telemetry::ExporterMetrics;

/// Header carrying Prometheus' scrape timeout.
pub const SCRAPE_TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ExporterConfig>,
    pub store: Arc<SafeConfig>,
    pub transport: Arc<dyn Transport>,
    pub metrics: Arc<ExporterMetrics>,
    pub reload: ReloadHandle,
    pub shutdown: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeParams {
    target: Option<String>,
    config: Option<String>,
}

/// Create the HTTP router.
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();
    let landing = match config.route("") {
        prefix if prefix.is_empty() => "/".to_string(),
        prefix => prefix,
    };

    Router::new()
        .route(&landing, get(landing_handler))
        .route(&config.route(&config.metrics_path), get(scrape_handler))
        .route(&config.route(&config.telemetry_path), get(telemetry_handler))
        .route(&config.route("/-/healthy"), get(health_handler))
        .route(&config.route("/-/ready"), get(health_handler))
        .route(&config.route("/config"), get(config_handler))
        .route(&config.route("/-/status"), get(status_handler))
        .route(
            &config.route("/-/reload"),
            get(post_only_handler)
                .post(reload_handler)
                .put(reload_handler),
        )
        .route(
            &config.route("/-/quit"),
            get(post_only_handler).post(quit_handler).put(quit_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler for the scrape endpoint.
async fn scrape_handler(
    State(state): State<AppState>,
    Query(params): Query<ScrapeParams>,
    headers: HeaderMap,
) -> Response {
    let Some(target) = params.target.filter(|t| !t.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            "'target' parameter must be specified\n",
        )
            .into_response();
    };
    let Some(config_name) = params.config.filter(|c| !c.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            "'config' parameter must be specified\n",
        )
            .into_response();
    };

    let Some(profile) = state.store.profile(&config_name) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("'{}' not defined in configuration\n", config_name),
        )
            .into_response();
    };

    let workload = match build_workload(&profile) {
        Ok(workload) => workload,
        Err(e) => {
            state.metrics.record_request_error(e.kind());
            warn!(config = %config_name, error = %e, "Error preparing workload");
            return (
                StatusCode::BAD_REQUEST,
                format!("error preparing workload: {}\n", e),
            )
                .into_response();
        }
    };

    debug!(address = %target, config = %config_name, units = workload.unit_count(), "Scraping target");

    let start = Instant::now();
    let mut exposition = TextExposition::new();
    let scrape = collect(state.transport.as_ref(), &target, workload, &mut exposition);

    let outcome = match scrape_timeout(&headers) {
        Some(limit) => tokio::time::timeout(limit, scrape).await.map_err(|_| limit),
        None => Ok(scrape.await),
    };

    state
        .metrics
        .observe_collection(&config_name, start.elapsed().as_secs_f64());

    match outcome {
        Ok(Ok(_)) => (
            StatusCode::OK,
            [("content-type", CONTENT_TYPE)],
            exposition.render(),
        )
            .into_response(),
        Ok(Err(e)) => {
            state.metrics.record_request_error(e.kind());
            let message = exposition.error().map(str::to_string).unwrap_or_else(|| e.to_string());
            scrape_error_response(&message)
        }
        Err(limit) => {
            state.metrics.record_request_error("timeout");
            warn!(address = %target, config = %config_name, ?limit, "Scrape timed out");
            scrape_error_response(&format!("scrape of {} timed out after {:?}", target, limit))
        }
    }
}

fn scrape_error_response(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!(
            "An error has occurred while serving metrics:\n\n{}\n",
            message
        ),
    )
        .into_response()
}

/// Scrape deadline requested by Prometheus, if any.
fn scrape_timeout(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(SCRAPE_TIMEOUT_HEADER)?.to_str().ok()?;
    match raw.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        _ => {
            warn!(value = raw, "Ignoring invalid scrape timeout header");
            None
        }
    }
}

/// Handler for the telemetry endpoint.
async fn telemetry_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(
            "content-type",
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        state.metrics.render(),
    )
        .into_response()
}

/// Handler for the /-/healthy and /-/ready endpoints.
async fn health_handler() -> Response {
    (StatusCode::OK, "OK").into_response()
}

/// Current profiles as YAML.
async fn config_handler(State(state): State<AppState>) -> Response {
    match serde_yaml::to_string(&*state.store.read()) {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to marshal config: {}\n", e),
        )
            .into_response(),
    }
}

async fn status_handler(State(state): State<AppState>) -> Response {
    let profiles = state.store.read();
    let body = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "profiles": profiles.names().collect::<Vec<_>>(),
        "settings": &*state.config,
    });
    axum::Json(body).into_response()
}

async fn reload_handler(State(state): State<AppState>) -> Response {
    match state.reload.reload().await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e)).into_response(),
    }
}

async fn quit_handler(State(state): State<AppState>) -> Response {
    info!("Received quit request, shutting down");
    if state.shutdown.send(true).is_err() {
        debug!("No shutdown listener");
    }
    (StatusCode::ACCEPTED, "Requesting termination... Goodbye!\n").into_response()
}

async fn post_only_handler() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        "This endpoint requires a POST request.\n",
    )
        .into_response()
}

async fn landing_handler(State(state): State<AppState>) -> Response {
    let config = &state.config;
    Html(format!(
        "<html>\n<head><title>Modbus Exporter</title></head>\n<body>\n\
         <h1>Modbus Exporter</h1>\n\
         <p><a href=\"{metrics}?target=127.0.0.1:502&amp;config=example\">Scrape a target</a></p>\n\
         <p><a href=\"{telemetry}\">Exporter metrics</a></p>\n\
         <p><a href=\"{config_route}\">Configuration</a></p>\n\
         </body>\n</html>\n",
        metrics = config.route(&config.metrics_path),
        telemetry = config.route(&config.telemetry_path),
        config_route = config.route("/config"),
    ))
    .into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    state: AppState,
    listen_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(state: AppState, listen_addr: SocketAddr) -> Self {
        Self { state, listen_addr }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let config = self.state.config.clone();
        let router = create_router(self.state);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(
            addr = %self.listen_addr,
            metrics_path = %config.route(&config.metrics_path),
            telemetry_path = %config.route(&config.telemetry_path),
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
