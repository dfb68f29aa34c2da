//! HTTP webhook adapter (spec §4.7-§4.8, component C7b). Accepts JSON
//! event payloads over HTTP, enforces `none`/`bearer`/`basic` auth and a
//! per-endpoint/per-IP rate limit, and admits requests onto a bounded
//! channel: a full channel means backpressure, answered with 503 rather
//! than waiting on the pipeline inline.

pub mod auth;
pub mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

use zw_core::event::{RawEvent, RawValue};
use zw_core::AdapterError;

use crate::health::{HealthState, SourceHealth};
use crate::sources::{raw_event_channel, spawn_consumer, try_send_or_drop};
use auth::WebhookAuth;
use rate_limit::EndpointRateLimiters;
use zw_core::pipeline::Pipeline;

pub const SOURCE_NAME: &str = "webhook";
const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 100;

pub struct WebhookSettings {
    pub bind_address: SocketAddr,
    pub rate_limit_per_minute: u32,
    pub max_request_bytes: usize,
    pub auth: WebhookAuth,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            bind_address: ([0, 0, 0, 0], 8088).into(),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            auth: WebhookAuth::None,
        }
    }
}

struct AppState {
    tx: tokio::sync::mpsc::Sender<RawEvent>,
    rate_limiters: EndpointRateLimiters,
    auth: WebhookAuth,
}

/// Derives the rate-limit key, its metric scope, and the metric endpoint
/// label from the request path (spec §4.8): the last segment of a
/// multi-segment path identifies the endpoint and is used as the rate
/// limit key; a single-segment (or empty) path falls back to the client
/// address as the key, scoped per IP rather than per endpoint.
fn endpoint_and_key(path: &str, addr: Option<SocketAddr>) -> (String, String, &'static str) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.len() {
        0 => ("default".to_string(), addr.map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".to_string()), "ip"),
        1 => {
            let endpoint = segments[0].to_string();
            (endpoint, addr.map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".to_string()), "ip")
        }
        _ => {
            let endpoint = segments.last().unwrap().to_string();
            (endpoint.clone(), endpoint, "endpoint")
        }
    }
}

async fn handle_event(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let addr = connect_info.map(|ConnectInfo(addr)| addr);
    let (endpoint, key, scope) = endpoint_and_key(&path, addr);

    match auth::verify(&state.auth, &headers) {
        auth::AuthVerdict::Allowed => {}
        // Missing credentials and a rejected credential both answer 401
        // (spec §4.7) — the caller can't distinguish the two anyway.
        _ => return StatusCode::UNAUTHORIZED.into_response(),
    }

    if !state.rate_limiters.check(&key) {
        metrics::counter!(
            zw_core::metrics::WEBHOOK_RATE_LIMIT_REJECTIONS_TOTAL,
            "endpoint" => endpoint.clone(),
            "scope" => scope,
        )
        .increment(1);
        let body = json!({"error": "rate_limited", "endpoint": endpoint, "retry_after": 60});
        return (StatusCode::TOO_MANY_REQUESTS, [("Retry-After", "60")], Json(body)).into_response();
    }

    let event = RawEvent::new(SOURCE_NAME, RawValue::from(body));
    match state.tx.try_send(event) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => {
            metrics::counter!(zw_core::metrics::WEBHOOK_EVENTS_DROPPED_TOTAL, "endpoint" => endpoint).increment(1);
            warn!(source = SOURCE_NAME, "webhook channel full, rejecting request with 503");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Records `webhook_requests_total{endpoint,status}` for every response
/// this router produces, including ones short-circuited by extractor
/// rejection (malformed JSON) or the body-size-limit layer — both still
/// pass through this middleware since it wraps the whole service.
async fn track_requests<B>(req: axum::http::Request<B>, next: Next<B>) -> Response
where
    B: Send + 'static,
{
    let (endpoint, _, _) = endpoint_and_key(req.uri().path(), None);
    let response = next.run(req).await;
    metrics::counter!(
        zw_core::metrics::WEBHOOK_REQUESTS_TOTAL,
        "endpoint" => endpoint,
        "status" => response.status().as_u16().to_string(),
    )
    .increment(1);
    response
}

pub fn router(tx: tokio::sync::mpsc::Sender<RawEvent>, settings: &WebhookSettings) -> Router {
    let state = Arc::new(AppState {
        tx,
        rate_limiters: EndpointRateLimiters::new(settings.rate_limit_per_minute),
        auth: settings.auth.clone(),
    });

    Router::new()
        .route("/*path", post(handle_event))
        .layer(RequestBodyLimitLayer::new(settings.max_request_bytes.max(1)))
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Runs the webhook HTTP listener until `shutdown` is cancelled. Owns its
/// own bounded channel and consumer task (spec §2/§4.7) — the handler
/// only ever does a non-blocking `try_send`, so a slow pipeline never
/// stalls an inbound HTTP request.
pub async fn run(
    pipeline: Pipeline,
    health: Arc<HealthState>,
    settings: WebhookSettings,
    shutdown: tokio_util::sync::CancellationToken,
) -> Result<(), AdapterError> {
    health.set(SOURCE_NAME, SourceHealth::Starting);

    let (tx, rx) = raw_event_channel();
    let consumer = spawn_consumer(SOURCE_NAME, pipeline, health.clone(), rx, shutdown.child_token());

    let app = router(tx, &settings);

    info!(source = SOURCE_NAME, addr = %settings.bind_address, "webhook adapter listening");
    health.set(SOURCE_NAME, SourceHealth::Running);

    let result = axum::Server::bind(&settings.bind_address)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    drop(consumer);
    if let Err(err) = result {
        warn!(source = SOURCE_NAME, error = %err, "webhook server stopped with an error");
        health.set(SOURCE_NAME, SourceHealth::Errored);
        return Err(AdapterError::Transient { source_name: SOURCE_NAME.to_string(), reason: err.to_string() });
    }
    health.set(SOURCE_NAME, SourceHealth::Stopped);
    Ok(())
}
