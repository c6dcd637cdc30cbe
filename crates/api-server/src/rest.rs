//! REST handlers for visitor tracking ingress and visitor read paths.
//!
//! Engine calls are synchronous and may wait on a per-visitor lock or a store
//! round-trip, so handlers run them on the blocking pool.

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use lead_core::error::{TrackingError, TrackingResult};
use lead_core::events::{EventKind, TrackPayload, TrackingEvent};
use lead_core::types::{ScoreSnapshot, Visitor, VisitorStatus};
use lead_tracking::{
    ConsentUpdate, ConversionOutcome, FieldCaptureBuffer, LeadLink, TrackingEngine,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

/// Maximum length for id-like string fields (visitor id, fingerprint, etc.).
const MAX_FIELD_LEN: usize = 256;

/// Maximum length for URLs.
const MAX_URL_LEN: usize = 2048;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TrackingEngine>,
    pub field_buffer: Arc<FieldCaptureBuffer>,
    pub node_id: String,
    pub start_time: Instant,
}

/// Validate a tracking payload at the API boundary.
fn validate_payload(payload: &TrackPayload) -> Result<(), &'static str> {
    let short_fields = [
        (&payload.visitor_id, "'visitorId' exceeds maximum length"),
        (&payload.fingerprint, "'fingerprint' exceeds maximum length"),
        (&payload.session_id, "'sessionId' exceeds maximum length"),
        (&payload.form_id, "'formId' exceeds maximum length"),
        (&payload.field_name, "'fieldName' exceeds maximum length"),
        (&payload.category, "'category' exceeds maximum length"),
        (&payload.action, "'action' exceeds maximum length"),
        (&payload.email, "'email' exceeds maximum length"),
        (&payload.phone, "'phone' exceeds maximum length"),
        (&payload.ip_address, "'ipAddress' exceeds maximum length"),
    ];
    for (value, message) in short_fields {
        if value.as_deref().is_some_and(|v| v.len() > MAX_FIELD_LEN) {
            return Err(message);
        }
    }
    if let Some(page) = &payload.page {
        if page.url.len() > MAX_URL_LEN {
            return Err("'page.url' exceeds maximum length");
        }
    }
    if payload.referrer.as_deref().is_some_and(|r| r.len() > MAX_URL_LEN) {
        return Err("'referrer' exceeds maximum length");
    }
    Ok(())
}

/// Client address of a request: first hop of `X-Forwarded-For`, then
/// `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Response to every synchronous tracking call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResponse {
    pub visitor_id: String,
    pub fingerprint: String,
    pub status: VisitorStatus,
    pub engagement_score: u8,
    pub lead_score: u8,
}

impl From<&Visitor> for TrackResponse {
    fn from(v: &Visitor) -> Self {
        Self {
            visitor_id: v.visitor_id.clone(),
            fingerprint: v.fingerprint.clone(),
            status: v.status,
            engagement_score: v.behavior.engagement_score,
            lead_score: v.behavior.lead_score,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusOverride {
    pub status: VisitorStatus,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Tracking error translated to an HTTP response.
pub struct ApiError(pub TrackingError);

impl From<TrackingError> for ApiError {
    fn from(err: TrackingError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &TrackingError) -> StatusCode {
    match err {
        TrackingError::InvalidEvent(_) => StatusCode::BAD_REQUEST,
        TrackingError::VisitorNotFound(_) => StatusCode::NOT_FOUND,
        TrackingError::PersistenceConflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "tracking request failed");
            metrics::counter!("api.errors").increment(1);
        }
        // Server-side failures do not echo internals to the client.
        let message = if status.is_server_error() {
            "Internal processing error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.code().to_string(),
                message,
            }),
        )
            .into_response()
    }
}

fn parse_event(payload: TrackPayload, kind: EventKind) -> Result<TrackingEvent, ApiError> {
    if let Err(msg) = validate_payload(&payload) {
        warn!(kind = kind.as_str(), error = msg, "tracking payload validation failed");
        metrics::counter!("api.validation_errors").increment(1);
        return Err(TrackingError::InvalidEvent(msg.to_string()).into());
    }
    Ok(payload.into_event(kind)?)
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> TrackingResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TrackingError::Internal(anyhow::anyhow!("tracking task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn track(
    state: &AppState,
    payload: TrackPayload,
    kind: EventKind,
) -> Result<Json<TrackResponse>, ApiError> {
    let event = parse_event(payload, kind)?;
    let engine = state.engine.clone();
    let visitor = blocking(move || engine.process(&event)).await?;
    Ok(Json(TrackResponse::from(&visitor)))
}

/// POST /api/v1/track/visit
/// Page view. Creates the visitor if needed and records the caller's address.
pub async fn handle_visit(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(mut payload): Json<TrackPayload>,
) -> Result<Json<TrackResponse>, ApiError> {
    if let Some(ip) = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr)) {
        payload.ip_address = Some(ip);
    }
    track(&state, payload, EventKind::PageView).await
}

/// POST /api/v1/track/event
/// Custom event.
pub async fn handle_event(
    State(state): State<AppState>,
    Json(payload): Json<TrackPayload>,
) -> Result<Json<TrackResponse>, ApiError> {
    track(&state, payload, EventKind::Custom).await
}

/// POST /api/v1/track/identify
/// Visitor self-identification.
pub async fn handle_identify(
    State(state): State<AppState>,
    Json(payload): Json<TrackPayload>,
) -> Result<Json<TrackResponse>, ApiError> {
    track(&state, payload, EventKind::Identify).await
}

/// POST /api/v1/track/exit
/// Time spent on a page.
pub async fn handle_exit(
    State(state): State<AppState>,
    Json(payload): Json<TrackPayload>,
) -> Result<Json<TrackResponse>, ApiError> {
    track(&state, payload, EventKind::PageExit).await
}

/// POST /api/v1/track/field
/// Form field edit, debounced before it is applied.
pub async fn handle_field(
    State(state): State<AppState>,
    Json(payload): Json<TrackPayload>,
) -> Result<StatusCode, ApiError> {
    let TrackingEvent::FieldCapture(capture) = parse_event(payload, EventKind::FieldCapture)?
    else {
        return Err(TrackingError::InvalidEvent("expected a field capture".to_string()).into());
    };
    state.field_buffer.record(capture, Instant::now());
    metrics::counter!("api.field_captures.buffered").increment(1);
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/v1/leads/conversion
/// Lead subsystem hook. Always accepted.
pub async fn handle_conversion(
    State(state): State<AppState>,
    Json(link): Json<LeadLink>,
) -> (StatusCode, Json<ConversionOutcome>) {
    let engine = state.engine.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.link_conversion(&link))
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "conversion link task failed");
            ConversionOutcome::Skipped {
                reason: "internal_error".to_string(),
            }
        });
    (StatusCode::ACCEPTED, Json(outcome))
}

/// GET /api/v1/visitors/:id
pub async fn handle_get_visitor(
    State(state): State<AppState>,
    Path(visitor_id): Path<String>,
) -> Result<Json<Visitor>, ApiError> {
    let engine = state.engine.clone();
    Ok(Json(blocking(move || engine.get_visitor(&visitor_id)).await?))
}

/// GET /api/v1/visitors/:id/score
pub async fn handle_get_score(
    State(state): State<AppState>,
    Path(visitor_id): Path<String>,
) -> Result<Json<ScoreSnapshot>, ApiError> {
    let engine = state.engine.clone();
    Ok(Json(blocking(move || engine.score(&visitor_id)).await?))
}

/// PUT /api/v1/visitors/:id/consent
pub async fn handle_consent(
    State(state): State<AppState>,
    Path(visitor_id): Path<String>,
    Json(update): Json<ConsentUpdate>,
) -> Result<Json<TrackResponse>, ApiError> {
    let engine = state.engine.clone();
    let visitor = blocking(move || engine.update_consent(&visitor_id, &update)).await?;
    Ok(Json(TrackResponse::from(&visitor)))
}

/// PUT /api/v1/visitors/:id/status
/// Administrative status override.
pub async fn handle_status_override(
    State(state): State<AppState>,
    Path(visitor_id): Path<String>,
    Json(request): Json<StatusOverride>,
) -> Result<Json<TrackResponse>, ApiError> {
    let engine = state.engine.clone();
    let visitor = blocking(move || engine.override_status(&visitor_id, request.status)).await?;
    Ok(Json(TrackResponse::from(&visitor)))
}

/// GET /health
/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        pending_field_edits: state.field_buffer.len(),
    })
}

/// GET /ready
/// Readiness probe.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live
/// Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub pending_field_edits: usize,
}
