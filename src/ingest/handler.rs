use crate::aggregate::event::path_from_url;
use crate::aggregate::{Aggregator, Event, EventType};
use crate::api::stats::validate_site_id;
use crate::ingest::buffer::EventBuffer;
use crate::ingest::visitor_id;
use crate::storage::store::DuckDbEventStore;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

const MAX_ID_LEN: usize = 256;
const MAX_URL_LEN: usize = 2048;
const MAX_PROPERTIES_LEN: usize = 4096;

fn default_event_type() -> String {
    "pageview".to_string()
}

/// Inbound event payload from the tracking snippet.
///
/// Accepts both the snake_case wire names and the snippet's camelCase ones.
#[derive(Debug, Deserialize)]
pub struct CollectPayload {
    #[serde(alias = "siteId")]
    pub site_id: String,
    #[serde(alias = "sessionId")]
    pub session_id: String,
    #[serde(default, alias = "visitorId")]
    pub visitor_id: Option<String>,
    #[serde(
        default = "default_event_type",
        alias = "eventType",
        alias = "eventName",
        alias = "event_name"
    )]
    pub event_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "referrerUrl", alias = "referrer_url")]
    pub referrer: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Shared application state.
pub struct AppState {
    pub buffer: EventBuffer,
    pub aggregator: Aggregator<DuckDbEventStore>,
    pub secret: String,
    pub dashboard_origin: Option<String>,
    pub default_limit: usize,
}

impl AppState {
    /// Build state around one store: the buffer writes to it and the
    /// aggregator reads from it.
    pub fn new(store: DuckDbEventStore, flush_threshold: usize, secret: String) -> Self {
        Self {
            buffer: EventBuffer::new(flush_threshold, store.clone()),
            aggregator: Aggregator::new(store),
            secret,
            dashboard_origin: None,
            default_limit: crate::aggregate::metrics::DEFAULT_LIMIT,
        }
    }
}

/// POST /api/collect: Ingestion endpoint.
///
/// Validates and normalizes a beacon from the tracking snippet, stamps it
/// with the server time, and pushes it into the buffer.
pub async fn collect_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CollectPayload>,
) -> impl IntoResponse {
    // Length validation to prevent abuse
    let properties_len = if payload.properties.is_empty() {
        0
    } else {
        Value::Object(payload.properties.clone()).to_string().len()
    };
    if payload.site_id.len() > MAX_ID_LEN
        || payload.session_id.len() > MAX_ID_LEN
        || payload.visitor_id.as_ref().is_some_and(|v| v.len() > MAX_ID_LEN)
        || payload.event_type.len() > MAX_ID_LEN
        || payload.url.len() > MAX_URL_LEN
        || payload.referrer.as_ref().is_some_and(|r| r.len() > MAX_URL_LEN)
        || properties_len > MAX_PROPERTIES_LEN
    {
        return StatusCode::BAD_REQUEST;
    }

    let Some(event) = normalize(payload, &headers, &state.secret) else {
        return StatusCode::BAD_REQUEST;
    };

    match state.buffer.push(event) {
        Ok(_) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer event");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Map a length-checked payload onto the stored event shape.
///
/// Returns `None` when the site or session id is unusable once control
/// characters are stripped.
fn normalize(payload: CollectPayload, headers: &HeaderMap, secret: &str) -> Option<Event> {
    let site_id = sanitize_string(&payload.site_id, MAX_ID_LEN);
    let session_id = sanitize_string(&payload.session_id, MAX_ID_LEN);
    if validate_site_id(&site_id).is_err() || session_id.trim().is_empty() {
        return None;
    }

    let now = Utc::now();

    let visitor_id = payload
        .visitor_id
        .as_deref()
        .map(|v| sanitize_string(v, MAX_ID_LEN))
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| {
            let ip = extract_ip(headers);
            let user_agent = headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let salt = visitor_id::daily_salt(secret, now.date_naive());
            visitor_id::generate_visitor_id(&ip, user_agent, &salt)
        });

    let url = sanitize_string(&payload.url, MAX_URL_LEN);
    let event_type = sanitize_string(&payload.event_type, MAX_ID_LEN);

    Some(Event {
        site_id,
        session_id,
        visitor_id,
        event_type: if event_type.is_empty() {
            EventType::Pageview
        } else {
            EventType::from(event_type)
        },
        page_path: path_from_url(&url),
        url,
        referrer_url: payload
            .referrer
            .as_deref()
            .map(|r| sanitize_string(r, MAX_URL_LEN))
            .filter(|r| !r.trim().is_empty()),
        created_at: now,
        properties: payload.properties,
    })
}

/// Extract client IP from headers, checking X-Forwarded-For first.
fn extract_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .unwrap_or("unknown")
        .to_string()
}

/// Sanitize a string by truncating to max length and removing control characters.
fn sanitize_string(input: &str, max_len: usize) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .take(max_len)
        .collect()
}
