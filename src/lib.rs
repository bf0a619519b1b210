//! Core library for Siren.  This module wires together the session
//! service, the USSD state machine and the HTTP handlers.  The gateway
//! contract is deliberately forgiving: every outcome, including validation
//! failures and internal faults, is answered with `200 OK` and a payload the
//! aggregator can render, because USSD gateways do not act on HTTP status
//! codes.

pub mod cleanup;
mod config;
pub mod flow;
pub mod normalize;
pub mod session;
pub mod store;

pub use config::AppConfig;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::flow::MenuState;
use crate::normalize::{MergedBody, NormalizedRequest};
use crate::session::{Session, SessionService};
use crate::store::{IncidentStore, MemoryIncidentStore};

/// Payload returned to the gateway for every `/ussd` turn.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UssdResponse {
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub msisdn: Option<String>,
    /// Display text with the `CON `/`END ` prefix stripped.
    pub message: String,
    #[serde(rename = "continueSession")]
    pub continue_session: bool,
    /// The unstripped state-machine response, kept for gateways that render
    /// the prefix themselves.
    pub raw_response: String,
}

/// Aliases consulted when echoing gateway identifiers back in the payload.
const RESPONSE_USER_ALIASES: &[&str] = &["userID", "userId", "user_id"];
const RESPONSE_MSISDN_ALIASES: &[&str] = &["msisdn", "msisdnNumber", "phoneNumber", "phone"];

/// Internal application state shared across handlers and the cleanup task.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionService>,
    pub store: Arc<dyn IncidentStore>,
    /// Deployment service code, used as a fallback for initial-dial
    /// detection when the gateway omits one.
    pub shortcode: Option<String>,
    pub cleanup_interval: std::time::Duration,
}

/// Build state from environment variables.  See [`AppConfig::from_env`] for
/// the recognised variables.  The default binary runs against the in-memory
/// incident store.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    Ok(build_state(config, Arc::new(MemoryIncidentStore::new())))
}

/// Build state from explicit configuration and a storage backend.
pub fn build_state(config: AppConfig, store: Arc<dyn IncidentStore>) -> AppState {
    AppState {
        sessions: Arc::new(SessionService::new(
            config.session_ttl(),
            config.replay_ttl(),
        )),
        store,
        cleanup_interval: config.cleanup_interval(),
        shortcode: config.shortcode,
    }
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ussd", post(ussd_handler))
        .route("/healthz", get(healthz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler for `POST /ussd`.  Decodes the body (form and/or JSON),
/// normalizes the gateway fields, and either replays the cached payload for
/// a redelivered initial dial or advances the state machine one turn.
async fn ussd_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let merged = decode_body(&headers, &body);
    let norm = normalize::normalize(&merged);
    tracing::debug!(
        session_id = ?norm.session_id,
        service_code = ?norm.service_code,
        phone_number = ?norm.phone_number,
        text = %norm.text,
        new_session = norm.new_session,
        "incoming ussd request"
    );

    let session_id = norm.session_id.clone().filter(|s| !s.is_empty());
    let phone_number = norm.phone_number.clone().filter(|s| !s.is_empty());
    let (Some(session_id), Some(phone_number)) = (session_id, phone_number) else {
        tracing::warn!("ussd request rejected: missing session id or phone number");
        let body = serde_json::json!({
            "error": "Missing required parameters",
            "expected": ["sessionId | sessionID | session_id", "phoneNumber | msisdn"],
            "received": Value::Object(merged),
        });
        return (StatusCode::OK, Json(body)).into_response();
    };

    let payload = process_turn(&state, &merged, &norm, &session_id, &phone_number).await;
    (StatusCode::OK, Json(payload)).into_response()
}

/// One full turn under the session lock: replay fast path, lookup-or-create,
/// state machine, replay write-through, terminal purge.
async fn process_turn(
    state: &AppState,
    merged: &MergedBody,
    norm: &NormalizedRequest,
    session_id: &str,
    phone_number: &str,
) -> UssdResponse {
    let now = chrono::Utc::now();
    let service_code = norm.service_code.as_deref().or(state.shortcode.as_deref());
    let mut inner = state.sessions.lock().await;

    // Gateways time out and redeliver the first leg of a dialog; answering
    // from the replay cache keeps the retry from advancing the session twice.
    if norm.new_session && normalize::is_initial_dial(&norm.text, service_code) {
        if let Some(cached) = inner.fresh_replay(session_id, state.sessions.replay_ttl(), now) {
            tracing::info!(session_id, "replaying cached payload for redelivered initial dial");
            return cached;
        }
    }

    let mut scratch = match inner
        .session(session_id)
        .filter(|s| !s.is_expired(state.sessions.session_ttl(), now))
        .cloned()
    {
        Some(existing) => existing,
        None => {
            let mut fresh = Session::new(session_id.to_string(), phone_number.to_string());
            // Some gateways fold the dial and the first menu selection into
            // one request; seeding such input onto the main menu processes
            // the selection instead of discarding it.
            if !norm.text.is_empty() && !normalize::is_initial_dial(&norm.text, None) {
                fresh.state = MenuState::MainMenu;
            }
            fresh
        }
    };
    scratch.touch();

    match flow::advance(&mut scratch, &norm.text, state.store.as_ref()).await {
        Ok(response_text) => {
            let payload = make_response_payload(session_id, merged, &response_text);
            if payload.continue_session {
                inner.put_session(scratch);
                inner.store_replay(session_id, payload.clone(), now);
            } else {
                tracing::info!(session_id, "dialog ended, purging session and replay entry");
                inner.remove(session_id);
            }
            payload
        }
        Err(err) => {
            // The scratch session is discarded, so a gateway retry re-enters
            // the turn from the same state.
            tracing::error!(session_id, error = %err, "incident store failure during turn");
            fallback_payload(session_id, merged, phone_number)
        }
    }
}

/// Decode the request body into the merged key/value map.  Form entries are
/// inserted first and JSON second, so JSON wins on key collisions; an absent
/// content type tries both decodings.
fn decode_body(headers: &HeaderMap, body: &[u8]) -> MergedBody {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let mut merged = MergedBody::new();
    if content_type.starts_with("application/x-www-form-urlencoded") || content_type.is_empty() {
        for (key, value) in form_urlencoded::parse(body) {
            merged.insert(key.into_owned(), Value::String(value.into_owned()));
        }
    }
    if content_type.starts_with("application/json") || content_type.is_empty() {
        if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
            for (key, value) in map {
                merged.insert(key, value);
            }
        }
    }
    merged
}

/// Shape the gateway payload from a state-machine response string.  `CON `
/// and `END ` prefixes are stripped into the `continueSession` flag; a
/// string with neither prefix terminates the dialog.
fn make_response_payload(session_id: &str, merged: &MergedBody, response_text: &str) -> UssdResponse {
    let user_id = normalize::pick_string(merged, RESPONSE_USER_ALIASES)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| session_id.to_string());
    let msisdn = normalize::pick_string(merged, RESPONSE_MSISDN_ALIASES);

    let (continue_session, message) = if let Some(rest) = response_text.strip_prefix("CON ") {
        (true, rest.to_string())
    } else if let Some(rest) = response_text.strip_prefix("END ") {
        (false, rest.to_string())
    } else {
        (false, response_text.to_string())
    };

    UssdResponse {
        session_id: session_id.to_string(),
        user_id,
        msisdn,
        message,
        continue_session,
        raw_response: response_text.to_string(),
    }
}

/// Payload returned when the incident store fails mid-turn.
fn fallback_payload(session_id: &str, merged: &MergedBody, phone_number: &str) -> UssdResponse {
    let user_id = normalize::pick_string(merged, RESPONSE_USER_ALIASES)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| session_id.to_string());
    UssdResponse {
        session_id: session_id.to_string(),
        user_id,
        msisdn: Some(phone_number.to_string()),
        message: "Internal server error".to_string(),
        continue_session: false,
        raw_response: "END Internal server error.".to_string(),
    }
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "activeSessions": state.sessions.active_sessions().await,
    });
    (StatusCode::OK, Json(json)).into_response()
}
