//! REST clipboard endpoints
//!
//! Both clipboard endpoints use HTTP basic auth with the account password
//! and answer with a `{code, message, data}` envelope.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use cr_protocol::{DataInfo, RespInfo, SetRequest};

use crate::router::RoutedMessage;
use crate::state::ServerState;

fn respond(status: StatusCode, message: &str, data: Option<DataInfo>) -> Response {
    let body = RespInfo {
        code: status.as_u16(),
        message: message.to_string(),
        data,
    };
    (status, Json(body)).into_response()
}

fn unauthorized() -> Response {
    respond(StatusCode::UNAUTHORIZED, "Authentication failed.", None)
}

/// Parse `Authorization: Basic ...` into user and password
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Resolve the authenticated username, if any
async fn authenticate(state: &ServerState, headers: &HeaderMap) -> Option<String> {
    let (user, password) = basic_credentials(headers)?;

    match state.credentials.password_hash(&user).await {
        Ok(Some(stored)) if stored == password => Some(user),
        Ok(_) => {
            tracing::warn!("REST authentication failed for user {}", user);
            None
        }
        Err(e) => {
            tracing::error!("Credential lookup for {} failed: {}", user, e);
            None
        }
    }
}

/// `GET /clipboard/get`: the user's latest content
pub(crate) async fn get_clipboard(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Response {
    let Some(user) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    match state.content.clip_content_by_username(&user).await {
        Ok(Some(record)) => respond(
            StatusCode::OK,
            "Get clipboard succeed.",
            Some(DataInfo::text(String::from_utf8_lossy(&record.content))),
        ),
        Ok(None) => respond(StatusCode::NOT_FOUND, "No clipboard content.", None),
        Err(e) => {
            tracing::error!("Failed to read clipboard for {}: {}", user, e);
            respond(StatusCode::BAD_REQUEST, "Get clipboard info failed.", None)
        }
    }
}

/// `POST /clipboard/set`: store content and fan it out
pub(crate) async fn set_clipboard(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(user) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    let request: SetRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return respond(StatusCode::BAD_REQUEST, &e.to_string(), None),
    };

    let content = Bytes::from(request.content.into_bytes());

    // A failed insert does not stop the fan-out.
    if let Err(e) = state
        .content
        .insert_clip_content(&request.client_id, &user, content.clone())
        .await
    {
        tracing::error!(
            "Failed to store clipboard from {} of {}: {}",
            request.client_id,
            user,
            e
        );
    }

    if let Err(e) = state
        .router
        .broadcast(RoutedMessage::new(request.client_id, user, content))
        .await
    {
        tracing::error!("Failed to broadcast REST clipboard: {}", e);
        return respond(StatusCode::SERVICE_UNAVAILABLE, "Relay is shutting down.", None);
    }

    respond(StatusCode::OK, "Set clipboard succeed.", None)
}

/// `GET /health`
pub(crate) async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
