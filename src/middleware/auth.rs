use axum::{
    body::{self, Body, Bytes},
    extract::{Request, State},
    http::{header, Method},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde_json::Value;

use crate::auth::{credential_from_headers, ActionPolicy, AuthError, ACTION_TOKEN_FIELD};
use crate::error::ApiError;
use crate::AppState;

/// Verifies the caller's credential and any embedded action token, then
/// injects the resulting `Identity` into the request extensions
pub async fn access_gate_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();

    let token = credential_from_headers(&parts.headers);
    let origin = parts.headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let mut identity = state.gate.authenticate(token.as_deref(), origin)?;

    // The action token rides in the JSON body, so buffer it and hand the
    // same bytes on to the handler
    let bytes = body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| ApiError::PayloadTooLarge("Request body too large".to_string()))?;

    let action = action_token_from_body(&bytes)?;
    let policy = action_policy(&parts.method, parts.uri.query());
    state
        .gate
        .authorize_action(&mut identity, action.as_deref(), policy, Utc::now())?;

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

/// Dropping a whole collection requires a fresh action token
pub fn action_policy(method: &Method, query: Option<&str>) -> ActionPolicy {
    let has_id = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).any(|(k, v)| k == "id" && !v.trim().is_empty()))
        .unwrap_or(false);

    if *method == Method::DELETE && !has_id {
        ActionPolicy::Required
    } else {
        ActionPolicy::Optional
    }
}

/// A present `request` field must be a token string; anything else is refused
/// rather than treated as absent
fn action_token_from_body(bytes: &Bytes) -> Result<Option<String>, AuthError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let Ok(body) = serde_json::from_slice::<Value>(bytes) else {
        return Ok(None);
    };
    match body.get(ACTION_TOKEN_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(token)) => Ok(Some(token.clone())),
        Some(_) => Err(AuthError::InvalidActionToken),
    }
}
