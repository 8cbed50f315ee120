//! HTTP surface for the passwordless flows.

pub mod api_token;
pub mod me;
pub mod reset_key;
pub mod revoke;
pub mod status;

use axum::Router;
use axum::http::{HeaderMap, header};
use axum::routing::{get, post};

use crate::AppState;
use crate::error::Result;

const BEARER: &str = "Bearer ";

/// Extract the bearer token from the `Authorization` header, if any.
pub(crate) fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    Some(value.strip_prefix(BEARER).unwrap_or(value))
}

/// Resolve the caller's account from the bearer token, if one is
/// presented and still maps to a live credential.
pub(crate) async fn session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<String>> {
    match bearer(headers) {
        Some(token) => state.flows.session_from_token(token).await,
        None => Ok(None),
    }
}

/// Routes for the passwordless flows.
pub fn router() -> Router<AppState> {
    Router::new()
        // `POST /passwordless/reset_key` mails a single-use key.
        .route("/reset_key", post(reset_key::handler))
        // `POST /passwordless/api_token` exchanges a key for a token.
        .route("/api_token", post(api_token::handler))
        // `POST /passwordless/revoke` best-effort revocation.
        .route("/revoke", post(revoke::handler))
        // `GET /passwordless/me` current account plus renewed token.
        .route("/me", get(me::current))
        // `GET /passwordless/valid` token validity probe.
        .route("/valid", get(me::valid))
}
