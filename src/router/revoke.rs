//! Best-effort token revocation, usable after expiry.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::Result;
use crate::router::session;

#[derive(Debug, Serialize, Deserialize)]
pub struct Body {
    pub token: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: String,
}

/// Handler to revoke the caller's token, or an explicitly supplied one.
///
/// An authenticated caller needs no body at all; anonymous callers must
/// supply the token value.
pub async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<Body>, JsonRejection>,
) -> Result<Json<Response>> {
    // Logout paths may post no body; that is only an error when no
    // session identifies the caller either.
    let token = body.ok().and_then(|Json(body)| body.token);
    let session = session(&state, &headers).await?;

    let outcome = state
        .flows
        .revoke_token(session.as_deref(), token.as_deref())
        .await?;

    Ok(Json(Response {
        status: outcome.as_str().to_owned(),
    }))
}
