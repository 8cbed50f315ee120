//! Exchange a reset key for the account's main API token.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::Result;
use crate::router::session;
use crate::service::IssuedToken;

#[derive(Debug, Serialize, Deserialize)]
pub struct Body {
    pub email: Option<String>,
    pub key: Option<String>,
}

/// Handler to exchange a reset key for an API token.
///
/// The returned secret is shown exactly once; it cannot be read back
/// later.
pub async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<Body>, JsonRejection>,
) -> Result<Json<IssuedToken>> {
    let Json(body) = body?;
    let session = session(&state, &headers).await?;

    let issued = state
        .flows
        .request_api_token(
            session.as_deref(),
            body.email.as_deref(),
            body.key.as_deref(),
        )
        .await?;

    Ok(Json(issued))
}
