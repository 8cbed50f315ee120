//! Request a single-use reset key by email.

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
    pub email: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: String,
}

/// Handler to request a reset key.
pub async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<Body>, JsonRejection>,
) -> Result<Json<Response>> {
    let Json(body) = body?;
    let session = session(&state, &headers).await?;

    state
        .flows
        .request_reset_key(session.as_deref(), body.email.as_deref())
        .await?;

    Ok(Json(Response {
        status: "success".to_owned(),
    }))
}
