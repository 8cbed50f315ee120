//! Routes for authenticated callers.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::AppState;
use crate::account::Account;
use crate::error::Result;
use crate::router::session;
use crate::service::IssuedToken;

#[derive(Debug, Serialize)]
pub struct CurrentAccount {
    pub account: Account,
    pub token: IssuedToken,
}

#[derive(Debug, Serialize)]
pub struct Validity {
    pub valid: bool,
}

/// Handler returning the caller's account and a renewed main token.
pub async fn current(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CurrentAccount>> {
    let session = session(&state, &headers).await?;
    let (account, token) = state
        .flows
        .get_current_account_and_renew(session.as_deref())
        .await?;

    Ok(Json(CurrentAccount { account, token }))
}

/// Handler checking token validity without renewing it.
///
/// Useful for microservices verifying a caller-presented token.
pub async fn valid(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Validity>> {
    let session = session(&state, &headers).await?;
    let valid = state.flows.check_token_valid(session.as_deref()).await?;

    Ok(Json(Validity { valid }))
}
