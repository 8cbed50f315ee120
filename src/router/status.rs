//! Public configuration page for front-end identification and customization.

use axum::extract::State;
use axum::Json;

use std::sync::Arc;

use crate::AppState;
use crate::config::Configuration;

/// Public server status (configuration).
pub async fn status(State(state): State<AppState>) -> Json<Arc<Configuration>> {
    Json(Arc::clone(&state.config))
}
