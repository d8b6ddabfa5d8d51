use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::services::webhook::SIGNATURE_HEADER;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(payment_webhook))
        .route("/webhook/", post(payment_webhook))
}

// POST /api/webhook/
// The body must stay raw bytes: the signature covers them exactly as sent.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let outcome = state.reconciler.handle_webhook(&body, signature).await.map_err(|e| {
        tracing::warn!("webhook rejected: {}", e);
        ApiError::from(e)
    })?;
    tracing::debug!(?outcome, "webhook processed");

    Ok(Json(json!({ "status": "success" })))
}
