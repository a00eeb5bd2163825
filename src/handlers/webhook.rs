//! Inbound switch webhook.
//!
//! The switch retries deliveries until it sees an ACK, so every outcome is
//! answered with an explicit ACK/NACK body rather than a bare status code.
//! Duplicate deliveries ACK without mutating anything; that guarantee lives
//! in the inbound service, not here.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn receive_transfer(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    match state.inbound.process(&payload).await {
        Ok(instruction_id) => (
            StatusCode::OK,
            Json(json!({
                "status": "ACK",
                "instructionId": instruction_id,
            })),
        ),
        Err(e) => {
            let status = e.status_code();
            tracing::warn!("NACKing inbound delivery: {}", e);
            (
                status,
                Json(json!({
                    "status": "NACK",
                    "error": e.to_string(),
                })),
            )
        }
    }
}
