//! Thin proxy over the switch's bank directory, for UIs that need the
//! list of reachable destination banks.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::AppState;

/// List the banks known to the switch, minus ourselves.
pub async fn list_banks(State(state): State<AppState>) -> Result<Json<Vec<Value>>, AppError> {
    let banks = state
        .switch
        .list_banks()
        .await
        .map_err(|e| AppError::Communication(e.to_string()))?;

    let own_code = state.config.bank_code.as_str();
    let others = banks
        .into_iter()
        .filter(|bank| !is_own_bank(bank, own_code))
        .collect();

    Ok(Json(others))
}

fn is_own_bank(bank: &Value, own_code: &str) -> bool {
    ["bankId", "code", "id"]
        .iter()
        .filter_map(|field| bank.get(field))
        .filter_map(Value::as_str)
        .any(|code| code.eq_ignore_ascii_case(own_code))
}

pub async fn switch_health(State(state): State<AppState>) -> impl IntoResponse {
    match state.switch.health_check().await {
        Ok(_) => Json(json!({"switch": "UP"})),
        Err(e) => {
            tracing::warn!("Switch health check failed: {}", e);
            Json(json!({"switch": "DOWN"}))
        }
    }
}
