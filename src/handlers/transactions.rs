//! Transaction HTTP surface: creation, lookup, per-account history,
//! reversal and reconciliation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{NewTransaction, Transaction};
use crate::error::AppError;
use crate::AppState;

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<NewTransaction>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.transactions.create_transaction(request).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.transactions.get(id).await?))
}

pub async fn get_by_reference(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.transactions.get_by_reference(&reference).await?))
}

/// One history row as seen by a specific account. The balance snapshot is
/// the viewer's own leg, so the destination of an internal transfer sees
/// its credited balance rather than the sender's.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub reference: String,
    pub operation_type: String,
    pub amount: BigDecimal,
    pub resulting_balance: Option<BigDecimal>,
    pub status: String,
    pub channel: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    fn for_viewer(tx: &Transaction, viewer: i64) -> Self {
        Self {
            id: tx.id,
            reference: tx.reference.clone(),
            operation_type: tx.operation_type.as_str().to_string(),
            amount: tx.amount.clone(),
            resulting_balance: tx.balance_for_viewer(Some(viewer)).cloned(),
            status: tx.status.as_str().to_string(),
            channel: tx.channel.clone(),
            description: tx.description.clone(),
            created_at: tx.created_at,
        }
    }
}

pub async fn account_history(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let history = state.transactions.history_for_account(account_id).await?;
    let entries = history
        .iter()
        .map(|tx| HistoryEntry::for_viewer(tx, account_id))
        .collect();
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalRequest {
    pub reason_code: String,
}

pub async fn request_reversal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReversalRequest>,
) -> Result<Json<Transaction>, AppError> {
    let refund = state
        .transactions
        .request_reversal(id, &request.reason_code)
        .await?;
    Ok(Json(refund))
}

pub async fn reconcile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.transactions.reconcile(id).await?))
}
