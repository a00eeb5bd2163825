use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient funds in account {account_id}, balance {balance}")]
    InsufficientFunds { account_id: i64, balance: String },

    #[error("Switch rejected the transfer: {0}")]
    SwitchRejected(String),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Reversal conflict: {0}")]
    ReversalConflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<crate::store::StoreError> for AppError {
    fn from(e: crate::store::StoreError) -> Self {
        match e {
            crate::store::StoreError::Database(msg) => AppError::DatabaseError(msg),
            crate::store::StoreError::NotFound(what) => AppError::NotFound(what),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::SwitchRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Communication(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ReversalConflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
