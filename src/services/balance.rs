//! Balance mutation proxy.
//!
//! A single-account read-modify-write against the accounts service: fetch,
//! apply a signed delta, reject below-zero before writing anything, push
//! the new balance back. No cross-account atomicity lives here; that is the
//! orchestrator's job via ordered calls and compensation.

use bigdecimal::BigDecimal;
use thiserror::Error;

use crate::clients::{AccountsClient, AccountsError};
use crate::error::AppError;

#[derive(Error, Debug)]
pub enum BalanceError {
    #[error("Insufficient funds in account {account_id}, balance {balance}")]
    InsufficientFunds {
        account_id: i64,
        balance: BigDecimal,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("Accounts service unavailable: {0}")]
    RemoteUnavailable(String),
}

impl From<BalanceError> for AppError {
    fn from(e: BalanceError) -> Self {
        match e {
            BalanceError::InsufficientFunds {
                account_id,
                balance,
            } => AppError::InsufficientFunds {
                account_id,
                balance: balance.to_string(),
            },
            BalanceError::AccountNotFound(id) => AppError::NotFound(format!("account {}", id)),
            BalanceError::RemoteUnavailable(msg) => AppError::Communication(msg),
        }
    }
}

#[derive(Clone)]
pub struct BalanceService {
    accounts: AccountsClient,
}

impl BalanceService {
    pub fn new(accounts: AccountsClient) -> Self {
        Self { accounts }
    }

    /// Apply a signed delta to one account and return the new balance.
    ///
    /// `InsufficientFunds` is raised before any write, so the caller knows
    /// nothing was applied; `RemoteUnavailable` after the fetch leaves the
    /// account untouched too, since the write is the last step.
    pub async fn apply_delta(
        &self,
        account_id: i64,
        delta: &BigDecimal,
    ) -> Result<BigDecimal, BalanceError> {
        let current = self.accounts.get_balance(account_id).await.map_err(|e| {
            tracing::error!("Failed to fetch balance for account {}: {}", account_id, e);
            match e {
                AccountsError::AccountNotFound(_) => BalanceError::AccountNotFound(account_id),
                other => BalanceError::RemoteUnavailable(other.to_string()),
            }
        })?;

        let new_balance = &current + delta;
        if new_balance < BigDecimal::from(0) {
            return Err(BalanceError::InsufficientFunds {
                account_id,
                balance: current,
            });
        }

        self.accounts
            .set_balance(account_id, &new_balance)
            .await
            .map_err(|e| {
                tracing::error!("Failed to update balance for account {}: {}", account_id, e);
                match e {
                    AccountsError::AccountNotFound(_) => BalanceError::AccountNotFound(account_id),
                    other => BalanceError::RemoteUnavailable(other.to_string()),
                }
            })?;

        Ok(new_balance)
    }
}
