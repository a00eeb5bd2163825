//! Persistence seam for transaction records.
//!
//! The store doubles as the idempotency ledger: `insert` must resolve two
//! concurrent inserts of the same reference to exactly one winner, with the
//! loser observing the winner's record.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::{Transaction, TransactionStatus};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Result of an idempotent insert attempt.
#[derive(Debug)]
pub enum InsertOutcome {
    /// This call created the record and owns the mutation.
    Created(Transaction),
    /// A record with the same reference already existed; no mutation may be
    /// performed for this delivery.
    Duplicate(Transaction),
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new record, or observe the existing one if the reference is
    /// already taken.
    async fn insert(&self, tx: &Transaction) -> Result<InsertOutcome, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;

    async fn find_by_reference(&self, reference: &str)
        -> Result<Option<Transaction>, StoreError>;

    /// History touching the account on either leg, newest first.
    async fn list_for_account(&self, account_id: i64) -> Result<Vec<Transaction>, StoreError>;

    /// Persist the decided outcome of a record: status, balance snapshots
    /// and description. Balance snapshots are only overwritten when given.
    async fn record_outcome(
        &self,
        id: Uuid,
        status: TransactionStatus,
        resulting_balance_source: Option<BigDecimal>,
        resulting_balance_dest: Option<BigDecimal>,
        description: Option<String>,
    ) -> Result<Transaction, StoreError>;

    /// Resolve a record that is still PENDING: set its status, balance
    /// snapshots and description in one guarded step. Returns `None` when
    /// the record already left PENDING, i.e. a concurrent delivery or
    /// reconciliation resolved it first; the caller must not mutate any
    /// balance on that path.
    async fn resolve_pending(
        &self,
        id: Uuid,
        status: TransactionStatus,
        resulting_balance_source: Option<BigDecimal>,
        resulting_balance_dest: Option<BigDecimal>,
        description: Option<String>,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Move a COMPLETED record into REVERSED/REFUNDED. Returns false when
    /// the record was not COMPLETED anymore, i.e. someone else reversed it
    /// first or it never completed.
    async fn claim_reversal(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> Result<bool, StoreError>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
