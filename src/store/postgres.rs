//! Postgres implementation of TransactionStore.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{OperationType, Transaction, TransactionStatus};
use crate::store::{InsertOutcome, StoreError, TransactionStore};

/// Postgres-backed transaction store. The unique index on `reference` is
/// what makes the insert race resolve to a single winner.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn insert(&self, tx: &Transaction) -> Result<InsertOutcome, StoreError> {
        let inserted = sqlx::query_as::<_, TransactionRow>(
            r#"
            INSERT INTO transactions (
                id, reference, operation_type, source_account_id, dest_account_id,
                external_account_number, external_bank_id, amount,
                resulting_balance_source, resulting_balance_dest,
                reversal_of_transaction_id, status, channel, branch_id,
                description, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (reference) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(tx.id)
        .bind(&tx.reference)
        .bind(tx.operation_type.as_str())
        .bind(tx.source_account_id)
        .bind(tx.dest_account_id)
        .bind(&tx.external_account_number)
        .bind(&tx.external_bank_id)
        .bind(&tx.amount)
        .bind(&tx.resulting_balance_source)
        .bind(&tx.resulting_balance_dest)
        .bind(tx.reversal_of_transaction_id)
        .bind(tx.status.as_str())
        .bind(&tx.channel)
        .bind(tx.branch_id)
        .bind(&tx.description)
        .bind(tx.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok(InsertOutcome::Created(row.into_domain()?)),
            None => {
                // Lost the race (or a replay): the winner's record must exist.
                let existing = sqlx::query_as::<_, TransactionRow>(
                    "SELECT * FROM transactions WHERE reference = $1",
                )
                .bind(&tx.reference)
                .fetch_one(&self.pool)
                .await?;
                Ok(InsertOutcome::Duplicate(existing.into_domain()?))
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE reference = $1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn list_for_account(&self, account_id: i64) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT * FROM transactions
            WHERE source_account_id = $1 OR dest_account_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        status: TransactionStatus,
        resulting_balance_source: Option<BigDecimal>,
        resulting_balance_dest: Option<BigDecimal>,
        description: Option<String>,
    ) -> Result<Transaction, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions
            SET status = $2,
                resulting_balance_source = COALESCE($3, resulting_balance_source),
                resulting_balance_dest = COALESCE($4, resulting_balance_dest),
                description = COALESCE($5, description)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(resulting_balance_source)
        .bind(resulting_balance_dest)
        .bind(description)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain())
            .transpose()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn resolve_pending(
        &self,
        id: Uuid,
        status: TransactionStatus,
        resulting_balance_source: Option<BigDecimal>,
        resulting_balance_dest: Option<BigDecimal>,
        description: Option<String>,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions
            SET status = $2,
                resulting_balance_source = COALESCE($3, resulting_balance_source),
                resulting_balance_dest = COALESCE($4, resulting_balance_dest),
                description = COALESCE($5, description)
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(resulting_balance_source)
        .bind(resulting_balance_dest)
        .bind(description)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn claim_reversal(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE transactions SET status = $2 WHERE id = $1 AND status = 'COMPLETED'",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Internal row type for SQLx. Not exposed outside the store.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    reference: String,
    operation_type: String,
    source_account_id: Option<i64>,
    dest_account_id: Option<i64>,
    external_account_number: Option<String>,
    external_bank_id: Option<String>,
    amount: BigDecimal,
    resulting_balance_source: Option<BigDecimal>,
    resulting_balance_dest: Option<BigDecimal>,
    reversal_of_transaction_id: Option<Uuid>,
    status: String,
    channel: String,
    branch_id: Option<i64>,
    description: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> Result<Transaction, StoreError> {
        let operation_type = OperationType::parse(&self.operation_type).ok_or_else(|| {
            StoreError::Database(format!("unknown operation type: {}", self.operation_type))
        })?;
        let status = TransactionStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Database(format!("unknown status: {}", self.status)))?;

        Ok(Transaction {
            id: self.id,
            reference: self.reference,
            operation_type,
            source_account_id: self.source_account_id,
            dest_account_id: self.dest_account_id,
            external_account_number: self.external_account_number,
            external_bank_id: self.external_bank_id,
            amount: self.amount,
            resulting_balance_source: self.resulting_balance_source,
            resulting_balance_dest: self.resulting_balance_dest,
            reversal_of_transaction_id: self.reversal_of_transaction_id,
            status,
            channel: self.channel,
            branch_id: self.branch_id,
            description: self.description,
            created_at: self.created_at,
        })
    }
}
