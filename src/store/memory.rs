//! In-memory TransactionStore, used by the integration tests to exercise
//! the orchestration paths without a database. Honors the same contract as
//! the Postgres store, including single-winner inserts per reference.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::models::{Transaction, TransactionStatus};
use crate::store::{InsertOutcome, StoreError, TransactionStore};

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, Transaction>,
    by_reference: HashMap<String, Uuid>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert(&self, tx: &Transaction) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing_id) = inner.by_reference.get(&tx.reference) {
            let existing = inner.records[existing_id].clone();
            return Ok(InsertOutcome::Duplicate(existing));
        }
        inner.by_reference.insert(tx.reference.clone(), tx.id);
        inner.records.insert(tx.id, tx.clone());
        Ok(InsertOutcome::Created(tx.clone()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(&id).cloned())
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_reference
            .get(reference)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn list_for_account(&self, account_id: i64) -> Result<Vec<Transaction>, StoreError> {
        let inner = self.inner.lock().await;
        let mut matches: Vec<Transaction> = inner
            .records
            .values()
            .filter(|t| {
                t.source_account_id == Some(account_id) || t.dest_account_id == Some(account_id)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        status: TransactionStatus,
        resulting_balance_source: Option<BigDecimal>,
        resulting_balance_dest: Option<BigDecimal>,
        description: Option<String>,
    ) -> Result<Transaction, StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        record.status = status;
        if resulting_balance_source.is_some() {
            record.resulting_balance_source = resulting_balance_source;
        }
        if resulting_balance_dest.is_some() {
            record.resulting_balance_dest = resulting_balance_dest;
        }
        if description.is_some() {
            record.description = description;
        }
        Ok(record.clone())
    }

    async fn resolve_pending(
        &self,
        id: Uuid,
        status: TransactionStatus,
        resulting_balance_source: Option<BigDecimal>,
        resulting_balance_dest: Option<BigDecimal>,
        description: Option<String>,
    ) -> Result<Option<Transaction>, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.records.get_mut(&id) {
            Some(record) if record.status == TransactionStatus::Pending => {
                record.status = status;
                if resulting_balance_source.is_some() {
                    record.resulting_balance_source = resulting_balance_source;
                }
                if resulting_balance_dest.is_some() {
                    record.resulting_balance_dest = resulting_balance_dest;
                }
                if description.is_some() {
                    record.description = description;
                }
                Ok(Some(record.clone()))
            }
            Some(_) => Ok(None),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn claim_reversal(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.records.get_mut(&id) {
            Some(record) if record.status == TransactionStatus::Completed => {
                record.status = status;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
