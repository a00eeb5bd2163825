//! Transaction orchestrator.
//!
//! One state machine per requested money movement. Each operation type has
//! a fixed step sequence over the balance proxy and the switch, with an
//! explicit compensating action for every step that can leave money applied
//! when a later step fails. There is no cross-service transaction to lean
//! on: ordering, idempotency and compensation are the whole mechanism.

use bigdecimal::BigDecimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::clients::AccountsClient;
use crate::config::Config;
use crate::db::models::{NewTransaction, OperationType, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::services::balance::BalanceService;
use crate::services::confirmation::{ConfirmationPoller, PollVerdict};
use crate::store::{InsertOutcome, TransactionStore};
use crate::switch::{
    map_reversal_reason, Creditor, Debtor, RefundEnvelope, SwitchClient, TransferEnvelope,
};

const DEFAULT_CHANNEL: &str = "WEB";
const ADMIN_CHANNEL: &str = "ADMIN";
const DEFAULT_ACCOUNT_TYPE: &str = "SAVINGS";

#[derive(Clone)]
pub struct TransactionService {
    store: Arc<dyn TransactionStore>,
    balances: BalanceService,
    accounts: AccountsClient,
    switch: SwitchClient,
    poller: ConfirmationPoller,
    bank_code: String,
    currency: String,
}

impl TransactionService {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        accounts: AccountsClient,
        switch: SwitchClient,
        config: &Config,
    ) -> Self {
        Self {
            store,
            balances: BalanceService::new(accounts.clone()),
            accounts,
            poller: ConfirmationPoller::new(
                switch.clone(),
                config.poll_attempts,
                config.poll_interval_ms,
            ),
            switch,
            bank_code: config.bank_code.clone(),
            currency: config.currency.clone(),
        }
    }

    /// Entry point for caller-initiated movements.
    ///
    /// The idempotency gate comes first: if the reference already has a
    /// record, that record is returned unchanged and nothing is mutated.
    pub async fn create_transaction(
        &self,
        request: NewTransaction,
    ) -> Result<Transaction, AppError> {
        let operation = OperationType::parse(&request.operation_type).ok_or_else(|| {
            AppError::Validation(format!(
                "Unsupported operation type: {}",
                request.operation_type
            ))
        })?;

        if request.amount <= BigDecimal::from(0) {
            return Err(AppError::Validation(
                "Amount must be greater than zero".to_string(),
            ));
        }

        let reference = request
            .reference
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let channel = request
            .channel
            .clone()
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());

        tracing::info!(
            "Starting transaction type {} ref {}",
            operation.as_str(),
            reference
        );

        let mut tx = Transaction::pending(reference, operation, request.amount.clone(), channel);
        tx.branch_id = request.branch_id;
        tx.description = request.description.clone();

        match operation {
            OperationType::Deposit => {
                tx.dest_account_id = Some(require_account(request.dest_account_id, "DEPOSIT requires a destination account")?);
            }
            OperationType::Withdrawal => {
                tx.source_account_id = Some(require_account(request.source_account_id, "WITHDRAWAL requires a source account")?);
            }
            OperationType::InternalTransfer => {
                let source = require_account(request.source_account_id, "INTERNAL_TRANSFER requires a source account")?;
                let dest = require_account(request.dest_account_id, "INTERNAL_TRANSFER requires a destination account")?;
                if source == dest {
                    return Err(AppError::Validation(
                        "Cannot transfer to the same account".to_string(),
                    ));
                }
                tx.source_account_id = Some(source);
                tx.dest_account_id = Some(dest);
            }
            OperationType::OutboundTransfer => {
                tx.source_account_id = Some(require_account(request.source_account_id, "OUTBOUND_TRANSFER requires a source account")?);
                let external = request
                    .external_account_number
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .ok_or_else(|| {
                        AppError::Validation(
                            "OUTBOUND_TRANSFER requires an external destination account".to_string(),
                        )
                    })?;
                tx.external_account_number = Some(external);
                tx.external_bank_id = request.external_bank_id.clone();
            }
            OperationType::InboundTransfer
            | OperationType::InboundRefund
            | OperationType::OutboundRefundDebit => {
                // Switch-originated types enter through the webhook path.
                return Err(AppError::Validation(format!(
                    "Operation type {} cannot be created directly",
                    operation.as_str()
                )));
            }
        }

        // Single winner per reference. The loser sees the winner's record
        // and performs no mutation.
        let tx = match self.store.insert(&tx).await? {
            InsertOutcome::Created(tx) => tx,
            InsertOutcome::Duplicate(existing) => {
                tracing::warn!(
                    "Duplicate reference {}, returning existing transaction {}",
                    existing.reference,
                    existing.id
                );
                return Ok(existing);
            }
        };

        match operation {
            OperationType::Deposit => self.run_deposit(tx, &request.amount).await,
            OperationType::Withdrawal => self.run_withdrawal(tx, &request.amount).await,
            OperationType::InternalTransfer => self.run_internal_transfer(tx, &request.amount).await,
            OperationType::OutboundTransfer => self.run_outbound_transfer(tx, &request).await,
            _ => unreachable!("validated above"),
        }
    }

    async fn run_deposit(
        &self,
        tx: Transaction,
        amount: &BigDecimal,
    ) -> Result<Transaction, AppError> {
        let dest = tx.dest_account_id.unwrap_or_default();
        match self.balances.apply_delta(dest, amount).await {
            Ok(new_balance) => {
                let updated = self
                    .store
                    .record_outcome(
                        tx.id,
                        TransactionStatus::Completed,
                        None,
                        Some(new_balance),
                        None,
                    )
                    .await?;
                Ok(updated)
            }
            Err(e) => self.fail(tx.id, e.to_string(), e.into()).await,
        }
    }

    async fn run_withdrawal(
        &self,
        tx: Transaction,
        amount: &BigDecimal,
    ) -> Result<Transaction, AppError> {
        let source = tx.source_account_id.unwrap_or_default();
        match self.balances.apply_delta(source, &-amount.clone()).await {
            Ok(new_balance) => {
                let updated = self
                    .store
                    .record_outcome(
                        tx.id,
                        TransactionStatus::Completed,
                        Some(new_balance),
                        None,
                        None,
                    )
                    .await?;
                Ok(updated)
            }
            Err(e) => self.fail(tx.id, e.to_string(), e.into()).await,
        }
    }

    async fn run_internal_transfer(
        &self,
        tx: Transaction,
        amount: &BigDecimal,
    ) -> Result<Transaction, AppError> {
        let source = tx.source_account_id.unwrap_or_default();
        let dest = tx.dest_account_id.unwrap_or_default();

        let source_balance = match self.balances.apply_delta(source, &-amount.clone()).await {
            Ok(balance) => balance,
            Err(e) => return self.fail(tx.id, e.to_string(), e.into()).await,
        };

        match self.balances.apply_delta(dest, amount).await {
            Ok(dest_balance) => {
                let updated = self
                    .store
                    .record_outcome(
                        tx.id,
                        TransactionStatus::Completed,
                        Some(source_balance),
                        Some(dest_balance),
                        None,
                    )
                    .await?;
                Ok(updated)
            }
            Err(e) => {
                // The debit already landed; undo it before surfacing the
                // credit failure so the source balance is exactly restored.
                self.compensate_credit(source, amount).await;
                self.fail(tx.id, format!("credit to destination failed: {}", e), e.into())
                    .await
            }
        }
    }

    async fn run_outbound_transfer(
        &self,
        tx: Transaction,
        request: &NewTransaction,
    ) -> Result<Transaction, AppError> {
        let source = tx.source_account_id.unwrap_or_default();
        let amount = request.amount.clone();

        let source_balance = match self.balances.apply_delta(source, &-amount.clone()).await {
            Ok(balance) => balance,
            Err(e) => return self.fail(tx.id, e.to_string(), e.into()).await,
        };

        let debtor = self.resolve_debtor(source).await;
        let external_account = tx.external_account_number.clone().unwrap_or_default();
        let envelope = TransferEnvelope::build(
            &self.bank_code,
            &self.currency,
            &tx.reference,
            amount.clone(),
            debtor,
            Creditor {
                name: request
                    .description
                    .clone()
                    .unwrap_or_else(|| "External beneficiary".to_string()),
                account_id: external_account,
                account_type: DEFAULT_ACCOUNT_TYPE.to_string(),
                target_bank_id: request
                    .external_bank_id
                    .clone()
                    .unwrap_or_else(|| "SWITCH".to_string()),
            },
            request.description.clone(),
        );

        tracing::info!(
            "Sending transfer {} to switch, creditor bank {}",
            tx.reference,
            envelope.body.creditor.target_bank_id
        );

        match self.switch.send_transfer(&envelope).await {
            Ok(result) if result.success => {
                self.settle_after_ack(tx, source, &amount, source_balance)
                    .await
            }
            Ok(result) => {
                // Explicit business rejection: the switch never took the
                // money, only our own debit needs undoing.
                let reason = result.failure_reason();
                tracing::warn!("Switch rejected transfer {}: {}", tx.reference, reason);
                self.compensate_credit(source, &amount).await;
                self.fail(
                    tx.id,
                    format!("switch rejected: {}", reason),
                    AppError::SwitchRejected(reason),
                )
                .await
            }
            Err(e) => {
                // Transport failure: we do not know whether the switch took
                // the request. Ask it to void the transfer before putting
                // the money back, so a late settlement cannot double-spend.
                tracing::error!(
                    "Communication error sending transfer {}: {}",
                    tx.reference,
                    e
                );
                self.defensive_refund(&tx.reference, &amount).await;
                self.compensate_credit(source, &amount).await;
                self.fail(
                    tx.id,
                    format!("switch communication error: {}", e),
                    AppError::Communication(e.to_string()),
                )
                .await
            }
        }
    }

    /// The switch acknowledged receipt; wait for settlement.
    async fn settle_after_ack(
        &self,
        tx: Transaction,
        source: i64,
        amount: &BigDecimal,
        source_balance: BigDecimal,
    ) -> Result<Transaction, AppError> {
        // Every outcome below goes through the guarded PENDING resolution:
        // a reconciliation running against the same record while we poll
        // must not produce a second compensation, so whoever loses the
        // claim takes no action and reports the winner's record.
        match self.poller.await_confirmation(&tx.reference).await {
            PollVerdict::Confirmed => {
                match self
                    .store
                    .resolve_pending(
                        tx.id,
                        TransactionStatus::Completed,
                        Some(source_balance),
                        None,
                        None,
                    )
                    .await?
                {
                    Some(updated) => Ok(updated),
                    None => self.get(tx.id).await,
                }
            }
            PollVerdict::Rejected(reason) => {
                match self
                    .store
                    .resolve_pending(
                        tx.id,
                        TransactionStatus::Failed,
                        None,
                        None,
                        Some(format!("switch rejected: {}", reason)),
                    )
                    .await?
                {
                    Some(_) => {
                        self.compensate_credit(source, amount).await;
                        Err(AppError::SwitchRejected(reason))
                    }
                    None => self.get(tx.id).await,
                }
            }
            PollVerdict::TimedOut => {
                // The transfer may still settle after our window; keep the
                // debit held and leave the record PENDING for
                // reconciliation instead of compensating a transfer that
                // might complete.
                match self
                    .store
                    .resolve_pending(
                        tx.id,
                        TransactionStatus::Pending,
                        Some(source_balance),
                        None,
                        Some("Transfer in process, awaiting switch confirmation".to_string()),
                    )
                    .await?
                {
                    Some(updated) => Ok(updated),
                    None => self.get(tx.id).await,
                }
            }
        }
    }

    /// Resolve a PENDING outbound transfer by asking the switch now.
    /// Compensation is applied only if the switch reports a terminal
    /// failure; an unresolved status leaves the record untouched.
    pub async fn reconcile(&self, id: Uuid) -> Result<Transaction, AppError> {
        let tx = self.get(id).await?;

        if tx.operation_type != OperationType::OutboundTransfer {
            return Err(AppError::Validation(format!(
                "Transaction {} is not an outbound transfer",
                id
            )));
        }
        if tx.status != TransactionStatus::Pending {
            return Ok(tx);
        }

        match self.poller.check_now(&tx.reference).await {
            Some(PollVerdict::Confirmed) => {
                match self
                    .store
                    .resolve_pending(tx.id, TransactionStatus::Completed, None, None, None)
                    .await?
                {
                    Some(updated) => Ok(updated),
                    None => self.get(tx.id).await,
                }
            }
            Some(PollVerdict::Rejected(reason)) => {
                // The PENDING claim decides who compensates: a concurrent
                // reconciliation (or the still-open polling window) racing
                // us must not re-credit the same debit twice.
                match self
                    .store
                    .resolve_pending(
                        tx.id,
                        TransactionStatus::Failed,
                        None,
                        None,
                        Some(format!("switch rejected: {}", reason)),
                    )
                    .await?
                {
                    Some(updated) => {
                        let source = tx.source_account_id.unwrap_or_default();
                        self.compensate_credit(source, &tx.amount).await;
                        Ok(updated)
                    }
                    None => self.get(tx.id).await,
                }
            }
            Some(PollVerdict::TimedOut) | None => Ok(tx),
        }
    }

    /// Operator-initiated reversal of a locally COMPLETED outbound
    /// transfer. Follows the same refund envelope path as an automatic
    /// refund; the local compensating credit happens only once the switch
    /// accepts (or reports the original as never committed).
    pub async fn request_reversal(
        &self,
        id: Uuid,
        reason_code: &str,
    ) -> Result<Transaction, AppError> {
        let original = self.get(id).await?;

        if original.operation_type != OperationType::OutboundTransfer {
            return Err(AppError::Validation(format!(
                "Transaction {} is not an outbound transfer",
                id
            )));
        }
        if original.status.is_reversed() {
            return Err(AppError::ReversalConflict(format!(
                "Transaction {} is already reversed",
                id
            )));
        }
        if original.status != TransactionStatus::Completed {
            return Err(AppError::ReversalConflict(format!(
                "Transaction {} is not completed",
                id
            )));
        }

        let return_reference = format!("RET-{}", Uuid::new_v4());
        let envelope = RefundEnvelope::build(
            &self.bank_code,
            &self.currency,
            &return_reference,
            &original.reference,
            &map_reversal_reason(reason_code),
            original.amount.clone(),
        );

        match self.switch.send_refund(&envelope).await {
            Ok(result) if result.success => {}
            Ok(result) => {
                return Err(AppError::SwitchRejected(result.failure_reason()));
            }
            Err(e) if e.indicates_original_missing() => {
                // The switch never committed the original transfer, so
                // there is nothing remote to void; the local credit alone
                // makes the customer whole.
                tracing::info!(
                    "Switch reports original {} unknown, treating reversal as accepted",
                    original.reference
                );
            }
            Err(e) => return Err(AppError::Communication(e.to_string())),
        }

        if !self
            .store
            .claim_reversal(original.id, TransactionStatus::Refunded)
            .await?
        {
            return Err(AppError::ReversalConflict(format!(
                "Transaction {} was reversed concurrently",
                id
            )));
        }

        let source = original.source_account_id.unwrap_or_default();
        let mut refund = Transaction::pending(
            return_reference,
            OperationType::InboundRefund,
            original.amount.clone(),
            ADMIN_CHANNEL.to_string(),
        );
        refund.source_account_id = original.source_account_id;
        refund.reversal_of_transaction_id = Some(original.id);
        refund.description = Some(format!("Reversal of {} ({})", original.reference, reason_code));

        let refund = match self.store.insert(&refund).await? {
            InsertOutcome::Created(tx) => tx,
            InsertOutcome::Duplicate(existing) => return Ok(existing),
        };

        match self.balances.apply_delta(source, &original.amount).await {
            Ok(new_balance) => {
                let updated = self
                    .store
                    .record_outcome(
                        refund.id,
                        TransactionStatus::Completed,
                        Some(new_balance),
                        None,
                        None,
                    )
                    .await?;
                Ok(updated)
            }
            Err(e) => {
                // The original is already marked refunded; losing that fact
                // would be worse than the pending re-credit, so persist the
                // failure and surface it.
                tracing::error!(
                    "Compensating credit for reversal of {} failed: {}",
                    original.reference,
                    e
                );
                self.fail(refund.id, e.to_string(), e.into()).await
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Transaction, AppError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", id)))
    }

    pub async fn get_by_reference(&self, reference: &str) -> Result<Transaction, AppError> {
        self.store
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", reference)))
    }

    pub async fn history_for_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        Ok(self.store.list_for_account(account_id).await?)
    }

    /// Undo an already-applied debit. A failure here is logged and
    /// swallowed: the decided terminal status must still be persisted, and
    /// recovery goes through reconciliation against the switch, not a local
    /// retry queue.
    async fn compensate_credit(&self, account_id: i64, amount: &BigDecimal) {
        if let Err(e) = self.balances.apply_delta(account_id, amount).await {
            tracing::error!(
                "Compensation failed for account {} amount {}: {}",
                account_id,
                amount,
                e
            );
        }
    }

    /// Void request for a transfer whose fate is unknown. 409/not-found
    /// from the switch confirms it never settled, which is the outcome we
    /// want; anything else is logged and the local compensation proceeds.
    async fn defensive_refund(&self, reference: &str, amount: &BigDecimal) {
        let envelope = RefundEnvelope::build(
            &self.bank_code,
            &self.currency,
            &format!("RET-{}", Uuid::new_v4()),
            reference,
            "TECH",
            amount.clone(),
        );
        match self.switch.send_refund(&envelope).await {
            Ok(_) => tracing::info!("Defensive refund accepted for {}", reference),
            Err(e) if e.indicates_original_missing() => {
                tracing::info!("Switch never committed {}, nothing to void", reference)
            }
            Err(e) => tracing::warn!("Defensive refund for {} failed: {}", reference, e),
        }
    }

    async fn resolve_debtor(&self, account_id: i64) -> Debtor {
        let mut name = format!("{} customer", self.bank_code);
        let mut account_number = account_id.to_string();
        let mut account_type = DEFAULT_ACCOUNT_TYPE.to_string();

        // Enrichment only: a failed lookup must not fail the transfer.
        match self.accounts.get_account(account_id).await {
            Ok(details) => {
                account_number = details.account_number;
                if let Some(kind) = details.account_type {
                    account_type = kind;
                }
                if let Some(client_id) = details.client_id {
                    match self.accounts.get_client_name(client_id).await {
                        Ok(client_name) => name = client_name,
                        Err(e) => {
                            tracing::warn!("Could not resolve client {} name: {}", client_id, e)
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(
                "Could not resolve details for account {}: {}",
                account_id,
                e
            ),
        }

        Debtor {
            name,
            account_id: account_number,
            account_type,
            bank_id: self.bank_code.clone(),
        }
    }

    /// Persist the FAILED outcome, then surface the original error. A store
    /// failure here is logged but never masks the business error.
    async fn fail(
        &self,
        id: Uuid,
        description: String,
        error: AppError,
    ) -> Result<Transaction, AppError> {
        if let Err(store_err) = self
            .store
            .record_outcome(id, TransactionStatus::Failed, None, None, Some(description))
            .await
        {
            tracing::error!("Failed to persist FAILED status for {}: {}", id, store_err);
        }
        Err(error)
    }
}

fn require_account(value: Option<i64>, message: &str) -> Result<i64, AppError> {
    value.ok_or_else(|| AppError::Validation(message.to_string()))
}
