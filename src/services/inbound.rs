//! Incoming transfer and refund handling.
//!
//! The symmetric counterpart of the orchestrator for money entering the
//! bank: webhook-delivered credits and counterpart-initiated reversals.
//! Every delivery is de-duplicated against the transaction ledger by its
//! own instruction id before any balance is touched; duplicate deliveries
//! (webhook retries, queue redelivery) of a settled record are
//! acknowledged without a second mutation, while a record still PENDING
//! marks an earlier failed attempt and is retried.

use bigdecimal::BigDecimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::clients::{AccountsClient, AccountsError};
use crate::config::Config;
use crate::db::models::{OperationType, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::services::balance::{BalanceError, BalanceService};
use crate::store::{InsertOutcome, TransactionStore};
use crate::switch::{
    RefundEnvelope, SwitchClient, REASON_INSUFFICIENT_FUNDS, REASON_UNKNOWN_ACCOUNT,
};

const SWITCH_CHANNEL: &str = "SWITCH";

/// One parsed inbound delivery. Refunds are recognized by the presence of
/// a return/original instruction id; everything else must look like a
/// credit transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Credit(InboundCredit),
    Refund(InboundRefund),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundCredit {
    pub instruction_id: String,
    pub creditor_account: String,
    pub amount: BigDecimal,
    pub originating_bank: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundRefund {
    pub return_instruction_id: String,
    pub original_instruction_id: String,
    pub reason: Option<String>,
}

/// Parse a webhook payload: either the header/body envelope or a flat map
/// carrying the same fields at top level.
pub fn parse_inbound(payload: &Value) -> Result<InboundMessage, AppError> {
    let body = payload.get("body").unwrap_or(payload);
    let header = payload.get("header");

    let original_instruction_id = string_field(body, &["originalInstructionId"]);
    let return_instruction_id = string_field(body, &["returnInstructionId"]);

    if original_instruction_id.is_some() || return_instruction_id.is_some() {
        let original_instruction_id = original_instruction_id.ok_or_else(|| {
            AppError::Validation("Refund is missing originalInstructionId".to_string())
        })?;
        let return_instruction_id = return_instruction_id
            .unwrap_or_else(|| format!("RET-{}", original_instruction_id));
        return Ok(InboundMessage::Refund(InboundRefund {
            return_instruction_id,
            original_instruction_id,
            reason: string_field(body, &["returnReason", "reason"]),
        }));
    }

    let instruction_id = string_field(body, &["instructionId"])
        .ok_or_else(|| AppError::Validation("Transfer is missing instructionId".to_string()))?;

    let creditor_account = body
        .get("creditor")
        .and_then(|c| string_field(c, &["accountId", "accountNumber"]))
        .or_else(|| string_field(body, &["creditorAccount", "accountNumber"]))
        .ok_or_else(|| {
            AppError::Validation("Transfer is missing the creditor account".to_string())
        })?;

    let amount = body
        .get("amount")
        .and_then(parse_amount)
        .ok_or_else(|| AppError::Validation("Transfer is missing a valid amount".to_string()))?;
    if amount <= BigDecimal::from(0) {
        return Err(AppError::Validation(
            "Transfer amount must be greater than zero".to_string(),
        ));
    }

    let originating_bank = header
        .and_then(|h| string_field(h, &["originatingBankId"]))
        .or_else(|| string_field(body, &["originatingBankId"]))
        .unwrap_or_else(|| "UNKNOWN".to_string());

    Ok(InboundMessage::Credit(InboundCredit {
        instruction_id,
        creditor_account,
        amount,
        originating_bank,
    }))
}

fn parse_amount(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Object(_) => value.get("value").and_then(parse_amount),
        Value::String(s) => BigDecimal::from_str(s).ok(),
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn string_field(entry: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| entry.get(name))
        .find_map(Value::as_str)
        .map(str::to_string)
}

#[derive(Clone)]
pub struct InboundService {
    store: Arc<dyn TransactionStore>,
    balances: BalanceService,
    accounts: AccountsClient,
    switch: SwitchClient,
    bank_code: String,
    currency: String,
}

impl InboundService {
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
            switch,
            bank_code: config.bank_code.clone(),
            currency: config.currency.clone(),
        }
    }

    /// Process one webhook delivery end to end. Returns the instruction id
    /// to acknowledge; any error maps to a NACK.
    pub async fn process(&self, payload: &Value) -> Result<String, AppError> {
        match parse_inbound(payload)? {
            InboundMessage::Credit(credit) => self.process_credit(credit).await,
            InboundMessage::Refund(refund) => self.process_refund(refund).await,
        }
    }

    async fn process_credit(&self, credit: InboundCredit) -> Result<String, AppError> {
        tracing::info!(
            "Incoming transfer {} from {} to account {}, amount {}",
            credit.instruction_id,
            credit.originating_bank,
            credit.creditor_account,
            credit.amount
        );

        // Resolving the account is a pure lookup, so it may happen before
        // the idempotency gate; nothing has been mutated yet.
        let account = match self.accounts.find_by_number(&credit.creditor_account).await {
            Ok(account) => Some(account),
            Err(AccountsError::AccountNotFound(_)) => None,
            Err(e) => return Err(AppError::Communication(e.to_string())),
        };

        let mut tx = Transaction::pending(
            credit.instruction_id.clone(),
            OperationType::InboundTransfer,
            credit.amount.clone(),
            SWITCH_CHANNEL.to_string(),
        );
        tx.dest_account_id = account.as_ref().map(|a| a.id);
        tx.external_account_number = Some(credit.creditor_account.clone());
        tx.external_bank_id = Some(credit.originating_bank.clone());
        tx.description = Some(format!(
            "Transfer received from {}",
            credit.originating_bank
        ));

        // Idempotency gate before any mutation: a replayed delivery of a
        // settled or bounced transfer observes the first record and credits
        // nothing. A record still PENDING means the first delivery never
        // managed to credit, so this delivery runs the credit itself; an
        // unconditional ACK here would lose the money for good.
        let tx = match self.store.insert(&tx).await? {
            InsertOutcome::Created(tx) => tx,
            InsertOutcome::Duplicate(existing) => match existing.status {
                TransactionStatus::Failed => {
                    return Err(AppError::NotFound(format!(
                        "Account {} not found, refund already initiated",
                        credit.creditor_account
                    )));
                }
                TransactionStatus::Pending => {
                    tracing::info!(
                        "Redelivery of uncredited transfer {}, retrying the credit",
                        existing.reference
                    );
                    existing
                }
                _ => {
                    tracing::warn!(
                        "Duplicate inbound transfer {} ignored",
                        existing.reference
                    );
                    return Ok(existing.reference);
                }
            },
        };

        let account = match account {
            Some(account) => account,
            None => {
                // Nobody here by that number: bounce the money back to the
                // originating bank. The FAILED record keeps the dedup, so a
                // redelivery cannot trigger a second refund.
                self.refund_unknown_account(&credit).await;
                self.store
                    .resolve_pending(
                        tx.id,
                        TransactionStatus::Failed,
                        None,
                        None,
                        Some(format!(
                            "Unknown account {}, refund sent to {}",
                            credit.creditor_account, credit.originating_bank
                        )),
                    )
                    .await?;
                return Err(AppError::NotFound(format!(
                    "Account {} not found, refund initiated",
                    credit.creditor_account
                )));
            }
        };

        match self.balances.apply_delta(account.id, &credit.amount).await {
            Ok(new_balance) => {
                match self
                    .store
                    .resolve_pending(
                        tx.id,
                        TransactionStatus::Completed,
                        None,
                        Some(new_balance),
                        None,
                    )
                    .await?
                {
                    Some(_) => tracing::info!(
                        "Incoming transfer {} credited to account {}",
                        credit.instruction_id,
                        account.id
                    ),
                    None => {
                        // A concurrent delivery of the same instruction
                        // settled the record first; take our credit back
                        // out so the money lands exactly once.
                        tracing::warn!(
                            "Transfer {} settled concurrently, undoing duplicate credit",
                            credit.instruction_id
                        );
                        if let Err(e) = self
                            .balances
                            .apply_delta(account.id, &-credit.amount.clone())
                            .await
                        {
                            tracing::error!(
                                "Could not undo duplicate credit for {}: {}",
                                credit.instruction_id,
                                e
                            );
                        }
                    }
                }
                Ok(credit.instruction_id)
            }
            Err(e) => {
                // Leave the record PENDING and NACK: the switch redelivers,
                // and the redelivery retries the credit under this record.
                tracing::error!(
                    "Failed to credit inbound transfer {}: {}",
                    credit.instruction_id,
                    e
                );
                Err(e.into())
            }
        }
    }

    async fn process_refund(&self, refund: InboundRefund) -> Result<String, AppError> {
        tracing::info!(
            "Incoming refund {} for original {}",
            refund.return_instruction_id,
            refund.original_instruction_id
        );

        let original = self
            .store
            .find_by_reference(&refund.original_instruction_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Original transaction {} not found",
                    refund.original_instruction_id
                ))
            })?;

        // A refund whose target is already reversed is a replayed or
        // crossed delivery, not an error.
        if original.status.is_reversed() {
            tracing::warn!(
                "Original {} already reversed, refund {} is a no-op",
                original.reference,
                refund.return_instruction_id
            );
            return Ok(refund.return_instruction_id);
        }
        if original.status != TransactionStatus::Completed {
            return Err(AppError::ReversalConflict(format!(
                "Original transaction {} is not completed",
                original.reference
            )));
        }

        let (operation, account_id, delta, final_status) = match original.operation_type {
            // Our transfer out came back: return the money to its source.
            OperationType::OutboundTransfer => (
                OperationType::InboundRefund,
                original.source_account_id.ok_or_else(|| {
                    AppError::Internal("Outbound transfer without source account".to_string())
                })?,
                original.amount.clone(),
                TransactionStatus::Refunded,
            ),
            // The counterpart bank claws back a credit we accepted.
            OperationType::InboundTransfer => (
                OperationType::OutboundRefundDebit,
                original.dest_account_id.ok_or_else(|| {
                    AppError::Internal("Inbound transfer without destination account".to_string())
                })?,
                -original.amount.clone(),
                TransactionStatus::Reversed,
            ),
            other => {
                return Err(AppError::Validation(format!(
                    "Transaction type {} cannot be refunded by the switch",
                    other.as_str()
                )));
            }
        };

        let mut record = Transaction::pending(
            refund.return_instruction_id.clone(),
            operation,
            original.amount.clone(),
            SWITCH_CHANNEL.to_string(),
        );
        record.source_account_id = original.source_account_id;
        record.dest_account_id = original.dest_account_id;
        record.reversal_of_transaction_id = Some(original.id);
        record.description = refund
            .reason
            .clone()
            .map(|r| format!("Refund of {} ({})", original.reference, r));

        let record = match self.store.insert(&record).await? {
            InsertOutcome::Created(record) => record,
            InsertOutcome::Duplicate(existing) => {
                if existing.status != TransactionStatus::Pending {
                    tracing::warn!("Duplicate refund {} ignored", existing.reference);
                    return Ok(existing.reference);
                }
                // A redelivery after a transient failure: run it again.
                existing
            }
        };

        // The claim on the original comes before any balance mutation. Two
        // returns against the same original (distinct return ids, or a
        // crossed manual reversal) resolve to one winner; the loser must
        // not move money at all.
        if !self.store.claim_reversal(original.id, final_status).await? {
            tracing::warn!(
                "Original {} was reversed concurrently, refund {} not applied",
                original.reference,
                record.reference
            );
            self.store
                .resolve_pending(
                    record.id,
                    TransactionStatus::Failed,
                    None,
                    None,
                    Some(format!("Original {} already reversed", original.reference)),
                )
                .await?;
            return Ok(record.reference);
        }

        match self.balances.apply_delta(account_id, &delta).await {
            Ok(new_balance) => {
                let (source_balance, dest_balance) = match operation {
                    OperationType::InboundRefund => (Some(new_balance), None),
                    _ => (None, Some(new_balance)),
                };
                self.store
                    .resolve_pending(
                        record.id,
                        TransactionStatus::Completed,
                        source_balance,
                        dest_balance,
                        None,
                    )
                    .await?;
                Ok(record.reference)
            }
            Err(e @ BalanceError::InsufficientFunds { .. }) => {
                // The funds were already spent; the bank cannot comply with
                // the clawback. Release the claim so the original credit
                // stands, and surface a distinct business rejection.
                tracing::warn!(
                    "Cannot honor clawback {} for {}: {}",
                    record.reference,
                    original.reference,
                    e
                );
                self.store
                    .record_outcome(original.id, TransactionStatus::Completed, None, None, None)
                    .await?;
                self.store
                    .resolve_pending(
                        record.id,
                        TransactionStatus::Failed,
                        None,
                        None,
                        Some(format!("{} ({})", e, REASON_INSUFFICIENT_FUNDS)),
                    )
                    .await?;
                Err(e.into())
            }
            Err(e) => {
                // Release the claim and leave the record PENDING; the
                // redelivery retries the whole sequence.
                tracing::error!("Failed to apply refund {}: {}", record.reference, e);
                self.store
                    .record_outcome(original.id, TransactionStatus::Completed, None, None, None)
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Originate the automatic refund for a credit we cannot deliver.
    async fn refund_unknown_account(&self, credit: &InboundCredit) {
        let envelope = RefundEnvelope::build(
            &self.bank_code,
            &self.currency,
            &format!("RET-{}", Uuid::new_v4()),
            &credit.instruction_id,
            REASON_UNKNOWN_ACCOUNT,
            credit.amount.clone(),
        );

        match self.switch.send_refund(&envelope).await {
            Ok(_) => tracing::info!(
                "Automatic refund sent for unknown account transfer {}",
                credit.instruction_id
            ),
            Err(e) if e.indicates_original_missing() => tracing::info!(
                "Switch never committed {}, no refund needed",
                credit.instruction_id
            ),
            Err(e) => tracing::error!(
                "Automatic refund for {} failed: {}",
                credit.instruction_id,
                e
            ),
        }
    }
}
