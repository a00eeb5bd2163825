use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of money movement a transaction record represents. Direction is
/// encoded by the variant and by which account field is populated, never by
/// the sign of the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Deposit,
    Withdrawal,
    InternalTransfer,
    OutboundTransfer,
    InboundTransfer,
    InboundRefund,
    OutboundRefundDebit,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Deposit => "DEPOSIT",
            OperationType::Withdrawal => "WITHDRAWAL",
            OperationType::InternalTransfer => "INTERNAL_TRANSFER",
            OperationType::OutboundTransfer => "OUTBOUND_TRANSFER",
            OperationType::InboundTransfer => "INBOUND_TRANSFER",
            OperationType::InboundRefund => "INBOUND_REFUND",
            OperationType::OutboundRefundDebit => "OUTBOUND_REFUND_DEBIT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_uppercase().as_str() {
            "DEPOSIT" => Some(OperationType::Deposit),
            "WITHDRAWAL" => Some(OperationType::Withdrawal),
            "INTERNAL_TRANSFER" => Some(OperationType::InternalTransfer),
            "OUTBOUND_TRANSFER" => Some(OperationType::OutboundTransfer),
            "INBOUND_TRANSFER" => Some(OperationType::InboundTransfer),
            "INBOUND_REFUND" => Some(OperationType::InboundRefund),
            "OUTBOUND_REFUND_DEBIT" => Some(OperationType::OutboundRefundDebit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Reversed => "REVERSED",
            TransactionStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_uppercase().as_str() {
            "PENDING" => Some(TransactionStatus::Pending),
            "COMPLETED" => Some(TransactionStatus::Completed),
            "FAILED" => Some(TransactionStatus::Failed),
            "REVERSED" => Some(TransactionStatus::Reversed),
            "REFUNDED" => Some(TransactionStatus::Refunded),
            _ => None,
        }
    }

    /// Statuses only move forward: PENDING can resolve, COMPLETED can be
    /// reversed or refunded, everything else is terminal.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (
                TransactionStatus::Pending,
                TransactionStatus::Completed | TransactionStatus::Failed
            ) | (
                TransactionStatus::Completed,
                TransactionStatus::Reversed | TransactionStatus::Refunded
            )
        )
    }

    pub fn is_reversed(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Reversed | TransactionStatus::Refunded
        )
    }
}

/// The ledger entry produced by every money movement. `reference` is the
/// idempotency key: globally unique, caller- or switch-supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub reference: String,
    pub operation_type: OperationType,
    pub source_account_id: Option<i64>,
    pub dest_account_id: Option<i64>,
    pub external_account_number: Option<String>,
    pub external_bank_id: Option<String>,
    pub amount: BigDecimal,
    pub resulting_balance_source: Option<BigDecimal>,
    pub resulting_balance_dest: Option<BigDecimal>,
    pub reversal_of_transaction_id: Option<Uuid>,
    pub status: TransactionStatus,
    pub channel: String,
    pub branch_id: Option<i64>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// New record entering the pipeline, status PENDING.
    pub fn pending(
        reference: String,
        operation_type: OperationType,
        amount: BigDecimal,
        channel: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference,
            operation_type,
            source_account_id: None,
            dest_account_id: None,
            external_account_number: None,
            external_bank_id: None,
            amount,
            resulting_balance_source: None,
            resulting_balance_dest: None,
            reversal_of_transaction_id: None,
            status: TransactionStatus::Pending,
            channel,
            branch_id: None,
            description: None,
            created_at: Utc::now(),
        }
    }

    /// Balance snapshot to show when `viewer` asks for history: the
    /// destination leg of an internal transfer sees its own side.
    pub fn balance_for_viewer(&self, viewer: Option<i64>) -> Option<&BigDecimal> {
        if let (Some(viewer), Some(dest)) = (viewer, self.dest_account_id) {
            if dest == viewer {
                if let Some(balance) = self.resulting_balance_dest.as_ref() {
                    return Some(balance);
                }
            }
        }
        self.resulting_balance_source
            .as_ref()
            .or(self.resulting_balance_dest.as_ref())
    }
}

/// Input for creating a transaction through the orchestrator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub operation_type: String,
    pub amount: BigDecimal,
    pub reference: Option<String>,
    pub source_account_id: Option<i64>,
    pub dest_account_id: Option<i64>,
    pub external_account_number: Option<String>,
    pub external_bank_id: Option<String>,
    pub channel: Option<String>,
    pub branch_id: Option<i64>,
    pub description: Option<String>,
}
