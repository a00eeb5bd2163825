//! Outbound message envelopes exchanged with the interbank switch, modeled
//! on ISO 20022 payment messages (pacs.008 credit transfer, pacs.004
//! payment return), flattened to the switch's JSON dialect.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub message_id: String,
    pub creation_date_time: String,
    pub originating_bank_id: String,
}

impl Header {
    pub fn new(bank_code: &str) -> Self {
        Header {
            message_id: format!("MSG-{}-{}", bank_code, Utc::now().timestamp_millis()),
            creation_date_time: Utc::now().to_rfc3339(),
            originating_bank_id: bank_code.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Amount {
    pub currency: String,
    pub value: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Debtor {
    pub name: String,
    pub account_id: String,
    pub account_type: String,
    pub bank_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creditor {
    pub name: String,
    pub account_id: String,
    pub account_type: String,
    pub target_bank_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBody {
    pub instruction_id: String,
    pub end_to_end_id: String,
    pub amount: Amount,
    pub debtor: Debtor,
    pub creditor: Creditor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remittance_info: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEnvelope {
    pub header: Header,
    pub body: TransferBody,
}

impl TransferEnvelope {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        bank_code: &str,
        currency: &str,
        reference: &str,
        amount: BigDecimal,
        debtor: Debtor,
        creditor: Creditor,
        remittance_info: Option<String>,
    ) -> Self {
        TransferEnvelope {
            header: Header::new(bank_code),
            body: TransferBody {
                instruction_id: reference.to_string(),
                end_to_end_id: format!("REF-{}-{}", bank_code, reference),
                amount: Amount {
                    currency: currency.to_string(),
                    value: amount,
                },
                debtor,
                creditor,
                remittance_info,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundBody {
    pub return_instruction_id: String,
    pub original_instruction_id: String,
    pub return_reason: String,
    pub return_amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundEnvelope {
    pub header: Header,
    pub body: RefundBody,
}

impl RefundEnvelope {
    pub fn build(
        bank_code: &str,
        currency: &str,
        return_instruction_id: &str,
        original_instruction_id: &str,
        return_reason: &str,
        amount: BigDecimal,
    ) -> Self {
        RefundEnvelope {
            header: Header::new(bank_code),
            body: RefundBody {
                return_instruction_id: return_instruction_id.to_string(),
                original_instruction_id: original_instruction_id.to_string(),
                return_reason: return_reason.to_string(),
                return_amount: Amount {
                    currency: currency.to_string(),
                    value: amount,
                },
            },
        }
    }
}

/// ISO return reason for a credit addressed to an account we cannot find.
pub const REASON_UNKNOWN_ACCOUNT: &str = "AC03";
/// ISO return reason for a clawback we cannot honor for lack of funds.
pub const REASON_INSUFFICIENT_FUNDS: &str = "AM04";

/// Map an operator-facing reversal reason onto the switch's vocabulary.
/// Unknown codes pass through uppercased so a new switch code does not need
/// a release on our side.
pub fn map_reversal_reason(internal: &str) -> String {
    match internal.to_uppercase().as_str() {
        "DUPLICATE" => "DUPL".to_string(),
        "FRAUD" => "FRAD".to_string(),
        "CUSTOMER_REQUEST" => "CUST".to_string(),
        "TECHNICAL" => "TECH".to_string(),
        other => other.to_string(),
    }
}
