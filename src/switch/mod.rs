pub mod client;
pub mod decode;
pub mod messages;

pub use client::{SwitchClient, SwitchError};
pub use decode::{decode_response, StatusClass, SwitchResult};
pub use messages::{
    map_reversal_reason, Creditor, Debtor, RefundEnvelope, TransferEnvelope,
    REASON_INSUFFICIENT_FUNDS, REASON_UNKNOWN_ACCOUNT,
};
