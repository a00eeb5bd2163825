pub mod balance;
pub mod confirmation;
pub mod inbound;
pub mod orchestrator;

pub use balance::{BalanceError, BalanceService};
pub use confirmation::{ConfirmationPoller, PollVerdict};
pub use inbound::InboundService;
pub use orchestrator::TransactionService;
