pub mod accounts;

pub use accounts::{AccountDetails, AccountsClient, AccountsError};
