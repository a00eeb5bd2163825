use bigdecimal::BigDecimal;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccountsError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Invalid response from accounts service: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    pub id: i64,
    pub account_number: String,
    pub client_id: Option<i64>,
    pub account_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BalanceBody {
    balance: BigDecimal,
}

#[derive(Debug, Deserialize)]
struct ClientBody {
    #[allow(dead_code)]
    id: i64,
    name: String,
}

/// HTTP client for the accounts/clients services, which own account records
/// and balances. One get+set round trip is the unit of balance mutation;
/// nothing here locks a remote balance.
#[derive(Clone)]
pub struct AccountsClient {
    client: Client,
    base_url: String,
}

impl AccountsClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        AccountsClient { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub async fn get_balance(&self, account_id: i64) -> Result<BigDecimal, AccountsError> {
        let url = self.url(&format!("/accounts/{}/balance", account_id));
        let response = self.client.get(&url).send().await?;

        if response.status() == 404 {
            return Err(AccountsError::AccountNotFound(account_id.to_string()));
        }

        let body: BalanceBody = response
            .error_for_status()?
            .json()
            .await
            .map_err(|e| AccountsError::InvalidResponse(e.to_string()))?;
        Ok(body.balance)
    }

    pub async fn set_balance(
        &self,
        account_id: i64,
        balance: &BigDecimal,
    ) -> Result<(), AccountsError> {
        let url = self.url(&format!("/accounts/{}/balance", account_id));
        let response = self
            .client
            .put(&url)
            .json(&BalanceBody {
                balance: balance.clone(),
            })
            .send()
            .await?;

        if response.status() == 404 {
            return Err(AccountsError::AccountNotFound(account_id.to_string()));
        }

        response.error_for_status()?;
        Ok(())
    }

    pub async fn get_account(&self, account_id: i64) -> Result<AccountDetails, AccountsError> {
        let url = self.url(&format!("/accounts/{}", account_id));
        let response = self.client.get(&url).send().await?;

        if response.status() == 404 {
            return Err(AccountsError::AccountNotFound(account_id.to_string()));
        }

        response
            .error_for_status()?
            .json()
            .await
            .map_err(|e| AccountsError::InvalidResponse(e.to_string()))
    }

    /// Resolve a local account by its external account number, used when
    /// the switch addresses us by number instead of internal id.
    pub async fn find_by_number(&self, number: &str) -> Result<AccountDetails, AccountsError> {
        let url = self.url(&format!("/accounts/number/{}", number));
        let response = self.client.get(&url).send().await?;

        if response.status() == 404 {
            return Err(AccountsError::AccountNotFound(number.to_string()));
        }

        response
            .error_for_status()?
            .json()
            .await
            .map_err(|e| AccountsError::InvalidResponse(e.to_string()))
    }

    pub async fn get_client_name(&self, client_id: i64) -> Result<String, AccountsError> {
        let url = self.url(&format!("/clients/{}", client_id));
        let response = self.client.get(&url).send().await?;

        if response.status() == 404 {
            return Err(AccountsError::AccountNotFound(client_id.to_string()));
        }

        let body: ClientBody = response
            .error_for_status()?
            .json()
            .await
            .map_err(|e| AccountsError::InvalidResponse(e.to_string()))?;
        Ok(body.name)
    }
}
