use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::switch::decode::{decode_response, SwitchResult};
use crate::switch::messages::{RefundEnvelope, TransferEnvelope};

#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Switch returned status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Switch circuit breaker open")]
    CircuitOpen,
}

impl SwitchError {
    /// True when the switch reports it never committed the original
    /// transfer. A 409 with an "original not found" body (or a plain 404 on
    /// the refund endpoint) means there is nothing to double-settle, which
    /// upstream callers treat as equivalent to an accepted refund.
    pub fn indicates_original_missing(&self) -> bool {
        match self {
            SwitchError::Http { status: 404, .. } => true,
            SwitchError::Http { status: 409, body } => {
                let lower = body.to_lowercase();
                lower.contains("not found") || lower.contains("original")
            }
            _ => false,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            SwitchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// HTTP client for the interbank switch. Every call carries the switch api
/// key and runs through a circuit breaker so a dead switch fails fast
/// instead of stacking up foreground requests on timeouts.
#[derive(Clone)]
pub struct SwitchClient {
    client: Client,
    base_url: String,
    api_key: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl SwitchClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(Duration::from_secs(30), Duration::from_secs(60));
        let policy = failure_policy::consecutive_failures(5, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        SwitchClient {
            client,
            base_url,
            api_key,
            circuit_breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn guarded<F, T>(&self, fut: F) -> Result<T, SwitchError>
    where
        F: std::future::Future<Output = Result<T, SwitchError>>,
    {
        match self.circuit_breaker.call(fut).await {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(SwitchError::CircuitOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    /// Send an outbound interbank transfer. A 2xx response is decoded into
    /// a canonical result (the body may still carry a business rejection);
    /// anything else surfaces as `SwitchError::Http` with the raw body.
    pub async fn send_transfer(
        &self,
        envelope: &TransferEnvelope,
    ) -> Result<SwitchResult, SwitchError> {
        let url = self.url("/api/v2/transfers");
        let instruction_id = envelope.body.instruction_id.clone();
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let payload = envelope.clone();

        self.guarded(async move {
            let response = client
                .post(&url)
                .header("apikey", api_key)
                .json(&payload)
                .send()
                .await?;

            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("Switch transfer response {}: {}", status, body);

            if !(200..300).contains(&status) {
                return Err(SwitchError::Http { status, body });
            }
            Ok(decode_response(status, &body, Some(&instruction_id)))
        })
        .await
    }

    /// Query the settlement status of a previously sent transfer.
    pub async fn query_status(&self, instruction_id: &str) -> Result<SwitchResult, SwitchError> {
        let url = self.url(&format!("/api/v2/transfers/{}", instruction_id));
        let wanted = instruction_id.to_string();
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        self.guarded(async move {
            let response = client.get(&url).header("apikey", api_key).send().await?;

            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();

            if !(200..300).contains(&status) {
                return Err(SwitchError::Http { status, body });
            }
            Ok(decode_response(status, &body, Some(&wanted)))
        })
        .await
    }

    /// Send a payment return for a previously settled (or presumed-settled)
    /// transfer.
    pub async fn send_refund(
        &self,
        envelope: &RefundEnvelope,
    ) -> Result<SwitchResult, SwitchError> {
        let url = self.url("/api/v2/transfers/refunds");
        let instruction_id = envelope.body.return_instruction_id.clone();
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let payload = envelope.clone();

        self.guarded(async move {
            let response = client
                .post(&url)
                .header("apikey", api_key)
                .json(&payload)
                .send()
                .await?;

            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("Switch refund response {}: {}", status, body);

            if !(200..300).contains(&status) {
                return Err(SwitchError::Http { status, body });
            }
            Ok(decode_response(status, &body, Some(&instruction_id)))
        })
        .await
    }

    /// Banks currently connected to the switch network.
    pub async fn list_banks(&self) -> Result<Vec<serde_json::Value>, SwitchError> {
        let url = self.url("/api/v1/network/banks");
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        self.guarded(async move {
            let response = client.get(&url).header("apikey", api_key).send().await?;
            let status = response.status().as_u16();
            if !(200..300).contains(&status) {
                let body = response.text().await.unwrap_or_default();
                return Err(SwitchError::Http { status, body });
            }
            let banks = response.json::<Vec<serde_json::Value>>().await?;
            Ok(banks)
        })
        .await
    }

    pub async fn health_check(&self) -> Result<serde_json::Value, SwitchError> {
        let url = self.url("/api/v2/transfers/health");
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        self.guarded(async move {
            let response = client.get(&url).header("apikey", api_key).send().await?;
            let status = response.status().as_u16();
            if !(200..300).contains(&status) {
                let body = response.text().await.unwrap_or_default();
                return Err(SwitchError::Http { status, body });
            }
            let health = response.json::<serde_json::Value>().await?;
            Ok(health)
        })
        .await
    }
}
