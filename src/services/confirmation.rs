//! Confirmation polling for outbound transfers.
//!
//! The switch acknowledges receipt, not settlement. After an ACK the
//! transfer is polled by reference at a fixed interval for a bounded number
//! of attempts. The poller only renders verdicts; acting on them (keeping
//! the debit, compensating, leaving the record PENDING) is the
//! orchestrator's call.

use std::time::Duration;

use crate::switch::{StatusClass, SwitchClient};

/// Terminal outcome of one polling window.
#[derive(Debug, Clone, PartialEq)]
pub enum PollVerdict {
    /// The switch settled the transfer; the applied debit stands.
    Confirmed,
    /// The switch rejected the transfer (or no longer knows it); the debit
    /// must be compensated.
    Rejected(String),
    /// No terminal status within the window. The transfer may still settle;
    /// the record stays PENDING for later reconciliation.
    TimedOut,
}

#[derive(Clone)]
pub struct ConfirmationPoller {
    switch: SwitchClient,
    attempts: u32,
    interval: Duration,
}

impl ConfirmationPoller {
    pub fn new(switch: SwitchClient, attempts: u32, interval_ms: u64) -> Self {
        Self {
            switch,
            attempts,
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Block the calling request until the switch renders a verdict or the
    /// window closes. This is a deliberate synchronous wait: the caller is
    /// a foreground transfer awaiting a user-visible outcome.
    pub async fn await_confirmation(&self, instruction_id: &str) -> PollVerdict {
        for attempt in 1..=self.attempts {
            tokio::time::sleep(self.interval).await;

            match self.check_now(instruction_id).await {
                Some(verdict) => {
                    tracing::info!(
                        "Transfer {} resolved on poll attempt {}: {:?}",
                        instruction_id,
                        attempt,
                        verdict
                    );
                    return verdict;
                }
                None => {
                    tracing::debug!(
                        "Transfer {} still unresolved (attempt {}/{})",
                        instruction_id,
                        attempt,
                        self.attempts
                    );
                }
            }
        }

        tracing::warn!(
            "Transfer {} not confirmed within {} attempts, leaving it in process",
            instruction_id,
            self.attempts
        );
        PollVerdict::TimedOut
    }

    /// One status probe. `None` means no verdict yet: an in-flight status
    /// token or a transient transport error, both of which keep the window
    /// open. A 404 is a verdict: the destination never saw the transfer.
    pub async fn check_now(&self, instruction_id: &str) -> Option<PollVerdict> {
        match self.switch.query_status(instruction_id).await {
            Ok(result) => match result.status_class() {
                StatusClass::Success => Some(PollVerdict::Confirmed),
                StatusClass::Failure => Some(PollVerdict::Rejected(result.failure_reason())),
                StatusClass::Indeterminate => None,
            },
            Err(e) if e.http_status() == Some(404) => Some(PollVerdict::Rejected(
                "transfer not found at destination".to_string(),
            )),
            Err(e) => {
                tracing::warn!("Transient error polling transfer {}: {}", instruction_id, e);
                None
            }
        }
    }
}
