//! Message delivery with bounded, per-message retry.
//!
//! [`Deliverer`] walks a batch in order and hands each message to a
//! [`Transport`]. A message that still fails after the [`RetryPolicy`] is
//! exhausted is logged and counted, and delivery moves on to the next one.
//! Nothing is persisted or deduplicated: re-running over the same window
//! sends the same messages again.

mod telegram;

pub use telegram::{DeliveryError, TelegramClient, DEFAULT_API_BASE_URL, DEFAULT_SEND_TIMEOUT};

use std::time::Duration;

use crate::format::ParseMode;
use crate::retry::RetryPolicy;

/// Longest server-requested pause honoured between attempts.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// One formatted message addressed to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub destination: i64,
    pub text: String,
}

/// Where messages go.
#[derive(Debug, Clone)]
pub enum Transport {
    Telegram(TelegramClient),
    /// Logs each message instead of sending it (`--dry-run`).
    DryRun,
    /// Panics on messages for this destination, accepts all others.
    #[cfg(test)]
    PanicOn(i64),
}

impl Transport {
    async fn send(
        &self,
        message: &OutboundMessage,
        parse_mode: ParseMode,
    ) -> Result<(), DeliveryError> {
        match self {
            Transport::Telegram(client) => {
                client
                    .send(message.destination, &message.text, parse_mode)
                    .await
            }
            Transport::DryRun => {
                tracing::info!(
                    chat_id = message.destination,
                    text = %message.text,
                    "Dry run: message not sent"
                );
                Ok(())
            }
            #[cfg(test)]
            Transport::PanicOn(destination) => {
                if message.destination == *destination {
                    panic!("transport failure for {}", destination);
                }
                Ok(())
            }
        }
    }
}

/// Outcome of delivering one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Messages accepted by the transport.
    pub delivered: usize,
    /// Messages dropped after exhausting retries.
    pub failed: usize,
    /// Send calls made, including retries.
    pub attempts: usize,
}

/// Sends batches through a transport, retrying each message per policy.
#[derive(Debug, Clone)]
pub struct Deliverer {
    transport: Transport,
    retry: RetryPolicy,
    parse_mode: ParseMode,
}

impl Deliverer {
    pub fn new(transport: Transport, parse_mode: ParseMode) -> Self {
        Self {
            transport,
            retry: RetryPolicy::delivery_default(),
            parse_mode,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Delivers `batch` in order. An empty batch makes no calls at all.
    pub async fn deliver(&self, batch: &[OutboundMessage]) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for (index, message) in batch.iter().enumerate() {
            let (result, attempts) = self.deliver_one(message).await;
            report.attempts += attempts as usize;
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        chat_id = message.destination,
                        message = index,
                        attempts = attempts,
                        error = %e,
                        "Giving up on message after exhausting retries"
                    );
                }
            }
        }

        report
    }

    /// Returns the final result and how many send calls it took.
    async fn deliver_one(&self, message: &OutboundMessage) -> (Result<(), DeliveryError>, u32) {
        let mut retry_count = 0;

        loop {
            let attempt = retry_count + 1;
            let err = match self.transport.send(message, self.parse_mode).await {
                Ok(()) => return (Ok(()), attempt),
                Err(e) => e,
            };

            let Some(delay) = self.retry.next_delay(retry_count) else {
                return (Err(err), attempt);
            };
            let delay = match err.retry_after() {
                Some(requested) => delay.max(requested.min(MAX_RETRY_AFTER)),
                None => delay,
            };

            tracing::warn!(
                chat_id = message.destination,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Send failed, retrying after delay"
            );

            tokio::time::sleep(delay).await;
            retry_count += 1;
        }
    }
}
