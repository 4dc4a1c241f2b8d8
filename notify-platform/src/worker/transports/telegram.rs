//! Telegram Bot API transport.
//!
//! Sends via `POST /bot<token>/sendMessage`. A 429 response is retried in
//! place after the `parameters.retry_after` delay a bounded number of times
//! before it is reported as transient.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::domain::{Channel, NotificationMessage};
use crate::worker::transport::{
    DeliveryError, Transport, classify_request_error, classify_status, render_text,
};

const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Longest `retry_after` honored in place; anything longer goes back to the queue.
const MAX_INLINE_WAIT: Duration = Duration::from_secs(10);

/// `sendMessage` text limit, in characters.
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

const TRUNCATION_MARKER: &str = "\n\n[truncated]";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Error envelope of the Bot API.
#[derive(Debug, Default, Deserialize)]
struct BotApiError {
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

impl BotApiError {
    fn retry_after(&self) -> Duration {
        let secs = self
            .parameters
            .as_ref()
            .and_then(|p| p.retry_after)
            .unwrap_or(1);
        Duration::from_secs(secs)
    }
}

pub struct TelegramTransport {
    config: TelegramConfig,
    client: Client,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/bot{}/sendMessage", self.config.bot_token)
    }

    /// One `sendMessage` call. `Ok(None)` on success, `Ok(Some(..))` for a
    /// non-2xx reply.
    async fn post(
        &self,
        request: &SendMessage<'_>,
    ) -> Result<Option<(StatusCode, BotApiError)>, DeliveryError> {
        let response = self
            .client
            .post(self.endpoint())
            .json(request)
            .send()
            .await
            .map_err(|e| classify_request_error(&e.without_url()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(None);
        }
        let reply = response.json::<BotApiError>().await.unwrap_or_default();
        Ok(Some((status, reply)))
    }

    async fn send(&self, request: &SendMessage<'_>) -> Result<(), DeliveryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some((status, reply)) = self.post(request).await? else {
                return Ok(());
            };

            let wait = reply.retry_after();
            let retry_inline = status == StatusCode::TOO_MANY_REQUESTS
                && attempt < MAX_RATE_LIMIT_RETRIES
                && wait <= MAX_INLINE_WAIT;
            if !retry_inline {
                warn!(%status, attempt, description = %reply.description, "Telegram sendMessage failed");
                return Err(classify_status(status, &reply.description));
            }

            debug!(attempt, ?wait, "Telegram rate limited, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), DeliveryError> {
        let chat_id = message.recipient.trim().parse::<i64>().map_err(|_| {
            DeliveryError::Permanent(format!("invalid chat id {:?}", message.recipient))
        })?;

        let text = fit_to_limit(render_text(message), TELEGRAM_MESSAGE_LIMIT);
        self.send(&SendMessage {
            chat_id,
            text: &text,
        })
        .await?;

        debug!(id = %message.id, chat_id, "Telegram message sent");
        Ok(())
    }
}

/// Cut `text` to `limit` characters, marking the cut.
fn fit_to_limit(text: String, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text;
    }
    let keep = limit - TRUNCATION_MARKER.chars().count();
    text.chars().take(keep).chain(TRUNCATION_MARKER.chars()).collect()
}
