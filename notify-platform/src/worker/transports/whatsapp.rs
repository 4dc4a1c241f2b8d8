//! WhatsApp transport through Green-API.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::GreenApiConfig;
use crate::domain::{Channel, NotificationMessage};
use crate::worker::transport::{
    DeliveryError, Transport, classify_request_error, classify_status, render_text,
};

pub struct WhatsAppTransport {
    config: GreenApiConfig,
    client: Client,
}

impl WhatsAppTransport {
    pub fn new(config: GreenApiConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/waInstance{}/sendMessage/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.instance_id,
            self.config.token
        )
    }
}

/// Green-API chat id for a phone number, `<digits>@c.us`.
fn chat_id(recipient: &str) -> Result<String, DeliveryError> {
    let digits = recipient.trim().trim_start_matches('+');
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DeliveryError::Permanent(format!(
            "invalid phone number {:?}",
            recipient
        )));
    }
    Ok(format!("{}@c.us", digits))
}

#[async_trait]
impl Transport for WhatsAppTransport {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), DeliveryError> {
        let payload = json!({
            "chatId": chat_id(&message.recipient)?,
            "message": render_text(message),
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|e| classify_request_error(&e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "Green-API sendMessage failed");
            return Err(classify_status(status, body.trim()));
        }

        debug!(id = %message.id, "WhatsApp message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let transport = WhatsAppTransport::new(
            GreenApiConfig {
                instance_id: "1101".to_string(),
                token: "tok".to_string(),
                api_base: "https://api.green-api.com".to_string(),
            },
            Client::new(),
        );
        assert_eq!(
            transport.endpoint(),
            "https://api.green-api.com/waInstance1101/sendMessage/tok"
        );
    }

    #[test]
    fn test_chat_id() {
        assert_eq!(chat_id("79001234567").unwrap(), "79001234567@c.us");
        assert_eq!(chat_id("+79001234567").unwrap(), "79001234567@c.us");
        assert!(matches!(chat_id("7900-123"), Err(DeliveryError::Permanent(_))));
        assert!(chat_id("").is_err());
    }
}
