//! Broker message payload.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Channel, Notification};

/// JSON body of a message published to a channel queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub id: String,
    pub channel: Channel,
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<i64>,
}

impl NotificationMessage {
    pub fn from_notification(
        notification: &Notification,
        data: HashMap<String, String>,
        template_id: Option<i64>,
    ) -> Self {
        Self {
            id: notification.id.clone(),
            channel: notification.channel,
            recipient: notification.recipient.clone(),
            subject: notification.subject.clone(),
            body: notification.body.clone(),
            data,
            template_id,
        }
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(payload: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Best-effort recovery of the notification id from a payload that does
    /// not deserialize as a full message.
    pub fn salvage_id(payload: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
        value
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}
