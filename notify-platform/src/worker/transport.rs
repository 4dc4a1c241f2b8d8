//! Channel transport capability and failure classification.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::BTreeMap;

use crate::domain::{Channel, NotificationMessage};

/// A failed delivery attempt, classified by whether retrying can help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Worth retrying later: timeouts, throttling, upstream 5xx.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Retrying cannot succeed: bad recipient, rejected credentials, 4xx.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(reason) | Self::Permanent(reason) => reason,
        }
    }
}

/// Sends a message to its recipient over one channel.
#[async_trait]
pub trait Transport: Send + Sync {
    fn channel(&self) -> Channel;

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), DeliveryError>;
}

/// Classify a non-success HTTP status from an upstream API.
pub fn classify_status(status: StatusCode, detail: &str) -> DeliveryError {
    let reason = if detail.is_empty() {
        format!("upstream returned {}", status)
    } else {
        format!("upstream returned {}: {}", status, detail)
    };

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        DeliveryError::Transient(reason)
    } else {
        DeliveryError::Permanent(reason)
    }
}

/// Classify a request that never produced a response.
pub fn classify_request_error(error: &reqwest::Error) -> DeliveryError {
    if error.is_builder() {
        DeliveryError::Permanent(format!("invalid request: {}", error))
    } else {
        DeliveryError::Transient(format!("request failed: {}", error))
    }
}

/// Message text for chat channels.
///
/// `{{key}}` placeholders in the body are filled from `data`. A template-only
/// message with no body lists its data fields instead. The subject, when
/// present, becomes the first line.
pub fn render_text(message: &NotificationMessage) -> String {
    let mut body = message.body.clone();
    for (key, value) in &message.data {
        body = body.replace(&format!("{{{{{}}}}}", key), value);
    }

    if body.trim().is_empty() {
        let fields: BTreeMap<_, _> = message.data.iter().collect();
        let mut lines: Vec<String> = Vec::with_capacity(fields.len() + 1);
        if let Some(template_id) = message.template_id {
            lines.push(format!("template #{}", template_id));
        }
        lines.extend(fields.into_iter().map(|(k, v)| format!("{}: {}", k, v)));
        body = lines.join("\n");
    }

    match message.subject.as_deref() {
        Some(subject) if !subject.is_empty() => format!("{}\n\n{}", subject, body),
        _ => body,
    }
}
