//! Notification requests and their validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::Channel;

/// Longest accepted subject, in characters.
pub const MAX_SUBJECT_CHARS: usize = 255;

/// A notification request as submitted by a client.
///
/// Fields are loosely typed so that every problem can be reported at once
/// instead of failing on the first one during deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyRequest {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub data: Option<HashMap<String, String>>,
    #[serde(default, alias = "templateId")]
    pub template_id: Option<i64>,
}

/// One violated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub data: HashMap<String, String>,
    pub template_id: Option<i64>,
}

impl NotifyRequest {
    /// Check every field, returning all violations together.
    pub fn validate(&self) -> Result<ValidatedRequest, Vec<FieldError>> {
        let mut errors = Vec::new();

        let channel_name = self.channel.trim();
        let channel = if channel_name.is_empty() {
            errors.push(FieldError::new("channel", "is required"));
            None
        } else {
            let parsed = Channel::parse(&channel_name.to_ascii_lowercase());
            if parsed.is_none() {
                errors.push(FieldError::new(
                    "channel",
                    "must be one of: email, telegram, whatsapp",
                ));
            }
            parsed
        };

        let recipient = self.recipient.trim();
        if recipient.is_empty() {
            errors.push(FieldError::new("recipient", "is required"));
        } else if let Some(channel) = channel
            && let Err(reason) = channel.validate_recipient(recipient)
        {
            errors.push(FieldError::new("recipient", reason));
        }

        let has_template = self.template_id.is_some_and(|id| id > 0);
        if let Some(id) = self.template_id
            && id <= 0
        {
            errors.push(FieldError::new("template_id", "must be a positive integer"));
        }

        let body = self.body.as_deref().unwrap_or_default();
        if body.trim().is_empty() && !has_template {
            errors.push(FieldError::new(
                "body",
                "is required unless template_id is set",
            ));
        }

        let subject = self
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(subject) = subject
            && subject.chars().count() > MAX_SUBJECT_CHARS
        {
            errors.push(FieldError::new(
                "subject",
                format!("must be at most {} characters", MAX_SUBJECT_CHARS),
            ));
        }

        match channel {
            Some(channel) if errors.is_empty() => Ok(ValidatedRequest {
                channel,
                recipient: recipient.to_string(),
                subject: subject.map(str::to_string),
                body: body.to_string(),
                data: self.data.clone().unwrap_or_default(),
                template_id: self.template_id,
            }),
            _ => Err(errors),
        }
    }
}
