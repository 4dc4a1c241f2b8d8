//! Delivery channels.
//!
//! The channel set is closed: every channel has a broker routing key, a bound
//! queue and an addressing scheme for its recipients. Only the worker side
//! (transports) varies per channel beyond this table.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Supported delivery channels.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// SMTP email.
    Email,
    /// Chat-bot channel, addressed by integer chat id.
    Telegram,
    /// Messaging-app channel, addressed by phone number.
    WhatsApp,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("email pattern is valid")
    })
}

fn phone_regex() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(r"^[0-9]{11,15}$").expect("phone pattern is valid"))
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Telegram, Channel::WhatsApp];

    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Exact, lowercase wire name.
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Routing key used on the direct exchange.
    pub fn routing_key(&self) -> &'static str {
        self.as_str()
    }

    /// Durable queue bound to this channel's routing key.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Self::Email => "email_queue",
            Self::Telegram => "telegram_queue",
            Self::WhatsApp => "whatsapp_queue",
        }
    }

    /// Check that `recipient` matches this channel's addressing scheme.
    ///
    /// Returns a human-readable reason on mismatch.
    pub fn validate_recipient(&self, recipient: &str) -> Result<(), String> {
        match self {
            Self::Email => {
                if email_regex().is_match(recipient) {
                    Ok(())
                } else {
                    Err("must be a valid email address".to_string())
                }
            }
            Self::Telegram => recipient
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| "must be an integer chat id".to_string()),
            Self::WhatsApp => {
                if phone_regex().is_match(recipient) {
                    Ok(())
                } else {
                    Err("must be a phone number of 11 to 15 digits".to_string())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_channel_wire_names() {
        for channel in Channel::ALL {
            assert_eq!(Channel::parse(channel.as_str()), Some(channel));
            assert_eq!(Channel::from_str(channel.as_str()).unwrap(), channel);
            assert_eq!(channel.to_string(), channel.as_str());
            assert_eq!(channel.routing_key(), channel.as_str());
        }
        assert_eq!(Channel::WhatsApp.queue_name(), "whatsapp_queue");
        assert_eq!(Channel::WhatsApp.as_str(), "whatsapp");
        assert_eq!(Channel::parse("sms"), None);
        assert_eq!(Channel::parse("Email"), None);
    }

    #[test]
    fn test_channel_serde() {
        let json = serde_json::to_string(&Channel::WhatsApp).unwrap();
        assert_eq!(json, "\"whatsapp\"");
        let parsed: Channel = serde_json::from_str("\"telegram\"").unwrap();
        assert_eq!(parsed, Channel::Telegram);
    }

    #[test]
    fn test_email_recipient() {
        assert!(Channel::Email.validate_recipient("user.name+tag@example.co").is_ok());
        assert!(Channel::Email.validate_recipient("not-an-email").is_err());
        assert!(Channel::Email.validate_recipient("a@b.c").is_err());
    }

    #[test]
    fn test_telegram_recipient() {
        assert!(Channel::Telegram.validate_recipient("123456789").is_ok());
        assert!(Channel::Telegram.validate_recipient("-100123456").is_ok());
        assert!(Channel::Telegram.validate_recipient("@someone").is_err());
    }

    #[test]
    fn test_whatsapp_recipient() {
        assert!(Channel::WhatsApp.validate_recipient("79001234567").is_ok());
        assert!(Channel::WhatsApp.validate_recipient("1234567890").is_err());
        assert!(Channel::WhatsApp.validate_recipient("+79001234567").is_err());
        assert!(Channel::WhatsApp.validate_recipient("1234567890123456").is_err());
    }
}
