//! Domain layer for notify-platform.
//!
//! Channels, notification lifecycle, rate limit policies, audit events and
//! the broker message payload.

pub mod audit;
pub mod channel;
pub mod message;
pub mod notification;
pub mod rate_limit;

pub use audit::{AuditAction, AuditEvent, AuditOutcome};
pub use channel::Channel;
pub use message::NotificationMessage;
pub use notification::{Notification, NotificationStats, NotificationStatus};
pub use rate_limit::{PolicyScope, RateLimitPolicy, counter_key};
