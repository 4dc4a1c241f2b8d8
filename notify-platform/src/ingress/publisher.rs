//! Ingress: admit, record and publish a notification request.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::request::{FieldError, NotifyRequest};
use crate::audit::AuditSink;
use crate::broker::Publisher;
use crate::database::repositories::NotificationRepository;
use crate::domain::{AuditAction, AuditEvent, AuditOutcome, Channel, Notification, NotificationMessage};
use crate::error::with_timeout;
use crate::ratelimit::{AdmissionDecision, AdmissionGate};

/// Why a submission was not queued.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("rate limited: {reason}")]
    RateLimited { reason: String, retry_after_secs: u64 },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("failed to record notification: {0}")]
    Ledger(String),

    /// The ledger row exists in `queued` but the broker did not take the
    /// message.
    #[error("failed to publish notification {id}: {message}")]
    Publish { id: String, message: String },
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub id: String,
    pub channel: Channel,
}

/// Deadlines for the backing stores touched during a submission.
#[derive(Debug, Clone, Copy)]
pub struct IngressTimeouts {
    pub store: Duration,
    pub broker: Duration,
}

impl Default for IngressTimeouts {
    fn default() -> Self {
        Self {
            store: Duration::from_millis(2000),
            broker: Duration::from_millis(5000),
        }
    }
}

/// Front door for notification requests.
///
/// A submission runs validation, then the admission gate, then inserts the
/// `queued` ledger row, then publishes to the broker, then audits. Nothing is
/// persisted or published for a request that fails validation or admission.
pub struct Ingress {
    gate: Arc<AdmissionGate>,
    ledger: Arc<dyn NotificationRepository>,
    publisher: Arc<dyn Publisher>,
    audit: Arc<dyn AuditSink>,
    timeouts: IngressTimeouts,
}

impl Ingress {
    pub fn new(
        gate: Arc<AdmissionGate>,
        ledger: Arc<dyn NotificationRepository>,
        publisher: Arc<dyn Publisher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            gate,
            ledger,
            publisher,
            audit,
            timeouts: IngressTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: IngressTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[instrument(skip(self, request), fields(channel = %request.channel))]
    pub async fn submit(
        &self,
        user_id: i64,
        request: &NotifyRequest,
    ) -> Result<SubmitReceipt, SubmitError> {
        let valid = request.validate().map_err(SubmitError::Validation)?;
        let channel = valid.channel;

        match self.gate.admit(user_id, channel).await {
            Ok(AdmissionDecision::Allow { .. }) => {}
            Ok(AdmissionDecision::Deny {
                reason,
                retry_after_secs,
            }) => {
                return Err(SubmitError::RateLimited {
                    reason,
                    retry_after_secs,
                });
            }
            Err(e) => {
                warn!(user_id, %channel, error = %e, "Admission check unavailable");
                return Err(SubmitError::Unavailable(e.to_string()));
            }
        }

        let notification = Notification::new_queued(
            user_id,
            channel,
            valid.recipient,
            valid.subject,
            valid.body,
        );
        let id = notification.id.clone();

        if let Err(e) = with_timeout(
            "ledger insert",
            self.timeouts.store,
            self.ledger.create(&notification),
        )
        .await
        {
            error!(user_id, %id, error = %e, "Failed to record notification");
            return Err(SubmitError::Ledger(e.to_string()));
        }

        let message =
            NotificationMessage::from_notification(&notification, valid.data, valid.template_id);

        if let Err(e) = with_timeout(
            "broker publish",
            self.timeouts.broker,
            self.publisher.publish(&message),
        )
        .await
        {
            error!(user_id, %id, %channel, error = %e, "Failed to publish notification");
            self.audit
                .record(
                    AuditEvent::notification(
                        user_id,
                        AuditAction::NotificationPublishFailed,
                        id.clone(),
                        AuditOutcome::Failure,
                    )
                    .with_metadata(json!({ "channel": channel, "error": e.to_string() })),
                )
                .await;
            return Err(SubmitError::Publish {
                id,
                message: e.to_string(),
            });
        }

        self.audit
            .record(
                AuditEvent::notification(
                    user_id,
                    AuditAction::NotificationQueued,
                    id.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata(json!({ "channel": channel })),
            )
            .await;

        info!(user_id, %id, %channel, "Notification queued");
        Ok(SubmitReceipt { id, channel })
    }
}
