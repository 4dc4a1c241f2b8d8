//! Handling of a single broker delivery.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::state::{DeliveryState, Settlement};
use super::transport::{DeliveryError, Transport};
use crate::audit::AuditSink;
use crate::broker::Delivery;
use crate::database::repositories::NotificationRepository;
use crate::domain::{
    AuditAction, AuditEvent, AuditOutcome, Channel, NotificationMessage, NotificationStatus,
};
use crate::error::with_timeout;

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleReport {
    /// Notification id, when it could be determined.
    pub id: Option<String>,
    pub state: DeliveryState,
    pub settlement: Settlement,
    /// Whether the transport was invoked.
    pub attempted: bool,
}

/// Drives a delivery from `Received` to a terminal state and settles it with
/// the broker.
///
/// The ledger is read right before the transport call, so a redelivered
/// message whose notification is already `sent` is acknowledged without a
/// second send.
pub struct DeliveryHandler {
    channel: Channel,
    transport: Arc<dyn Transport>,
    ledger: Arc<dyn NotificationRepository>,
    audit: Arc<dyn AuditSink>,
    store_timeout: Duration,
    transport_timeout: Duration,
}

struct Outcome {
    id: Option<String>,
    state: DeliveryState,
    attempted: bool,
}

impl DeliveryHandler {
    pub fn new(
        transport: Arc<dyn Transport>,
        ledger: Arc<dyn NotificationRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            channel: transport.channel(),
            transport,
            ledger,
            audit,
            store_timeout: Duration::from_millis(2000),
            transport_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeouts(mut self, store: Duration, transport: Duration) -> Self {
        self.store_timeout = store;
        self.transport_timeout = transport;
        self
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Process `delivery` and settle it. Never panics on bad input; every
    /// path ends in exactly one ack or reject.
    pub async fn handle(&self, delivery: &Delivery) -> HandleReport {
        let outcome = self.process(delivery).await;

        let settlement = match Settlement::for_state(outcome.state) {
            Some(settlement) => settlement,
            None => {
                error!(state = %outcome.state, "Delivery ended in a non-terminal state");
                Settlement::Requeued
            }
        };

        let settled = match settlement {
            Settlement::Acked => delivery.ack().await,
            Settlement::Requeued => delivery.reject(true).await,
            Settlement::Dropped => delivery.reject(false).await,
        };
        if let Err(e) = settled {
            // The broker will redeliver an unsettled message.
            warn!(id = ?outcome.id, %settlement, error = %e, "Failed to settle delivery");
        }

        HandleReport {
            id: outcome.id,
            state: outcome.state,
            settlement,
            attempted: outcome.attempted,
        }
    }

    async fn process(&self, delivery: &Delivery) -> Outcome {
        let mut state = DeliveryState::Received;

        let message = match NotificationMessage::from_bytes(&delivery.payload) {
            Ok(message) if message.channel == self.channel => message,
            Ok(message) => {
                let reason = format!(
                    "message for {} delivered to the {} queue",
                    message.channel, self.channel
                );
                return self
                    .reject_unprocessable(&mut state, Some(message.id), reason)
                    .await;
            }
            Err(e) => {
                let id = NotificationMessage::salvage_id(&delivery.payload)
                    .or_else(|| delivery.message_id.clone());
                return self
                    .reject_unprocessable(&mut state, id, format!("malformed payload: {}", e))
                    .await;
            }
        };

        self.advance(&mut state, DeliveryState::Parsed);
        let id = message.id.clone();

        let record = match with_timeout("ledger read", self.store_timeout, self.ledger.find(&id)).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(%id, "Delivery references an unknown notification");
                self.advance(&mut state, DeliveryState::PermanentFailure);
                return Outcome {
                    id: Some(id),
                    state,
                    attempted: false,
                };
            }
            Err(e) => {
                warn!(%id, error = %e, "Ledger unavailable, requeueing without delivery");
                self.advance(&mut state, DeliveryState::TransientFailure);
                return Outcome {
                    id: Some(id),
                    state,
                    attempted: false,
                };
            }
        };

        if record.status == NotificationStatus::Sent {
            info!(%id, redelivered = delivery.redelivered, "Already sent, skipping");
            self.advance(&mut state, DeliveryState::Delivered);
            return Outcome {
                id: Some(id),
                state,
                attempted: false,
            };
        }

        self.advance(&mut state, DeliveryState::Delivering);
        debug!(%id, channel = %self.channel, attempt = record.attempts + 1, "Delivering");

        let result = match tokio::time::timeout(self.transport_timeout, self.transport.deliver(&message)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Transient(format!(
                "transport timed out after {:?}",
                self.transport_timeout
            ))),
        };

        match result {
            Ok(()) => {
                self.advance(&mut state, DeliveryState::Delivered);
                match with_timeout("ledger update", self.store_timeout, self.ledger.mark_sent(&id)).await {
                    Ok(true) => {}
                    Ok(false) => debug!(%id, "Ledger row was already sent"),
                    Err(e) => {
                        // Acking anyway: requeueing would send the message twice.
                        error!(%id, error = %e, "Delivered but failed to mark notification sent");
                    }
                }
                self.audit
                    .record(
                        AuditEvent::notification(
                            record.user_id,
                            AuditAction::NotificationSent,
                            id.clone(),
                            AuditOutcome::Success,
                        )
                        .with_metadata(json!({ "channel": self.channel })),
                    )
                    .await;
                info!(%id, channel = %self.channel, "Notification delivered");
            }
            Err(e) => {
                let target = if e.is_transient() {
                    DeliveryState::TransientFailure
                } else {
                    DeliveryState::PermanentFailure
                };
                self.advance(&mut state, target);
                warn!(%id, channel = %self.channel, transient = e.is_transient(), reason = %e.reason(), "Delivery failed");

                self.mark_failed(&id, e.reason()).await;
                self.audit
                    .record(
                        AuditEvent::notification(
                            record.user_id,
                            AuditAction::NotificationFailed,
                            id.clone(),
                            AuditOutcome::Failure,
                        )
                        .with_metadata(json!({
                            "channel": self.channel,
                            "transient": e.is_transient(),
                            "error": e.reason(),
                        })),
                    )
                    .await;
            }
        }

        Outcome {
            id: Some(id),
            state,
            attempted: true,
        }
    }

    async fn reject_unprocessable(
        &self,
        state: &mut DeliveryState,
        id: Option<String>,
        reason: String,
    ) -> Outcome {
        warn!(id = ?id, channel = %self.channel, %reason, "Dropping unprocessable delivery");
        self.advance(state, DeliveryState::PermanentFailure);
        if let Some(id) = &id {
            self.fail_salvaged(id, &reason).await;
        }
        Outcome {
            id,
            state: *state,
            attempted: false,
        }
    }

    /// Fail and audit the row behind a delivery that could not be processed.
    /// Without a row there is no owner to attribute the event to.
    async fn fail_salvaged(&self, id: &str, reason: &str) {
        let record = match with_timeout("ledger read", self.store_timeout, self.ledger.find(id)).await {
            Ok(Some(record)) if record.status != NotificationStatus::Sent => record,
            Ok(Some(_)) => {
                debug!(%id, "Unprocessable redelivery of a sent notification");
                return;
            }
            Ok(None) => {
                debug!(%id, "Unprocessable delivery has no ledger row");
                return;
            }
            Err(e) => {
                error!(%id, error = %e, "Ledger unavailable while failing delivery");
                return;
            }
        };

        self.mark_failed(id, reason).await;
        self.audit
            .record(
                AuditEvent::notification(
                    record.user_id,
                    AuditAction::NotificationFailed,
                    id.to_string(),
                    AuditOutcome::Failure,
                )
                .with_metadata(json!({
                    "channel": record.channel,
                    "transient": false,
                    "error": reason,
                })),
            )
            .await;
    }

    async fn mark_failed(&self, id: &str, reason: &str) {
        match with_timeout(
            "ledger update",
            self.store_timeout,
            self.ledger.mark_failed(id, reason),
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => debug!(%id, "No failed transition recorded (missing or already sent)"),
            Err(e) => error!(%id, error = %e, "Failed to mark notification failed"),
        }
    }

    fn advance(&self, state: &mut DeliveryState, target: DeliveryState) {
        if let Err(e) = state.transition_to(target) {
            error!(error = %e, "Illegal delivery state transition");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::broker::memory::Settlement as BrokerSettlement;
    use crate::broker::{InMemoryBroker, Publisher};
    use crate::database::repositories::SqlxNotificationRepository;
    use crate::database::{init_pool_with_size, run_migrations};
    use crate::domain::Notification;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    /// Transport returning scripted results, then success.
    struct ScriptedTransport {
        results: Mutex<VecDeque<Result<(), DeliveryError>>>,
        sent: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        fn new(results: Vec<Result<(), DeliveryError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                sent: Mutex::new(Vec::new()),
                delay: None,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
                delay: Some(delay),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn channel(&self) -> Channel {
            Channel::Telegram
        }

        async fn deliver(&self, message: &NotificationMessage) -> Result<(), DeliveryError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let result = self.results.lock().pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                self.sent.lock().push(message.id.clone());
            }
            result
        }
    }

    struct Fixture {
        handler: DeliveryHandler,
        ledger: Arc<SqlxNotificationRepository>,
        broker: InMemoryBroker,
        audit: Arc<MemoryAuditSink>,
    }

    async fn fixture(transport: Arc<ScriptedTransport>) -> Fixture {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let ledger = Arc::new(SqlxNotificationRepository::new(pool));
        let audit = Arc::new(MemoryAuditSink::new());
        let handler = DeliveryHandler::new(transport, ledger.clone(), audit.clone())
            .with_timeouts(Duration::from_secs(2), Duration::from_millis(50));

        Fixture {
            handler,
            ledger,
            broker: InMemoryBroker::new(),
            audit,
        }
    }

    async fn queue_one(f: &Fixture) -> String {
        let notification =
            Notification::new_queued(5, Channel::Telegram, "777", None, "hello");
        f.ledger.create(&notification).await.unwrap();
        f.broker
            .publish(&NotificationMessage::from_notification(
                &notification,
                HashMap::new(),
                None,
            ))
            .await
            .unwrap();
        notification.id
    }

    #[tokio::test]
    async fn test_success_marks_sent_and_acks() {
        let transport = ScriptedTransport::new(vec![]);
        let f = fixture(transport.clone()).await;
        let id = queue_one(&f).await;

        let delivery = f.broker.try_next(Channel::Telegram).unwrap();
        let report = f.handler.handle(&delivery).await;

        assert_eq!(report.state, DeliveryState::Delivered);
        assert_eq!(report.settlement, Settlement::Acked);
        assert!(report.attempted);
        assert_eq!(*transport.sent.lock(), vec![id.clone()]);

        let row = f.ledger.get(&id).await.unwrap();
        assert_eq!(row.status, NotificationStatus::Sent);
        assert!(row.sent_at.is_some());
        assert_eq!(f.audit.events()[0].action, AuditAction::NotificationSent);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let transport = ScriptedTransport::new(vec![Err(DeliveryError::Transient(
            "503".to_string(),
        ))]);
        let f = fixture(transport.clone()).await;
        let id = queue_one(&f).await;

        let first = f.broker.try_next(Channel::Telegram).unwrap();
        let report = f.handler.handle(&first).await;
        assert_eq!(report.settlement, Settlement::Requeued);
        let row = f.ledger.get(&id).await.unwrap();
        assert_eq!(row.status, NotificationStatus::Failed);
        assert_eq!(row.last_error.as_deref(), Some("503"));

        let second = f.broker.try_next(Channel::Telegram).unwrap();
        assert!(second.redelivered);
        let report = f.handler.handle(&second).await;
        assert_eq!(report.state, DeliveryState::Delivered);

        let row = f.ledger.get(&id).await.unwrap();
        assert_eq!(row.status, NotificationStatus::Sent);
        assert_eq!(row.attempts, 2);
        assert!(row.sent_at.is_some());
        assert_eq!(f.broker.ready_len(Channel::Telegram), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_dropped() {
        let transport = ScriptedTransport::new(vec![Err(DeliveryError::Permanent(
            "chat not found".to_string(),
        ))]);
        let f = fixture(transport).await;
        let id = queue_one(&f).await;

        let delivery = f.broker.try_next(Channel::Telegram).unwrap();
        let report = f.handler.handle(&delivery).await;

        assert_eq!(report.settlement, Settlement::Dropped);
        assert_eq!(f.broker.ready_len(Channel::Telegram), 0);
        assert_eq!(
            f.ledger.get(&id).await.unwrap().status,
            NotificationStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_redelivery_after_success_is_not_resent() {
        let transport = ScriptedTransport::new(vec![]);
        let f = fixture(transport.clone()).await;
        let id = queue_one(&f).await;
        f.ledger.mark_sent(&id).await.unwrap();

        let delivery = f.broker.try_next(Channel::Telegram).unwrap();
        let report = f.handler.handle(&delivery).await;

        assert_eq!(report.state, DeliveryState::Delivered);
        assert_eq!(report.settlement, Settlement::Acked);
        assert!(!report.attempted);
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected_once() {
        let f = fixture(ScriptedTransport::new(vec![])).await;
        let notification = Notification::new_queued(5, Channel::Telegram, "777", None, "x");
        f.ledger.create(&notification).await.unwrap();

        let payload = format!(r#"{{"id":"{}","channel":"telegram"}}"#, notification.id);
        f.broker
            .push_raw(Channel::Telegram, payload.into_bytes(), None);

        let delivery = f.broker.try_next(Channel::Telegram).unwrap();
        let report = f.handler.handle(&delivery).await;

        assert_eq!(report.state, DeliveryState::PermanentFailure);
        assert_eq!(report.id.as_deref(), Some(notification.id.as_str()));
        assert_eq!(
            f.broker
                .settlements()
                .iter()
                .map(|s| s.settlement)
                .collect::<Vec<_>>(),
            vec![BrokerSettlement::Rejected { requeue: false }]
        );
        assert!(f.broker.try_next(Channel::Telegram).is_none());
        assert_eq!(
            f.ledger.get(&notification.id).await.unwrap().status,
            NotificationStatus::Failed
        );

        let events = f.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::NotificationFailed);
        assert_eq!(events[0].user_id, 5);
        assert_eq!(events[0].status, AuditOutcome::Failure);
        assert_eq!(events[0].metadata["transient"], false);
    }

    #[tokio::test]
    async fn test_malformed_redelivery_of_sent_is_not_audited() {
        let f = fixture(ScriptedTransport::new(vec![])).await;
        let notification = Notification::new_queued(5, Channel::Telegram, "777", None, "x");
        f.ledger.create(&notification).await.unwrap();
        f.ledger.mark_sent(&notification.id).await.unwrap();

        let payload = format!(r#"{{"id":"{}"}}"#, notification.id);
        f.broker
            .push_raw(Channel::Telegram, payload.into_bytes(), None);
        let delivery = f.broker.try_next(Channel::Telegram).unwrap();
        let report = f.handler.handle(&delivery).await;

        assert_eq!(report.settlement, Settlement::Dropped);
        assert_eq!(
            f.ledger.get(&notification.id).await.unwrap().status,
            NotificationStatus::Sent
        );
        assert!(f.audit.events().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_permanent() {
        let transport = ScriptedTransport::new(vec![]);
        let f = fixture(transport.clone()).await;
        let message = NotificationMessage {
            id: "missing".to_string(),
            channel: Channel::Telegram,
            recipient: "1".to_string(),
            subject: None,
            body: "hi".to_string(),
            data: HashMap::new(),
            template_id: None,
        };
        f.broker.publish(&message).await.unwrap();

        let delivery = f.broker.try_next(Channel::Telegram).unwrap();
        let report = f.handler.handle(&delivery).await;

        assert_eq!(report.settlement, Settlement::Dropped);
        assert!(transport.sent.lock().is_empty());
        assert!(f.audit.events().is_empty());
    }

    #[tokio::test]
    async fn test_transport_timeout_is_transient() {
        let f = fixture(ScriptedTransport::slow(Duration::from_millis(500))).await;
        let id = queue_one(&f).await;

        let delivery = f.broker.try_next(Channel::Telegram).unwrap();
        let report = f.handler.handle(&delivery).await;

        assert_eq!(report.state, DeliveryState::TransientFailure);
        assert_eq!(report.settlement, Settlement::Requeued);
        let row = f.ledger.get(&id).await.unwrap();
        assert!(row.last_error.unwrap().contains("timed out"));
    }
}
