//! Message broker contract.
//!
//! One durable direct exchange, one durable queue per channel bound with the
//! channel name as routing key. Consumers acknowledge manually: a message
//! stays the broker's responsibility until it is acked or rejected, so a
//! worker may see the same message more than once.

pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::Result;
use crate::domain::{Channel, NotificationMessage};

pub use amqp::{AmqpBroker, AmqpConfig};
pub use memory::InMemoryBroker;

/// Name of the direct exchange every channel queue is bound to.
pub const EXCHANGE_NAME: &str = "notifications";

/// Publishes persistent messages routed by channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: &NotificationMessage) -> Result<()>;
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    /// Reject the delivery. With `requeue` the broker redelivers it later,
    /// otherwise it is dropped (or dead-lettered by broker policy).
    async fn reject(&self, requeue: bool) -> Result<()>;
}

/// A message handed to a consumer, not yet settled.
pub struct Delivery {
    pub payload: Vec<u8>,
    pub message_id: Option<String>,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        payload: Vec<u8>,
        message_id: Option<String>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            payload,
            message_id,
            redelivered,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn reject(&self, requeue: bool) -> Result<()> {
        self.acker.reject(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message_id)
            .field("redelivered", &self.redelivered)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Stream of deliveries from one channel queue. Ends when the consumer is
/// cancelled or the connection closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Consumes a channel queue with manual acknowledgment.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Start consuming `channel`'s queue with at most `prefetch` unsettled
    /// deliveries outstanding.
    async fn subscribe(&self, channel: Channel, prefetch: u16) -> Result<DeliveryStream>;
}
