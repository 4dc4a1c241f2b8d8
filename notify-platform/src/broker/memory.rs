//! In-process broker with the same settlement semantics as the AMQP broker.
//!
//! Published messages wait in a per-channel ready queue. A consumed message
//! moves to the unacked set until it is acked (dropped), rejected without
//! requeue (dropped) or rejected with requeue (back to the end of the ready
//! queue, flagged as redelivered). Every settlement is recorded so callers
//! can inspect what happened.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

use super::{Acknowledger, Delivery, DeliveryStream, Publisher, Subscriber};
use crate::domain::{Channel, NotificationMessage};
use crate::{Error, Result};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Rejected { requeue: bool },
}

/// One settlement, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    pub channel: Channel,
    pub message_id: Option<String>,
    pub settlement: Settlement,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    message_id: Option<String>,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    next_tag: u64,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<Channel, QueueState>>,
    settlements: Mutex<Vec<SettlementRecord>>,
    published: Mutex<Vec<NotificationMessage>>,
    notify: Notify,
    closed: AtomicBool,
    fail_publish: AtomicBool,
}

impl Inner {
    fn take_ready(self: &Arc<Self>, channel: Channel) -> Option<Delivery> {
        let mut queues = self.queues.lock();
        let queue = queues.entry(channel).or_default();
        let message = queue.ready.pop_front()?;
        let tag = queue.next_tag;
        queue.next_tag += 1;
        queue.unacked.insert(tag, message.clone());

        Some(Delivery::new(
            message.payload,
            message.message_id,
            message.redelivered,
            Box::new(MemoryAcker {
                inner: self.clone(),
                channel,
                tag,
                settled: AtomicBool::new(false),
            }),
        ))
    }

    fn has_ready(&self, channel: Channel) -> bool {
        self.queues
            .lock()
            .get(&channel)
            .is_some_and(|q| !q.ready.is_empty())
    }

    fn settle(&self, channel: Channel, tag: u64, settlement: Settlement) -> Result<()> {
        let message = {
            let mut queues = self.queues.lock();
            let queue = queues.entry(channel).or_default();
            let mut message = queue.unacked.remove(&tag).ok_or_else(|| {
                Error::Other(format!("unknown delivery tag {} on {}", tag, channel))
            })?;

            if let Settlement::Rejected { requeue: true } = settlement {
                message.redelivered = true;
                queue.ready.push_back(message.clone());
            }
            message
        };

        self.settlements.lock().push(SettlementRecord {
            channel,
            message_id: message.message_id,
            settlement,
        });
        if let Settlement::Rejected { requeue: true } = settlement {
            self.notify.notify_waiters();
        }
        Ok(())
    }
}

/// In-memory broker for tests and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Enqueue a raw payload, bypassing serialization.
    pub fn push_raw(&self, channel: Channel, payload: Vec<u8>, message_id: Option<String>) {
        self.inner
            .queues
            .lock()
            .entry(channel)
            .or_default()
            .ready
            .push_back(StoredMessage {
                payload,
                message_id,
                redelivered: false,
            });
        self.inner.notify.notify_waiters();
    }

    /// Take the next ready delivery without waiting.
    pub fn try_next(&self, channel: Channel) -> Option<Delivery> {
        self.inner.take_ready(channel)
    }

    /// Every message successfully published, in order.
    pub fn published(&self) -> Vec<NotificationMessage> {
        self.inner.published.lock().clone()
    }

    pub fn settlements(&self) -> Vec<SettlementRecord> {
        self.inner.settlements.lock().clone()
    }

    pub fn ready_len(&self, channel: Channel) -> usize {
        self.inner
            .queues
            .lock()
            .get(&channel)
            .map_or(0, |q| q.ready.len())
    }

    pub fn unacked_len(&self, channel: Channel) -> usize {
        self.inner
            .queues
            .lock()
            .get(&channel)
            .map_or(0, |q| q.unacked.len())
    }

    /// End every open subscription stream.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, message: &NotificationMessage) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::unavailable("broker closed"));
        }
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::unavailable("broker rejected publish"));
        }

        let payload = message.to_bytes()?;
        self.inner
            .queues
            .lock()
            .entry(message.channel)
            .or_default()
            .ready
            .push_back(StoredMessage {
                payload,
                message_id: Some(message.id.clone()),
                redelivered: false,
            });
        self.inner.published.lock().push(message.clone());
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Subscriber for InMemoryBroker {
    async fn subscribe(&self, channel: Channel, _prefetch: u16) -> Result<DeliveryStream> {
        let inner = self.inner.clone();

        let stream = futures::stream::unfold(inner, move |inner| async move {
            loop {
                if let Some(delivery) = inner.take_ready(channel) {
                    return Some((Ok::<_, Error>(delivery), inner));
                }
                if inner.closed.load(Ordering::SeqCst) {
                    return None;
                }

                // Register, then re-check so a publish in between is not missed.
                let notified = inner.notify.notified();
                if inner.has_ready(channel) || inner.closed.load(Ordering::SeqCst) {
                    continue;
                }
                notified.await;
            }
        });

        Ok(Box::pin(stream))
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    channel: Channel,
    tag: u64,
    settled: AtomicBool,
}

impl MemoryAcker {
    fn settle_once(&self, settlement: Settlement) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(Error::Other(format!(
                "delivery tag {} already settled",
                self.tag
            )));
        }
        self.inner.settle(self.channel, self.tag, settlement)
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settle_once(Settlement::Acked)
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        self.settle_once(Settlement::Rejected { requeue })
    }
}
