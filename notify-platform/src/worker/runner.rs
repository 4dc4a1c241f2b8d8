//! Channel worker: a bounded pool of delivery handlers fed by one queue.

use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::DeliveryHandler;
use super::state::Settlement;
use crate::broker::Subscriber;
use crate::domain::Channel;
use crate::{Error, Result};

/// Counters for settled deliveries.
#[derive(Debug, Default)]
struct Counters {
    acked: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of a worker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStats {
    pub acked: u64,
    pub requeued: u64,
    pub dropped: u64,
}

pub struct ChannelWorker {
    handler: Arc<DeliveryHandler>,
    subscriber: Arc<dyn Subscriber>,
    concurrency: usize,
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    counters: Arc<Counters>,
    cancellation_token: CancellationToken,
}

impl ChannelWorker {
    pub fn new(
        handler: Arc<DeliveryHandler>,
        subscriber: Arc<dyn Subscriber>,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            handler,
            subscriber,
            concurrency,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            active: Arc::new(AtomicUsize::new(0)),
            counters: Arc::new(Counters::default()),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn channel(&self) -> Channel {
        self.handler.channel()
    }

    /// Token that stops the consume loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Stop pulling new deliveries. In-flight handlers still finish.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            acked: self.counters.acked.load(Ordering::SeqCst),
            requeued: self.counters.requeued.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
        }
    }

    /// Consume the channel queue until stopped or the stream ends, then wait
    /// for in-flight handlers.
    pub async fn run(&self) -> Result<()> {
        let channel = self.channel();
        let prefetch = u16::try_from(self.concurrency).unwrap_or(u16::MAX);
        let mut deliveries = self.subscriber.subscribe(channel, prefetch).await?;

        info!(%channel, concurrency = self.concurrency, "Channel worker started");

        let mut tasks = JoinSet::new();
        let mut result = Ok(());

        loop {
            // A permit is taken before pulling so that no delivery sits
            // unsettled while waiting for capacity.
            let permit = tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!(%channel, error = %e, "Delivery stream failed");
                    result = Err(Error::unavailable(format!("consumer for {}: {}", channel, e)));
                    break;
                }
                None => {
                    warn!(%channel, "Delivery stream ended");
                    break;
                }
            };

            let handler = self.handler.clone();
            let active = self.active.clone();
            let counters = self.counters.clone();
            active.fetch_add(1, Ordering::SeqCst);

            tasks.spawn(async move {
                let _permit = permit;
                let report = handler.handle(&delivery).await;
                let counter = match report.settlement {
                    Settlement::Acked => &counters.acked,
                    Settlement::Requeued => &counters.requeued,
                    Settlement::Dropped => &counters.dropped,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                active.fetch_sub(1, Ordering::SeqCst);
                debug!(id = ?report.id, state = %report.state, settlement = %report.settlement, "Delivery settled");
            });

            // Reap finished tasks so the set does not grow unbounded.
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(%channel, error = %e, "Delivery task panicked");
                }
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(%channel, in_flight, "Waiting for in-flight deliveries");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(%channel, error = %e, "Delivery task panicked");
            }
        }

        info!(%channel, stats = ?self.stats(), "Channel worker stopped");
        result
    }
}
