//! Signal Consumer: drains `signals_queue`, fans each message out to the
//! Aggregator and, when sampled, the Durable Store, then invalidates the
//! tenant's read-cache key prefix (§4.1).
//!
//! Grounded on `original_source/control-plane/app/queue/consumer.py`'s
//! batch-drain loop. Redesigned per the REDESIGN FLAGS: the donor nacks a
//! message on *any* downstream failure, including a transient Aggregator
//! error, which can wedge `signals_queue` behind a message that will never
//! succeed. Here only a Durable Store failure triggers nack+requeue;
//! Aggregator recording is in-process and cannot itself fail in a way that
//! should block delivery, so a failure there is logged and the message is
//! still acked.
//!
//! The donor's step 3 (`invalidate_user_cache`, `app/redis/cache.py`) deletes
//! every Redis key under `user:{user_id}:*`; its only reader is the
//! dashboard server-push route (`app/router/sse.py`), an out-of-scope
//! collaborator here (§1). There is currently no writer of
//! `read_cache:{tenant_id}:*` either, so the prefix delete below is a no-op
//! in this tree today — but it runs the same scan-and-delete the donor does,
//! on the same condition (after a successful persist-or-skip, never after a
//! requeue), so a future read-cache writer only needs to pick the key
//! prefix, not add the invalidation call.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::durable_store::DurableStore;
use crate::fast_store::FastStore;
use crate::queue::Queue;

pub struct Consumer {
    queue: Arc<Queue>,
    fast_store: Arc<FastStore>,
    durable_store: Arc<DurableStore>,
    sampling_rate: f64,
}

impl Consumer {
    pub fn new(
        queue: Arc<Queue>,
        fast_store: Arc<FastStore>,
        durable_store: Arc<DurableStore>,
        sampling_rate: f64,
    ) -> Self {
        Self {
            queue,
            fast_store,
            durable_store,
            sampling_rate,
        }
    }

    /// Decide whether this signal should be durably persisted. Errors are
    /// always stored regardless of the sampling rate (§4.1 step 2); a
    /// `sampling_rate` of 1.0 (the default) stores everything.
    fn should_persist(&self, is_error: bool) -> bool {
        if is_error || self.sampling_rate >= 1.0 {
            return true;
        }
        rand::random::<f64>() < self.sampling_rate
    }

    /// Delete every Fast Store entry under the tenant's read-cache prefix
    /// (§4.1 step 4). Mirrors `invalidate_user_cache`'s scan-then-delete
    /// shape in the donor.
    fn invalidate_read_cache(&self, tenant_id: &str) {
        let prefix = format!("read_cache:{tenant_id}:");
        for key in self.fast_store.scan_prefix(&prefix) {
            self.fast_store.delete(&key);
        }
    }

    /// Drain and process one batch (up to `queue::PREFETCH` messages).
    /// Returns the number of messages processed.
    pub fn process_batch(&self) -> Result<usize> {
        let batch = self.queue.consume_batch()?;
        let processed = batch.len();
        let aggregator = Aggregator::new(&self.fast_store);

        for message in batch {
            let signal = &message.signal;
            aggregator.record(
                &signal.tenant_id,
                &signal.service_name,
                &signal.endpoint,
                signal.latency_ms,
                signal.status.is_error(),
                signal.customer_identifier.as_deref(),
            );

            if self.should_persist(signal.status.is_error()) {
                match self.durable_store.insert_signal(signal) {
                    Ok(_) => {
                        self.queue.ack(message.id)?;
                        self.invalidate_read_cache(&signal.tenant_id);
                    }
                    Err(err) => {
                        warn!(error = %err, signal_id = message.id, "durable persist failed, requeueing");
                        self.queue.nack(message.id)?;
                    }
                }
            } else {
                self.queue.ack(message.id)?;
                self.invalidate_read_cache(&signal.tenant_id);
            }
        }

        Ok(processed)
    }

    /// Background loop: drain whatever is visible every `poll_interval`,
    /// until `shutdown` fires (§5 cooperative shutdown). Mirrors the
    /// teacher's `tokio::spawn` + `tokio::time::interval` worker idiom (see
    /// `rollup`/`tuner`).
    pub async fn run(self: Arc<Self>, poll_interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.process_batch() {
                        Ok(0) => {}
                        Ok(n) => info!(count = n, "consumer processed batch"),
                        Err(err) => error!(error = %err, "consumer batch failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("consumer loop shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Signal, SignalStatus};

    fn build_consumer(sampling_rate: f64) -> Consumer {
        Consumer::new(
            Arc::new(Queue::in_memory().unwrap()),
            Arc::new(FastStore::new(1024)),
            Arc::new(DurableStore::in_memory().unwrap()),
            sampling_rate,
        )
    }

    #[test]
    fn success_signal_always_aggregated_and_persisted_at_full_sampling() {
        let consumer = build_consumer(1.0);
        let signal = Signal::new("t1", "svc", "/ep", SignalStatus::Success, 20.0);
        consumer.queue.publish(&signal).unwrap();

        let processed = consumer.process_batch().unwrap();
        assert_eq!(processed, 1);
        assert_eq!(consumer.queue.queue_depth().unwrap(), 0);

        let rows = consumer
            .durable_store
            .recent_signals("t1", "svc", "/ep", 10)
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn successful_persist_invalidates_tenant_read_cache_prefix_only() {
        let consumer = build_consumer(1.0);
        consumer
            .fast_store
            .record_window("read_cache:t1:services", 1.0, false, Duration::from_secs(60));
        consumer
            .fast_store
            .record_window("read_cache:other-tenant:services", 1.0, false, Duration::from_secs(60));

        let signal = Signal::new("t1", "svc", "/ep", SignalStatus::Success, 20.0);
        consumer.queue.publish(&signal).unwrap();
        consumer.process_batch().unwrap();

        assert!(consumer.fast_store.read_window("read_cache:t1:services").is_none());
        assert!(consumer
            .fast_store
            .read_window("read_cache:other-tenant:services")
            .is_some());
    }

    #[test]
    fn error_signal_always_persisted_even_at_zero_sampling() {
        let consumer = build_consumer(0.0);
        let signal = Signal::new("t1", "svc", "/ep", SignalStatus::Error, 500.0);
        consumer.queue.publish(&signal).unwrap();

        consumer.process_batch().unwrap();
        let rows = consumer
            .durable_store
            .recent_signals("t1", "svc", "/ep", 10)
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn zero_sampling_skips_persistence_of_success_signals_but_still_aggregates() {
        let consumer = build_consumer(0.0);
        let signal = Signal::new("t1", "svc", "/ep", SignalStatus::Success, 20.0);
        consumer.queue.publish(&signal).unwrap();

        consumer.process_batch().unwrap();
        let rows = consumer
            .durable_store
            .recent_signals("t1", "svc", "/ep", 10)
            .unwrap();
        assert!(rows.is_empty());

        let aggregator = Aggregator::new(&consumer.fast_store);
        let metrics = aggregator.read_metrics("t1", "svc", "/ep", None);
        assert_eq!(metrics.signal_count, 1);
    }
}
