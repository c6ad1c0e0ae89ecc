//! Outbound publisher: batches normalized trade orders and publishes them to
//! the outbound bus subject, wrapped in a circuit breaker for fault isolation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerMetrics};
use crate::error::AnalyticsError;
use crate::models::TradeOrder;
use crate::performance::queues::{global_queue_registry, QueueWaitGuard};

const QUEUE_NAME: &str = "publisher.outbound";
const LATENCY_SAMPLES_CAP: usize = 1000;

pub struct Publisher {
    subject: String,
    sender: mpsc::Sender<TradeOrder>,
    circuit_breaker: Arc<CircuitBreaker>,
    batch_size: usize,
    batch_timeout: Duration,

    published_count: AtomicU64,
    error_count: AtomicU64,
    last_publish_time: Mutex<Option<i64>>,
    publish_latencies_us: Mutex<VecDeque<u64>>,
    running: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublisherMetrics {
    pub published_count: u64,
    pub error_count: u64,
    pub last_publish_time: Option<i64>,
    pub min_publish_latency_us: Option<u64>,
    pub avg_publish_latency_us: Option<f64>,
    pub max_publish_latency_us: Option<u64>,
    pub circuit_breaker: CircuitBreakerMetrics,
}

impl Publisher {
    pub fn new(
        bus_url: String,
        subject: String,
        queue_capacity: usize,
        batch_size: usize,
        batch_timeout: Duration,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<TradeOrder>, String) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        global_queue_registry().register(QUEUE_NAME, queue_capacity);

        let publisher = Arc::new(Self {
            subject,
            sender: tx,
            circuit_breaker: Arc::new(CircuitBreaker::new(failure_threshold, recovery_timeout)),
            batch_size,
            batch_timeout,
            published_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_publish_time: Mutex::new(None),
            publish_latencies_us: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLES_CAP)),
            running: Arc::new(AtomicBool::new(true)),
        });

        (publisher, rx, bus_url)
    }

    /// Non-blocking submit; fails immediately if the queue is at capacity
    /// instead of silently dropping.
    pub fn enqueue(&self, order: TradeOrder) -> Result<(), AnalyticsError> {
        let wait_guard = QueueWaitGuard::enqueue(QUEUE_NAME);
        let result = self.sender.try_send(order);
        wait_guard.finish(self.sender.max_capacity() - self.sender.capacity());
        result.map_err(|_| AnalyticsError::PublisherQueueFull)
    }

    /// Immediate publish without batching, still fault-isolated by the breaker.
    pub async fn publish_sync(&self, client: &async_nats::Client, order: &TradeOrder) -> Result<(), AnalyticsError> {
        self.publish_one(client, order).await
    }

    async fn publish_one(&self, client: &async_nats::Client, order: &TradeOrder) -> Result<(), AnalyticsError> {
        let payload = serde_json::to_vec(order)
            .map_err(|e| AnalyticsError::Transport(format!("serialize order: {e}")))?;
        let subject = self.subject.clone();

        let result = self
            .circuit_breaker
            .call(|| async {
                client
                    .publish(subject, payload.into())
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(Some(e)) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                Err(AnalyticsError::Transport(e))
            }
            Err(None) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                Err(AnalyticsError::CircuitOpen)
            }
        }
    }

    fn record_publish(&self, count: usize, latency_us: u64) {
        self.published_count.fetch_add(count as u64, Ordering::Relaxed);
        *self.last_publish_time.lock() = Some(chrono::Utc::now().timestamp());

        let mut samples = self.publish_latencies_us.lock();
        if samples.len() >= LATENCY_SAMPLES_CAP {
            samples.pop_front();
        }
        samples.push_back(latency_us);
    }

    pub fn metrics(&self) -> PublisherMetrics {
        let samples = self.publish_latencies_us.lock();
        let (min, avg, max) = if samples.is_empty() {
            (None, None, None)
        } else {
            let min = samples.iter().min().copied();
            let max = samples.iter().max().copied();
            let avg = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
            (min, Some(avg), max)
        };

        PublisherMetrics {
            published_count: self.published_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_publish_time: *self.last_publish_time.lock(),
            min_publish_latency_us: min,
            avg_publish_latency_us: avg,
            max_publish_latency_us: max,
            circuit_breaker: self.circuit_breaker.metrics(),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}

/// Batching loop: accumulate up to `batch_size` orders or until
/// `batch_timeout` elapses, whichever first, then publish each message
/// individually to the bus in insertion order.
pub async fn run_publishing_loop(
    publisher: Arc<Publisher>,
    mut rx: mpsc::Receiver<TradeOrder>,
    client: async_nats::Client,
    shutdown_drain_deadline: Duration,
) {
    tracing::info!(
        batch_size = publisher.batch_size,
        batch_timeout_ms = publisher.batch_timeout.as_millis() as u64,
        "publishing loop started"
    );

    while publisher.running.load(Ordering::SeqCst) {
        let deadline = Instant::now() + publisher.batch_timeout;
        let mut batch = Vec::with_capacity(publisher.batch_size);

        while batch.len() < publisher.batch_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(order)) => batch.push(order),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        if batch.is_empty() {
            continue;
        }

        let start = Instant::now();
        let mut ok = 0usize;
        for order in &batch {
            match publisher.publish_one(&client, order).await {
                Ok(()) => ok += 1,
                Err(e) => tracing::warn!(error = %e, order_id = %order.order_id, "failed to publish order"),
            }
        }
        let latency_us = start.elapsed().as_micros() as u64;
        if ok > 0 {
            publisher.record_publish(ok, latency_us);
        }
        tracing::info!(published = ok, batch_size = batch.len(), latency_us, "published order batch");
    }

    drain_remaining(&publisher, &mut rx, &client, shutdown_drain_deadline).await;
    tracing::info!("publishing loop stopped");
}

async fn drain_remaining(
    publisher: &Arc<Publisher>,
    rx: &mut mpsc::Receiver<TradeOrder>,
    client: &async_nats::Client,
    deadline: Duration,
) {
    let drain_until = Instant::now() + deadline;
    while Instant::now() < drain_until {
        match rx.try_recv() {
            Ok(order) => {
                if let Err(e) = publisher.publish_one(client, &order).await {
                    tracing::warn!(error = %e, "failed to publish order during shutdown drain");
                }
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_publish_caps_latency_samples() {
        let (publisher, _rx, _) = Publisher::new(
            "nats://127.0.0.1:4222".into(),
            "trade.orders".into(),
            10,
            5,
            Duration::from_millis(100),
            5,
            Duration::from_secs(60),
        );
        for i in 0..(LATENCY_SAMPLES_CAP + 10) {
            publisher.record_publish(1, i as u64);
        }
        assert_eq!(publisher.publish_latencies_us.lock().len(), LATENCY_SAMPLES_CAP);
    }
}
