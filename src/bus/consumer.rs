//! Bus consumer: subscribes to the inbound subject, decodes each frame, and
//! forwards typed events to the dispatcher. Reconnects with doubling-capped
//! backoff on transport loss, in the teacher's WebSocket-reconnect idiom.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::bus::envelope;
use crate::models::MarketEvent;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub messages_received: AtomicU64,
    pub parse_errors: AtomicU64,
    pub dropped_frames: AtomicU64,
    pub reconnects: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub messages_received: u64,
    pub parse_errors: u64,
    pub dropped_frames: u64,
    pub reconnects: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

pub struct BusConsumer {
    bus_url: String,
    subject: String,
    consumer_name: String,
    connect_timeout: Duration,
    running: Arc<AtomicBool>,
    pub stats: Arc<ConsumerStats>,
}

impl BusConsumer {
    pub fn new(bus_url: String, subject: String, consumer_name: String, connect_timeout: Duration) -> Self {
        Self {
            bus_url,
            subject,
            consumer_name,
            connect_timeout,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Connects, subscribes, and forwards decoded events to `out` until the
    /// running flag is cleared. Reconnects on transport loss with
    /// doubling-capped backoff.
    pub async fn run(self, out: mpsc::Sender<MarketEvent>) -> anyhow::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let mut backoff = INITIAL_BACKOFF;

        while self.running.load(Ordering::SeqCst) {
            match self.connect_and_consume(&out).await {
                Ok(()) => break,
                Err(e) => {
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "bus consumer disconnected, reconnecting"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        Ok(())
    }

    async fn connect_and_consume(&self, out: &mpsc::Sender<MarketEvent>) -> anyhow::Result<()> {
        let client = tokio::time::timeout(
            self.connect_timeout,
            async_nats::ConnectOptions::new()
                .name(&self.consumer_name)
                .connect(&self.bus_url),
        )
        .await??;

        let mut subscriber = client.subscribe(self.subject.clone()).await?;
        tracing::info!(subject = %self.subject, "bus consumer subscribed");

        while self.running.load(Ordering::SeqCst) {
            let Some(message) = subscriber.next().await else {
                anyhow::bail!("subscription stream ended");
            };

            self.stats.messages_received.fetch_add(1, Ordering::Relaxed);

            let span = tracing::info_span!(
                "process market data message",
                symbol = tracing::field::Empty,
                stream_kind = tracing::field::Empty,
            );

            async {
                match envelope::decode(&message.payload) {
                    Ok(event) => {
                        tracing::Span::current().record("symbol", event.symbol());
                        if out.try_send(event).is_err() {
                            self.stats.dropped_frames.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!("dispatcher inbox full, dropping frame");
                        }
                    }
                    Err(e) => {
                        self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(reason = %e, "malformed market data frame, dropping");
                    }
                }
            }
            .instrument(span)
            .await;
        }

        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
