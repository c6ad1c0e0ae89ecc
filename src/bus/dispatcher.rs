//! Event dispatcher: hash-partitions symbols across a fixed worker pool.
//! Each worker owns its analytic state outright (single-writer per symbol,
//! no locking needed inside a worker's pipeline) and publishes generated
//! signals onward to the normalizer/publisher stage.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::analytics::AnalyticsPipeline;
use crate::bus::publisher::Publisher;
use crate::config::Config;
use crate::error::AnalyticsError;
use crate::models::MarketEvent;
use crate::normalizer;
use crate::performance::queues::{global_queue_registry, QueueWaitGuard};

struct Worker {
    pipeline: Arc<AnalyticsPipeline>,
    sender: mpsc::Sender<MarketEvent>,
}

pub struct Dispatcher {
    workers: Vec<Worker>,
    backpressure_deadline: Duration,
    overflow_count: AtomicU64,
    trades_observed: AtomicU64,
    tickers_observed: AtomicU64,
}

impl Dispatcher {
    /// Builds the worker pool and spawns each worker's processing loop.
    /// Returns the dispatcher (for routing) plus the join handles.
    pub fn spawn(cfg: &Config, publisher: Arc<Publisher>) -> (Arc<Self>, Vec<tokio::task::JoinHandle<()>>) {
        let mut workers = Vec::with_capacity(cfg.worker_pool_size);
        let mut handles = Vec::with_capacity(cfg.worker_pool_size);
        let registry = global_queue_registry();

        for idx in 0..cfg.worker_pool_size {
            let (tx, rx) = mpsc::channel(cfg.worker_inbox_capacity);
            let queue_name = format!("dispatcher.worker.{idx}");
            registry.register(&queue_name, cfg.worker_inbox_capacity);

            let pipeline = Arc::new(AnalyticsPipeline::new(cfg));
            workers.push(Worker {
                pipeline: pipeline.clone(),
                sender: tx,
            });

            let publisher = publisher.clone();
            let queue_name_owned = queue_name.clone();
            handles.push(tokio::spawn(worker_loop(
                idx,
                rx,
                pipeline,
                publisher,
                queue_name_owned,
            )));
        }

        (
            Arc::new(Self {
                workers,
                backpressure_deadline: cfg.worker_backpressure_deadline,
                overflow_count: AtomicU64::new(0),
                trades_observed: AtomicU64::new(0),
                tickers_observed: AtomicU64::new(0),
            }),
            handles,
        )
    }

    fn worker_index(&self, symbol: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        (hasher.finish() as usize) % self.workers.len()
    }

    /// Routes an event to its symbol's worker. Blocks up to the configured
    /// backpressure deadline if the worker inbox is full, then drops with a
    /// counter increment — drops for one symbol never starve others since
    /// each worker has an independent inbox.
    pub async fn dispatch(&self, event: MarketEvent) -> Result<(), AnalyticsError> {
        match &event {
            MarketEvent::Trade(_) => {
                self.trades_observed.fetch_add(1, Ordering::Relaxed);
            }
            MarketEvent::Ticker { .. } => {
                self.tickers_observed.fetch_add(1, Ordering::Relaxed);
            }
            MarketEvent::Depth(_) => {}
        }

        let symbol = event.symbol().to_string();
        let worker = &self.workers[self.worker_index(&symbol)];
        let queue_name = format!("dispatcher.worker.{}", self.worker_index(&symbol));

        let wait_guard = QueueWaitGuard::enqueue(queue_name);
        let result = tokio::time::timeout(self.backpressure_deadline, worker.sender.send(event)).await;
        wait_guard.finish(worker.sender.max_capacity() - worker.sender.capacity());

        match result {
            Ok(Ok(())) => Ok(()),
            _ => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(symbol = %symbol, "worker inbox full, dropping event");
                Err(AnalyticsError::QueueOverflow { symbol })
            }
        }
    }

    pub fn pipeline_for(&self, symbol: &str) -> &AnalyticsPipeline {
        &self.workers[self.worker_index(symbol)].pipeline
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &AnalyticsPipeline> {
        self.workers.iter().map(|w| w.pipeline.as_ref())
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn trades_observed(&self) -> u64 {
        self.trades_observed.load(Ordering::Relaxed)
    }

    pub fn tickers_observed(&self) -> u64 {
        self.tickers_observed.load(Ordering::Relaxed)
    }

    /// Depth metrics for every symbol, merged across every worker's
    /// independent `current[S]` map. The HTTP surface is the only caller
    /// that needs a cross-worker view; analyzers themselves stay single-writer.
    pub fn all_depth_metrics(&self) -> Vec<crate::models::DepthMetrics> {
        self.pipelines()
            .flat_map(|p| p.depth_analyzer.all_metrics().into_values())
            .collect()
    }

    /// Combines each worker's local [`MarketSummary`] into one process-wide
    /// view. Workers never share symbols, so counts and liquidity sum
    /// directly; the cross-symbol means are re-weighted by each worker's
    /// symbol count, and the top-K buy/sell lists are merged and re-truncated.
    pub fn market_summary(&self) -> Option<crate::models::MarketSummary> {
        let per_worker: Vec<(crate::models::MarketSummary, usize)> = self
            .pipelines()
            .filter_map(|p| {
                let summary = p.depth_analyzer.market_summary()?;
                let n = summary.bullish_count + summary.bearish_count + summary.neutral_count;
                Some((summary, n))
            })
            .collect();

        if per_worker.is_empty() {
            return None;
        }

        let total_symbols: usize = per_worker.iter().map(|(_, n)| *n).sum();
        let total_symbols_f = total_symbols as f64;

        let mut bullish = 0;
        let mut bearish = 0;
        let mut neutral = 0;
        let mut mean_pressure = 0.0;
        let mut mean_imbalance = 0.0;
        let mut mean_spread = 0.0;
        let mut total_liquidity = 0.0;
        let mut top_buy = Vec::new();
        let mut top_sell = Vec::new();

        for (summary, n) in &per_worker {
            bullish += summary.bullish_count;
            bearish += summary.bearish_count;
            neutral += summary.neutral_count;
            total_liquidity += summary.total_liquidity;
            let weight = *n as f64 / total_symbols_f;
            mean_pressure += summary.mean_net_pressure * weight;
            mean_imbalance += summary.mean_imbalance * weight;
            mean_spread += summary.mean_spread_bps * weight;
            top_buy.extend(summary.top_buy_pressure.iter().cloned());
            top_sell.extend(summary.top_sell_pressure.iter().cloned());
        }

        top_buy.sort_by(|a, b| b.1.total_cmp(&a.1));
        top_buy.truncate(5);
        top_sell.sort_by(|a, b| b.1.total_cmp(&a.1));
        top_sell.truncate(5);

        Some(crate::models::MarketSummary {
            bullish_count: bullish,
            bearish_count: bearish,
            neutral_count: neutral,
            mean_net_pressure: mean_pressure,
            mean_imbalance,
            mean_spread_bps: mean_spread,
            total_liquidity,
            top_buy_pressure: top_buy,
            top_sell_pressure: top_sell,
        })
    }
}

async fn worker_loop(
    idx: usize,
    mut rx: mpsc::Receiver<MarketEvent>,
    pipeline: Arc<AnalyticsPipeline>,
    publisher: Arc<Publisher>,
    queue_name: String,
) {
    tracing::info!(worker = idx, "dispatcher worker started");

    while let Some(event) = rx.recv().await {
        let wait_guard = QueueWaitGuard::dequeue(queue_name.clone());
        wait_guard.finish(rx.len());

        let MarketEvent::Depth(depth) = event else {
            continue;
        };

        if depth.bids.is_empty() || depth.asks.is_empty() {
            tracing::debug!(symbol = %depth.symbol, "skipping depth snapshot with empty side");
            continue;
        }

        let trace = depth.trace.clone();
        let outcome = match pipeline.process(&depth) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(symbol = %depth.symbol, error = %e, "skipping invalid depth snapshot");
                continue;
            }
        };

        if !outcome.icebergs.is_empty() {
            tracing::debug!(
                symbol = %depth.symbol,
                count = outcome.icebergs.len(),
                "iceberg pattern(s) detected"
            );
        }

        if let Some(signal) = outcome.signal {
            let order = normalizer::normalize(signal, trace);
            if let Err(e) = publisher.enqueue(order) {
                tracing::warn!(error = %e, "failed to enqueue normalized order");
            }
        }
    }

    tracing::info!(worker = idx, "dispatcher worker stopped");
}
