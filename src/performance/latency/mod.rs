//! System-wide latency measurement
//!
//! Per-stage instrumentation for the ingestion -> analytics -> publish pipeline:
//! bus consume, dispatch, the three analyzers, normalize, publish, and the HTTP API.

use parking_lot::RwLock;
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    time::Instant,
};

pub mod histogram;
pub mod spans;

pub use histogram::*;
pub use spans::*;

/// System-wide latency registry. Thread-safe singleton collecting per-stage histograms.
#[derive(Debug)]
pub struct SystemLatencyRegistry {
    pub bus_consume: LatencyHistogram,
    pub dispatch: LatencyHistogram,
    pub depth_analyze: LatencyHistogram,
    pub level_track: LatencyHistogram,
    pub spread_strategy: LatencyHistogram,
    pub normalize: LatencyHistogram,
    pub publish: LatencyHistogram,
    pub http_api: LatencyHistogram,

    pub counters: RwLock<LatencyCounters>,
    pub recent_spans: RwLock<VecDeque<LatencySpan>>,
    max_recent_spans: usize,
    pub component_status: RwLock<HashMap<String, ComponentStatus>>,
    start: Instant,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct LatencyCounters {
    pub messages_consumed: u64,
    pub events_dispatched: u64,
    pub depth_snapshots_analyzed: u64,
    pub levels_tracked: u64,
    pub signals_generated: u64,
    pub orders_normalized: u64,
    pub orders_published: u64,
    pub api_requests: u64,
    pub api_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub healthy: bool,
    pub last_activity_ts: i64,
    pub error_count: u64,
}

impl Default for SystemLatencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemLatencyRegistry {
    pub fn new() -> Self {
        Self {
            bus_consume: LatencyHistogram::new(),
            dispatch: LatencyHistogram::new(),
            depth_analyze: LatencyHistogram::new(),
            level_track: LatencyHistogram::new(),
            spread_strategy: LatencyHistogram::new(),
            normalize: LatencyHistogram::new(),
            publish: LatencyHistogram::new(),
            http_api: LatencyHistogram::new(),
            counters: RwLock::new(LatencyCounters::default()),
            recent_spans: RwLock::new(VecDeque::with_capacity(1000)),
            max_recent_spans: 1000,
            component_status: RwLock::new(HashMap::new()),
            start: Instant::now(),
        }
    }

    /// Record a latency span and update the relevant histogram + counters.
    pub fn record_span(&self, span: LatencySpan) {
        match span.span_type {
            SpanType::BusConsume => {
                self.bus_consume.record(span.duration_us);
                self.counters.write().messages_consumed += 1;
            }
            SpanType::Dispatch => {
                self.dispatch.record(span.duration_us);
                self.counters.write().events_dispatched += 1;
            }
            SpanType::DepthAnalyze => {
                self.depth_analyze.record(span.duration_us);
                self.counters.write().depth_snapshots_analyzed += 1;
            }
            SpanType::LevelTrack => {
                self.level_track.record(span.duration_us);
                self.counters.write().levels_tracked += 1;
            }
            SpanType::SpreadStrategy => {
                self.spread_strategy.record(span.duration_us);
            }
            SpanType::Normalize => {
                self.normalize.record(span.duration_us);
                self.counters.write().orders_normalized += 1;
            }
            SpanType::Publish => {
                self.publish.record(span.duration_us);
                self.counters.write().orders_published += 1;
            }
            SpanType::HttpApi => {
                self.http_api.record(span.duration_us);
                self.counters.write().api_requests += 1;
            }
        }

        let mut spans = self.recent_spans.write();
        if spans.len() >= self.max_recent_spans {
            spans.pop_front();
        }
        spans.push_back(span);
    }

    pub fn update_component_status(&self, name: &str, healthy: bool, error_delta: u64) {
        let now = chrono::Utc::now().timestamp();
        let mut status = self.component_status.write();
        let entry = status.entry(name.to_string()).or_insert(ComponentStatus {
            name: name.to_string(),
            healthy: true,
            last_activity_ts: now,
            error_count: 0,
        });
        entry.healthy = healthy;
        entry.last_activity_ts = now;
        entry.error_count += error_delta;
    }

    pub fn record_api_error(&self) {
        self.counters.write().api_errors += 1;
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Snapshot of per-stage histogram summaries, suitable for the health/metrics surface.
    pub fn summary(&self) -> SystemLatencySummary {
        SystemLatencySummary {
            timestamp: chrono::Utc::now().timestamp(),
            uptime_seconds: self.uptime_seconds(),
            counters: self.counters.read().clone(),
            bus_consume: self.bus_consume.summary("bus_consume"),
            dispatch: self.dispatch.summary("dispatch"),
            depth_analyze: self.depth_analyze.summary("depth_analyze"),
            level_track: self.level_track.summary("level_track"),
            spread_strategy: self.spread_strategy.summary("spread_strategy"),
            normalize: self.normalize.summary("normalize"),
            publish: self.publish.summary("publish"),
            http_api: self.http_api.summary("http_api"),
            components: self.component_status.read().values().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemLatencySummary {
    pub timestamp: i64,
    pub uptime_seconds: f64,
    pub counters: LatencyCounters,
    pub bus_consume: HistogramSummary,
    pub dispatch: HistogramSummary,
    pub depth_analyze: HistogramSummary,
    pub level_track: HistogramSummary,
    pub spread_strategy: HistogramSummary,
    pub normalize: HistogramSummary,
    pub publish: HistogramSummary,
    pub http_api: HistogramSummary,
    pub components: Vec<ComponentStatus>,
}

/// Global latency registry
pub fn global_registry() -> &'static SystemLatencyRegistry {
    static REGISTRY: std::sync::OnceLock<SystemLatencyRegistry> = std::sync::OnceLock::new();
    REGISTRY.get_or_init(SystemLatencyRegistry::new)
}
