//! Read-only metrics HTTP surface (§6).
//!
//! A thin `axum` layer over the dispatcher's per-worker analyzer state.
//! Handlers never mutate analyzer state — they only read the snapshots each
//! worker already publishes, per §5's "read-only surfaces must consult a
//! concurrency-safe snapshot view".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::analytics::Timeframe;
use crate::bus::dispatcher::Dispatcher;
use crate::bus::publisher::Publisher;
use crate::models::{DepthMetrics, MarketSummary, PressureHistoryResponse, Trend};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub publisher: Arc<Publisher>,
    /// Flipped once the consumer/dispatcher tasks are spawned; before that,
    /// every handler fails fast with 503 per §6 ("not-yet-initialized
    /// analyzer ⇒ HTTP 503") instead of racing against start-up.
    pub ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, publisher: Arc<Publisher>) -> Self {
        Self {
            dispatcher,
            publisher,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    fn check_ready(&self) -> Result<(), StatusCode> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics/depth/:symbol", get(get_depth))
        .route("/metrics/pressure/:symbol", get(get_pressure))
        .route("/metrics/summary", get(get_summary))
        .route("/metrics/all", get(get_all))
        .route("/healthz", get(get_health))
        .with_state(state)
}

/// Tagged so "no current metrics yet" renders as an explanatory payload
/// rather than an empty 200 body, per §7's "returns empty/explanatory
/// payloads for unknown or stale symbols rather than 5xx".
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum DepthMetricsResponse {
    Tracked(DepthMetrics),
    NotTracked { symbol: String },
}

async fn get_depth(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<DepthMetricsResponse>, StatusCode> {
    state.check_ready()?;
    let symbol = symbol.to_uppercase();
    let pipeline = state.dispatcher.pipeline_for(&symbol);
    let body = match pipeline.depth_analyzer.current_metrics(&symbol) {
        Some(m) => DepthMetricsResponse::Tracked(m),
        None => DepthMetricsResponse::NotTracked { symbol },
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct PressureQuery {
    timeframe: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum PressureResponse {
    Tracked(PressureHistoryResponse),
    NotTracked { symbol: String },
}

async fn get_pressure(
    Path(symbol): Path<String>,
    Query(params): Query<PressureQuery>,
    State(state): State<AppState>,
) -> Result<Json<PressureResponse>, StatusCode> {
    state.check_ready()?;
    let timeframe = Timeframe::parse(params.timeframe.as_deref().unwrap_or("1m"))
        .ok_or(StatusCode::BAD_REQUEST)?;

    let symbol = symbol.to_uppercase();
    let pipeline = state.dispatcher.pipeline_for(&symbol);
    let body = match pipeline.depth_analyzer.pressure_history(&symbol, timeframe) {
        Some(h) => PressureResponse::Tracked(h),
        None => PressureResponse::NotTracked { symbol },
    };
    Ok(Json(body))
}

async fn get_summary(State(state): State<AppState>) -> Result<Json<MarketSummary>, StatusCode> {
    state.check_ready()?;
    Ok(Json(state.dispatcher.market_summary().unwrap_or(MarketSummary {
        bullish_count: 0,
        bearish_count: 0,
        neutral_count: 0,
        mean_net_pressure: 0.0,
        mean_imbalance: 0.0,
        mean_spread_bps: 0.0,
        total_liquidity: 0.0,
        top_buy_pressure: Vec::new(),
        top_sell_pressure: Vec::new(),
    })))
}

#[derive(Debug, Deserialize)]
struct AllQuery {
    symbols: Option<String>,
    min_pressure: Option<f64>,
    max_pressure: Option<f64>,
    trend: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    sort_by: Option<String>,
    sort_order: Option<String>,
}

#[derive(Debug, Serialize)]
struct AllMetricsResponse {
    total: usize,
    returned: usize,
    offset: usize,
    limit: usize,
    symbols: Vec<DepthMetrics>,
}

fn trend_matches(filter: &str, net_pressure: f64) -> bool {
    let trend = if net_pressure > 20.0 {
        Trend::Bullish
    } else if net_pressure < -20.0 {
        Trend::Bearish
    } else {
        Trend::Neutral
    };
    match filter {
        "bullish" => trend == Trend::Bullish,
        "bearish" => trend == Trend::Bearish,
        "neutral" => trend == Trend::Neutral,
        _ => true,
    }
}

async fn get_all(
    Query(params): Query<AllQuery>,
    State(state): State<AppState>,
) -> Result<Json<AllMetricsResponse>, StatusCode> {
    state.check_ready()?;

    let mut metrics = state.dispatcher.all_depth_metrics();

    if let Some(symbols) = &params.symbols {
        let wanted: std::collections::HashSet<String> =
            symbols.split(',').map(|s| s.trim().to_uppercase()).collect();
        metrics.retain(|m| wanted.contains(&m.symbol));
    }
    if let Some(min) = params.min_pressure {
        metrics.retain(|m| m.net_pressure >= min);
    }
    if let Some(max) = params.max_pressure {
        metrics.retain(|m| m.net_pressure <= max);
    }
    if let Some(trend) = &params.trend {
        metrics.retain(|m| trend_matches(trend, m.net_pressure));
    }

    let sort_by = params.sort_by.as_deref().unwrap_or("symbol");
    let descending = matches!(params.sort_order.as_deref(), Some("desc"));
    metrics.sort_by(|a, b| {
        let ord = match sort_by {
            "pressure" => a.net_pressure.total_cmp(&b.net_pressure),
            "imbalance" => a.imbalance_ratio.total_cmp(&b.imbalance_ratio),
            "liquidity" => a.total_volume.total_cmp(&b.total_volume),
            _ => a.symbol.cmp(&b.symbol),
        };
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });

    let total = metrics.len();
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).min(total);
    let page: Vec<DepthMetrics> = metrics.into_iter().skip(offset).take(limit).collect();

    Ok(Json(AllMetricsResponse {
        total,
        returned: page.len(),
        offset,
        limit,
        symbols: page,
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    ready: bool,
    circuit_breaker_state: crate::circuit_breaker::CircuitState,
    publisher_queue_utilization_pct: Option<f64>,
    worker_overflow_count: u64,
}

async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ready = state.ready.load(Ordering::SeqCst);
    let metrics = state.publisher.metrics();
    let queue_utilization = crate::performance::queues::global_queue_registry()
        .get("publisher.outbound")
        .map(|q| q.utilization_pct);

    Json(HealthResponse {
        status: if ready { "ok" } else { "starting" },
        ready,
        circuit_breaker_state: metrics.circuit_breaker.state,
        publisher_queue_utilization_pct: queue_utilization,
        worker_overflow_count: state.dispatcher.overflow_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let cfg = crate::config::Config {
            inbound_bus_url: "nats://127.0.0.1:4222".into(),
            inbound_subject: "market.depth".into(),
            outbound_bus_url: "nats://127.0.0.1:4222".into(),
            outbound_subject: "trade.orders".into(),
            consumer_name: "depth-signals-test".into(),
            http_bind_addr: "0.0.0.0:0".into(),
            worker_pool_size: 2,
            worker_inbox_capacity: 16,
            worker_backpressure_deadline: std::time::Duration::from_millis(50),
            metrics_ttl: std::time::Duration::from_secs(300),
            level_history_cap: 100,
            level_history_window: std::time::Duration::from_secs(300),
            refill_speed_threshold: std::time::Duration::from_secs(5),
            min_refill_count: 3,
            consistency_threshold: 0.1,
            lookback_ticks: 20,
            spread_threshold_bps: 10.0,
            spread_ratio_threshold: 2.5,
            velocity_threshold: 0.5,
            persistence_threshold: std::time::Duration::from_secs(30),
            min_depth_reduction_pct: 0.5,
            base_confidence: 0.70,
            min_signal_interval: std::time::Duration::from_secs(60),
            circuit_failure_threshold: 5,
            circuit_recovery_timeout: std::time::Duration::from_secs(60),
            publisher_queue_capacity: 100,
            publisher_batch_size: 10,
            publisher_batch_timeout: std::time::Duration::from_millis(100),
            shutdown_drain_deadline: std::time::Duration::from_secs(5),
            bus_connect_timeout: std::time::Duration::from_secs(10),
        };
        let (publisher, _rx, _) = Publisher::new(
            cfg.outbound_bus_url.clone(),
            cfg.outbound_subject.clone(),
            cfg.publisher_queue_capacity,
            cfg.publisher_batch_size,
            cfg.publisher_batch_timeout,
            cfg.circuit_failure_threshold,
            cfg.circuit_recovery_timeout,
        );
        let (dispatcher, _handles) = Dispatcher::spawn(&cfg, publisher.clone());
        AppState::new(dispatcher, publisher)
    }

    #[tokio::test]
    async fn unready_state_returns_503() {
        let state = test_state();
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics/summary")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn invalid_timeframe_returns_400() {
        let state = test_state();
        state.mark_ready();
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics/pressure/BTCUSDT?timeframe=3h")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn not_tracked_symbol_is_200_not_5xx() {
        let state = test_state();
        state.mark_ready();
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics/depth/NOSUCHSYMBOL")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn healthz_reports_ready_flag() {
        let state = test_state();
        let app = router(state.clone());
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
