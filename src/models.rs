//! Core data model shared across the ingestion, analytics, and publishing stages.

use serde::{Deserialize, Serialize};

use crate::error::AnalyticsError;

/// W3C trace context, propagated end to end under the `_otel_trace_context` envelope key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceContext {
    pub traceparent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub qty: f64,
}

/// A depth (order book) snapshot for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthEvent {
    pub symbol: String,
    pub event_time: i64,
    pub first_update_id: u64,
    pub last_update_id: u64,
    /// Descending by price.
    pub bids: Vec<PriceLevel>,
    /// Ascending by price.
    pub asks: Vec<PriceLevel>,
    #[serde(default)]
    pub trace: Option<TraceContext>,
}

impl DepthEvent {
    /// Ordering and strictly-positive-price validation per the depth
    /// analyzer's step 1: every price must be strictly positive, bids must be
    /// strictly descending, asks strictly ascending, and the book must not be
    /// crossed (best ask above best bid). Violations fail with "bad depth"
    /// rather than being silently computed into a corrupted metrics record.
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        for level in self.bids.iter().chain(self.asks.iter()) {
            if level.price <= 0.0 {
                return Err(AnalyticsError::BadDepth(format!(
                    "non-positive price {}",
                    level.price
                )));
            }
        }
        for pair in self.bids.windows(2) {
            if pair[1].price >= pair[0].price {
                return Err(AnalyticsError::BadDepth("bid levels not strictly descending".into()));
            }
        }
        for pair in self.asks.windows(2) {
            if pair[1].price <= pair[0].price {
                return Err(AnalyticsError::BadDepth("ask levels not strictly ascending".into()));
            }
        }
        if let (Some(bid), Some(ask)) = (self.bids.first(), self.asks.first()) {
            if ask.price <= bid.price {
                return Err(AnalyticsError::BadDepth(format!(
                    "crossed book: best_bid {} >= best_ask {}",
                    bid.price, ask.price
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub trade_id: u64,
    pub price: f64,
    pub qty: f64,
    pub is_maker: bool,
    pub event_time: i64,
    #[serde(default)]
    pub trace: Option<TraceContext>,
}

/// A typed event as classified and routed by the dispatcher.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Depth(DepthEvent),
    Trade(TradeEvent),
    /// Ticker stream is classified for routing but has no analyzer consumer;
    /// counted and dropped.
    Ticker { symbol: String },
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Depth(d) => &d.symbol,
            MarketEvent::Trade(t) => &t.symbol,
            MarketEvent::Ticker { symbol } => symbol,
        }
    }
}

/// A single price level, the strongest (largest qty) on its side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrongestLevel {
    pub price: f64,
    pub qty: f64,
}

/// Comprehensive per-symbol depth metrics, produced once per depth snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthMetrics {
    pub symbol: String,
    pub timestamp: i64,

    pub bid_volume: f64,
    pub ask_volume: f64,
    pub total_volume: f64,

    pub imbalance_ratio: f64,
    pub imbalance_percent: f64,

    pub buy_pressure: f64,
    pub sell_pressure: f64,
    pub net_pressure: f64,

    pub bid_depth_5: f64,
    pub bid_depth_10: f64,
    pub ask_depth_5: f64,
    pub ask_depth_10: f64,

    pub best_bid: f64,
    pub best_ask: f64,
    pub spread_abs: f64,
    pub spread_bps: f64,
    pub mid_price: f64,

    pub bid_vwap: f64,
    pub ask_vwap: f64,

    pub bid_level_count: usize,
    pub ask_level_count: usize,

    pub strongest_bid: Option<StrongestLevel>,
    pub strongest_ask: Option<StrongestLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendClassification {
    pub trend: Trend,
    pub strength: f64,
}

/// A single point of the pressure/imbalance history, as served over HTTP.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PressurePointView {
    pub timestamp: i64,
    pub net_pressure: f64,
    pub imbalance_ratio: f64,
}

/// `GET /metrics/pressure/{symbol}` response body: a timeframe-trimmed
/// history plus summary statistics and the recent-10-point trend.
#[derive(Debug, Clone, Serialize)]
pub struct PressureHistoryResponse {
    pub symbol: String,
    pub points: Vec<PressurePointView>,
    pub mean_net_pressure: f64,
    pub max_net_pressure: f64,
    pub min_net_pressure: f64,
    pub trend: Trend,
    pub trend_strength: f64,
}

/// Aggregate counts/means across all tracked symbols.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSummary {
    pub bullish_count: usize,
    pub bearish_count: usize,
    pub neutral_count: usize,
    pub mean_net_pressure: f64,
    pub mean_imbalance: f64,
    pub mean_spread_bps: f64,
    pub total_liquidity: f64,
    pub top_buy_pressure: Vec<(String, f64)>,
    pub top_sell_pressure: Vec<(String, f64)>,
}

/// Spread metrics for a single depth snapshot. Constructing one enforces
/// `best_ask > best_bid > 0` — callers get `None` instead of a bogus record.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SpreadMetrics {
    pub timestamp: i64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid: f64,
    pub spread_abs: f64,
    pub spread_bps: f64,
    pub spread_pct: f64,
    pub top5_bid_volume: f64,
    pub top5_ask_volume: f64,
    pub total_depth: f64,
}

impl SpreadMetrics {
    pub fn new(
        timestamp: i64,
        best_bid: f64,
        best_ask: f64,
        top5_bid_volume: f64,
        top5_ask_volume: f64,
        total_depth: f64,
    ) -> Option<Self> {
        if !(best_ask > best_bid && best_bid > 0.0) {
            return None;
        }
        let mid = (best_bid + best_ask) / 2.0;
        let spread_abs = best_ask - best_bid;
        let spread_bps = 10_000.0 * spread_abs / mid;
        let spread_pct = 100.0 * spread_abs / mid;
        Some(Self {
            timestamp,
            best_bid,
            best_ask,
            mid,
            spread_abs,
            spread_bps,
            spread_pct,
            top5_bid_volume,
            top5_ask_volume,
            total_depth,
        })
    }
}

/// Derived comparative snapshot against the rolling spread history.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SpreadSnapshot {
    pub spread_ratio: f64,
    pub spread_velocity: f64,
    pub depth_reduction_pct: f64,
    pub is_widening: bool,
    pub is_narrowing: bool,
    pub is_abnormal: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct WideSpreadEvent {
    pub start_time: i64,
    pub initial_spread_bps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy)]
pub struct LevelSnapshotPoint {
    pub qty: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Bid,
    Ask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IcebergKind {
    Refill,
    ConsistentSize,
    Anchor,
}

#[derive(Debug, Clone, Serialize)]
pub struct IcebergPattern {
    pub symbol: String,
    pub price: f64,
    pub side: Side,
    pub refill_count: u32,
    pub avg_refill_speed_seconds: f64,
    pub consistency_score: f64,
    pub persistence_seconds: f64,
    pub confidence: f64,
    pub kind: IcebergKind,
    pub detected_at: i64,
}

/// A trade signal emitted by a strategy, destined for the normalizer.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: String,
    pub action: Action,
    pub confidence: f64,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub indicators: std::collections::HashMap<String, f64>,
    pub metadata: std::collections::HashMap<String, String>,
    pub generated_at: i64,
    pub trace: Option<TraceContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionType {
    Long,
    Short,
}

/// A downstream order envelope, produced by the normalizer and published once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub position_type: PositionType,
    pub source_strategy_id: String,
    pub source_signal_id: String,
    pub confidence: f64,
    #[serde(rename = "_otel_trace_context", skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_metrics_rejects_crossed_book() {
        assert!(SpreadMetrics::new(0, 100.0, 99.0, 1.0, 1.0, 2.0).is_none());
        assert!(SpreadMetrics::new(0, 0.0, 100.0, 1.0, 1.0, 2.0).is_none());
        assert!(SpreadMetrics::new(0, 100.0, 100.5, 1.0, 1.0, 2.0).is_some());
    }

    #[test]
    fn trade_order_round_trips_through_json() {
        let order = TradeOrder {
            order_id: "abc".into(),
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: 0.0,
            position_type: PositionType::Long,
            source_strategy_id: "spread_liquidity".into(),
            source_signal_id: "sig-1".into(),
            confidence: 0.8,
            trace: Some(TraceContext {
                traceparent: Some("00-trace-span-01".into()),
            }),
        };
        let json = serde_json::to_string(&order).unwrap();
        let back: TradeOrder = serde_json::from_str(&json).unwrap();
        assert_eq!(back.order_id, order.order_id);
        assert_eq!(back.symbol, order.symbol);
        assert_eq!(back.side, order.side);
    }
}
