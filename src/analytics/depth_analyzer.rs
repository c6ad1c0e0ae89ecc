//! Per-symbol order book depth analysis: imbalance, pressure, spread, VWAP.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::error::AnalyticsError;
use crate::models::{
    DepthEvent, DepthMetrics, MarketSummary, PressureHistoryResponse, PressurePointView,
    PriceLevel, StrongestLevel, Trend, TrendClassification,
};

const PRESSURE_HISTORY_CAP: usize = 900;

/// Timeframe windows for `[DepthAnalyzer::pressure_history]`, point counts per §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
}

impl Timeframe {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::OneMinute),
            "5m" => Some(Self::FiveMinutes),
            "15m" => Some(Self::FifteenMinutes),
            _ => None,
        }
    }

    fn points(self) -> usize {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
        }
    }
}

struct PressurePoint {
    timestamp: i64,
    net_pressure: f64,
    imbalance_ratio: f64,
}

/// Real-time metric calculation plus a 15-minute rolling pressure history per symbol.
pub struct DepthAnalyzer {
    metrics_ttl_secs: i64,
    current: RwLock<HashMap<String, DepthMetrics>>,
    pressure_history: RwLock<HashMap<String, VecDeque<PressurePoint>>>,
    last_update: RwLock<HashMap<String, i64>>,
}

impl DepthAnalyzer {
    pub fn new(metrics_ttl_secs: i64) -> Self {
        Self {
            metrics_ttl_secs,
            current: RwLock::new(HashMap::new()),
            pressure_history: RwLock::new(HashMap::new()),
            last_update: RwLock::new(HashMap::new()),
        }
    }

    /// Computes and stores the metrics record for `event`. Validates ordering
    /// and strictly positive prices first (§4.3 step 1); on violation, no
    /// state is mutated and `AnalyticsError::BadDepth` is returned instead of
    /// a corrupted record (e.g. a crossed book producing negative spread).
    pub fn analyze(&self, event: &DepthEvent) -> Result<DepthMetrics, AnalyticsError> {
        event.validate()?;

        let bid_volume: f64 = event.bids.iter().map(|l| l.qty).sum();
        let ask_volume: f64 = event.asks.iter().map(|l| l.qty).sum();
        let total_volume = bid_volume + ask_volume;

        let (imbalance_ratio, imbalance_percent) = if total_volume > 0.0 {
            let r = (bid_volume - ask_volume) / total_volume;
            (r, r * 100.0)
        } else {
            (0.0, 0.0)
        };

        let denom = if total_volume > 0.0 { total_volume } else { 1.0 };
        let buy_pressure = (bid_volume / denom) * 100.0;
        let sell_pressure = (ask_volume / denom) * 100.0;
        let net_pressure = buy_pressure - sell_pressure;

        let bid_depth_5 = depth_n(&event.bids, 5, bid_volume);
        let ask_depth_5 = depth_n(&event.asks, 5, ask_volume);
        let bid_depth_10 = depth_n(&event.bids, 10, bid_volume);
        let ask_depth_10 = depth_n(&event.asks, 10, ask_volume);

        let best_bid = event.bids.first().map(|l| l.price).unwrap_or(0.0);
        let best_ask = event.asks.first().map(|l| l.price).unwrap_or(0.0);
        let (spread_abs, mid_price, spread_bps) = if best_bid > 0.0 && best_ask > 0.0 {
            let spread_abs = best_ask - best_bid;
            let mid = (best_bid + best_ask) / 2.0;
            let bps = if mid > 0.0 {
                spread_abs / mid * 10_000.0
            } else {
                0.0
            };
            (spread_abs, mid, bps)
        } else {
            (0.0, 0.0, 0.0)
        };

        let bid_vwap = vwap(&event.bids);
        let ask_vwap = vwap(&event.asks);

        let strongest_bid = strongest(&event.bids);
        let strongest_ask = strongest(&event.asks);

        let metrics = DepthMetrics {
            symbol: event.symbol.clone(),
            timestamp: event.event_time,
            bid_volume,
            ask_volume,
            total_volume,
            imbalance_ratio,
            imbalance_percent,
            buy_pressure,
            sell_pressure,
            net_pressure,
            bid_depth_5,
            bid_depth_10,
            ask_depth_5,
            ask_depth_10,
            best_bid,
            best_ask,
            spread_abs,
            spread_bps,
            mid_price,
            bid_vwap,
            ask_vwap,
            bid_level_count: event.bids.len(),
            ask_level_count: event.asks.len(),
            strongest_bid,
            strongest_ask,
        };

        self.current
            .write()
            .insert(event.symbol.clone(), metrics.clone());
        self.last_update
            .write()
            .insert(event.symbol.clone(), event.event_time);

        let mut history = self.pressure_history.write();
        let entry = history.entry(event.symbol.clone()).or_default();
        if entry.len() >= PRESSURE_HISTORY_CAP {
            entry.pop_front();
        }
        entry.push_back(PressurePoint {
            timestamp: event.event_time,
            net_pressure,
            imbalance_ratio,
        });

        self.maybe_evict_expired(event.event_time);

        Ok(metrics)
    }

    pub fn current_metrics(&self, symbol: &str) -> Option<DepthMetrics> {
        self.current.read().get(symbol).cloned()
    }

    pub fn all_metrics(&self) -> HashMap<String, DepthMetrics> {
        self.current.read().clone()
    }

    /// Classify trend over the most recent 10 pressure points, per symbol.
    pub fn trend(&self, symbol: &str) -> Option<TrendClassification> {
        let history = self.pressure_history.read();
        let points = history.get(symbol)?;
        if points.len() < 10 {
            return Some(TrendClassification {
                trend: Trend::Neutral,
                strength: 0.5,
            });
        }
        let recent_avg: f64 =
            points.iter().rev().take(10).map(|p| p.net_pressure).sum::<f64>() / 10.0;

        Some(if recent_avg > 20.0 {
            TrendClassification {
                trend: Trend::Bullish,
                strength: (recent_avg / 50.0).min(1.0),
            }
        } else if recent_avg < -20.0 {
            TrendClassification {
                trend: Trend::Bearish,
                strength: (recent_avg.abs() / 50.0).min(1.0),
            }
        } else {
            TrendClassification {
                trend: Trend::Neutral,
                strength: 1.0 - (recent_avg.abs() / 20.0),
            }
        })
    }

    /// Last `timeframe.points()` pressure/imbalance points for `symbol`, trimmed
    /// to at most 100 for the HTTP surface, plus summary statistics and the
    /// 10-point trend classification. Tolerates short histories per §9: a
    /// caller asking for 15m with only a few minutes of data gets whatever
    /// exists, not an error.
    pub fn pressure_history(&self, symbol: &str, timeframe: Timeframe) -> Option<PressureHistoryResponse> {
        let history = self.pressure_history.read();
        let points = history.get(symbol)?;
        if points.is_empty() {
            return None;
        }

        let skip = points.len().saturating_sub(timeframe.points());
        let window: Vec<&PressurePoint> = points.iter().skip(skip).collect();
        let net: Vec<f64> = window.iter().map(|p| p.net_pressure).collect();
        let imbalance: Vec<f64> = window.iter().map(|p| p.imbalance_ratio).collect();

        let mean = net.iter().sum::<f64>() / net.len() as f64;
        let max = net.iter().cloned().fold(f64::MIN, f64::max);
        let min = net.iter().cloned().fold(f64::MAX, f64::min);

        drop(history);
        let trend = self.trend(symbol).unwrap_or(TrendClassification {
            trend: Trend::Neutral,
            strength: 0.5,
        });

        const HTTP_POINT_CAP: usize = 100;
        let trimmed: Vec<PressurePointView> = window
            .iter()
            .rev()
            .take(HTTP_POINT_CAP)
            .rev()
            .map(|p| PressurePointView {
                timestamp: p.timestamp,
                net_pressure: p.net_pressure,
                imbalance_ratio: p.imbalance_ratio,
            })
            .collect();
        let _ = imbalance;

        Some(PressureHistoryResponse {
            symbol: symbol.to_string(),
            points: trimmed,
            mean_net_pressure: mean,
            max_net_pressure: max,
            min_net_pressure: min,
            trend: trend.trend,
            trend_strength: trend.strength,
        })
    }

    pub fn market_summary(&self) -> Option<MarketSummary> {
        let current = self.current.read();
        if current.is_empty() {
            return None;
        }

        let n = current.len() as f64;
        let mut bullish = 0;
        let mut bearish = 0;
        let mut sum_pressure = 0.0;
        let mut sum_imbalance = 0.0;
        let mut sum_spread = 0.0;
        let mut total_liquidity = 0.0;

        for m in current.values() {
            if m.net_pressure > 20.0 {
                bullish += 1;
            } else if m.net_pressure < -20.0 {
                bearish += 1;
            }
            sum_pressure += m.net_pressure;
            sum_imbalance += m.imbalance_ratio;
            sum_spread += m.spread_bps;
            total_liquidity += m.total_volume;
        }

        let mut by_buy: Vec<_> = current.values().map(|m| (m.symbol.clone(), m.buy_pressure)).collect();
        by_buy.sort_by(|a, b| b.1.total_cmp(&a.1));
        by_buy.truncate(5);

        let mut by_sell: Vec<_> = current.values().map(|m| (m.symbol.clone(), m.sell_pressure)).collect();
        by_sell.sort_by(|a, b| b.1.total_cmp(&a.1));
        by_sell.truncate(5);

        Some(MarketSummary {
            bullish_count: bullish,
            bearish_count: bearish,
            neutral_count: current.len() - bullish - bearish,
            mean_net_pressure: sum_pressure / n,
            mean_imbalance: sum_imbalance / n,
            mean_spread_bps: sum_spread / n,
            total_liquidity,
            top_buy_pressure: by_buy,
            top_sell_pressure: by_sell,
        })
    }

    fn maybe_evict_expired(&self, now: i64) {
        let mut last_update = self.last_update.write();
        if last_update.len() % 100 != 0 {
            return;
        }
        let expired: Vec<String> = last_update
            .iter()
            .filter(|(_, ts)| now - **ts > self.metrics_ttl_secs)
            .map(|(s, _)| s.clone())
            .collect();
        if expired.is_empty() {
            return;
        }
        let mut current = self.current.write();
        for symbol in &expired {
            current.remove(symbol);
            last_update.remove(symbol);
        }
        tracing::debug!(count = expired.len(), "evicted expired depth metrics");
    }
}

fn depth_n(levels: &[PriceLevel], n: usize, total: f64) -> f64 {
    if levels.len() >= n {
        levels[..n].iter().map(|l| l.qty).sum()
    } else {
        total
    }
}

fn vwap(levels: &[PriceLevel]) -> f64 {
    if levels.is_empty() {
        return 0.0;
    }
    let total_value: f64 = levels.iter().map(|l| l.price * l.qty).sum();
    let total_qty: f64 = levels.iter().map(|l| l.qty).sum();
    if total_qty > 0.0 {
        total_value / total_qty
    } else {
        0.0
    }
}

/// Largest-qty level, ties broken by first occurrence (`Iterator::max_by`
/// keeps the *last* of equal maxima, so this folds explicitly instead).
fn strongest(levels: &[PriceLevel]) -> Option<StrongestLevel> {
    let mut best: Option<&PriceLevel> = None;
    for level in levels {
        if best.map_or(true, |b| level.qty > b.qty) {
            best = Some(level);
        }
    }
    best.map(|l| StrongestLevel {
        price: l.price,
        qty: l.qty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)>) -> DepthEvent {
        DepthEvent {
            symbol: "BTCUSDT".into(),
            event_time: 1_000,
            first_update_id: 1,
            last_update_id: 2,
            bids: bids.into_iter().map(|(price, qty)| PriceLevel { price, qty }).collect(),
            asks: asks.into_iter().map(|(price, qty)| PriceLevel { price, qty }).collect(),
            trace: None,
        }
    }

    #[test]
    fn balanced_book_has_zero_imbalance() {
        let analyzer = DepthAnalyzer::new(300);
        let metrics = analyzer.analyze(&event(vec![(100.0, 5.0)], vec![(101.0, 5.0)])).unwrap();
        assert_eq!(metrics.imbalance_ratio, 0.0);
        assert_eq!(metrics.net_pressure, 0.0);
        assert!((metrics.spread_bps - 99.256).abs() < 0.5);
    }

    #[test]
    fn heavy_bid_side_skews_imbalance_positive() {
        let analyzer = DepthAnalyzer::new(300);
        let metrics = analyzer.analyze(&event(vec![(100.0, 9.0)], vec![(101.0, 1.0)])).unwrap();
        assert!(metrics.imbalance_ratio > 0.0);
        assert!(metrics.net_pressure > 0.0);
    }

    #[test]
    fn trend_is_neutral_before_ten_points_accumulate() {
        let analyzer = DepthAnalyzer::new(300);
        analyzer.analyze(&event(vec![(100.0, 5.0)], vec![(101.0, 5.0)])).unwrap();
        let trend = analyzer.trend("BTCUSDT").unwrap();
        assert_eq!(trend.trend, Trend::Neutral);
    }

    #[test]
    fn strongest_level_ties_prefer_first_occurrence() {
        let analyzer = DepthAnalyzer::new(300);
        let metrics = analyzer
            .analyze(&event(
                vec![(100.0, 1.0), (99.5, 5.0), (99.0, 5.0)],
                vec![(100.5, 2.0), (101.0, 4.0), (101.5, 1.0)],
            ))
            .unwrap();
        assert_eq!(metrics.strongest_bid, Some(StrongestLevel { price: 99.5, qty: 5.0 }));
        assert_eq!(metrics.strongest_ask, Some(StrongestLevel { price: 101.0, qty: 4.0 }));
    }

    #[test]
    fn fifty_bullish_ticks_classify_as_bullish() {
        let analyzer = DepthAnalyzer::new(300);
        for i in 0..50 {
            analyzer.analyze(&event(vec![(100.0, 3.0)], vec![(100.5, 1.0)]).tap(i)).unwrap();
        }
        let trend = analyzer.trend("BTCUSDT").unwrap();
        assert_eq!(trend.trend, Trend::Bullish);
    }

    #[test]
    fn pressure_history_trims_to_requested_timeframe() {
        let analyzer = DepthAnalyzer::new(300);
        for i in 0..30 {
            analyzer.analyze(&event(vec![(100.0, 3.0)], vec![(100.5, 1.0)]).tap(i)).unwrap();
        }
        let history = analyzer.pressure_history("BTCUSDT", Timeframe::OneMinute).unwrap();
        assert!(history.points.len() <= 60);
        assert!(history.mean_net_pressure > 0.0);
    }

    #[test]
    fn pressure_history_tolerates_short_windows() {
        let analyzer = DepthAnalyzer::new(300);
        analyzer.analyze(&event(vec![(100.0, 3.0)], vec![(100.5, 1.0)])).unwrap();
        let history = analyzer
            .pressure_history("BTCUSDT", Timeframe::FifteenMinutes)
            .unwrap();
        assert_eq!(history.points.len(), 1);
    }

    #[test]
    fn crossed_book_is_rejected_without_mutating_state() {
        let analyzer = DepthAnalyzer::new(300);
        let result = analyzer.analyze(&event(vec![(105.0, 1.0)], vec![(100.0, 1.0)]));
        assert!(matches!(result, Err(AnalyticsError::BadDepth(_))));
        assert!(analyzer.current_metrics("BTCUSDT").is_none());
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let analyzer = DepthAnalyzer::new(300);
        let result = analyzer.analyze(&event(vec![(0.0, 1.0)], vec![(100.0, 1.0)]));
        assert!(matches!(result, Err(AnalyticsError::BadDepth(_))));
    }

    #[test]
    fn out_of_order_levels_are_rejected() {
        let analyzer = DepthAnalyzer::new(300);
        let result = analyzer.analyze(&event(vec![(99.0, 1.0), (100.0, 1.0)], vec![(101.0, 1.0)]));
        assert!(matches!(result, Err(AnalyticsError::BadDepth(_))));
    }

    trait Tap {
        fn tap(self, i: i64) -> Self;
    }

    impl Tap for DepthEvent {
        fn tap(mut self, i: i64) -> Self {
            self.event_time = 1_000 + i;
            self
        }
    }
}
