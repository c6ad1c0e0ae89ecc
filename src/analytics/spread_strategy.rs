//! Spread widening/narrowing liquidity strategy.
//!
//! BUY when a persistently wide spread normalizes (liquidity returning);
//! SELL when a tight spread widens rapidly alongside a depth drop (liquidity
//! withdrawal). Spread velocity is always computed against the oldest point
//! still held in the rolling window (`history[0]`), not a fixed lookback —
//! preserved verbatim from the source, including on partially filled windows.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;

use crate::models::{Action, Signal, SpreadMetrics, SpreadSnapshot, WideSpreadEvent};
use crate::ring_buffer::RingBuffer;

pub struct SpreadStrategyConfig {
    pub spread_threshold_bps: f64,
    pub spread_ratio_threshold: f64,
    pub velocity_threshold: f64,
    pub persistence_threshold: Duration,
    pub min_depth_reduction_pct: f64,
    pub base_confidence: f64,
    pub lookback_ticks: usize,
    pub min_signal_interval: Duration,
}

pub struct SpreadStrategy {
    cfg: SpreadStrategyConfig,
    history: RwLock<HashMap<String, RingBuffer<SpreadMetrics>>>,
    wide_spread_events: RwLock<HashMap<String, WideSpreadEvent>>,
    last_signal_time: RwLock<HashMap<String, i64>>,
    signals_generated: std::sync::atomic::AtomicU64,
    events_detected: std::sync::atomic::AtomicU64,
}

enum EventKind {
    Widening,
    Narrowing,
}

struct SpreadEvent {
    kind: EventKind,
    spread_before_bps: f64,
    duration_seconds: f64,
    confidence: f64,
    reasoning: &'static str,
}

impl SpreadStrategy {
    pub fn new(cfg: SpreadStrategyConfig) -> Self {
        Self {
            cfg,
            history: RwLock::new(HashMap::new()),
            wide_spread_events: RwLock::new(HashMap::new()),
            last_signal_time: RwLock::new(HashMap::new()),
            signals_generated: std::sync::atomic::AtomicU64::new(0),
            events_detected: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn analyze(
        &self,
        symbol: &str,
        best_bid: f64,
        best_ask: f64,
        top5_bid_volume: f64,
        top5_ask_volume: f64,
        total_depth: f64,
        timestamp: i64,
    ) -> Option<Signal> {
        let metrics = SpreadMetrics::new(
            timestamp,
            best_bid,
            best_ask,
            top5_bid_volume,
            top5_ask_volume,
            total_depth,
        )?;

        let mut history = self.history.write();
        let entry = history
            .entry(symbol.to_string())
            .or_insert_with(|| RingBuffer::new(self.cfg.lookback_ticks));
        entry.push(metrics);

        if entry.len() < 3 {
            return None;
        }

        let snapshot = self.create_snapshot(entry, &metrics);
        drop(history);

        let event = self.detect_event(symbol, &snapshot, &metrics, timestamp)?;
        self.events_detected
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        self.generate_signal(symbol, &event, &snapshot, &metrics, timestamp)
    }

    fn create_snapshot(&self, history: &RingBuffer<SpreadMetrics>, current: &SpreadMetrics) -> SpreadSnapshot {
        let all: Vec<&SpreadMetrics> = history.iter().collect();
        let preceding = &all[..all.len().saturating_sub(1)];

        let avg_spread_bps = if preceding.is_empty() {
            current.spread_bps
        } else {
            preceding.iter().map(|m| m.spread_bps).sum::<f64>() / preceding.len() as f64
        };
        let spread_ratio = if avg_spread_bps > 0.0 {
            current.spread_bps / avg_spread_bps
        } else {
            1.0
        };

        // Deliberately history[0] (the oldest retained point), not a fixed
        // lookback offset, regardless of how much of the window is filled.
        let spread_velocity = if all.len() >= 2 {
            let oldest = all[0];
            let time_diff = (current.timestamp - oldest.timestamp) as f64;
            if time_diff > 0.0 && oldest.spread_bps != 0.0 {
                let change = (current.spread_bps - oldest.spread_bps) / oldest.spread_bps;
                change / time_diff
            } else {
                0.0
            }
        } else {
            0.0
        };

        let avg_depth = if preceding.is_empty() {
            current.total_depth
        } else {
            preceding.iter().map(|m| m.total_depth).sum::<f64>() / preceding.len() as f64
        };
        let depth_reduction_pct = if avg_depth > 0.0 {
            1.0 - (current.total_depth / avg_depth)
        } else {
            0.0
        };

        SpreadSnapshot {
            spread_ratio,
            spread_velocity,
            depth_reduction_pct,
            is_widening: spread_velocity > self.cfg.velocity_threshold,
            is_narrowing: spread_velocity < -self.cfg.velocity_threshold,
            is_abnormal: spread_ratio > self.cfg.spread_ratio_threshold,
        }
    }

    fn detect_event(
        &self,
        symbol: &str,
        snapshot: &SpreadSnapshot,
        metrics: &SpreadMetrics,
        timestamp: i64,
    ) -> Option<SpreadEvent> {
        let mut wide_events = self.wide_spread_events.write();

        if let Some(event) = wide_events.get(symbol) {
            let persistence = (timestamp - event.start_time) as f64;
            if snapshot.is_narrowing
                && snapshot.spread_ratio < self.cfg.spread_ratio_threshold
                && persistence > self.cfg.persistence_threshold.as_secs_f64()
            {
                let spread_before = event.initial_spread_bps;
                wide_events.remove(symbol);
                return Some(SpreadEvent {
                    kind: EventKind::Narrowing,
                    spread_before_bps: spread_before,
                    duration_seconds: persistence,
                    confidence: self.confidence_for_narrowing(snapshot, persistence),
                    reasoning: "liquidity returning after withdrawal (spread normalizing)",
                });
            }
        }

        if snapshot.is_abnormal && metrics.spread_bps > self.cfg.spread_threshold_bps {
            wide_events.entry(symbol.to_string()).or_insert(WideSpreadEvent {
                start_time: timestamp,
                initial_spread_bps: metrics.spread_bps,
            });
        }
        drop(wide_events);

        if snapshot.is_widening
            && snapshot.spread_ratio > self.cfg.spread_ratio_threshold * 1.2
            && snapshot.depth_reduction_pct > self.cfg.min_depth_reduction_pct
        {
            let spread_before = metrics.spread_bps / (1.0 + snapshot.spread_velocity);
            return Some(SpreadEvent {
                kind: EventKind::Widening,
                spread_before_bps: spread_before,
                duration_seconds: 0.0,
                confidence: self.confidence_for_widening(snapshot),
                reasoning: "smart money liquidity withdrawal (rapid spread widening + depth reduction)",
            });
        }

        None
    }

    fn confidence_for_narrowing(&self, snapshot: &SpreadSnapshot, persistence: f64) -> f64 {
        let mut c = self.cfg.base_confidence;
        c += (snapshot.spread_ratio - self.cfg.spread_ratio_threshold) * 0.05;
        c += (persistence / 300.0 * 0.10).min(0.10);
        c.min(0.95)
    }

    fn confidence_for_widening(&self, snapshot: &SpreadSnapshot) -> f64 {
        let mut c = self.cfg.base_confidence;
        c += snapshot.spread_velocity.abs() * 0.10;
        c += snapshot.depth_reduction_pct * 0.15;
        c.min(0.95)
    }

    fn generate_signal(
        &self,
        symbol: &str,
        event: &SpreadEvent,
        snapshot: &SpreadSnapshot,
        metrics: &SpreadMetrics,
        timestamp: i64,
    ) -> Option<Signal> {
        let mut last_signal = self.last_signal_time.write();
        if let Some(last) = last_signal.get(symbol) {
            if (timestamp - last) < self.cfg.min_signal_interval.as_secs() as i64 {
                tracing::debug!(symbol, "spread signal rate limited");
                return None;
            }
        }

        let action = match event.kind {
            EventKind::Narrowing => Action::Buy,
            EventKind::Widening => Action::Sell,
        };

        let atr_proxy = metrics.spread_abs * 2.0;
        let (stop_loss, take_profit) = match action {
            Action::Buy => (metrics.mid - atr_proxy, metrics.mid + atr_proxy * 2.0),
            Action::Sell => (metrics.mid + atr_proxy, metrics.mid - atr_proxy * 2.0),
            Action::Hold => (metrics.mid, metrics.mid),
        };

        let mut indicators = HashMap::new();
        indicators.insert("spread_bps".to_string(), metrics.spread_bps);
        indicators.insert("spread_ratio".to_string(), snapshot.spread_ratio);
        indicators.insert("spread_velocity".to_string(), snapshot.spread_velocity);
        indicators.insert("total_depth".to_string(), metrics.total_depth);
        indicators.insert("depth_reduction_pct".to_string(), snapshot.depth_reduction_pct);

        let mut metadata = HashMap::new();
        metadata.insert("strategy".to_string(), "spread_liquidity".to_string());
        metadata.insert(
            "event_type".to_string(),
            match event.kind {
                EventKind::Narrowing => "narrowing".to_string(),
                EventKind::Widening => "widening".to_string(),
            },
        );
        metadata.insert("reasoning".to_string(), event.reasoning.to_string());
        metadata.insert("spread_before_bps".to_string(), event.spread_before_bps.to_string());

        last_signal.insert(symbol.to_string(), timestamp);
        self.signals_generated
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        tracing::info!(
            symbol,
            action = ?action,
            confidence = event.confidence,
            spread_bps = metrics.spread_bps,
            "spread liquidity signal generated"
        );

        Some(Signal {
            strategy_id: "spread_liquidity".to_string(),
            symbol: symbol.to_string(),
            action,
            confidence: event.confidence,
            price: metrics.mid,
            stop_loss,
            take_profit,
            indicators,
            metadata,
            generated_at: timestamp,
            trace: None,
        })
    }

    pub fn statistics(&self) -> SpreadStrategyStatistics {
        SpreadStrategyStatistics {
            signals_generated: self
                .signals_generated
                .load(std::sync::atomic::Ordering::Relaxed),
            events_detected: self
                .events_detected
                .load(std::sync::atomic::Ordering::Relaxed),
            symbols_tracked: self.history.read().len(),
            active_wide_events: self.wide_spread_events.read().len(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SpreadStrategyStatistics {
    pub signals_generated: u64,
    pub events_detected: u64,
    pub symbols_tracked: usize,
    pub active_wide_events: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_cfg() -> SpreadStrategyConfig {
        SpreadStrategyConfig {
            spread_threshold_bps: 10.0,
            spread_ratio_threshold: 2.5,
            velocity_threshold: 0.5,
            persistence_threshold: Duration::from_secs(30),
            min_depth_reduction_pct: 0.5,
            base_confidence: 0.70,
            lookback_ticks: 20,
            min_signal_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn stays_quiet_below_three_ticks_of_history() {
        let strategy = SpreadStrategy::new(default_cfg());
        let signal = strategy.analyze("BTCUSDT", 100.0, 100.1, 1.0, 1.0, 2.0, 0);
        assert!(signal.is_none());
    }

    #[test]
    fn rejects_crossed_or_zero_book() {
        let strategy = SpreadStrategy::new(default_cfg());
        assert!(strategy.analyze("BTCUSDT", 0.0, 100.0, 1.0, 1.0, 2.0, 0).is_none());
    }
}
