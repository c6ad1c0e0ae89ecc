//! Order book level tracker: detects iceberg order patterns (refills,
//! consistent sizing, price anchoring) by watching individual price levels
//! over a rolling window.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::AnalyticsError;
use crate::models::{DepthEvent, IcebergKind, IcebergPattern, LevelSnapshotPoint, Side};
use crate::ring_buffer::RingBuffer;

struct LevelHistory {
    side: Side,
    snapshots: RingBuffer<LevelSnapshotPoint>,
    refill_count: u32,
    avg_refill_speed_seconds: f64,
    avg_volume: f64,
    volume_std_dev: f64,
    consistent_volume: bool,
    first_seen: i64,
    last_seen: i64,
}

impl LevelHistory {
    fn new(ts: i64) -> Self {
        Self {
            side: Side::Bid,
            snapshots: RingBuffer::new(100),
            refill_count: 0,
            avg_refill_speed_seconds: 0.0,
            avg_volume: 0.0,
            volume_std_dev: 0.0,
            consistent_volume: false,
            first_seen: ts,
            last_seen: ts,
        }
    }

    fn consistency_score(&self) -> f64 {
        if self.avg_volume > 0.0 {
            1.0 - (self.volume_std_dev / self.avg_volume)
        } else {
            0.0
        }
    }
}

pub struct LevelTracker {
    history_window_secs: i64,
    refill_speed_threshold: Duration,
    consistency_threshold: f64,
    min_refill_count: u32,

    bid_levels: RwLock<HashMap<String, HashMap<u64, LevelHistory>>>,
    ask_levels: RwLock<HashMap<String, HashMap<u64, LevelHistory>>>,

    total_levels_tracked: std::sync::atomic::AtomicU64,
    total_icebergs_detected: std::sync::atomic::AtomicU64,
}

/// Prices are bucketed to an integer key (price * 1e8, rounded) so they can be
/// used as hash map keys without floating-point equality pitfalls.
fn price_key(price: f64) -> u64 {
    (price * 1e8).round() as u64
}

impl LevelTracker {
    pub fn new(
        history_window_secs: i64,
        refill_speed_threshold: Duration,
        consistency_threshold: f64,
        min_refill_count: u32,
    ) -> Self {
        Self {
            history_window_secs,
            refill_speed_threshold,
            consistency_threshold,
            min_refill_count,
            bid_levels: RwLock::new(HashMap::new()),
            ask_levels: RwLock::new(HashMap::new()),
            total_levels_tracked: std::sync::atomic::AtomicU64::new(0),
            total_icebergs_detected: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Validates ordering and strictly positive prices before touching any
    /// level history (§4.3 step 1, applied equally here per §7: a data-validity
    /// error leaves state untouched). Returns `Err` and mutates nothing on a
    /// crossed or malformed book.
    pub fn update(&self, event: &DepthEvent) -> Result<(), AnalyticsError> {
        event.validate()?;

        for level in &event.bids {
            self.update_level(&event.symbol, level.price, level.qty, event.event_time, Side::Bid);
        }
        for level in &event.asks {
            self.update_level(&event.symbol, level.price, level.qty, event.event_time, Side::Ask);
        }
        self.cleanup_old_levels(&event.symbol, event.event_time);
        Ok(())
    }

    fn update_level(&self, symbol: &str, price: f64, qty: f64, ts: i64, side: Side) {
        let table = match side {
            Side::Bid => &self.bid_levels,
            Side::Ask => &self.ask_levels,
        };
        let mut table = table.write();
        let symbol_levels = table.entry(symbol.to_string()).or_default();
        let key = price_key(price);

        let is_new = !symbol_levels.contains_key(&key);
        let history = symbol_levels.entry(key).or_insert_with(|| {
            let mut h = LevelHistory::new(ts);
            h.side = side;
            h
        });
        if is_new {
            self.total_levels_tracked
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }

        history.snapshots.push(LevelSnapshotPoint { qty, ts });
        history.last_seen = ts;

        if Self::is_refill(&history.snapshots, self.refill_speed_threshold) {
            history.refill_count += 1;
            if history.refill_count > 1 {
                let elapsed = (ts - history.first_seen) as f64;
                history.avg_refill_speed_seconds = elapsed / history.refill_count as f64;
            }
        }

        Self::update_statistics(history, self.consistency_threshold);
    }

    /// Detects depletion then fast restoration over the last three snapshots:
    /// `vol_1 < vol_0 * 0.5` and `vol_2 > vol_0 * 0.8`, inside the speed
    /// threshold. Always compares the three most recent points, not a
    /// window-relative slice.
    fn is_refill(snapshots: &RingBuffer<LevelSnapshotPoint>, speed_threshold: Duration) -> bool {
        if snapshots.len() < 3 {
            return false;
        }
        let recent: Vec<&LevelSnapshotPoint> = snapshots.last_n(3).collect();
        let (vol_0, vol_1, vol_2) = (recent[0].qty, recent[1].qty, recent[2].qty);

        if vol_1 < vol_0 * 0.5 && vol_2 > vol_0 * 0.8 {
            let elapsed = recent[2].ts - recent[0].ts;
            return elapsed < speed_threshold.as_secs() as i64;
        }
        false
    }

    fn update_statistics(history: &mut LevelHistory, consistency_threshold: f64) {
        if history.snapshots.len() < 2 {
            return;
        }
        let volumes: Vec<f64> = history.snapshots.iter().map(|s| s.qty).collect();
        let mean = volumes.iter().sum::<f64>() / volumes.len() as f64;
        let variance = volumes.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / volumes.len() as f64;
        let std_dev = variance.sqrt();

        history.avg_volume = mean;
        history.volume_std_dev = std_dev;
        history.consistent_volume = if mean > 0.0 {
            (std_dev / mean) < consistency_threshold
        } else {
            false
        };
    }

    fn cleanup_old_levels(&self, symbol: &str, now: i64) {
        let cutoff = now - self.history_window_secs;
        for table in [&self.bid_levels, &self.ask_levels] {
            if let Some(levels) = table.write().get_mut(symbol) {
                levels.retain(|_, h| h.last_seen >= cutoff);
            }
        }
    }

    /// Scan levels within `proximity_pct` of `current_price` for iceberg patterns.
    pub fn detect_icebergs(
        &self,
        symbol: &str,
        current_price: f64,
        proximity_pct: f64,
        now: i64,
    ) -> Vec<IcebergPattern> {
        let price_range = current_price * (proximity_pct / 100.0);
        let min_price = current_price - price_range;
        let max_price = current_price + price_range;

        let mut found = Vec::new();
        for (table, side) in [(&self.bid_levels, Side::Bid), (&self.ask_levels, Side::Ask)] {
            let table = table.read();
            let Some(levels) = table.get(symbol) else {
                continue;
            };
            for (key, history) in levels.iter() {
                let price = *key as f64 / 1e8;
                if price < min_price || price > max_price {
                    continue;
                }
                if let Some(pattern) = self.check_pattern(symbol, price, side, history, now) {
                    found.push(pattern);
                }
            }
        }
        found
    }

    fn check_pattern(
        &self,
        symbol: &str,
        price: f64,
        side: Side,
        history: &LevelHistory,
        now: i64,
    ) -> Option<IcebergPattern> {
        let persistence = (now - history.first_seen) as f64;

        let (kind, confidence) = if history.refill_count >= self.min_refill_count {
            (
                IcebergKind::Refill,
                (0.65 + history.refill_count as f64 * 0.05).min(0.85),
            )
        } else if history.consistent_volume && persistence > 120.0 {
            (IcebergKind::ConsistentSize, 0.70)
        } else if persistence > 180.0 {
            (IcebergKind::Anchor, 0.75)
        } else {
            return None;
        };

        self.total_icebergs_detected
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        Some(IcebergPattern {
            symbol: symbol.to_string(),
            price,
            side,
            refill_count: history.refill_count,
            avg_refill_speed_seconds: history.avg_refill_speed_seconds,
            consistency_score: history.consistency_score(),
            persistence_seconds: persistence,
            confidence,
            kind,
            detected_at: now,
        })
    }

    pub fn statistics(&self) -> LevelTrackerStatistics {
        let bid_levels = self.bid_levels.read();
        let ask_levels = self.ask_levels.read();
        LevelTrackerStatistics {
            total_levels_tracked: self
                .total_levels_tracked
                .load(std::sync::atomic::Ordering::Relaxed),
            active_bid_levels: bid_levels.values().map(|m| m.len()).sum(),
            active_ask_levels: ask_levels.values().map(|m| m.len()).sum(),
            total_icebergs_detected: self
                .total_icebergs_detected
                .load(std::sync::atomic::Ordering::Relaxed),
            symbols_tracked: bid_levels.len(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LevelTrackerStatistics {
    pub total_levels_tracked: u64,
    pub active_bid_levels: usize,
    pub active_ask_levels: usize,
    pub total_icebergs_detected: u64,
    pub symbols_tracked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceLevel;

    fn depth(symbol: &str, price: f64, qty: f64, ts: i64) -> DepthEvent {
        DepthEvent {
            symbol: symbol.into(),
            event_time: ts,
            first_update_id: 1,
            last_update_id: 2,
            bids: vec![PriceLevel { price, qty }],
            asks: vec![PriceLevel { price: price + 1.0, qty: 1.0 }],
            trace: None,
        }
    }

    #[test]
    fn detects_refill_pattern_on_deplete_then_restore() {
        let tracker = LevelTracker::new(300, Duration::from_secs(5), 0.1, 1);
        tracker.update(&depth("BTCUSDT", 100.0, 10.0, 0)).unwrap();
        tracker.update(&depth("BTCUSDT", 100.0, 2.0, 1)).unwrap();
        tracker.update(&depth("BTCUSDT", 100.0, 9.0, 2)).unwrap();

        let patterns = tracker.detect_icebergs("BTCUSDT", 100.0, 1.0, 2);
        assert!(patterns.iter().any(|p| p.kind == IcebergKind::Refill && p.side == Side::Bid));
    }

    #[test]
    fn no_pattern_when_slow_restoration() {
        let tracker = LevelTracker::new(300, Duration::from_secs(5), 0.1, 1);
        tracker.update(&depth("BTCUSDT", 100.0, 10.0, 0)).unwrap();
        tracker.update(&depth("BTCUSDT", 100.0, 2.0, 1)).unwrap();
        tracker.update(&depth("BTCUSDT", 100.0, 9.0, 100)).unwrap();

        let patterns = tracker.detect_icebergs("BTCUSDT", 100.0, 1.0, 100);
        assert!(!patterns.iter().any(|p| p.kind == IcebergKind::Refill));
    }

    #[test]
    fn crossed_book_is_rejected_without_mutating_state() {
        let tracker = LevelTracker::new(300, Duration::from_secs(5), 0.1, 1);
        let mut crossed = depth("BTCUSDT", 100.0, 10.0, 0);
        crossed.asks[0].price = 99.0;
        assert!(matches!(tracker.update(&crossed), Err(AnalyticsError::BadDepth(_))));
        assert_eq!(tracker.statistics().total_levels_tracked, 0);
    }
}
