pub mod depth_analyzer;
pub mod level_tracker;
pub mod spread_strategy;

use crate::config::Config;
use crate::error::AnalyticsError;
use crate::models::{DepthEvent, IcebergPattern, Signal};

pub use depth_analyzer::{DepthAnalyzer, Timeframe};
pub use level_tracker::LevelTracker;
pub use spread_strategy::{SpreadStrategy, SpreadStrategyConfig};

/// The three analyzers every depth worker runs a snapshot through, plus the
/// outputs collected from a single call to [`AnalyticsPipeline::process`].
pub struct AnalyticsPipeline {
    pub depth_analyzer: DepthAnalyzer,
    pub level_tracker: LevelTracker,
    pub spread_strategy: SpreadStrategy,
    proximity_pct: f64,
}

pub struct AnalysisOutcome {
    pub icebergs: Vec<IcebergPattern>,
    pub signal: Option<Signal>,
}

impl AnalyticsPipeline {
    pub fn new(cfg: &Config) -> Self {
        Self {
            depth_analyzer: DepthAnalyzer::new(cfg.metrics_ttl.as_secs() as i64),
            level_tracker: LevelTracker::new(
                cfg.level_history_window.as_secs() as i64,
                cfg.refill_speed_threshold,
                cfg.consistency_threshold,
                cfg.min_refill_count,
            ),
            spread_strategy: SpreadStrategy::new(SpreadStrategyConfig {
                spread_threshold_bps: cfg.spread_threshold_bps,
                spread_ratio_threshold: cfg.spread_ratio_threshold,
                velocity_threshold: cfg.velocity_threshold,
                persistence_threshold: cfg.persistence_threshold,
                min_depth_reduction_pct: cfg.min_depth_reduction_pct,
                base_confidence: cfg.base_confidence,
                lookback_ticks: cfg.lookback_ticks,
                min_signal_interval: cfg.min_signal_interval,
            }),
            proximity_pct: 1.0,
        }
    }

    /// Runs one depth snapshot through all three analyzers. A data-validity
    /// error (crossed book, non-positive price, out-of-order levels) is
    /// returned without mutating any analyzer state, per §7: "the analyzer
    /// moves on with no state mutation".
    pub fn process(&self, event: &DepthEvent) -> Result<AnalysisOutcome, AnalyticsError> {
        let metrics = self.depth_analyzer.analyze(event)?;
        self.level_tracker.update(event)?;

        let icebergs = self.level_tracker.detect_icebergs(
            &event.symbol,
            metrics.mid_price,
            self.proximity_pct,
            event.event_time,
        );

        let top5_bid = event.bids.iter().take(5).map(|l| l.qty).sum();
        let top5_ask = event.asks.iter().take(5).map(|l| l.qty).sum();

        let signal = self.spread_strategy.analyze(
            &event.symbol,
            metrics.best_bid,
            metrics.best_ask,
            top5_bid,
            top5_ask,
            metrics.total_volume,
            event.event_time,
        );

        Ok(AnalysisOutcome { icebergs, signal })
    }
}
