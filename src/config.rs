//! Process configuration, loaded once from the environment at start-up.

use std::time::Duration;

/// Process-wide configuration. Every tunable named in the component contracts
/// has a default here and can be overridden by its own environment variable.
#[derive(Debug, Clone)]
pub struct Config {
    pub inbound_bus_url: String,
    pub inbound_subject: String,
    pub outbound_bus_url: String,
    pub outbound_subject: String,
    pub consumer_name: String,

    pub http_bind_addr: String,

    pub worker_pool_size: usize,
    pub worker_inbox_capacity: usize,
    pub worker_backpressure_deadline: Duration,

    pub metrics_ttl: Duration,

    pub level_history_cap: usize,
    pub level_history_window: Duration,
    pub refill_speed_threshold: Duration,
    pub min_refill_count: u32,
    pub consistency_threshold: f64,

    pub lookback_ticks: usize,
    pub spread_threshold_bps: f64,
    pub spread_ratio_threshold: f64,
    pub velocity_threshold: f64,
    pub persistence_threshold: Duration,
    pub min_depth_reduction_pct: f64,
    pub base_confidence: f64,
    pub min_signal_interval: Duration,

    pub circuit_failure_threshold: u32,
    pub circuit_recovery_timeout: Duration,

    pub publisher_queue_capacity: usize,
    pub publisher_batch_size: usize,
    pub publisher_batch_timeout: Duration,

    pub shutdown_drain_deadline: Duration,
    pub bus_connect_timeout: Duration,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs_f64(env_or(key, default_secs as f64))
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let worker_pool_size = std::env::var("WORKER_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            });

        Ok(Self {
            inbound_bus_url: env_or_string("INBOUND_BUS_URL", "nats://127.0.0.1:4222"),
            inbound_subject: env_or_string("INBOUND_SUBJECT", "market.depth"),
            outbound_bus_url: env_or_string("OUTBOUND_BUS_URL", "nats://127.0.0.1:4222"),
            outbound_subject: env_or_string("OUTBOUND_SUBJECT", "trade.orders"),
            consumer_name: env_or_string("CONSUMER_NAME", "depth-signals"),

            http_bind_addr: env_or_string("HTTP_BIND_ADDR", "0.0.0.0:8080"),

            worker_pool_size,
            worker_inbox_capacity: env_or("WORKER_INBOX_CAPACITY", 4096),
            worker_backpressure_deadline: env_secs("WORKER_BACKPRESSURE_DEADLINE_SECS", 1),

            metrics_ttl: env_secs("METRICS_TTL_SECS", 300),

            level_history_cap: env_or("LEVEL_HISTORY_CAP", 100),
            level_history_window: env_secs("LEVEL_HISTORY_WINDOW_SECS", 300),
            refill_speed_threshold: env_secs("REFILL_SPEED_THRESHOLD_SECS", 5),
            min_refill_count: env_or("MIN_REFILL_COUNT", 3),
            consistency_threshold: env_or("CONSISTENCY_THRESHOLD", 0.1),

            lookback_ticks: env_or("LOOKBACK_TICKS", 20),
            spread_threshold_bps: env_or("SPREAD_THRESHOLD_BPS", 10.0),
            spread_ratio_threshold: env_or("SPREAD_RATIO_THRESHOLD", 2.5),
            velocity_threshold: env_or("VELOCITY_THRESHOLD", 0.5),
            persistence_threshold: env_secs("PERSISTENCE_THRESHOLD_SECS", 30),
            min_depth_reduction_pct: env_or("MIN_DEPTH_REDUCTION_PCT", 0.5),
            base_confidence: env_or("BASE_CONFIDENCE", 0.70),
            min_signal_interval: env_secs("MIN_SIGNAL_INTERVAL_SECS", 60),

            circuit_failure_threshold: env_or("CIRCUIT_FAILURE_THRESHOLD", 5),
            circuit_recovery_timeout: env_secs("CIRCUIT_RECOVERY_TIMEOUT_SECS", 60),

            publisher_queue_capacity: env_or("PUBLISHER_QUEUE_CAPACITY", 1000),
            publisher_batch_size: env_or("PUBLISHER_BATCH_SIZE", 50),
            publisher_batch_timeout: Duration::from_millis(env_or(
                "PUBLISHER_BATCH_TIMEOUT_MS",
                1000,
            )),

            shutdown_drain_deadline: env_secs("SHUTDOWN_DRAIN_DEADLINE_SECS", 5),
            bus_connect_timeout: env_secs("BUS_CONNECT_TIMEOUT_SECS", 10),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_any_env() {
        let cfg = Config {
            inbound_bus_url: "nats://127.0.0.1:4222".into(),
            inbound_subject: "market.depth".into(),
            outbound_bus_url: "nats://127.0.0.1:4222".into(),
            outbound_subject: "trade.orders".into(),
            consumer_name: "depth-signals".into(),
            http_bind_addr: "0.0.0.0:8080".into(),
            worker_pool_size: 4,
            worker_inbox_capacity: 4096,
            worker_backpressure_deadline: Duration::from_secs(1),
            metrics_ttl: Duration::from_secs(300),
            level_history_cap: 100,
            level_history_window: Duration::from_secs(300),
            refill_speed_threshold: Duration::from_secs(5),
            min_refill_count: 3,
            consistency_threshold: 0.1,
            lookback_ticks: 20,
            spread_threshold_bps: 10.0,
            spread_ratio_threshold: 2.5,
            velocity_threshold: 0.5,
            persistence_threshold: Duration::from_secs(30),
            min_depth_reduction_pct: 0.5,
            base_confidence: 0.70,
            min_signal_interval: Duration::from_secs(60),
            circuit_failure_threshold: 5,
            circuit_recovery_timeout: Duration::from_secs(60),
            publisher_queue_capacity: 1000,
            publisher_batch_size: 50,
            publisher_batch_timeout: Duration::from_secs(1),
            shutdown_drain_deadline: Duration::from_secs(5),
            bus_connect_timeout: Duration::from_secs(10),
        };
        assert_eq!(cfg.min_refill_count, 3);
        assert_eq!(cfg.lookback_ticks, 20);
    }
}
