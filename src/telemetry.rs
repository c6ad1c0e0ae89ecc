//! Process-wide tracing initialization and graceful-shutdown flush.

use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. Call once at start-up.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "depth_signals=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Logs final queue/publisher metrics and waits briefly so any buffered
/// writer can flush, bounded by `timeout`. Mirrors the source's
/// `flush_telemetry(timeout_seconds=5.0)` shape without an OpenTelemetry
/// exporter behind it.
pub async fn flush_telemetry(timeout: Duration) {
    let start = std::time::Instant::now();

    let report = crate::performance::report();
    tracing::info!(
        latency_uptime_s = report.latency.uptime_seconds,
        queue_count = report.queues.len(),
        "flushing telemetry before shutdown"
    );

    let elapsed = start.elapsed();
    if elapsed < timeout {
        tokio::time::sleep((timeout - elapsed).min(Duration::from_millis(500))).await;
    }
}

pub fn shutdown_telemetry() {
    tracing::info!("telemetry shut down");
}
