//! Depth Signals — real-time market-microstructure analytics and
//! signal-generation engine.
//!
//! Wires the bus consumer, the hash-partitioned dispatcher, the three
//! per-symbol analyzers, the normalizer, the outbound publisher, and the
//! read-only metrics HTTP surface into one running process.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{middleware as axum_mw, routing::get, Router};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use depth_signals::api::{self, AppState};
use depth_signals::bus::consumer::BusConsumer;
use depth_signals::bus::dispatcher::Dispatcher;
use depth_signals::bus::publisher::{self, Publisher};
use depth_signals::config::Config;
use depth_signals::middleware::request_logging_simple;
use depth_signals::models::MarketEvent;
use depth_signals::{performance, telemetry};

const INITIAL_CONNECT_ATTEMPTS: u32 = 3;

#[derive(Parser, Debug)]
#[command(name = "depth-signals")]
#[command(about = "Real-time market-microstructure analytics and signal-generation engine")]
struct Args {
    /// Override HTTP_BIND_ADDR for the read-only metrics surface.
    #[arg(long, env = "HTTP_BIND_ADDR")]
    http_bind: Option<String>,

    /// Override WORKER_POOL_SIZE (defaults to available CPU cores).
    #[arg(long, env = "WORKER_POOL_SIZE")]
    worker_pool_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing();
    performance::init();

    let mut cfg = Config::from_env().context("loading configuration")?;
    if let Some(addr) = args.http_bind {
        cfg.http_bind_addr = addr;
    }
    if let Some(n) = args.worker_pool_size {
        cfg.worker_pool_size = n;
    }

    info!(
        worker_pool_size = cfg.worker_pool_size,
        inbound_subject = %cfg.inbound_subject,
        outbound_subject = %cfg.outbound_subject,
        "depth-signals starting"
    );

    let publish_client = connect_with_retry(
        &cfg.outbound_bus_url,
        &cfg.consumer_name,
        cfg.bus_connect_timeout,
        INITIAL_CONNECT_ATTEMPTS,
    )
    .await
    .context("connecting to outbound bus")?;

    let (publisher, publish_rx, _) = Publisher::new(
        cfg.outbound_bus_url.clone(),
        cfg.outbound_subject.clone(),
        cfg.publisher_queue_capacity,
        cfg.publisher_batch_size,
        cfg.publisher_batch_timeout,
        cfg.circuit_failure_threshold,
        cfg.circuit_recovery_timeout,
    );

    let publishing_loop = tokio::spawn(publisher::run_publishing_loop(
        publisher.clone(),
        publish_rx,
        publish_client,
        cfg.shutdown_drain_deadline,
    ));

    let (dispatcher, worker_handles) = Dispatcher::spawn(&cfg, publisher.clone());

    let consumer = BusConsumer::new(
        cfg.inbound_bus_url.clone(),
        cfg.inbound_subject.clone(),
        cfg.consumer_name.clone(),
        cfg.bus_connect_timeout,
    );
    let consumer_running = consumer.running_flag();

    let (event_tx, mut event_rx) = mpsc::channel::<MarketEvent>(cfg.worker_inbox_capacity);
    let consumer_task = tokio::spawn(consumer.run(event_tx));

    let route_dispatcher = dispatcher.clone();
    let routing_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Err(e) = route_dispatcher.dispatch(event).await {
                warn!(error = %e, "event dropped at dispatch");
            }
        }
    });

    let state = AppState::new(dispatcher.clone(), publisher.clone());
    state.mark_ready();

    let app = build_router(state);
    let addr: SocketAddr = cfg.http_bind_addr.parse().context("parsing HTTP_BIND_ADDR")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding metrics HTTP listener")?;
    info!(addr = %addr, "metrics HTTP surface listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("shutdown requested, draining pipeline");
    consumer_running.store(false, std::sync::atomic::Ordering::SeqCst);
    publisher.stop();

    consumer_task.abort();
    routing_task.abort();
    for h in worker_handles {
        h.abort();
    }
    let _ = publishing_loop.await;

    telemetry::flush_telemetry(cfg.shutdown_drain_deadline).await;
    telemetry::shutdown_telemetry();
    Ok(())
}

fn build_router(state: AppState) -> Router {
    api::router(state)
        .layer(axum_mw::from_fn(request_logging_simple))
        .route("/health", get(|| async { "ok" }))
}

/// Connects with a bounded number of attempts and doubling backoff, per
/// §4.1's "Start() fails fast if the outbound bus is unreachable after a
/// bounded number of retries" contract.
async fn connect_with_retry(
    url: &str,
    name: &str,
    connect_timeout: Duration,
    max_attempts: u32,
) -> Result<async_nats::Client> {
    let mut backoff = Duration::from_millis(500);
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        let connect = async_nats::ConnectOptions::new().name(name).connect(url);
        match tokio::time::timeout(connect_timeout, connect).await {
            Ok(Ok(client)) => return Ok(client),
            Ok(Err(e)) => last_err = Some(anyhow::anyhow!(e)),
            Err(_) => last_err = Some(anyhow::anyhow!("connect timed out after {connect_timeout:?}")),
        }
        warn!(attempt, max_attempts, url, "bus connect attempt failed, retrying");
        if attempt < max_attempts {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("unreachable")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
