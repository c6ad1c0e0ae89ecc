//! Domain error taxonomy.
//!
//! Start-up and I/O glue uses `anyhow`; callers that need to match on a
//! specific failure kind (dispatcher backpressure, a rejected publish, a
//! malformed depth snapshot) get this explicit enum instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("bad depth: {0}")]
    BadDepth(String),

    #[error("worker queue full for symbol {symbol}")]
    QueueOverflow { symbol: String },

    #[error("publisher queue full")]
    PublisherQueueFull,

    #[error("circuit breaker open")]
    CircuitOpen,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("bus transport error: {0}")]
    Transport(String),
}
