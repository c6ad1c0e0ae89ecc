//! Middleware for observability.
//!
//! This module provides request logging with latency tracking for the
//! read-only metrics HTTP surface.

pub mod logging;

pub use logging::{request_logging, request_logging_simple};
