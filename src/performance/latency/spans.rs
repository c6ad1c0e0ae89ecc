//! Latency span types for detailed tracing

use serde::Serialize;

/// Type of latency span measured across the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
    // Ingress
    BusConsume,
    Dispatch,

    // Analytics
    DepthAnalyze,
    LevelTrack,
    SpreadStrategy,

    // Egress
    Normalize,
    Publish,

    // HTTP
    HttpApi,
}

impl SpanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanType::BusConsume => "bus_consume",
            SpanType::Dispatch => "dispatch",
            SpanType::DepthAnalyze => "depth_analyze",
            SpanType::LevelTrack => "level_track",
            SpanType::SpreadStrategy => "spread_strategy",
            SpanType::Normalize => "normalize",
            SpanType::Publish => "publish",
            SpanType::HttpApi => "http_api",
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            SpanType::BusConsume | SpanType::Dispatch => "ingress",
            SpanType::DepthAnalyze | SpanType::LevelTrack | SpanType::SpreadStrategy => {
                "analytics"
            }
            SpanType::Normalize | SpanType::Publish => "egress",
            SpanType::HttpApi => "api",
        }
    }
}

/// A single latency measurement span
#[derive(Debug, Clone, Serialize)]
pub struct LatencySpan {
    pub span_type: SpanType,
    pub duration_us: u64,
    pub metadata: Option<String>,
    pub timestamp: i64,
}

impl LatencySpan {
    pub fn new(span_type: SpanType, duration_us: u64) -> Self {
        Self {
            span_type,
            duration_us,
            metadata: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_metadata(mut self, meta: impl Into<String>) -> Self {
        self.metadata = Some(meta.into());
        self
    }
}

/// Builder for creating spans with timing
pub struct SpanBuilder {
    span_type: SpanType,
    start: std::time::Instant,
    metadata: Option<String>,
}

impl SpanBuilder {
    pub fn start(span_type: SpanType) -> Self {
        Self {
            span_type,
            start: std::time::Instant::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, meta: impl Into<String>) -> Self {
        self.metadata = Some(meta.into());
        self
    }

    pub fn finish(self) -> LatencySpan {
        LatencySpan {
            span_type: self.span_type,
            duration_us: self.start.elapsed().as_micros() as u64,
            metadata: self.metadata,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn finish_and_record(self) -> u64 {
        let span = self.finish();
        let duration = span.duration_us;
        crate::latency::global_registry().record_span(span);
        duration
    }
}

/// Macro for easy span measurement
#[macro_export]
macro_rules! measure_latency {
    ($span_type:expr, $block:expr) => {{
        let _span = $crate::latency::SpanBuilder::start($span_type);
        let result = $block;
        _span.finish_and_record();
        result
    }};
    ($span_type:expr, $meta:expr, $block:expr) => {{
        let _span = $crate::latency::SpanBuilder::start($span_type).with_metadata($meta);
        let result = $block;
        _span.finish_and_record();
        result
    }};
}
