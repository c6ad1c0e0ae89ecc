//! Inbound message envelope: decodes the wire JSON into a [`MarketEvent`] and
//! carries the W3C `traceparent` through under `_otel_trace_context`.
//!
//! Wire shape: `{"stream": "<symbol>@depth|@trade|@ticker", "data": {...},
//! "_otel_trace_context": {"traceparent": "..."}}`, with exchange-style
//! abbreviated field names and string-encoded numeric fields inside `data`.

use serde::Deserialize;

use crate::error::AnalyticsError;
use crate::models::{DepthEvent, MarketEvent, PriceLevel, TraceContext, TradeEvent};

#[derive(Debug, Deserialize)]
struct Envelope {
    stream: String,
    data: serde_json::Value,
    #[serde(rename = "_otel_trace_context", default)]
    trace: Option<TraceContext>,
}

#[derive(Debug, Deserialize)]
struct DepthData {
    s: String,
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "U")]
    first_update_id: u64,
    u: u64,
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct TradeData {
    s: String,
    t: u64,
    p: String,
    q: String,
    #[serde(rename = "T")]
    trade_time: i64,
    m: bool,
    #[serde(rename = "E")]
    #[allow(dead_code)]
    event_time: i64,
}

/// Wire timestamps (`E`, `T`) are epoch milliseconds; every rolling-window
/// threshold in the analytics layer (TTL, refill speed, persistence, rate
/// limiting) is expressed in seconds, matching the original's
/// `timestamp.timestamp()` / `.total_seconds()` arithmetic. Convert once here
/// so nothing downstream has to know the wire unit.
fn ms_to_secs(ms: i64) -> i64 {
    ms.div_euclid(1000)
}

fn parse_level(pair: &(String, String)) -> Result<PriceLevel, AnalyticsError> {
    let price: f64 = pair
        .0
        .parse()
        .map_err(|_| AnalyticsError::MalformedEnvelope(format!("bad price {}", pair.0)))?;
    let qty: f64 = pair
        .1
        .parse()
        .map_err(|_| AnalyticsError::MalformedEnvelope(format!("bad qty {}", pair.1)))?;
    Ok(PriceLevel { price, qty })
}

pub fn decode(payload: &[u8]) -> Result<MarketEvent, AnalyticsError> {
    let envelope: Envelope = serde_json::from_slice(payload)
        .map_err(|e| AnalyticsError::MalformedEnvelope(e.to_string()))?;

    let kind = envelope
        .stream
        .rsplit('@')
        .next()
        .ok_or_else(|| AnalyticsError::MalformedEnvelope("missing stream suffix".into()))?;

    let event = match kind {
        "depth" => {
            let d: DepthData = serde_json::from_value(envelope.data)
                .map_err(|e| AnalyticsError::MalformedEnvelope(e.to_string()))?;
            let bids = d.bids.iter().map(parse_level).collect::<Result<Vec<_>, _>>()?;
            let asks = d.asks.iter().map(parse_level).collect::<Result<Vec<_>, _>>()?;
            MarketEvent::Depth(DepthEvent {
                symbol: d.s,
                event_time: ms_to_secs(d.event_time),
                first_update_id: d.first_update_id,
                last_update_id: d.u,
                bids,
                asks,
                trace: envelope.trace,
            })
        }
        "trade" => {
            let t: TradeData = serde_json::from_value(envelope.data)
                .map_err(|e| AnalyticsError::MalformedEnvelope(e.to_string()))?;
            let price: f64 = t
                .p
                .parse()
                .map_err(|_| AnalyticsError::MalformedEnvelope(format!("bad price {}", t.p)))?;
            let qty: f64 = t
                .q
                .parse()
                .map_err(|_| AnalyticsError::MalformedEnvelope(format!("bad qty {}", t.q)))?;
            MarketEvent::Trade(TradeEvent {
                symbol: t.s,
                trade_id: t.t,
                price,
                qty,
                is_maker: t.m,
                event_time: ms_to_secs(t.trade_time),
                trace: envelope.trace,
            })
        }
        "ticker" => {
            let symbol = envelope
                .stream
                .split('@')
                .next()
                .unwrap_or_default()
                .to_uppercase();
            MarketEvent::Ticker { symbol }
        }
        other => {
            return Err(AnalyticsError::MalformedEnvelope(format!(
                "unknown stream kind {other}"
            )))
        }
    };

    Ok(event)
}

/// Extracts the span context carried on an event, if any, for linking the
/// consuming span to its producer.
pub fn trace_of(event: &MarketEvent) -> Option<&TraceContext> {
    match event {
        MarketEvent::Depth(d) => d.trace.as_ref(),
        MarketEvent::Trade(t) => t.trace.as_ref(),
        MarketEvent::Ticker { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_depth_event() {
        let payload = br#"{
            "stream": "btcusdt@depth",
            "data": {
                "s": "BTCUSDT",
                "E": 1700000000,
                "U": 1,
                "u": 2,
                "bids": [["100.00", "1.5"]],
                "asks": [["100.50", "2.0"]]
            }
        }"#;
        let event = decode(payload).unwrap();
        assert_eq!(event.symbol(), "BTCUSDT");
        match event {
            MarketEvent::Depth(d) => {
                assert_eq!(d.bids[0].price, 100.0);
                assert_eq!(d.asks[0].qty, 2.0);
            }
            _ => panic!("expected depth event"),
        }
    }

    #[test]
    fn decodes_trade_event() {
        let payload = br#"{
            "stream": "ethusdt@trade",
            "data": {"s": "ETHUSDT", "t": 42, "p": "2000.5", "q": "0.1", "T": 123, "m": true, "E": 124}
        }"#;
        let event = decode(payload).unwrap();
        assert!(matches!(event, MarketEvent::Trade(_)));
    }

    #[test]
    fn rejects_malformed_payload() {
        let err = decode(b"not json").unwrap_err();
        assert!(matches!(err, AnalyticsError::MalformedEnvelope(_)));
    }

    #[test]
    fn propagates_trace_context() {
        let payload = br#"{
            "stream": "btcusdt@depth",
            "data": {"s": "BTCUSDT", "E": 1, "U": 1, "u": 2, "bids": [["100.0","1.0"]], "asks": [["100.5","1.0"]]},
            "_otel_trace_context": {"traceparent": "00-abc-def-01"}
        }"#;
        let event = decode(payload).unwrap();
        let trace = trace_of(&event).unwrap();
        assert_eq!(trace.traceparent.as_deref(), Some("00-abc-def-01"));
    }
}
