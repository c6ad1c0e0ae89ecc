//! Signal to trade-order normalizer.

use uuid::Uuid;

use crate::models::{Action, OrderSide, OrderType, PositionType, Signal, TraceContext, TradeOrder};

pub fn normalize(signal: Signal, trace: Option<TraceContext>) -> TradeOrder {
    let side = match signal.action {
        Action::Buy => OrderSide::Buy,
        Action::Sell => OrderSide::Sell,
        Action::Hold => OrderSide::Buy,
    };
    let position_type = match signal.action {
        Action::Sell => PositionType::Short,
        _ => PositionType::Long,
    };

    TradeOrder {
        order_id: Uuid::now_v7().to_string(),
        symbol: signal.symbol,
        side,
        order_type: OrderType::Market,
        quantity: 0.0,
        position_type,
        source_strategy_id: signal.strategy_id,
        source_signal_id: format!("sig-{}", Uuid::now_v7()),
        confidence: signal.confidence,
        trace: trace.or(signal.trace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_signal(action: Action) -> Signal {
        Signal {
            strategy_id: "spread_liquidity".into(),
            symbol: "BTCUSDT".into(),
            action,
            confidence: 0.8,
            price: 100.0,
            stop_loss: 99.0,
            take_profit: 102.0,
            indicators: HashMap::new(),
            metadata: HashMap::new(),
            generated_at: 0,
            trace: None,
        }
    }

    #[test]
    fn buy_signal_maps_to_long_position() {
        let order = normalize(sample_signal(Action::Buy), None);
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.position_type, PositionType::Long);
    }

    #[test]
    fn sell_signal_maps_to_short_position() {
        let order = normalize(sample_signal(Action::Sell), None);
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.position_type, PositionType::Short);
    }

    #[test]
    fn order_ids_are_unique_and_time_sortable() {
        let a = normalize(sample_signal(Action::Buy), None);
        let b = normalize(sample_signal(Action::Buy), None);
        assert_ne!(a.order_id, b.order_id);
    }
}
