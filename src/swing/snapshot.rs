use rust_decimal::Decimal;

use crate::exchange::types::{MarketDepth, Order, Position, Ticker};

use super::logic::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disabled,
    Initializing,
    Observing,
    WaitingOpenShort,
    WaitingOpenLong,
    WaitingCloseShort,
    WaitingCloseLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Overbought,
    Oversold,
    Neutral,
    Unknown,
}

impl Zone {
    pub fn of(rsi: Option<f64>, high: f64, low: f64) -> Zone {
        match rsi {
            Some(v) if v >= high => Zone::Overbought,
            Some(v) if v <= low => Zone::Oversold,
            Some(_) => Zone::Neutral,
            None => Zone::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradeLogEntry {
    pub ts_ms: i64,
    pub message: String,
}

/// Immutable view of the engine, emitted on every state change.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub ready: bool,
    pub symbol: String,
    pub direction: Direction,
    pub last_price: Option<Decimal>,
    pub phase: Phase,
    pub signal_symbol: String,
    pub signal_price: f64,
    pub rsi: Option<f64>,
    pub zone: Zone,
    pub armed_short_entry: bool,
    pub armed_short_exit: bool,
    pub armed_long_entry: bool,
    pub armed_long_exit: bool,
    pub position: Option<Position>,
    pub pnl: Decimal,
    pub session_volume: Decimal,
    pub stop_loss_target: Option<Decimal>,
    pub kill_switch_engaged: bool,
    pub open_orders: Vec<Order>,
    pub depth: Option<MarketDepth>,
    pub ticker: Option<Ticker>,
    pub trade_log: Vec<TradeLogEntry>,
    pub error: Option<String>,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_boundaries() {
        assert_eq!(Zone::of(Some(70.0), 70.0, 30.0), Zone::Overbought);
        assert_eq!(Zone::of(Some(69.9), 70.0, 30.0), Zone::Neutral);
        assert_eq!(Zone::of(Some(30.0), 70.0, 30.0), Zone::Oversold);
        assert_eq!(Zone::of(Some(30.1), 70.0, 30.0), Zone::Neutral);
        assert_eq!(Zone::of(None, 70.0, 30.0), Zone::Unknown);
    }
}
