use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::logic::Direction;

/// Swing strategy configuration.
#[derive(Debug, Clone)]
pub struct SwingConfig {
    /// Traded symbol.
    pub symbol: String,
    pub direction: Direction,
    /// Base quantity per entry.
    pub trade_amount: Decimal,
    pub poll_interval_ms: u64,
    pub rsi_period: usize,
    pub rsi_high: f64,
    pub rsi_low: f64,
    /// Symbol the RSI signal is computed on; may differ from the traded one.
    pub signal_symbol: String,
    pub signal_interval: String,
    pub stop_loss_pct: Decimal,
    pub max_close_slippage_pct: Decimal,
    pub price_tick: Decimal,
    pub qty_step: Decimal,
    pub max_log_entries: usize,
    pub stop_debounce_ms: u64,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Short,
            trade_amount: dec!(0.001),
            poll_interval_ms: 500,
            rsi_period: 14,
            rsi_high: 70.0,
            rsi_low: 30.0,
            signal_symbol: "ETHBTC".to_string(),
            signal_interval: "4h".to_string(),
            stop_loss_pct: dec!(0.05),
            max_close_slippage_pct: dec!(0.05),
            price_tick: dec!(0.01),
            qty_step: dec!(0.001),
            max_log_entries: 100,
            stop_debounce_ms: 5_000,
        }
    }
}

impl SwingConfig {
    /// Environment overrides on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SWING_SYMBOL") {
            config.symbol = v;
        }
        if let Ok(v) = std::env::var("SWING_DIRECTION") {
            if let Some(d) = Direction::parse(&v) {
                config.direction = d;
            }
        }
        if let Ok(v) = std::env::var("SWING_TRADE_AMOUNT") {
            if let Ok(d) = v.parse() {
                config.trade_amount = d;
            }
        }
        if let Ok(v) = std::env::var("SWING_POLL_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                config.poll_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("SWING_RSI_PERIOD") {
            if let Ok(n) = v.parse() {
                config.rsi_period = n;
            }
        }
        if let Ok(v) = std::env::var("SWING_RSI_HIGH") {
            if let Ok(f) = v.parse() {
                config.rsi_high = f;
            }
        }
        if let Ok(v) = std::env::var("SWING_RSI_LOW") {
            if let Ok(f) = v.parse() {
                config.rsi_low = f;
            }
        }
        if let Ok(v) = std::env::var("SWING_SIGNAL_SYMBOL") {
            config.signal_symbol = v;
        }
        if let Ok(v) = std::env::var("SWING_SIGNAL_INTERVAL") {
            config.signal_interval = v;
        }
        if let Ok(v) = std::env::var("SWING_STOP_LOSS_PCT") {
            if let Ok(d) = v.parse() {
                config.stop_loss_pct = d;
            }
        }
        if let Ok(v) = std::env::var("SWING_MAX_CLOSE_SLIPPAGE_PCT") {
            if let Ok(d) = v.parse() {
                config.max_close_slippage_pct = d;
            }
        }
        if let Ok(v) = std::env::var("SWING_PRICE_TICK") {
            if let Ok(d) = v.parse() {
                config.price_tick = d;
            }
        }
        if let Ok(v) = std::env::var("SWING_QTY_STEP") {
            if let Ok(d) = v.parse() {
                config.qty_step = d;
            }
        }
        if let Ok(v) = std::env::var("SWING_MAX_LOG_ENTRIES") {
            if let Ok(n) = v.parse() {
                config.max_log_entries = n;
            }
        }
        if let Ok(v) = std::env::var("SWING_STOP_DEBOUNCE_MS") {
            if let Ok(n) = v.parse() {
                config.stop_debounce_ms = n;
            }
        }

        config
    }
}
