use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => dec!(1),
            Side::Sell => dec!(-1),
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Still resting on the venue.
    pub fn is_live(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: String,
    pub client_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Decimal,
    pub stop_price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub reduce_only: bool,
    pub close_position: bool,
    pub time: i64,
    pub update_time: i64,
}

#[derive(Debug, Clone)]
pub struct NewOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
    pub close_position: bool,
    pub client_id: Option<String>,
}

impl NewOrderRequest {
    pub fn market(symbol: &str, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: Some(quantity),
            price: None,
            stop_price: None,
            reduce_only: false,
            close_position: false,
            client_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketType {
    Spot,
    Perp,
}

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_profit: Decimal,
}

impl Position {
    /// Dust threshold below which a position counts as flat.
    pub fn is_flat(&self) -> bool {
        self.position_amt.abs() <= dec!(0.00001)
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub market_type: MarketType,
    pub equity: Decimal,
    pub available_balance: Decimal,
    pub positions: Vec<Position>,
}

impl Account {
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}

#[derive(Debug, Clone)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub ts_ms: i64,
}

/// One price level as delivered by the adapter depth subscription.
#[derive(Debug, Clone)]
pub struct BookLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

/// Top-of-book depth from the adapter (bids descending, asks ascending).
#[derive(Debug, Clone)]
pub struct MarketDepth {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub ts_ms: i64,
}

impl MarketDepth {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / dec!(2)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Precision {
    pub price_tick: Decimal,
    pub qty_step: Decimal,
}
