use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;

use crate::exchange::error::ExchangeError;
use crate::exchange::types::{
    Account, BookLevel, MarketDepth, MarketType, NewOrderRequest, Order, OrderStatus, OrderType,
    Position, Precision, Side, Ticker,
};
use crate::exchange::ExchangeAdapter;
use crate::feed::now_ms;
use crate::signal::series::Candle;

/// In-process venue: market orders fill instantly at the mark price,
/// stop orders rest in the open-order list. Tests and the demo binary
/// drive the market by pushing depth/ticker/account frames.
pub struct SimExchange {
    symbol: String,
    market_type: MarketType,
    account_tx: broadcast::Sender<Account>,
    orders_tx: broadcast::Sender<Vec<Order>>,
    depth_tx: broadcast::Sender<MarketDepth>,
    ticker_tx: broadcast::Sender<Ticker>,
    kline_tx: broadcast::Sender<Candle>,
    state: Mutex<SimState>,
}

struct SimState {
    next_id: u64,
    mark_price: Decimal,
    position_amt: Decimal,
    entry_price: Decimal,
    open_orders: Vec<Order>,
    submissions: Vec<NewOrderRequest>,
    fail_next: Option<ExchangeError>,
}

impl SimExchange {
    pub fn new(symbol: &str) -> Self {
        Self::with_market_type(symbol, MarketType::Perp)
    }

    pub fn with_market_type(symbol: &str, market_type: MarketType) -> Self {
        let (account_tx, _) = broadcast::channel(256);
        let (orders_tx, _) = broadcast::channel(256);
        let (depth_tx, _) = broadcast::channel(256);
        let (ticker_tx, _) = broadcast::channel(256);
        let (kline_tx, _) = broadcast::channel(256);

        Self {
            symbol: symbol.to_string(),
            market_type,
            account_tx,
            orders_tx,
            depth_tx,
            ticker_tx,
            kline_tx,
            state: Mutex::new(SimState {
                next_id: 1,
                mark_price: dec!(0),
                position_amt: dec!(0),
                entry_price: dec!(0),
                open_orders: Vec::new(),
                submissions: Vec::new(),
                fail_next: None,
            }),
        }
    }

    /* ---------- test / demo drivers ---------- */

    pub fn push_depth(&self, bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) {
        let to_levels = |side: Vec<(Decimal, Decimal)>| {
            side.into_iter()
                .map(|(price, qty)| BookLevel { price, qty })
                .collect()
        };
        let _ = self.depth_tx.send(MarketDepth {
            symbol: self.symbol.clone(),
            bids: to_levels(bids),
            asks: to_levels(asks),
            ts_ms: now_ms(),
        });
    }

    pub fn push_ticker(&self, last_price: Decimal) {
        {
            let mut state = self.state.lock().unwrap();
            state.mark_price = last_price;
        }
        let _ = self.ticker_tx.send(Ticker {
            symbol: self.symbol.clone(),
            last_price,
            ts_ms: now_ms(),
        });
    }

    pub fn push_kline(&self, candle: Candle) {
        let _ = self.kline_tx.send(candle);
    }

    pub fn set_position(&self, amt: Decimal, entry_price: Decimal) {
        {
            let mut state = self.state.lock().unwrap();
            state.position_amt = amt;
            state.entry_price = entry_price;
        }
        self.publish_account();
    }

    pub fn fail_next_order(&self, err: ExchangeError) {
        self.state.lock().unwrap().fail_next = Some(err);
    }

    pub fn submissions(&self) -> Vec<NewOrderRequest> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn position_amt(&self) -> Decimal {
        self.state.lock().unwrap().position_amt
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.state.lock().unwrap().open_orders.clone()
    }

    pub fn publish_account(&self) {
        let account = self.account_snapshot();
        let _ = self.account_tx.send(account);
    }

    pub fn publish_orders(&self) {
        let orders = self.state.lock().unwrap().open_orders.clone();
        let _ = self.orders_tx.send(orders);
    }

    fn account_snapshot(&self) -> Account {
        let state = self.state.lock().unwrap();
        Account {
            market_type: self.market_type,
            equity: dec!(10000),
            available_balance: dec!(10000),
            positions: vec![Position {
                symbol: self.symbol.clone(),
                position_amt: state.position_amt,
                entry_price: state.entry_price,
                mark_price: state.mark_price,
                unrealized_profit: (state.mark_price - state.entry_price) * state.position_amt,
            }],
        }
    }

    fn apply_market_fill(state: &mut SimState, side: Side, qty: Decimal) {
        let signed = qty * side.sign();
        let prev = state.position_amt;
        state.position_amt += signed;

        // entering or adding sets entry at mark, full close resets it
        if prev == dec!(0) || prev.signum() == signed.signum() {
            state.entry_price = state.mark_price;
        } else if state.position_amt == dec!(0) {
            state.entry_price = dec!(0);
        }
    }
}

#[async_trait]
impl ExchangeAdapter for SimExchange {
    fn id(&self) -> &str {
        "sim"
    }

    fn start(&self) {
        self.publish_account();
        self.publish_orders();
    }

    fn subscribe_account(&self) -> broadcast::Receiver<Account> {
        self.account_tx.subscribe()
    }

    fn subscribe_orders(&self) -> broadcast::Receiver<Vec<Order>> {
        self.orders_tx.subscribe()
    }

    fn subscribe_depth(&self, _symbol: &str) -> broadcast::Receiver<MarketDepth> {
        self.depth_tx.subscribe()
    }

    fn subscribe_ticker(&self, _symbol: &str) -> broadcast::Receiver<Ticker> {
        self.ticker_tx.subscribe()
    }

    fn subscribe_klines(&self, _symbol: &str, _interval: &str) -> broadcast::Receiver<Candle> {
        self.kline_tx.subscribe()
    }

    async fn create_order(&self, req: NewOrderRequest) -> Result<Order, ExchangeError> {
        let order = {
            let mut state = self.state.lock().unwrap();

            if let Some(err) = state.fail_next.take() {
                return Err(err);
            }

            state.submissions.push(req.clone());

            let id = state.next_id;
            state.next_id += 1;

            let qty = req.quantity.unwrap_or(dec!(0));
            let filled = req.order_type == OrderType::Market;
            if filled {
                Self::apply_market_fill(&mut state, req.side, qty);
            }

            let order = Order {
                order_id: id.to_string(),
                client_id: req
                    .client_id
                    .clone()
                    .unwrap_or_else(|| format!("sim-{id}")),
                symbol: req.symbol.clone(),
                side: req.side,
                order_type: req.order_type,
                status: if filled {
                    OrderStatus::Filled
                } else {
                    OrderStatus::New
                },
                price: req.price.unwrap_or(state.mark_price),
                stop_price: req.stop_price.unwrap_or(dec!(0)),
                orig_qty: qty,
                executed_qty: if filled { qty } else { dec!(0) },
                reduce_only: req.reduce_only,
                close_position: req.close_position,
                time: now_ms(),
                update_time: now_ms(),
            };

            if !filled {
                state.open_orders.push(order.clone());
            }
            order
        };

        self.publish_account();
        self.publish_orders();
        Ok(order)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let found = {
            let mut state = self.state.lock().unwrap();
            let before = state.open_orders.len();
            state.open_orders.retain(|o| o.order_id != order_id);
            state.open_orders.len() != before
        };

        if !found {
            return Err(ExchangeError::UnknownOrder {
                order_id: order_id.to_string(),
            });
        }
        self.publish_orders();
        Ok(())
    }

    async fn cancel_orders(&self, symbol: &str, order_ids: &[String]) -> Result<(), ExchangeError> {
        for id in order_ids {
            self.cancel_order(symbol, id).await?;
        }
        Ok(())
    }

    async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), ExchangeError> {
        self.state.lock().unwrap().open_orders.clear();
        self.publish_orders();
        Ok(())
    }

    async fn query_account_snapshot(&self) -> Result<Option<Account>, ExchangeError> {
        Ok(Some(self.account_snapshot()))
    }

    fn precision(&self, _symbol: &str) -> Option<Precision> {
        Some(Precision {
            price_tick: dec!(0.01),
            qty_step: dec!(0.001),
        })
    }

    fn supports_stop_orders(&self) -> bool {
        true
    }

    fn supports_trailing_stops(&self) -> bool {
        false
    }
}
