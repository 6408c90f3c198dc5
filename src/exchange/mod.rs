pub mod error;
pub mod sim;
pub mod types;

use async_trait::async_trait;
use tokio::sync::broadcast;

use self::error::ExchangeError;
use self::types::{Account, MarketDepth, NewOrderRequest, Order, Precision, Ticker};
use crate::signal::series::Candle;

/// Venue abstraction the engine trades through. Subscriptions hand out
/// broadcast receivers; each stream delivers at least one full snapshot
/// shortly after `start()`.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn id(&self) -> &str;

    /// Spawn the adapter's own tasks (sockets, pollers). Idempotent.
    fn start(&self);

    fn subscribe_account(&self) -> broadcast::Receiver<Account>;

    /// Full open-order list on every change.
    fn subscribe_orders(&self) -> broadcast::Receiver<Vec<Order>>;

    fn subscribe_depth(&self, symbol: &str) -> broadcast::Receiver<MarketDepth>;

    fn subscribe_ticker(&self, symbol: &str) -> broadcast::Receiver<Ticker>;

    fn subscribe_klines(&self, symbol: &str, interval: &str) -> broadcast::Receiver<Candle>;

    async fn create_order(&self, req: NewOrderRequest) -> Result<Order, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    async fn cancel_orders(&self, symbol: &str, order_ids: &[String]) -> Result<(), ExchangeError>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError>;

    /// Polled fallback when the account stream is quiet.
    async fn query_account_snapshot(&self) -> Result<Option<Account>, ExchangeError>;

    fn precision(&self, symbol: &str) -> Option<Precision>;

    fn supports_stop_orders(&self) -> bool;

    fn supports_trailing_stops(&self) -> bool;
}
