use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::depth::tracker::{DepthTracker, DepthUpdateSnapshot};
use crate::exchange::types::{Account, MarketDepth, MarketType, Order, Position, Side, Ticker};
use crate::exchange::ExchangeAdapter;
use crate::feed::now_ms;
use crate::oms::coordinator::{CoordinatorConfig, OrderCoordinator, SlippageGuard};
use crate::oms::locks::Slot;
use crate::oms::throttle::{CycleGate, RateLimitController, ThrottleConfig};
use crate::signal::tracker::{RsiSnapshot, RsiTracker};

use super::config::SwingConfig;
use super::logic::{step, SwingAction, SwingState, SwingThresholds, SwingTick};
use super::snapshot::{EngineSnapshot, Phase, TradeLogEntry, Zone};

/// Dust threshold for treating an adapter position as flat.
const POSITION_EPS: Decimal = dec!(0.00001);

/// Ties the trackers, the decision core and the order coordinator to one
/// exchange adapter. Single task owns all mutable state; observers get
/// immutable snapshots over a broadcast channel.
pub struct SwingEngine {
    cfg: SwingConfig,
    adapter: Arc<dyn ExchangeAdapter>,
    rsi_tracker: Arc<RsiTracker>,
    depth_tracker: Option<Arc<DepthTracker>>,
    clock: Arc<dyn Clock>,
    snapshot_tx: broadcast::Sender<EngineSnapshot>,
    stop_tx: watch::Sender<bool>,
    started: AtomicBool,
}

impl SwingEngine {
    pub fn new(
        cfg: SwingConfig,
        adapter: Arc<dyn ExchangeAdapter>,
        rsi_tracker: Arc<RsiTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (snapshot_tx, _) = broadcast::channel(1024);
        let (stop_tx, _) = watch::channel(false);
        Self {
            cfg,
            adapter,
            rsi_tracker,
            depth_tracker: None,
            clock,
            snapshot_tx,
            stop_tx,
            started: AtomicBool::new(false),
        }
    }

    /// Attach an exchange-side depth tracker; its top of book is
    /// preferred over the adapter's depth subscription.
    pub fn with_depth_tracker(mut self, tracker: Arc<DepthTracker>) -> Self {
        self.depth_tracker = Some(tracker);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.adapter.start();
        self.rsi_tracker.start();
        if let Some(tracker) = &self.depth_tracker {
            tracker.start();
        }

        let core = EngineCore::new(
            self.cfg.clone(),
            self.adapter.clone(),
            self.clock.clone(),
            self.snapshot_tx.clone(),
        );

        let adapter = self.adapter.clone();
        let rsi_tracker = self.rsi_tracker.clone();
        let depth_tracker = self.depth_tracker.clone();
        let symbol = self.cfg.symbol.clone();
        let poll_ms = self.cfg.poll_interval_ms;
        let stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            run(
                core,
                adapter,
                rsi_tracker,
                depth_tracker,
                symbol,
                poll_ms,
                stop_rx,
            )
            .await;
        });
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        self.rsi_tracker.stop();
        if let Some(tracker) = &self.depth_tracker {
            tracker.stop();
        }
    }
}

async fn run(
    mut core: EngineCore,
    adapter: Arc<dyn ExchangeAdapter>,
    rsi_tracker: Arc<RsiTracker>,
    depth_tracker: Option<Arc<DepthTracker>>,
    symbol: String,
    poll_ms: u64,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut account_rx = adapter.subscribe_account();
    let mut orders_rx = adapter.subscribe_orders();
    let mut depth_rx = adapter.subscribe_depth(&symbol);
    let mut ticker_rx = adapter.subscribe_ticker(&symbol);
    let mut rsi_rx = rsi_tracker.subscribe();
    let mut book_rx = depth_tracker.as_ref().map(|t| t.subscribe());

    let mut tick = tokio::time::interval(Duration::from_millis(poll_ms.max(50)));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("swing[{symbol}]: engine loop started");

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    break;
                }
            }

            result = account_rx.recv() => {
                if let Ok(account) = result {
                    core.on_account(account);
                }
            }

            result = orders_rx.recv() => {
                if let Ok(orders) = result {
                    core.on_orders(orders);
                }
            }

            result = depth_rx.recv() => {
                if let Ok(depth) = result {
                    core.on_depth(depth);
                }
            }

            result = ticker_rx.recv() => {
                if let Ok(ticker) = result {
                    core.on_ticker(ticker);
                }
            }

            result = rsi_rx.recv() => {
                if let Ok(snapshot) = result {
                    core.on_rsi(snapshot);
                }
            }

            result = recv_book(&mut book_rx) => {
                if let Some(book) = result {
                    core.on_book(book);
                }
            }

            _ = tick.tick() => {
                core.on_tick().await;
            }
        }
    }

    core.emit();
    info!("swing[{symbol}]: engine loop stopped");
}

/// Select-friendly receive on an optional subscription.
async fn recv_book(
    rx: &mut Option<broadcast::Receiver<DepthUpdateSnapshot>>,
) -> Option<DepthUpdateSnapshot> {
    match rx {
        Some(rx) => rx.recv().await.ok(),
        None => std::future::pending().await,
    }
}

pub(crate) struct EngineCore {
    cfg: SwingConfig,
    /// Effective tick: venue precision when known, config otherwise.
    price_tick: Decimal,
    thresholds: SwingThresholds,
    coordinator: OrderCoordinator,
    throttle: RateLimitController,
    snapshot_tx: broadcast::Sender<EngineSnapshot>,

    swing: SwingState,
    account: Option<Account>,
    open_orders: Vec<Order>,
    orders_seen: bool,
    depth: Option<MarketDepth>,
    ticker: Option<Ticker>,
    rsi: Option<RsiSnapshot>,
    book: Option<DepthUpdateSnapshot>,

    supports_stops: bool,
    disabled: bool,
    error: Option<String>,
    pnl: Decimal,
    session_volume: Decimal,
    stop_loss_target: Option<Decimal>,
    kill_switch_engaged: bool,
    trade_log: VecDeque<TradeLogEntry>,
}

impl EngineCore {
    pub(crate) fn new(
        cfg: SwingConfig,
        adapter: Arc<dyn ExchangeAdapter>,
        clock: Arc<dyn Clock>,
        snapshot_tx: broadcast::Sender<EngineSnapshot>,
    ) -> Self {
        // venue precision overrides the configured steps when available
        let (price_tick, qty_step) = match adapter.precision(&cfg.symbol) {
            Some(p) => (p.price_tick, p.qty_step),
            None => (cfg.price_tick, cfg.qty_step),
        };

        let supports_stops = adapter.supports_stop_orders();
        let coordinator = OrderCoordinator::new(
            CoordinatorConfig {
                symbol: cfg.symbol.clone(),
                price_tick,
                qty_step,
                lock_ttl: Duration::from_secs(30),
                stop_debounce: Duration::from_millis(cfg.stop_debounce_ms),
            },
            adapter,
            clock.clone(),
        );
        let throttle = RateLimitController::new(ThrottleConfig::default(), clock);
        let thresholds = SwingThresholds {
            direction: cfg.direction,
            rsi_high: cfg.rsi_high,
            rsi_low: cfg.rsi_low,
        };

        Self {
            cfg,
            price_tick,
            thresholds,
            coordinator,
            throttle,
            snapshot_tx,
            swing: SwingState::default(),
            account: None,
            open_orders: Vec::new(),
            orders_seen: false,
            depth: None,
            ticker: None,
            rsi: None,
            book: None,
            supports_stops,
            disabled: false,
            error: None,
            pnl: dec!(0),
            session_volume: dec!(0),
            stop_loss_target: None,
            kill_switch_engaged: false,
            trade_log: VecDeque::new(),
        }
    }

    /* ---------- stream handlers ---------- */

    pub(crate) fn on_account(&mut self, account: Account) {
        if account.market_type == MarketType::Spot
            && self.thresholds.direction.allows_short()
            && !self.disabled
        {
            let reason = "short direction is not tradable on a spot account";
            self.disabled = true;
            self.error = Some(reason.to_string());
            error!("swing[{}]: {reason}", self.cfg.symbol);
            self.log("trading disabled: spot account cannot short");
        }
        self.account = Some(account);
        self.emit();
    }

    pub(crate) fn on_orders(&mut self, orders: Vec<Order>) {
        self.orders_seen = true;
        self.coordinator.reconcile(&orders);
        self.open_orders = orders;
        self.emit();
    }

    pub(crate) fn on_depth(&mut self, depth: MarketDepth) {
        self.depth = Some(depth);
    }

    pub(crate) fn on_ticker(&mut self, ticker: Ticker) {
        self.ticker = Some(ticker);
    }

    pub(crate) fn on_rsi(&mut self, snapshot: RsiSnapshot) {
        self.rsi = Some(snapshot);
        self.emit();
    }

    pub(crate) fn on_book(&mut self, book: DepthUpdateSnapshot) {
        self.book = Some(book);
    }

    /* ---------- cycle ---------- */

    pub(crate) async fn on_tick(&mut self) {
        match self.throttle.before_cycle() {
            CycleGate::Run => {}
            CycleGate::Paused | CycleGate::Skip => {
                self.emit();
                return;
            }
        }

        if self.disabled || !self.is_ready() {
            self.emit();
            return;
        }

        let position = self.current_position();
        let (top_bid, top_ask) = self.top_of_book();
        self.pnl = near_touch_pnl(&position, top_bid, top_ask);

        let tick = SwingTick {
            rsi: self.rsi.as_ref().and_then(|r| r.rsi),
            position_amt: position.position_amt.to_f64().unwrap_or(0.0),
            pnl: self.pnl.to_f64().unwrap_or(0.0),
        };

        let (next, actions) = step(self.swing, &self.thresholds, &tick);
        self.swing = next;

        let mut had_rate_limit = false;
        for action in actions {
            if self.execute(action, &position, top_bid, top_ask).await {
                had_rate_limit = true;
            }
        }

        if self.handle_stop_loss(&position).await {
            had_rate_limit = true;
        }

        if had_rate_limit {
            self.throttle.register_rate_limit("order_submission");
        }
        self.throttle.on_cycle_complete(had_rate_limit);
        self.emit();
    }

    /// Returns true when the action ran into a venue rate limit.
    async fn execute(
        &mut self,
        action: SwingAction,
        position: &Position,
        top_bid: Option<Decimal>,
        top_ask: Option<Decimal>,
    ) -> bool {
        let mark = self.reference_price().unwrap_or(dec!(0));
        match action {
            SwingAction::OpenShort => {
                let guard = SlippageGuard {
                    mark_price: mark,
                    expected_price: top_bid.unwrap_or(mark),
                    max_pct: self.cfg.max_close_slippage_pct,
                };
                let result = self
                    .coordinator
                    .place_market_order(Side::Sell, self.cfg.trade_amount, Slot::Entry, Some(&guard))
                    .await;
                self.settle("open short", result.map(Some), mark)
            }
            SwingAction::OpenLong => {
                let guard = SlippageGuard {
                    mark_price: mark,
                    expected_price: top_ask.unwrap_or(mark),
                    max_pct: self.cfg.max_close_slippage_pct,
                };
                let result = self
                    .coordinator
                    .place_market_order(Side::Buy, self.cfg.trade_amount, Slot::Entry, Some(&guard))
                    .await;
                self.settle("open long", result.map(Some), mark)
            }
            SwingAction::ClosePosition => {
                let side = if position.position_amt > dec!(0) {
                    Side::Sell
                } else {
                    Side::Buy
                };
                let guard = SlippageGuard {
                    mark_price: mark,
                    expected_price: position.mark_price,
                    max_pct: self.cfg.max_close_slippage_pct,
                };
                let result = self
                    .coordinator
                    .market_close(side, position.position_amt.abs(), Some(&guard))
                    .await;
                self.settle("close position", result, mark)
            }
        }
    }

    /// Always-on kill-switch plus venue-side stop maintenance.
    /// Returns true on a rate-limit error.
    async fn handle_stop_loss(&mut self, position: &Position) -> bool {
        if position.position_amt.abs() <= POSITION_EPS {
            self.stop_loss_target = None;
            self.kill_switch_engaged = false;
            return false;
        }
        if position.entry_price <= dec!(0) {
            return false;
        }

        let is_long = position.position_amt > dec!(0);
        let pct = self.cfg.stop_loss_pct.max(dec!(0));
        let stop_price = if is_long {
            position.entry_price * (dec!(1) - pct)
        } else {
            position.entry_price * (dec!(1) + pct)
        };
        self.stop_loss_target = Some(stop_price);

        let Some(reference) = self.reference_price() else {
            return false;
        };
        let tick = self.price_tick;

        let breached = if is_long {
            reference <= stop_price + tick
        } else {
            reference >= stop_price - tick
        };

        if breached {
            self.kill_switch_engaged = true;
            warn!(
                "swing[{}]: kill switch at {reference} (stop {stop_price})",
                self.cfg.symbol
            );
            self.log(&format!(
                "kill switch: closing at {reference}, stop target {stop_price}"
            ));
            let side = if is_long { Side::Sell } else { Side::Buy };
            // no guard: the local close must always go through
            let result = self
                .coordinator
                .market_close(side, position.position_amt.abs(), None)
                .await;
            return self.settle("kill switch close", result, reference);
        }
        self.kill_switch_engaged = false;

        if !self.supports_stops {
            return false;
        }

        let close_side = if is_long { Side::Sell } else { Side::Buy };
        let has_stop = self.open_orders.iter().any(|o| {
            o.order_type == crate::exchange::types::OrderType::StopMarket
                && o.side == close_side
                && o.status.is_live()
        });
        if has_stop {
            return false;
        }

        let result = self
            .coordinator
            .place_stop_loss_order(
                close_side,
                stop_price,
                position.position_amt.abs(),
                reference,
                None,
            )
            .await;
        match result {
            Ok(Some(order)) => {
                self.log(&format!(
                    "stop order {} placed at {}",
                    order.order_id, order.stop_price
                ));
                false
            }
            Ok(None) => false,
            Err(err) => {
                let rate_limited = err.is_rate_limit();
                warn!("swing[{}]: stop placement failed: {err}", self.cfg.symbol);
                rate_limited
            }
        }
    }

    /* ---------- helpers ---------- */

    fn settle(
        &mut self,
        label: &str,
        result: Result<Option<Order>, crate::oms::error::OrderError>,
        reference: Decimal,
    ) -> bool {
        match result {
            Ok(Some(order)) => {
                let price = if order.price > dec!(0) {
                    order.price
                } else {
                    reference
                };
                self.session_volume += order.executed_qty.abs() * price;
                self.log(&format!(
                    "{label}: {:?} {} @ {} ({:?})",
                    order.side, order.orig_qty, price, order.status
                ));
                false
            }
            Ok(None) => {
                self.log(&format!("{label}: nothing to do"));
                false
            }
            Err(err) => {
                let rate_limited = err.is_rate_limit();
                warn!("swing[{}]: {label} failed: {err}", self.cfg.symbol);
                self.log(&format!("{label} failed: {err}"));
                rate_limited
            }
        }
    }

    fn is_ready(&self) -> bool {
        let rsi_ready = self
            .rsi
            .as_ref()
            .map(|r| r.is_stable && r.rsi.is_some())
            .unwrap_or(false);
        self.account.is_some()
            && self.ticker.is_some()
            && self.depth.is_some()
            && self.orders_seen
            && rsi_ready
    }

    fn current_position(&self) -> Position {
        self.account
            .as_ref()
            .and_then(|a| a.position(&self.cfg.symbol).cloned())
            .unwrap_or_else(|| Position {
                symbol: self.cfg.symbol.clone(),
                position_amt: dec!(0),
                entry_price: dec!(0),
                mark_price: dec!(0),
                unrealized_profit: dec!(0),
            })
    }

    /// Exchange-side tracker first, adapter depth second.
    fn top_of_book(&self) -> (Option<Decimal>, Option<Decimal>) {
        if let Some(book) = &self.book {
            return (
                book.best_bid.map(|(p, _)| p),
                book.best_ask.map(|(p, _)| p),
            );
        }
        match &self.depth {
            Some(d) => (d.best_bid(), d.best_ask()),
            None => (None, None),
        }
    }

    fn reference_price(&self) -> Option<Decimal> {
        let (bid, ask) = self.top_of_book();
        if let (Some(b), Some(a)) = (bid, ask) {
            return Some((b + a) / dec!(2));
        }
        self.ticker.as_ref().map(|t| t.last_price)
    }

    fn log(&mut self, message: &str) {
        while self.trade_log.len() >= self.cfg.max_log_entries.max(1) {
            self.trade_log.pop_front();
        }
        self.trade_log.push_back(TradeLogEntry {
            ts_ms: now_ms(),
            message: message.to_string(),
        });
    }

    fn phase(&self) -> Phase {
        if self.disabled {
            return Phase::Disabled;
        }
        if !self.is_ready() {
            return Phase::Initializing;
        }
        let position = self.current_position();
        if position.position_amt.abs() <= POSITION_EPS {
            if self.swing.armed_short_entry {
                return Phase::WaitingOpenShort;
            }
            if self.swing.armed_long_entry {
                return Phase::WaitingOpenLong;
            }
        } else if position.position_amt < dec!(0) && self.swing.armed_short_exit {
            return Phase::WaitingCloseShort;
        } else if position.position_amt > dec!(0) && self.swing.armed_long_exit {
            return Phase::WaitingCloseLong;
        }
        Phase::Observing
    }

    pub(crate) fn emit(&mut self) {
        let rsi_value = self.rsi.as_ref().and_then(|r| r.rsi);
        let snapshot = EngineSnapshot {
            ready: self.is_ready(),
            symbol: self.cfg.symbol.clone(),
            direction: self.cfg.direction,
            last_price: self.ticker.as_ref().map(|t| t.last_price),
            phase: self.phase(),
            signal_symbol: self.cfg.signal_symbol.clone(),
            signal_price: self.rsi.as_ref().map(|r| r.last_close).unwrap_or(0.0),
            rsi: rsi_value,
            zone: Zone::of(rsi_value, self.cfg.rsi_high, self.cfg.rsi_low),
            armed_short_entry: self.swing.armed_short_entry,
            armed_short_exit: self.swing.armed_short_exit,
            armed_long_entry: self.swing.armed_long_entry,
            armed_long_exit: self.swing.armed_long_exit,
            position: self
                .account
                .as_ref()
                .and_then(|a| a.position(&self.cfg.symbol).cloned()),
            pnl: self.pnl,
            session_volume: self.session_volume,
            stop_loss_target: self.stop_loss_target,
            kill_switch_engaged: self.kill_switch_engaged,
            open_orders: self.open_orders.clone(),
            depth: self.depth.clone(),
            ticker: self.ticker.clone(),
            trade_log: self.trade_log.iter().cloned().collect(),
            error: self.error.clone(),
            updated_at: now_ms(),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }
}

fn near_touch_pnl(position: &Position, top_bid: Option<Decimal>, top_ask: Option<Decimal>) -> Decimal {
    let amt = position.position_amt;
    if amt.abs() <= POSITION_EPS || position.entry_price <= dec!(0) {
        return dec!(0);
    }
    if amt > dec!(0) {
        match top_bid {
            Some(bid) => (bid - position.entry_price) * amt,
            None => position.unrealized_profit,
        }
    } else {
        match top_ask {
            Some(ask) => (position.entry_price - ask) * amt.abs(),
            None => position.unrealized_profit,
        }
    }
}
