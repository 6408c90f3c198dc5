use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::exchange::error::ExchangeError;
use crate::exchange::types::{NewOrderRequest, Order, OrderType, Side};
use crate::exchange::ExchangeAdapter;

use super::error::OrderError;
use super::locks::{Slot, SlotLocks};

/// Bounds an order against adverse movement between decision and
/// submission: `mark_price` is the live reference, `expected_price` the
/// price the decision was made at.
#[derive(Debug, Clone, Copy)]
pub struct SlippageGuard {
    pub mark_price: Decimal,
    pub expected_price: Decimal,
    pub max_pct: Decimal,
}

impl SlippageGuard {
    pub fn check(&self, side: Side) -> Result<(), OrderError> {
        if self.expected_price <= dec!(0) {
            return Ok(());
        }
        let exceeded = match side {
            Side::Buy => self.mark_price > self.expected_price * (dec!(1) + self.max_pct),
            Side::Sell => self.mark_price < self.expected_price * (dec!(1) - self.max_pct),
        };
        if exceeded {
            return Err(OrderError::SlippageExceeded {
                mark: self.mark_price,
                expected: self.expected_price,
                max_pct: self.max_pct,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub symbol: String,
    pub price_tick: Decimal,
    pub qty_step: Decimal,
    /// Lock expiry for a dropped submit response.
    pub lock_ttl: Duration,
    /// Window inside which identical stop submissions are dropped.
    pub stop_debounce: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            price_tick: dec!(0.01),
            qty_step: dec!(0.001),
            lock_ttl: Duration::from_secs(30),
            stop_debounce: Duration::from_secs(5),
        }
    }
}

fn snap_down(value: Decimal, step: Decimal) -> Decimal {
    if step <= dec!(0) {
        return value;
    }
    (value / step).floor() * step
}

fn snap_round(value: Decimal, tick: Decimal) -> Decimal {
    if tick <= dec!(0) {
        return value;
    }
    (value / tick).round() * tick
}

/// Serializes order submission per logical slot, guards slippage, and
/// reconciles pending state against the open-order feed.
pub struct OrderCoordinator {
    cfg: CoordinatorConfig,
    adapter: Arc<dyn ExchangeAdapter>,
    clock: Arc<dyn Clock>,
    locks: SlotLocks,
    last_stop: Option<(Side, Decimal, Instant)>,
}

impl OrderCoordinator {
    pub fn new(
        cfg: CoordinatorConfig,
        adapter: Arc<dyn ExchangeAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let locks = SlotLocks::new(clock.clone(), cfg.lock_ttl);
        Self {
            cfg,
            adapter,
            clock,
            locks,
            last_stop: None,
        }
    }

    fn client_id(&self) -> String {
        format!("rip-{}", Uuid::new_v4().simple())
    }

    /// Submit a market order on `slot`. Fails fast when the slot already
    /// has an in-flight submission or the guard trips.
    pub async fn place_market_order(
        &mut self,
        side: Side,
        qty: Decimal,
        slot: Slot,
        guard: Option<&SlippageGuard>,
    ) -> Result<Order, OrderError> {
        if self.locks.is_locked(slot) {
            return Err(OrderError::SlotBusy(slot));
        }
        if let Some(guard) = guard {
            guard.check(side)?;
        }

        let quantized = snap_down(qty, self.cfg.qty_step);
        if quantized <= dec!(0) {
            return Err(OrderError::ZeroQuantity(qty));
        }

        let mut req = NewOrderRequest::market(&self.cfg.symbol, side, quantized);
        req.client_id = Some(self.client_id());

        self.locks.acquire(slot);
        let result = self.adapter.create_order(req).await;
        self.settle_submission(slot, result)
    }

    /// Reduce-only market close. An unknown-order response means the
    /// position was already closed elsewhere and counts as success.
    pub async fn market_close(
        &mut self,
        side: Side,
        qty: Decimal,
        guard: Option<&SlippageGuard>,
    ) -> Result<Option<Order>, OrderError> {
        if let Some(guard) = guard {
            guard.check(side)?;
        }

        let quantized = snap_down(qty, self.cfg.qty_step);
        if quantized <= dec!(0) {
            return Err(OrderError::ZeroQuantity(qty));
        }

        let mut req = NewOrderRequest::market(&self.cfg.symbol, side, quantized);
        req.reduce_only = true;
        req.close_position = true;
        req.client_id = Some(self.client_id());

        match self.adapter.create_order(req).await {
            Ok(order) => Ok(Some(order)),
            Err(err) if err.is_unknown_order() => {
                info!("close {side:?} {quantized}: already gone ({err})");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Place a reduce-only stop-market order on the stop slot.
    /// Resubmissions of the same stop (same side, within one tick,
    /// inside the debounce window) return `Ok(None)`.
    pub async fn place_stop_loss_order(
        &mut self,
        side: Side,
        stop_price: Decimal,
        qty: Decimal,
        _reference_price: Decimal,
        guard: Option<&SlippageGuard>,
    ) -> Result<Option<Order>, OrderError> {
        let stop = snap_round(stop_price, self.cfg.price_tick);

        if let Some((last_side, last_stop, at)) = self.last_stop {
            let within_tick = (stop - last_stop).abs() <= self.cfg.price_tick;
            let within_window = self.clock.now() - at < self.cfg.stop_debounce;
            if last_side == side && within_tick && within_window {
                return Ok(None);
            }
        }

        if self.locks.is_locked(Slot::Stop) {
            return Err(OrderError::SlotBusy(Slot::Stop));
        }
        if let Some(guard) = guard {
            guard.check(side)?;
        }

        let quantized = snap_down(qty, self.cfg.qty_step);
        if quantized <= dec!(0) {
            return Err(OrderError::ZeroQuantity(qty));
        }

        let req = NewOrderRequest {
            symbol: self.cfg.symbol.clone(),
            side,
            order_type: OrderType::StopMarket,
            quantity: Some(quantized),
            price: None,
            stop_price: Some(stop),
            reduce_only: true,
            close_position: false,
            client_id: Some(self.client_id()),
        };

        self.locks.acquire(Slot::Stop);
        let order = self.settle_submission(Slot::Stop, self.adapter.create_order(req).await)?;
        self.last_stop = Some((side, stop, self.clock.now()));
        info!("stop {side:?} placed at {stop} for {quantized}");
        Ok(Some(order))
    }

    /// Drop slot locks whose orders have settled or vanished.
    pub fn reconcile(&mut self, open_orders: &[Order]) {
        self.locks.reconcile(open_orders);
    }

    pub fn is_locked(&self, slot: Slot) -> bool {
        self.locks.is_locked(slot)
    }

    fn settle_submission(
        &mut self,
        slot: Slot,
        result: Result<Order, ExchangeError>,
    ) -> Result<Order, OrderError> {
        match result {
            Ok(order) => {
                if order.status.is_live() {
                    self.locks.set_pending(slot, &order.order_id);
                } else {
                    self.locks.release(slot);
                }
                Ok(order)
            }
            Err(err) => {
                self.locks.release(slot);
                warn!("submission on {slot:?} failed: {err}");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::exchange::sim::SimExchange;
    use crate::exchange::types::OrderStatus;

    fn setup() -> (Arc<SimExchange>, Arc<ManualClock>, OrderCoordinator) {
        let sim = Arc::new(SimExchange::new("BTCUSDT"));
        sim.push_ticker(dec!(100));
        let clock = Arc::new(ManualClock::new());
        let coordinator = OrderCoordinator::new(
            CoordinatorConfig {
                symbol: "BTCUSDT".to_string(),
                price_tick: dec!(0.1),
                qty_step: dec!(0.001),
                lock_ttl: Duration::from_secs(30),
                stop_debounce: Duration::from_secs(5),
            },
            sim.clone(),
            clock.clone(),
        );
        (sim, clock, coordinator)
    }

    #[tokio::test]
    async fn market_order_quantizes_and_fills() {
        let (sim, _clock, mut coordinator) = setup();

        let order = coordinator
            .place_market_order(Side::Buy, dec!(1.23456), Slot::Entry, None)
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.orig_qty, dec!(1.234));
        assert_eq!(sim.position_amt(), dec!(1.234));
        // a filled market order must not leave the slot locked
        assert!(!coordinator.is_locked(Slot::Entry));
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let (_sim, _clock, mut coordinator) = setup();
        let err = coordinator
            .place_market_order(Side::Buy, dec!(0.0001), Slot::Entry, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::ZeroQuantity(_)));
    }

    #[tokio::test]
    async fn slippage_guard_blocks_buy_above_band() {
        let (sim, _clock, mut coordinator) = setup();

        let guard = SlippageGuard {
            mark_price: dec!(106),
            expected_price: dec!(100),
            max_pct: dec!(0.05),
        };
        let err = coordinator
            .place_market_order(Side::Buy, dec!(1), Slot::Entry, Some(&guard))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::SlippageExceeded { .. }));
        assert!(sim.submissions().is_empty());

        // within the band it goes through
        let guard = SlippageGuard {
            mark_price: dec!(104),
            expected_price: dec!(100),
            max_pct: dec!(0.05),
        };
        coordinator
            .place_market_order(Side::Buy, dec!(1), Slot::Entry, Some(&guard))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn slippage_guard_blocks_sell_below_band() {
        let (_sim, _clock, mut coordinator) = setup();
        let guard = SlippageGuard {
            mark_price: dec!(94),
            expected_price: dec!(100),
            max_pct: dec!(0.05),
        };
        let err = coordinator
            .place_market_order(Side::Sell, dec!(1), Slot::Entry, Some(&guard))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::SlippageExceeded { .. }));
    }

    #[tokio::test]
    async fn failed_submission_unlocks_slot() {
        let (sim, _clock, mut coordinator) = setup();
        sim.fail_next_order(ExchangeError::Transport("boom".to_string()));

        let err = coordinator
            .place_market_order(Side::Buy, dec!(1), Slot::Entry, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Exchange(_)));
        assert!(!coordinator.is_locked(Slot::Entry));
    }

    #[tokio::test]
    async fn unknown_order_on_close_counts_as_success() {
        let (sim, _clock, mut coordinator) = setup();
        sim.fail_next_order(ExchangeError::UnknownOrder {
            order_id: "42".to_string(),
        });

        let result = coordinator
            .market_close(Side::Sell, dec!(1), None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn stop_submissions_are_debounced() {
        let (sim, clock, mut coordinator) = setup();

        let placed = coordinator
            .place_stop_loss_order(Side::Sell, dec!(95.04), dec!(1), dec!(100), None)
            .await
            .unwrap();
        assert!(placed.is_some());
        assert_eq!(sim.submissions().len(), 1);
        // stop price snapped to the tick
        assert_eq!(sim.submissions()[0].stop_price, Some(dec!(95.0)));

        // identical stop inside the window: dropped without an error
        let dup = coordinator
            .place_stop_loss_order(Side::Sell, dec!(95.02), dec!(1), dec!(100), None)
            .await
            .unwrap();
        assert!(dup.is_none());
        assert_eq!(sim.submissions().len(), 1);

        // once the window passes, the resting stop still holds the slot
        clock.advance(Duration::from_secs(6));
        let err = coordinator
            .place_stop_loss_order(Side::Sell, dec!(95.0), dec!(1), dec!(100), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::SlotBusy(Slot::Stop)));

        // the stop fills on the venue: reconcile frees the slot
        coordinator.reconcile(&[]);
        let again = coordinator
            .place_stop_loss_order(Side::Sell, dec!(90.0), dec!(1), dec!(100), None)
            .await
            .unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn rate_limit_is_distinguishable() {
        let (sim, _clock, mut coordinator) = setup();
        sim.fail_next_order(ExchangeError::RateLimited("429".to_string()));

        let err = coordinator
            .place_market_order(Side::Buy, dec!(1), Slot::Entry, None)
            .await
            .unwrap_err();
        assert!(err.is_rate_limit());
        assert!(!coordinator.is_locked(Slot::Entry));
    }
}
