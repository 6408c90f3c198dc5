use std::collections::BTreeMap;

use rust_decimal::Decimal;

use super::wire::{DepthDiff, DepthSnapshot};

/// Local order book for one symbol. Quantities are strictly positive;
/// a zero-quantity level in an update deletes the entry.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update_id: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.iter().next_back().map(|(p, q)| (*p, *q))
    }

    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.iter().next().map(|(p, q)| (*p, *q))
    }

    pub fn bid_levels(&self) -> impl Iterator<Item = (Decimal, Decimal)> + '_ {
        self.bids.iter().rev().map(|(p, q)| (*p, *q))
    }

    pub fn ask_levels(&self) -> impl Iterator<Item = (Decimal, Decimal)> + '_ {
        self.asks.iter().map(|(p, q)| (*p, *q))
    }

    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Replace the whole book with a REST snapshot.
    pub fn reset_from_snapshot(&mut self, snapshot: &DepthSnapshot) {
        self.bids.clear();
        self.asks.clear();
        for (price, qty) in &snapshot.bids {
            if *qty > Decimal::ZERO {
                self.bids.insert(*price, *qty);
            }
        }
        for (price, qty) in &snapshot.asks {
            if *qty > Decimal::ZERO {
                self.asks.insert(*price, *qty);
            }
        }
        self.last_update_id = snapshot.last_update_id;
    }

    /// Apply one diff event. The caller has already checked sequencing;
    /// this only mutates levels and advances the update id.
    pub fn apply_diff(&mut self, diff: &DepthDiff) {
        for (price, qty) in &diff.bids {
            if *qty == Decimal::ZERO {
                self.bids.remove(price);
            } else {
                self.bids.insert(*price, *qty);
            }
        }
        for (price, qty) in &diff.asks {
            if *qty == Decimal::ZERO {
                self.asks.remove(price);
            } else {
                self.asks.insert(*price, *qty);
            }
        }
        self.last_update_id = diff.final_update_id;
    }

    /// Holds whenever both sides are populated on a synced book.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot() -> DepthSnapshot {
        DepthSnapshot {
            last_update_id: 10,
            bids: vec![(dec!(100.0), dec!(2)), (dec!(99.5), dec!(1))],
            asks: vec![(dec!(100.5), dec!(3)), (dec!(101.0), dec!(4))],
        }
    }

    #[test]
    fn snapshot_reset_orders_sides() {
        let mut book = OrderBook::new();
        book.reset_from_snapshot(&snapshot());

        assert_eq!(book.last_update_id(), 10);
        assert_eq!(book.best_bid(), Some((dec!(100.0), dec!(2))));
        assert_eq!(book.best_ask(), Some((dec!(100.5), dec!(3))));
        assert!(!book.is_crossed());
    }

    #[test]
    fn zero_qty_deletes_level() {
        let mut book = OrderBook::new();
        book.reset_from_snapshot(&snapshot());

        book.apply_diff(&DepthDiff {
            first_update_id: 11,
            final_update_id: 11,
            bids: vec![(dec!(100.0), dec!(0))],
            asks: vec![(dec!(100.5), dec!(1.5))],
        });

        assert_eq!(book.best_bid(), Some((dec!(99.5), dec!(1))));
        assert_eq!(book.best_ask(), Some((dec!(100.5), dec!(1.5))));
        assert_eq!(book.last_update_id(), 11);
    }

    #[test]
    fn snapshot_drops_zero_levels() {
        let mut book = OrderBook::new();
        book.reset_from_snapshot(&DepthSnapshot {
            last_update_id: 1,
            bids: vec![(dec!(100), dec!(0)), (dec!(99), dec!(1))],
            asks: vec![],
        });

        assert_eq!(book.best_bid(), Some((dec!(99), dec!(1))));
        assert_eq!(book.depth(), (1, 0));
    }
}
