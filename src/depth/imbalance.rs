use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::book::OrderBook;

/// Near-touch imbalance window.
#[derive(Debug, Clone)]
pub struct ImbalanceConfig {
    /// Price band around the touch, in basis points.
    pub window_bps: Decimal,
    /// Dominance ratio; values below 1.01 are clamped up.
    pub ratio: Decimal,
}

impl Default for ImbalanceConfig {
    fn default() -> Self {
        Self {
            window_bps: dec!(9),
            ratio: dec!(2),
        }
    }
}

impl ImbalanceConfig {
    pub fn effective_ratio(&self) -> Decimal {
        self.ratio.max(dec!(1.01))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imbalance {
    BuyDominant,
    SellDominant,
    Balanced,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImbalanceSummary {
    pub buy_sum: Decimal,
    pub sell_sum: Decimal,
    pub skip_buy_side: bool,
    pub skip_sell_side: bool,
    pub imbalance: Imbalance,
}

/// Sum quantities within `window_bps` of the touch on each side and
/// derive the skip flags. `None` when the book is empty on both sides.
pub fn summarize(book: &OrderBook, cfg: &ImbalanceConfig) -> Option<ImbalanceSummary> {
    let best_bid = book.best_bid().map(|(p, _)| p);
    let best_ask = book.best_ask().map(|(p, _)| p);
    if best_bid.is_none() && best_ask.is_none() {
        return None;
    }

    let window = cfg.window_bps / dec!(10000);

    let buy_sum = match best_bid {
        Some(bid) => {
            let floor = bid * (dec!(1) - window);
            let mut sum = dec!(0);
            for (price, qty) in book.bid_levels() {
                if price < floor {
                    break;
                }
                sum += qty;
            }
            sum
        }
        None => dec!(0),
    };

    let sell_sum = match best_ask {
        Some(ask) => {
            let ceiling = ask * (dec!(1) + window);
            let mut sum = dec!(0);
            for (price, qty) in book.ask_levels() {
                if price > ceiling {
                    break;
                }
                sum += qty;
            }
            sum
        }
        None => dec!(0),
    };

    let ratio = cfg.effective_ratio();
    let buy_dominant = buy_sum > sell_sum * ratio;
    let sell_dominant = sell_sum > buy_sum * ratio;

    Some(ImbalanceSummary {
        buy_sum,
        sell_sum,
        skip_sell_side: sell_sum == dec!(0) || buy_dominant,
        skip_buy_side: buy_sum == dec!(0) || sell_dominant,
        imbalance: if buy_dominant {
            Imbalance::BuyDominant
        } else if sell_dominant {
            Imbalance::SellDominant
        } else {
            Imbalance::Balanced
        },
    })
}
