use rust_decimal::Decimal;
use thiserror::Error;

use crate::exchange::error::ExchangeError;

use super::locks::Slot;

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("slot {0:?} has an in-flight submission")]
    SlotBusy(Slot),

    #[error("slippage exceeded: mark {mark} vs expected {expected}, max {max_pct}")]
    SlippageExceeded {
        mark: Decimal,
        expected: Decimal,
        max_pct: Decimal,
    },

    #[error("quantity {0} quantizes to zero")]
    ZeroQuantity(Decimal),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

impl OrderError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, OrderError::Exchange(e) if e.is_rate_limit())
    }
}
