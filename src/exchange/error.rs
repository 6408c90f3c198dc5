use thiserror::Error;

/// Failure modes of adapter calls. The engine maps each variant to a
/// different recovery: rate limits feed the throttle, unknown orders are
/// swallowed on close paths, everything else is logged and the cycle
/// moves on.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("rate limited by venue: {0}")]
    RateLimited(String),

    #[error("unknown order: {order_id}")]
    UnknownOrder { order_id: String },

    #[error("order rejected: {reason}")]
    Rejected { reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl ExchangeError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ExchangeError::RateLimited(_))
    }

    pub fn is_unknown_order(&self) -> bool {
        matches!(self, ExchangeError::UnknownOrder { .. })
    }
}
