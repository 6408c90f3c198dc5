use rust_decimal::Decimal;
use serde::Deserialize;

/// Diff event as it arrives on `<symbol>@depth@<speed>ms`.
#[derive(Debug, Deserialize)]
pub struct RawDepthUpdate {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

/// REST depth snapshot: `GET /api/v3/depth?symbol=..&limit=5000`.
#[derive(Debug, Deserialize)]
pub struct RawDepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

/// Validated diff event.
#[derive(Debug, Clone)]
pub struct DepthDiff {
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

/// Validated snapshot.
#[derive(Debug, Clone)]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

/// Parse `[price, qty]` string pairs, silently dropping any level that
/// fails to parse or carries a negative number. Zero quantities are kept
/// so diffs can delete levels.
fn parse_levels(raw: &[[String; 2]]) -> Vec<(Decimal, Decimal)> {
    raw.iter()
        .filter_map(|[price, qty]| {
            let price: Decimal = price.parse().ok()?;
            let qty: Decimal = qty.parse().ok()?;
            if price <= Decimal::ZERO || qty < Decimal::ZERO {
                return None;
            }
            Some((price, qty))
        })
        .collect()
}

impl RawDepthUpdate {
    pub fn validate(&self) -> Option<DepthDiff> {
        if self.event_type != "depthUpdate" || self.final_update_id < self.first_update_id {
            return None;
        }
        Some(DepthDiff {
            first_update_id: self.first_update_id,
            final_update_id: self.final_update_id,
            bids: parse_levels(&self.bids),
            asks: parse_levels(&self.asks),
        })
    }
}

impl RawDepthSnapshot {
    pub fn validate(&self) -> DepthSnapshot {
        DepthSnapshot {
            last_update_id: self.last_update_id,
            bids: parse_levels(&self.bids),
            asks: parse_levels(&self.asks),
        }
    }
}
