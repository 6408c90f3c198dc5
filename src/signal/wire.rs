use serde::Deserialize;
use serde_json::Value;

use crate::feed::parse_positive_f64;

use super::series::Candle;

/// Kline stream payload: `{e:"kline", s, k:{t, T, c, x, ...}}`.
#[derive(Debug, Deserialize)]
pub struct RawKlineEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "k")]
    pub kline: RawKline,
}

#[derive(Debug, Deserialize)]
pub struct RawKline {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

impl RawKlineEvent {
    pub fn validate(&self) -> Option<Candle> {
        if self.event_type != "kline" || self.kline.open_time < 0 {
            return None;
        }
        let close = parse_positive_f64(&self.kline.close)?;
        Some(Candle {
            open_time: self.kline.open_time,
            close,
            is_closed: self.kline.is_closed,
        })
    }
}

/// REST kline rows: `[openTime, open, high, low, close, volume, closeTime, ...]`.
/// Rows that fail validation are dropped.
pub fn parse_kline_rows(rows: &[Value]) -> Vec<Candle> {
    rows.iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            let open_time = row.first()?.as_i64()?;
            let close: f64 = row.get(4)?.as_str()?.parse().ok()?;
            if open_time < 0 || !close.is_finite() || close < 0.0 {
                return None;
            }
            Some(Candle {
                open_time,
                close,
                is_closed: true,
            })
        })
        .collect()
}
