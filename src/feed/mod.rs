pub mod backoff;

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

/// Base URLs for one signal feed (public market data only, no auth).
#[derive(Debug, Clone)]
pub struct FeedEndpoints {
    pub ws_base: String,
    pub rest_base: String,
}

impl Default for FeedEndpoints {
    fn default() -> Self {
        Self {
            ws_base: "wss://stream.binance.com:9443/ws".to_string(),
            rest_base: "https://api.binance.com".to_string(),
        }
    }
}

impl FeedEndpoints {
    /// Raw-stream URL: `<ws_base>/<stream>`.
    pub fn stream_url(&self, stream: &str) -> String {
        format!("{}/{}", self.ws_base.trim_end_matches('/'), stream)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Stale,
    Disconnected,
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Combined-stream payloads arrive wrapped as `{stream, data}`;
/// raw-stream payloads are the event object itself.
pub fn unwrap_stream_payload(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("stream") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Parse a venue decimal string, rejecting non-finite or negative input.
pub fn parse_positive_f64(raw: &str) -> Option<f64> {
    let v: f64 = raw.parse().ok()?;
    if v.is_finite() && v >= 0.0 {
        Some(v)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_combined_payloads() {
        let combined = json!({"stream": "ethbtc@depth@100ms", "data": {"e": "depthUpdate"}});
        let data = unwrap_stream_payload(combined);
        assert_eq!(data["e"], "depthUpdate");

        let raw = json!({"e": "depthUpdate"});
        assert_eq!(unwrap_stream_payload(raw.clone()), raw);
    }

    #[test]
    fn rejects_bad_numbers() {
        assert_eq!(parse_positive_f64("1.5"), Some(1.5));
        assert_eq!(parse_positive_f64("-1"), None);
        assert_eq!(parse_positive_f64("NaN"), None);
        assert_eq!(parse_positive_f64("inf"), None);
        assert_eq!(parse_positive_f64("abc"), None);
    }
}
