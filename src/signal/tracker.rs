use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::feed::backoff::Backoff;
use crate::feed::{now_ms, unwrap_stream_payload, ConnectionState, FeedEndpoints};

use super::series::{CandleOutcome, RsiSeries};
use super::wire::{parse_kline_rows, RawKlineEvent};

#[derive(Debug, Clone)]
pub struct RsiTrackerConfig {
    pub symbol: String,
    pub interval: String,
    pub period: usize,
    /// Historical candles fetched to seed the series.
    pub seed_limit: usize,
    pub endpoints: FeedEndpoints,
    pub stale_after_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub max_conn_ms: u64,
}

impl Default for RsiTrackerConfig {
    fn default() -> Self {
        Self {
            symbol: "ETHBTC".to_string(),
            interval: "4h".to_string(),
            period: 14,
            seed_limit: 500,
            endpoints: FeedEndpoints::default(),
            stale_after_ms: 5_000,
            heartbeat_timeout_ms: 300_000,
            max_conn_ms: 23 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RsiSnapshot {
    pub symbol: String,
    pub rsi: Option<f64>,
    pub is_stable: bool,
    pub last_close: f64,
    pub candle_open_time: Option<i64>,
    pub candle_closed: bool,
    pub connection_state: ConnectionState,
    pub updated_at: i64,
}

/// RSI(period) over a `(symbol, interval)` kline stream, seeded from
/// historical candles. Reseeds before every WS (re)connect so gaps in
/// the live stream never leave a hole in the series.
pub struct RsiTracker {
    cfg: RsiTrackerConfig,
    tx: broadcast::Sender<RsiSnapshot>,
    stop_tx: watch::Sender<bool>,
    started: AtomicBool,
}

impl RsiTracker {
    pub fn new(cfg: RsiTrackerConfig) -> Self {
        let (tx, _) = broadcast::channel(256);
        let (stop_tx, _) = watch::channel(false);
        Self {
            cfg,
            tx,
            stop_tx,
            started: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RsiSnapshot> {
        self.tx.subscribe()
    }

    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let cfg = self.cfg.clone();
        let tx = self.tx.clone();
        let stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            run(cfg, tx, stop_rx).await;
        });
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

async fn run(
    cfg: RsiTrackerConfig,
    tx: broadcast::Sender<RsiSnapshot>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let http = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(err) => {
            warn!("rsi[{}]: failed to build http client: {err}", cfg.symbol);
            return;
        }
    };

    let stream = format!(
        "{}@kline_{}",
        cfg.symbol.to_lowercase(),
        cfg.interval
    );
    let url = cfg.endpoints.stream_url(&stream);

    let mut series = RsiSeries::new(cfg.period);
    let mut backoff = Backoff::default();

    loop {
        if *stop_rx.borrow() {
            break;
        }

        // reseed first so the series has no gap when the socket resumes
        match fetch_klines(&http, &cfg).await {
            Ok(candles) => {
                series.seed(candles);
                info!(
                    "rsi[{}/{}]: seeded, stable={} rsi={:?}",
                    cfg.symbol,
                    cfg.interval,
                    series.is_stable(),
                    series.value()
                );
                publish(&tx, &cfg, &series, ConnectionState::Connecting);
            }
            Err(err) => {
                warn!("rsi[{}]: kline seed failed: {err}", cfg.symbol);
                publish(&tx, &cfg, &series, ConnectionState::Disconnected);
                if !sleep_or_stop(backoff.next_delay(), &mut stop_rx).await {
                    break;
                }
                continue;
            }
        }

        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => {
                backoff.reset();
                info!("rsi[{}/{}]: connected", cfg.symbol, cfg.interval);
                publish(&tx, &cfg, &series, ConnectionState::Connected);

                let stopped =
                    run_session(&cfg, ws_stream, &tx, &mut series, &mut stop_rx).await;
                if stopped {
                    break;
                }
                warn!("rsi[{}]: session ended, reconnecting", cfg.symbol);
            }
            Err(err) => {
                warn!("rsi[{}]: connect failed: {err}", cfg.symbol);
            }
        }

        publish(&tx, &cfg, &series, ConnectionState::Disconnected);
        if !sleep_or_stop(backoff.next_delay(), &mut stop_rx).await {
            break;
        }
    }

    info!("rsi[{}]: stopped", cfg.symbol);
}

/// Returns false when stop was requested during the sleep.
async fn sleep_or_stop(delay: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = stop_rx.changed() => !*stop_rx.borrow(),
    }
}

/// Returns true when the tracker should stop entirely.
async fn run_session(
    cfg: &RsiTrackerConfig,
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    tx: &broadcast::Sender<RsiSnapshot>,
    series: &mut RsiSeries,
    stop_rx: &mut watch::Receiver<bool>,
) -> bool {
    let (mut write, mut read) = ws_stream.split();
    let connected_at = Instant::now();
    let mut last_msg = Instant::now();
    let mut state = ConnectionState::Connected;

    let mut housekeeping = tokio::time::interval(Duration::from_secs(1));
    housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    return true;
                }
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(err)) => {
                        warn!("rsi[{}]: recv error: {err}", cfg.symbol);
                        return false;
                    }
                    None => {
                        warn!("rsi[{}]: stream closed", cfg.symbol);
                        return false;
                    }
                };

                last_msg = Instant::now();
                if state == ConnectionState::Stale {
                    state = ConnectionState::Connected;
                }
                match msg {
                    Message::Text(txt) => {
                        if on_text(cfg, &txt, series) {
                            publish(tx, cfg, series, state);
                        }
                    }
                    Message::Ping(payload) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return false;
                        }
                    }
                    Message::Close(frame) => {
                        warn!("rsi[{}]: close frame: {frame:?}", cfg.symbol);
                        return false;
                    }
                    _ => {}
                }
            }

            _ = housekeeping.tick() => {
                let idle = last_msg.elapsed();
                if idle >= Duration::from_millis(cfg.heartbeat_timeout_ms) {
                    warn!("rsi[{}]: heartbeat timeout, forcing reconnect", cfg.symbol);
                    return false;
                }
                if connected_at.elapsed() >= Duration::from_millis(cfg.max_conn_ms) {
                    info!("rsi[{}]: max connection age reached, reconnecting", cfg.symbol);
                    return false;
                }

                let stale = idle >= Duration::from_millis(cfg.stale_after_ms);
                let next = if stale { ConnectionState::Stale } else { ConnectionState::Connected };
                if next != state {
                    state = next;
                    publish(tx, cfg, series, state);
                }
            }
        }
    }
}

/// Returns true when the series changed.
fn on_text(cfg: &RsiTrackerConfig, txt: &str, series: &mut RsiSeries) -> bool {
    let value: Value = match serde_json::from_str(txt) {
        Ok(v) => v,
        Err(err) => {
            debug!("rsi[{}]: unparseable frame: {err}", cfg.symbol);
            return false;
        }
    };
    let payload = unwrap_stream_payload(value);
    let raw: RawKlineEvent = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(_) => return false,
    };
    let Some(candle) = raw.validate() else {
        return false;
    };

    series.apply(&candle) != CandleOutcome::Ignored
}

fn publish(
    tx: &broadcast::Sender<RsiSnapshot>,
    cfg: &RsiTrackerConfig,
    series: &RsiSeries,
    connection_state: ConnectionState,
) {
    let _ = tx.send(RsiSnapshot {
        symbol: cfg.symbol.clone(),
        rsi: series.value(),
        is_stable: series.is_stable(),
        last_close: series.last_close(),
        candle_open_time: series.current_open_time(),
        candle_closed: series.candle_closed(),
        connection_state,
        updated_at: now_ms(),
    });
}

async fn fetch_klines(
    http: &reqwest::Client,
    cfg: &RsiTrackerConfig,
) -> anyhow::Result<Vec<super::series::Candle>> {
    let url = format!(
        "{}/api/v3/klines?symbol={}&interval={}&limit={}",
        cfg.endpoints.rest_base.trim_end_matches('/'),
        cfg.symbol.to_uppercase(),
        cfg.interval,
        cfg.seed_limit
    );
    let rows: Vec<Value> = http
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(parse_kline_rows(&rows))
}
