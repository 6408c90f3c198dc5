use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::feed::backoff::Backoff;
use crate::feed::{now_ms, unwrap_stream_payload, FeedEndpoints};

use super::imbalance::{summarize, ImbalanceConfig, ImbalanceSummary};
use super::sync::{BookSync, BootstrapOutcome, LiveOutcome, MAX_SNAPSHOT_RETRIES};
use super::wire::{DepthSnapshot, RawDepthSnapshot, RawDepthUpdate};

#[derive(Debug, Clone)]
pub struct DepthTrackerConfig {
    pub symbol: String,
    pub endpoints: FeedEndpoints,
    /// Diff-stream cadence suffix, e.g. 100 for `@depth@100ms`.
    pub speed_ms: u64,
    pub imbalance: ImbalanceConfig,
    /// Periodic snapshot refresh while synced.
    pub refresh_sync_ms: u64,
    /// No message for this long flags the stream stale.
    pub stale_after_ms: u64,
    /// No message for this long forces a reconnect.
    pub heartbeat_timeout_ms: u64,
    /// Proactive reconnect before the venue's 24 h cutoff.
    pub max_conn_ms: u64,
}

impl Default for DepthTrackerConfig {
    fn default() -> Self {
        Self {
            symbol: "ETHBTC".to_string(),
            endpoints: FeedEndpoints::default(),
            speed_ms: 100,
            imbalance: ImbalanceConfig::default(),
            refresh_sync_ms: 30_000,
            stale_after_ms: 5_000,
            heartbeat_timeout_ms: 300_000,
            max_conn_ms: 23 * 60 * 60 * 1000,
        }
    }
}

/// Published to subscribers after every applied event.
#[derive(Debug, Clone)]
pub struct DepthUpdateSnapshot {
    pub symbol: String,
    pub best_bid: Option<(Decimal, Decimal)>,
    pub best_ask: Option<(Decimal, Decimal)>,
    pub last_update_id: u64,
    pub summary: Option<ImbalanceSummary>,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthHealth {
    pub started: bool,
    pub connected: bool,
    pub order_book_ready: bool,
    pub rest_healthy: bool,
    pub healthy: bool,
    pub reason: Option<String>,
}

impl DepthHealth {
    fn stopped() -> Self {
        Self {
            started: false,
            connected: false,
            order_book_ready: false,
            rest_healthy: true,
            healthy: false,
            reason: Some("not_started".to_string()),
        }
    }

    /// First failing condition wins: WS state, ready flag, staleness, REST.
    fn derive(connected: bool, ready: bool, stale: bool, rest_healthy: bool) -> Self {
        let reason = if !connected {
            Some("ws_disconnected".to_string())
        } else if !ready {
            Some("order_book_not_ready".to_string())
        } else if stale {
            Some("stream_stale".to_string())
        } else if !rest_healthy {
            Some("rest_unhealthy".to_string())
        } else {
            None
        };

        Self {
            started: true,
            connected,
            order_book_ready: ready,
            rest_healthy,
            healthy: reason.is_none(),
            reason,
        }
    }
}

/// Incremental order-book tracker for one symbol: diff stream plus REST
/// snapshot reconciliation, with a near-touch imbalance summary fanned
/// out to subscribers. All failures are recovered internally.
pub struct DepthTracker {
    cfg: DepthTrackerConfig,
    updates_tx: broadcast::Sender<DepthUpdateSnapshot>,
    health_tx: watch::Sender<DepthHealth>,
    stop_tx: watch::Sender<bool>,
    started: AtomicBool,
}

impl DepthTracker {
    pub fn new(cfg: DepthTrackerConfig) -> Self {
        let (updates_tx, _) = broadcast::channel(1024);
        let (health_tx, _) = watch::channel(DepthHealth::stopped());
        let (stop_tx, _) = watch::channel(false);
        Self {
            cfg,
            updates_tx,
            health_tx,
            stop_tx,
            started: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DepthUpdateSnapshot> {
        self.updates_tx.subscribe()
    }

    pub fn health(&self) -> watch::Receiver<DepthHealth> {
        self.health_tx.subscribe()
    }

    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let cfg = self.cfg.clone();
        let updates_tx = self.updates_tx.clone();
        let health_tx = self.health_tx.clone();
        let stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            run(cfg, updates_tx, health_tx, stop_rx).await;
        });
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

struct LoopState {
    sync: BookSync,
    rest_healthy: bool,
    awaiting_snapshot: bool,
}

async fn run(
    cfg: DepthTrackerConfig,
    updates_tx: broadcast::Sender<DepthUpdateSnapshot>,
    health_tx: watch::Sender<DepthHealth>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let http = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(err) => {
            error!("depth[{}]: failed to build http client: {err}", cfg.symbol);
            return;
        }
    };

    let stream = format!(
        "{}@depth@{}ms",
        cfg.symbol.to_lowercase(),
        cfg.speed_ms
    );
    let url = cfg.endpoints.stream_url(&stream);

    let mut backoff = Backoff::default();
    let mut state = LoopState {
        sync: BookSync::new(),
        rest_healthy: true,
        awaiting_snapshot: false,
    };

    loop {
        if *stop_rx.borrow() {
            break;
        }

        publish_health(&health_tx, &state, false, false);
        info!("depth[{}]: connecting {}", cfg.symbol, url);

        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => {
                backoff.reset();
                state.sync.invalidate();
                state.awaiting_snapshot = false;
                publish_health(&health_tx, &state, true, false);
                info!("depth[{}]: connected", cfg.symbol);

                let session = run_session(
                    &cfg,
                    &http,
                    ws_stream,
                    &updates_tx,
                    &health_tx,
                    &mut state,
                    &mut stop_rx,
                )
                .await;

                if session == SessionEnd::Stopped {
                    break;
                }
                warn!("depth[{}]: session ended, reconnecting", cfg.symbol);
            }
            Err(err) => {
                warn!("depth[{}]: connect failed: {err}", cfg.symbol);
            }
        }

        publish_health(&health_tx, &state, false, false);

        let delay = backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    let _ = health_tx.send(DepthHealth::stopped());
    info!("depth[{}]: stopped", cfg.symbol);
}

#[derive(PartialEq)]
enum SessionEnd {
    Reconnect,
    Stopped,
}

async fn run_session(
    cfg: &DepthTrackerConfig,
    http: &reqwest::Client,
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    updates_tx: &broadcast::Sender<DepthUpdateSnapshot>,
    health_tx: &watch::Sender<DepthHealth>,
    state: &mut LoopState,
    stop_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();
    let (snap_tx, mut snap_rx) = mpsc::channel::<anyhow::Result<DepthSnapshot>>(4);

    let connected_at = Instant::now();
    let mut last_msg = Instant::now();
    let mut was_stale = false;

    let mut resync = tokio::time::interval(Duration::from_millis(cfg.refresh_sync_ms.max(1000)));
    resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    resync.tick().await; // immediate first tick is not a resync

    let mut housekeeping = tokio::time::interval(Duration::from_secs(1));
    housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // snapshot fetch kicks off as soon as diff events start buffering
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    return SessionEnd::Stopped;
                }
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(err)) => {
                        warn!("depth[{}]: recv error: {err}", cfg.symbol);
                        return SessionEnd::Reconnect;
                    }
                    None => {
                        warn!("depth[{}]: stream closed", cfg.symbol);
                        return SessionEnd::Reconnect;
                    }
                };

                last_msg = Instant::now();
                match msg {
                    Message::Text(txt) => {
                        on_text(cfg, &txt, state, updates_tx);

                        // bootstrap once events start accumulating
                        if !state.sync.is_ready() && !state.awaiting_snapshot {
                            state.awaiting_snapshot = true;
                            spawn_snapshot_fetch(http.clone(), cfg, snap_tx.clone());
                        }

                        publish_health(health_tx, state, true, was_stale);
                    }
                    Message::Ping(payload) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return SessionEnd::Reconnect;
                        }
                    }
                    Message::Close(frame) => {
                        warn!("depth[{}]: close frame: {frame:?}", cfg.symbol);
                        return SessionEnd::Reconnect;
                    }
                    _ => {}
                }
            }

            Some(result) = snap_rx.recv() => {
                state.awaiting_snapshot = false;
                match result {
                    Ok(snapshot) => {
                        state.rest_healthy = true;
                        on_snapshot(cfg, snapshot, state, updates_tx);
                        if !state.sync.is_ready() {
                            // snapshot was unusable, fetch a newer one
                            state.awaiting_snapshot = true;
                            spawn_snapshot_fetch(http.clone(), cfg, snap_tx.clone());
                        }
                    }
                    Err(err) => {
                        warn!("depth[{}]: snapshot fetch failed: {err}", cfg.symbol);
                        state.rest_healthy = false;
                        if !state.sync.is_ready() {
                            state.awaiting_snapshot = true;
                            spawn_snapshot_fetch(http.clone(), cfg, snap_tx.clone());
                        }
                    }
                }
                publish_health(health_tx, state, true, was_stale);
            }

            _ = resync.tick() => {
                if state.sync.is_ready() && !state.awaiting_snapshot {
                    state.awaiting_snapshot = true;
                    spawn_snapshot_fetch(http.clone(), cfg, snap_tx.clone());
                }
            }

            _ = housekeeping.tick() => {
                let idle = last_msg.elapsed();
                if idle >= Duration::from_millis(cfg.heartbeat_timeout_ms) {
                    warn!("depth[{}]: heartbeat timeout, forcing reconnect", cfg.symbol);
                    return SessionEnd::Reconnect;
                }
                if connected_at.elapsed() >= Duration::from_millis(cfg.max_conn_ms) {
                    info!("depth[{}]: max connection age reached, reconnecting", cfg.symbol);
                    return SessionEnd::Reconnect;
                }

                let stale = idle >= Duration::from_millis(cfg.stale_after_ms);
                if stale != was_stale {
                    was_stale = stale;
                    publish_health(health_tx, state, true, stale);
                }
            }
        }
    }
}

fn on_text(
    cfg: &DepthTrackerConfig,
    txt: &str,
    state: &mut LoopState,
    updates_tx: &broadcast::Sender<DepthUpdateSnapshot>,
) {
    let value: Value = match serde_json::from_str(txt) {
        Ok(v) => v,
        Err(err) => {
            debug!("depth[{}]: unparseable frame: {err}", cfg.symbol);
            return;
        }
    };
    let payload = unwrap_stream_payload(value);
    let raw: RawDepthUpdate = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(_) => return, // pings, subscription acks, unrelated events
    };
    let Some(diff) = raw.validate() else {
        return;
    };

    match state.sync.on_event(diff) {
        LiveOutcome::Applied => publish_update(cfg, state, updates_tx),
        LiveOutcome::Gap => {
            warn!(
                "depth[{}]: sequence gap at local={}, re-bootstrapping",
                cfg.symbol,
                state.sync.book().last_update_id()
            );
        }
        LiveOutcome::Stale | LiveOutcome::Buffered => {}
    }
}

fn on_snapshot(
    cfg: &DepthTrackerConfig,
    snapshot: DepthSnapshot,
    state: &mut LoopState,
    updates_tx: &broadcast::Sender<DepthUpdateSnapshot>,
) {
    if state.sync.is_ready() {
        if state.sync.resync(&snapshot) {
            debug!(
                "depth[{}]: resynced at update id {}",
                cfg.symbol, snapshot.last_update_id
            );
            publish_update(cfg, state, updates_tx);
        }
        return;
    }

    match state.sync.apply_bootstrap_snapshot(&snapshot) {
        BootstrapOutcome::Ready => {
            info!(
                "depth[{}]: order book ready at update id {}",
                cfg.symbol,
                state.sync.book().last_update_id()
            );
            publish_update(cfg, state, updates_tx);
        }
        outcome @ (BootstrapOutcome::SnapshotTooOld | BootstrapOutcome::GapInBuffer) => {
            let retries = state.sync.snapshot_retries();
            if retries >= MAX_SNAPSHOT_RETRIES {
                error!(
                    "depth[{}]: bootstrap still failing after {retries} snapshots ({outcome:?})",
                    cfg.symbol
                );
            } else {
                warn!(
                    "depth[{}]: bootstrap snapshot unusable ({outcome:?}), retrying",
                    cfg.symbol
                );
            }
        }
    }
}

fn publish_update(
    cfg: &DepthTrackerConfig,
    state: &LoopState,
    updates_tx: &broadcast::Sender<DepthUpdateSnapshot>,
) {
    let book = state.sync.book();
    if book.is_crossed() {
        warn!(
            "depth[{}]: crossed book at update {}",
            cfg.symbol,
            book.last_update_id()
        );
    }
    let snapshot = DepthUpdateSnapshot {
        symbol: cfg.symbol.clone(),
        best_bid: book.best_bid(),
        best_ask: book.best_ask(),
        last_update_id: book.last_update_id(),
        summary: summarize(book, &cfg.imbalance),
        ts_ms: now_ms(),
    };
    // receivers that lag or dropped are their own problem
    let _ = updates_tx.send(snapshot);
}

fn publish_health(
    health_tx: &watch::Sender<DepthHealth>,
    state: &LoopState,
    connected: bool,
    stale: bool,
) {
    let health = DepthHealth::derive(
        connected,
        state.sync.is_ready(),
        stale,
        state.rest_healthy,
    );
    health_tx.send_if_modified(|current| {
        if *current == health {
            false
        } else {
            *current = health;
            true
        }
    });
}

fn spawn_snapshot_fetch(
    http: reqwest::Client,
    cfg: &DepthTrackerConfig,
    snap_tx: mpsc::Sender<anyhow::Result<DepthSnapshot>>,
) {
    let rest_base = cfg.endpoints.rest_base.clone();
    let symbol = cfg.symbol.clone();
    tokio::spawn(async move {
        let result = fetch_depth_snapshot(&http, &rest_base, &symbol).await;
        let _ = snap_tx.send(result).await;
    });
}

async fn fetch_depth_snapshot(
    http: &reqwest::Client,
    rest_base: &str,
    symbol: &str,
) -> anyhow::Result<DepthSnapshot> {
    let url = format!(
        "{}/api/v3/depth?symbol={}&limit=5000",
        rest_base.trim_end_matches('/'),
        symbol.to_uppercase()
    );
    let raw: RawDepthSnapshot = http
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(raw.validate())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_reason_priority() {
        let h = DepthHealth::derive(false, false, true, false);
        assert_eq!(h.reason.as_deref(), Some("ws_disconnected"));
        assert!(!h.healthy);

        let h = DepthHealth::derive(true, false, true, false);
        assert_eq!(h.reason.as_deref(), Some("order_book_not_ready"));

        let h = DepthHealth::derive(true, true, true, false);
        assert_eq!(h.reason.as_deref(), Some("stream_stale"));

        let h = DepthHealth::derive(true, true, false, false);
        assert_eq!(h.reason.as_deref(), Some("rest_unhealthy"));

        let h = DepthHealth::derive(true, true, false, true);
        assert!(h.healthy);
        assert_eq!(h.reason, None);
    }
}
