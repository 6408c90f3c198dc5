use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use riptide::clock::SystemClock;
use riptide::depth::imbalance::ImbalanceConfig;
use riptide::depth::tracker::{DepthTracker, DepthTrackerConfig};
use riptide::exchange::sim::SimExchange;
use riptide::feed::FeedEndpoints;
use riptide::signal::tracker::{RsiTracker, RsiTrackerConfig};
use riptide::swing::config::SwingConfig;
use riptide::swing::engine::SwingEngine;

/// Paper-trading wiring: live public market data, simulated venue.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = SwingConfig::from_env();
    info!(
        "starting swing engine: {} {:?} (signal {} {})",
        cfg.symbol, cfg.direction, cfg.signal_symbol, cfg.signal_interval
    );

    let endpoints = FeedEndpoints::default();

    let rsi_tracker = Arc::new(RsiTracker::new(RsiTrackerConfig {
        symbol: cfg.signal_symbol.clone(),
        interval: cfg.signal_interval.clone(),
        period: cfg.rsi_period,
        endpoints: endpoints.clone(),
        ..Default::default()
    }));

    let depth_tracker = Arc::new(DepthTracker::new(DepthTrackerConfig {
        symbol: cfg.symbol.clone(),
        endpoints,
        imbalance: ImbalanceConfig::default(),
        ..Default::default()
    }));

    let adapter = Arc::new(SimExchange::new(&cfg.symbol));

    // mirror the tracked book into the sim venue so the engine has a
    // ticker and depth to trade against
    {
        let adapter = adapter.clone();
        let mut book_rx = depth_tracker.subscribe();
        tokio::spawn(async move {
            while let Ok(book) = book_rx.recv().await {
                if let (Some((bid, bid_qty)), Some((ask, ask_qty))) =
                    (book.best_bid, book.best_ask)
                {
                    adapter.push_depth(vec![(bid, bid_qty)], vec![(ask, ask_qty)]);
                    adapter.push_ticker((bid + ask) / rust_decimal_macros::dec!(2));
                }
            }
        });
    }

    let engine = SwingEngine::new(
        cfg,
        adapter,
        rsi_tracker,
        Arc::new(SystemClock),
    )
    .with_depth_tracker(depth_tracker);

    let mut snapshots = engine.subscribe();
    engine.start();

    let printer = tokio::spawn(async move {
        let mut last_phase = None;
        while let Ok(snap) = snapshots.recv().await {
            if last_phase != Some(snap.phase) {
                last_phase = Some(snap.phase);
                info!(
                    "phase={:?} rsi={:?} zone={:?} last={:?} pnl={}",
                    snap.phase, snap.rsi, snap.zone, snap.last_price, snap.pnl
                );
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    engine.stop();
    printer.abort();
    Ok(())
}
