//! Telemetry Gateway - MAVLink telemetry ingestion and real-time fan-out
//!
//! Pulls telemetry from a live link, a simulator or a synthetic fallback,
//! normalizes it into one vehicle state and streams it to dashboard clients
//! over REST polling, SSE and WebSocket.

mod broadcaster;
mod config;
mod history;
mod http;
mod ingest;
mod link_health;
mod mavlink;
mod source;
mod vehicle_state;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use broadcaster::Broadcaster;
use config::Config;
use http::AppState;
use ingest::IngestLoop;
use source::{FallbackGenerator, LiveLinkProducer, SimulatorProducer, TelemetrySourceAdapter};
use vehicle_state::VehicleStateStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("telemetry_gateway=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("===========================================");
    info!("   Telemetry Gateway - MAVLink GCS core");
    info!("===========================================");

    let config = Config::load()?;

    info!("Configuration:");
    info!("  HTTP/WS address: {}", config.http_addr());
    info!("  Live link: {}", config.live_link_addr().unwrap_or("disabled"));
    info!("  Simulator: {}", config.simulator_url().unwrap_or("disabled"));
    info!(
        "  Fallback: {} (home {}, {})",
        if config.fallback_enabled { "enabled" } else { "disabled" },
        config.fallback_home_lat,
        config.fallback_home_lon
    );
    info!("  Tick interval: {} ms", config.tick_interval_ms);
    info!("  Producer timeout: {} ms", config.producer_timeout_ms);
    info!("  Heartbeat interval: {} ms", config.heartbeat_interval_ms);
    info!("  History capacity: {}", config.history_capacity);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Producers in priority order
    let mut adapter = TelemetrySourceAdapter::new(config.producer_timeout());
    if let Some(addr) = config.live_link_addr() {
        adapter = adapter.with_producer(Box::new(LiveLinkProducer::spawn(addr, shutdown_rx.clone())));
    }
    if let Some(url) = config.simulator_url() {
        match SimulatorProducer::new(url) {
            Ok(producer) => adapter = adapter.with_producer(Box::new(producer)),
            Err(e) => warn!("Simulator disabled: {}", e),
        }
    }
    if config.fallback_enabled {
        adapter = adapter.with_producer(Box::new(FallbackGenerator::new(
            config.fallback_home_lat,
            config.fallback_home_lon,
        )));
    }
    if adapter.producer_count() == 0 {
        warn!("No telemetry producer available; snapshots will stay at their defaults");
    }

    let store = Arc::new(VehicleStateStore::new());
    let broadcaster = Broadcaster::new(config.history_capacity);

    let ingest = IngestLoop::new(adapter, store.clone(), config.heartbeat_interval());
    let link_rx = ingest.link_reports();

    let ingest_handle = tokio::spawn(ingest.run(config.tick_interval(), shutdown_rx.clone()));
    let broadcast_handle = tokio::spawn(broadcaster.clone().run(
        store.clone(),
        link_rx.clone(),
        config.tick_interval(),
        shutdown_rx.clone(),
    ));

    let app_state = Arc::new(AppState {
        store,
        broadcaster: broadcaster.clone(),
        link: link_rx,
    });
    let app = http::router(app_state);

    let http_addr = config.http_addr();
    info!("Starting HTTP/WebSocket server on {}", http_addr);
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", http_addr))?;

    info!("===========================================");
    info!("  Press Ctrl+C to stop.");
    info!("===========================================");

    let mut server_shutdown = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    });
    let server_handle = tokio::spawn(async move { server.await });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }

    let _ = shutdown_tx.send(true);
    // Streaming clients end once their subscriptions close
    broadcaster.close();

    for (name, handle) in [("Ingestion", ingest_handle), ("Broadcaster", broadcast_handle)] {
        if let Err(e) = handle.await {
            error!("{} task failed: {}", name, e);
        }
    }
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP server error: {}", e),
        Err(e) => error!("HTTP server task failed: {}", e),
    }

    info!("Shutdown complete");
    Ok(())
}
