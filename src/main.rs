//! Market depth service
//!
//! Replicates Binance spot and futures order books, publishes their most
//! significant levels over IPC and serves health, metrics and replica reads.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_depth::orderbook::VolumeTracker;
use market_depth::publisher::{Distributor, Publisher};
use market_depth::replica::{ingest_channel, ReplicaRegistry, ResyncScheduler};
use market_depth::rest::{RestSnapshotClient, SnapshotFetcher};
use market_depth::{metrics, server, AppState, Config, Segment, WebSocketManager};

/// Publications buffered for the IPC writer
const IPC_QUEUE_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting market depth service");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(
        symbols = ?config.symbols,
        futures_symbols = ?config.futures_symbols,
        "Configuration loaded"
    );
    metrics::init()?;

    let (publisher, _writer) = Publisher::spawn(&config.ipc_socket_path, IPC_QUEUE_CAPACITY);
    let distributor: Arc<dyn Distributor> = Arc::new(publisher);

    let registry = Arc::new(ReplicaRegistry::from_config(&config, Arc::clone(&distributor))?);
    let symbols = config.market_symbols();
    let (added, _) = registry.sync_symbols(&symbols).await;
    info!(replicas = added, "Replicas created");

    let fetcher: Arc<dyn SnapshotFetcher> = Arc::new(RestSnapshotClient::new(&config)?);
    let scheduler = Arc::new(ResyncScheduler::start(fetcher));

    let (ingest, queue) = ingest_channel(&config.ingest);
    tokio::spawn(queue.run(Arc::clone(&registry), Arc::clone(&scheduler)));

    let volumes = Arc::new(Mutex::new(VolumeTracker::new(config.volumes.top_n)));
    tokio::spawn(rotate_volumes(
        Arc::clone(&volumes),
        Arc::clone(&distributor),
        Duration::from_secs(config.volumes.window_secs.max(1)),
    ));

    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        scheduler: Arc::clone(&scheduler),
        config: Arc::clone(&config),
    });

    // Start health check server
    let health_state = Arc::clone(&state);
    let port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = server::serve(health_state, port).await {
            warn!(error = %e, "Health server error");
        }
    });

    tokio::spawn(log_status(
        Arc::clone(&state),
        Duration::from_secs(config.health_check_interval_secs.max(1)),
    ));

    // One WebSocket manager per segment with subscribed symbols
    for segment in Segment::ALL {
        let segment_symbols: Vec<_> = symbols
            .iter()
            .filter(|s| s.segment == segment)
            .cloned()
            .collect();
        if segment_symbols.is_empty() {
            continue;
        }

        let mut ws_manager = WebSocketManager::new(
            segment,
            config.ws_endpoint(segment),
            &segment_symbols,
            config.reconnect_delay_ms,
            ingest.clone(),
            Arc::clone(&volumes),
        );
        tokio::spawn(async move {
            if let Err(e) = ws_manager.run().await {
                warn!(segment = %segment, error = %e, "WebSocket manager stopped");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    Ok(())
}

/// Publish the traded-volume ranking once per window
async fn rotate_volumes(
    volumes: Arc<Mutex<VolumeTracker>>,
    distributor: Arc<dyn Distributor>,
    window: Duration,
) {
    let mut ticker = interval(window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let ranking = volumes.lock().await.rotate();
        if ranking.is_empty() {
            continue;
        }
        debug!(symbols = ranking.len(), "Publishing volume ranking");
        distributor.distribute_volumes(&ranking);
    }
}

/// Periodic per-replica status log
async fn log_status(state: Arc<AppState>, period: Duration) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;

        for status in state.registry.statuses().await {
            info!(
                symbol = %status.symbol,
                state = status.state.as_str(),
                last_update_id = status.last_update_id,
                bid_levels = status.bid_levels,
                ask_levels = status.ask_levels,
                mid_price = ?status.mid_price,
                "Replica status"
            );
        }
        info!(
            spot_backlog = state.scheduler.queue_depth(Segment::Spot),
            futures_backlog = state.scheduler.queue_depth(Segment::Futures),
            "Resync backlog"
        );
    }
}
