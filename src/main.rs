//! dx-bridge - relay DX cluster spots to WebSocket subscribers.

use anyhow::Result;
use clap::Parser;
use dx_bridge::{
    backoff::Backoff,
    broadcast::SubscriberRegistry,
    client::{ClusterClient, ClusterEvent},
    config::Config,
    server::{self, AppState},
    stats::BridgeStats,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// DX cluster to WebSocket bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    config.validate()?;

    // Initialize logging; RUST_LOG wins over config and CLI.
    let level = args
        .log_level
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("dx-bridge starting");
    info!(
        "cluster: {}:{} (user: {})",
        config.cluster.host,
        config.cluster.port,
        if config.cluster.user.is_empty() {
            "none"
        } else {
            &config.cluster.user
        }
    );

    let stats = Arc::new(BridgeStats::new());
    let registry = Arc::new(SubscriberRegistry::new(stats.clone()));

    // Bind before anything else starts: no listener, no bridge.
    let listener = server::bind(&config.server.bind, config.server.port).await?;
    info!(
        "websocket server listening on ws://{}:{}{}",
        config.server.bind, config.server.port, config.server.path
    );

    // One shutdown signal for the whole bridge, flipped exactly once.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = signal_tx.send(true);
    });

    // Subscriber side.
    let (listener_shutdown_tx, listener_shutdown_rx) = watch::channel(false);
    let app = server::router(
        &config.server.path,
        AppState {
            registry: registry.clone(),
            stats: stats.clone(),
        },
    );
    let server_handle = tokio::spawn(server::serve(listener, app, listener_shutdown_rx));

    // Cluster side.
    let backoff = Backoff::new(
        Duration::from_secs_f64(config.reconnect.initial_delay),
        Duration::from_secs_f64(config.reconnect.max_delay),
    );
    let client = ClusterClient::new(config.cluster.clone(), stats.clone(), shutdown_rx.clone());
    let (mut events, cluster_handle) = client.spawn(backoff);

    // Main event pump: spots from the cluster fan out to subscribers.
    let mut shutdown = shutdown_rx.clone();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => {
                match event {
                    Some(ClusterEvent::Spot(spot)) => {
                        registry.broadcast(&spot).await;
                    }
                    Some(ClusterEvent::Connected) => {
                        info!("cluster feed online");
                    }
                    Some(ClusterEvent::Disconnected(reason)) => {
                        warn!("cluster feed offline: {}", reason);
                    }
                    None => break,
                }
            }
        }
    }

    // Teardown order matters: cluster side first so nothing new enters
    // the pipeline, then the listener, then the connected subscribers.
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = cluster_handle.await;
    let _ = listener_shutdown_tx.send(true);
    registry.close_all().await;
    let _ = server_handle.await;
    info!("shutdown complete");

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
