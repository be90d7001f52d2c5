//! Subscriber-facing WebSocket endpoint and metrics HTTP server.
//!
//! One axum listener serves the WebSocket subscription path plus
//! `/health` and `/metrics`. Connections to any other path are rejected
//! before the upgrade ever happens.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::debug;

use crate::broadcast::SubscriberRegistry;
use crate::stats::BridgeStats;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SubscriberRegistry>,
    pub stats: Arc<BridgeStats>,
}

/// Bind the subscriber-facing listener.
///
/// A failure here is fatal at startup; the bridge must not proceed into
/// its main loop without a listener.
pub async fn bind(bind_addr: &str, port: u16) -> Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", bind_addr, port)
        .parse()
        .with_context(|| format!("invalid server bind address {}:{}", bind_addr, port))?;
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))
}

/// Build the router: the WebSocket subscription path plus health and
/// metrics endpoints.
pub fn router(ws_path: &str, state: AppState) -> Router {
    Router::new()
        .route(ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve until the shutdown watch flips.
///
/// Graceful: the listener stops accepting and the task returns once the
/// remaining connections finish (the orchestrator closes subscribers
/// right after signalling, so this does not wait on them forever).
pub async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let output = format_prometheus_metrics(&state.stats);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

/// WebSocket upgrade on the subscription path.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-subscriber socket task: drain the registry queue into the socket
/// until either side goes away.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (id, mut queue) = state.registry.add().await;

    loop {
        tokio::select! {
            queued = queue.recv() => {
                match queued {
                    Some(payload) => {
                        if socket.send(Message::Text((*payload).clone().into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Evicted or shutting down: say goodbye properly.
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("subscriber {} socket error: {}", id, e);
                        break;
                    }
                    // Subscribers have nothing to say to the bridge.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.registry.remove(id).await;
}

/// Format statistics as Prometheus text format.
fn format_prometheus_metrics(stats: &BridgeStats) -> String {
    let summary = stats.summary();
    let mut output = String::with_capacity(2048);

    output.push_str("# HELP dxb_uptime_seconds Time since the bridge started\n");
    output.push_str("# TYPE dxb_uptime_seconds gauge\n");
    output.push_str(&format!("dxb_uptime_seconds {:.3}\n", summary.elapsed_secs));

    output.push_str("# HELP dxb_feed_lines_total Sanitized lines received from the cluster\n");
    output.push_str("# TYPE dxb_feed_lines_total counter\n");
    output.push_str(&format!("dxb_feed_lines_total {}\n", summary.lines_received));

    output.push_str("# HELP dxb_non_spot_lines_total Feed lines discarded as chatter\n");
    output.push_str("# TYPE dxb_non_spot_lines_total counter\n");
    output.push_str(&format!(
        "dxb_non_spot_lines_total {}\n",
        summary.non_spot_lines
    ));

    output.push_str("# HELP dxb_parse_failures_total Spot-like lines that failed to parse\n");
    output.push_str("# TYPE dxb_parse_failures_total counter\n");
    output.push_str(&format!(
        "dxb_parse_failures_total {}\n",
        summary.parse_failures
    ));

    output.push_str("# HELP dxb_spots_total Spots parsed from the feed\n");
    output.push_str("# TYPE dxb_spots_total counter\n");
    for (mode, count) in &summary.spots_by_mode {
        output.push_str(&format!("dxb_spots_total{{mode=\"{}\"}} {}\n", mode, count));
    }
    if summary.spots_by_mode.is_empty() {
        output.push_str(&format!("dxb_spots_total {}\n", summary.spots_parsed));
    }

    output.push_str("# HELP dxb_spots_by_band_total Spots broken down by amateur band\n");
    output.push_str("# TYPE dxb_spots_by_band_total counter\n");
    for (band, count) in &summary.spots_by_band {
        output.push_str(&format!(
            "dxb_spots_by_band_total{{band=\"{}\"}} {}\n",
            band, count
        ));
    }

    output.push_str("# HELP dxb_broadcasts_total Broadcast passes performed\n");
    output.push_str("# TYPE dxb_broadcasts_total counter\n");
    output.push_str(&format!("dxb_broadcasts_total {}\n", summary.broadcasts));

    output.push_str("# HELP dxb_subscriber_drops_total Subscribers evicted for slow delivery\n");
    output.push_str("# TYPE dxb_subscriber_drops_total counter\n");
    output.push_str(&format!(
        "dxb_subscriber_drops_total {}\n",
        summary.subscriber_drops
    ));

    output.push_str("# HELP dxb_reconnects_total Cluster sessions that ended in failure\n");
    output.push_str("# TYPE dxb_reconnects_total counter\n");
    output.push_str(&format!("dxb_reconnects_total {}\n", summary.reconnects));

    output.push_str("# HELP dxb_subscribers Currently connected subscribers\n");
    output.push_str("# TYPE dxb_subscribers gauge\n");
    output.push_str(&format!("dxb_subscribers {}\n", summary.subscribers));

    output.push_str("# HELP dxb_spots_per_second Current spot processing rate\n");
    output.push_str("# TYPE dxb_spots_per_second gauge\n");
    output.push_str(&format!(
        "dxb_spots_per_second {:.3}\n",
        summary.spots_per_second
    ));

    if let Some(ref payload) = summary.payload_percentiles {
        output.push_str("# HELP dxb_payload_bytes Serialized spot payload size distribution\n");
        output.push_str("# TYPE dxb_payload_bytes summary\n");
        output.push_str(&format!(
            "dxb_payload_bytes{{quantile=\"0.5\"}} {}\n",
            payload.p50
        ));
        output.push_str(&format!(
            "dxb_payload_bytes{{quantile=\"0.9\"}} {}\n",
            payload.p90
        ));
        output.push_str(&format!(
            "dxb_payload_bytes{{quantile=\"0.99\"}} {}\n",
            payload.p99
        ));
        output.push_str(&format!("dxb_payload_bytes_count {}\n", summary.broadcasts));
    }

    output
}
