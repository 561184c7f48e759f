//! qapi - Substrate chain follower.
//!
//! # Usage
//!
//! ```bash
//! # Follow a local node
//! qapi
//!
//! # Follow a remote node with verbose metadata diagnostics
//! QAPI_DEBUG=1 qapi --ws-url wss://rpc.example.network
//! ```
//!
//! Prints one line per new head with number and hash, then one line per
//! extrinsic: `#<i>: <signed|unsigned> <Pallet>.<method>[ (<reason>)]`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use qapi_core::metrics::init_metrics;
use qapi_core::services::{Overrides, Qapi, QapiConfig};
use qapi_transport::{WsTransport, WsTransportConfig};

/// qapi CLI - follow a chain and name its extrinsics.
#[derive(Parser, Debug)]
#[command(name = "qapi")]
#[command(about = "qapi - Substrate chain follower")]
#[command(version)]
struct Cli {
    /// Node WebSocket URL.
    #[arg(long, env = "WS_URL", default_value = "ws://127.0.0.1:9944")]
    ws_url: String,

    /// Prometheus metrics port. Omit to disable the exporter.
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Override the chain-reported SS58 address prefix.
    #[arg(long, env = "SS58_PREFIX")]
    ss58_prefix: Option<u32>,

    /// Suppress diagnostics when runtime metadata fails to decode.
    #[arg(long)]
    ignore_parse_errors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Prometheus metrics exporter (optional - failures don't crash the app)
    if let Some(port) = cli.metrics_port {
        match format!("0.0.0.0:{port}").parse::<std::net::SocketAddr>() {
            Ok(addr) => match PrometheusBuilder::new().with_http_listener(addr).install() {
                Ok(()) => {
                    init_metrics();
                    info!("📊 Metrics: http://localhost:{port}/metrics");
                }
                Err(e) => {
                    warn!("⚠️  Failed to start metrics exporter: {e}. Continuing without metrics.");
                }
            },
            Err(e) => warn!("⚠️  Invalid metrics address: {e}. Continuing without metrics."),
        }
    }

    info!("🚀 Starting qapi follower");
    debug!(ws_url = %cli.ws_url, "endpoint");

    // ─────────────────────────────────────────────────────────────────────────
    // 📡 CONNECT
    // ─────────────────────────────────────────────────────────────────────────
    let transport = WsTransport::connect(WsTransportConfig::new(cli.ws_url.clone()))
        .await
        .context("Failed to connect to node")?;

    let qapi = Qapi::connect(QapiConfig {
        provider: Arc::new(transport),
        overrides: Overrides {
            ss58_prefix: cli.ss58_prefix,
            metadata: qapi_core::services::MetadataOverrides {
                ignore_parse_errors: cli.ignore_parse_errors,
                ..Default::default()
            },
            ..Default::default()
        },
    })
    .await
    .context("Failed to probe the runtime")?;

    let runtime = qapi.runtime();
    info!(
        spec = %runtime.spec_name,
        version = runtime.spec_version,
        ss58 = ?runtime.ss58_prefix,
        "🔗 Chain connected"
    );
    if qapi.latest_table().await.is_none() {
        warn!("⚠️  No pallet table; extrinsics will print as unknown(i) (no-metadata)");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // ⛓️ FOLLOW
    // ─────────────────────────────────────────────────────────────────────────
    let mut heads = qapi.subscribe_heads().await.context("Head subscription failed")?;
    info!("⛓️  Following new heads. Press Ctrl+C to stop");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            head = heads.next() => match head {
                Some(head) => follow_one(&qapi, head.number, &head.hash).await,
                None => {
                    // the connection was lost; the transport reconnects,
                    // the subscription is ours to re-establish
                    warn!("⚠️  Head stream ended, re-subscribing...");
                    match qapi.subscribe_heads().await {
                        Ok(sub) => heads = sub,
                        Err(e) => {
                            error!(error = %e, "❌ Re-subscription failed");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            },
            _ = &mut shutdown => break,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    heads.unsubscribe().await;
    if let Err(e) = qapi.disconnect().await {
        debug!(error = %e, "disconnect");
    }
    info!("🛑 Shutdown complete");
    Ok(())
}

/// Fetch one block and print its extrinsic identities.
async fn follow_one(qapi: &Qapi, number: u64, hash: &str) {
    println!("#{number} {hash}");
    let block = match qapi.get_block(hash.into()).await {
        Ok(block) => block,
        Err(e) => {
            warn!(block = number, error = %e, "⚠️  Block unavailable");
            return;
        }
    };
    for (i, extrinsic) in block.extrinsics.iter().enumerate() {
        let identity = qapi.decode_extrinsic_name(extrinsic, Some(hash)).await;
        println!("  #{i}: {identity}");
    }
}

/// Initialize tracing subscriber.
///
/// `QAPI_DEBUG` (any non-empty value) raises the metadata decode path to
/// `debug` so tolerated decode failures become visible.
fn init_tracing(level: &str, json: bool) {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if std::env::var("QAPI_DEBUG").is_ok_and(|v| !v.is_empty()) {
        filter = filter.add_directive(
            "qapi_core::metadata=debug"
                .parse()
                .expect("static directive parses"),
        );
    }

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
