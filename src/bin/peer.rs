//! Peer Mixer node
//!
//! Joins (or starts) a serverless mixing session: listens for peers, dials
//! the configured ones and exposes the HTTP control API.
//!
//! Usage: `peer [config.toml] [host:port ...]`

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peer_mixer::{
    config::AppConfig,
    network::TcpTransport,
    session::{SessionActor, SessionOptions},
    ui::{AppState, WebServer},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let mut config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;
    config.network.connect.extend(args);

    let peer_id = config.resolve_peer_id();
    tracing::info!(peer = %peer_id, "Starting Peer Mixer");

    let session = SessionActor::spawn(SessionOptions {
        peer_id: peer_id.clone(),
        codec: config.codec,
    })?;

    // Peer transport
    let listen: SocketAddr = format!(
        "{}:{}",
        config.network.listen_address, config.network.listen_port
    )
    .parse()
    .context("invalid listen address")?;
    let transport = TcpTransport::new(peer_id, session.peer_events(), config.network.nodelay);
    let listener = TcpTransport::bind(listen)?;
    let _accept = transport.serve(listener);
    tracing::info!("Accepting peers on {}", listen);

    for addr in &config.network.connect {
        match transport.connect(addr).await {
            Ok(remote) => tracing::info!(peer = %remote, "Connected to {}", addr),
            Err(e) => tracing::warn!("Could not reach {}: {}", addr, e),
        }
    }

    // Control API
    if config.api.enabled {
        let addr: SocketAddr = format!("{}:{}", config.api.bind_address, config.api.http_port)
            .parse()
            .context("invalid API address")?;
        let state = AppState::new(session.clone(), Some(transport.clone()), config.codec.sample_rate);
        let server = WebServer::new(state, addr).with_static_dir(config.api.static_dir.clone());
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!("Control API stopped: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    session.shutdown().await;

    Ok(())
}
