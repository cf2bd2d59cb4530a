//! Fogmesh Node - tiered mesh membership daemon

use anyhow::{anyhow, Context};
use clap::Parser;
use fogmesh_core::Tier;
use fogmesh_node::config::{
    parse_external_address, parse_listen_address, parse_seed_list, DEFAULT_LISTEN_ADDRESS,
};
use fogmesh_node::network::NetworkConfig;
use fogmesh_node::observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig};
use fogmesh_node::registry::{self, RegistryConfig};
use fogmesh_node::{api, version, Node, NodeConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "fogmesh-node")]
#[command(about = "Tiered IoT/Fog/Cloud mesh node")]
#[command(version = version::VERSION)]
struct Cli {
    /// Node tier: iot, fog or cloud
    #[arg(long = "type", env = "FOGMESH_NODE_TYPE", default_value = "fog")]
    tier: Tier,

    /// Multiaddr to listen on
    #[arg(long, env = "FOGMESH_LISTEN", default_value = DEFAULT_LISTEN_ADDRESS)]
    listen: String,

    /// Seed bootstrap peers (comma-separated, each ending in /p2p/<peer-id>)
    #[arg(long, env = "FOGMESH_BOOTSTRAP", default_value = "")]
    bootstrap: String,

    /// Registry configuration file
    #[arg(long, env = "FOGMESH_REGISTRY_CONFIG", default_value = "config.yaml")]
    registry_config: PathBuf,

    /// Address published to the registry instead of the bound one
    #[arg(long, env = "FOGMESH_EXTERNAL_ADDRESS")]
    external_address: Option<String>,

    /// Serve the HTTP API on this socket address
    #[arg(long, env = "FOGMESH_API_ADDR")]
    api_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(TracingConfig::from_env())
        .map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "fogmesh-node failed");
    }
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!(
        version = %version::full_version(),
        tier = %cli.tier,
        "Starting fogmesh-node"
    );

    let listen = parse_listen_address(&cli.listen)?;
    let seeds = parse_seed_list(&cli.bootstrap)?;
    let external_address = cli
        .external_address
        .as_deref()
        .map(parse_external_address)
        .transpose()?;
    let registry_config = RegistryConfig::load(&cli.registry_config)?;

    let metrics_state = match init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder unavailable, metrics disabled");
            None
        }
    };

    let registry = registry::connect(&registry_config)
        .await
        .context("failed to connect to registry")?;

    let node_config = NodeConfig::new(cli.tier, listen)
        .with_seeds(seeds)
        .with_external_address(external_address)
        .with_network(NetworkConfig::from_env());
    let mut node = Node::new(node_config, registry).await?;

    let api_server = match cli.api_addr {
        Some(addr) => {
            let state = api::AppState::from_node(&node, metrics_state);
            Some(spawn_api(addr, state).await?)
        }
        None => None,
    };

    if let Err(e) = node.start().await {
        node.stop().await;
        return Err(e.into());
    }

    shutdown_signal().await;
    info!("Shutting down");
    node.stop().await;

    if let Some((stop_tx, handle)) = api_server {
        let _ = stop_tx.send(());
        let _ = handle.await;
    }
    Ok(())
}

async fn spawn_api(
    addr: SocketAddr,
    state: api::AppState,
) -> anyhow::Result<(oneshot::Sender<()>, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API address {addr}"))?;
    info!(addr = %addr, "Starting API server");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let app = api::create_router(state);
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = stop_rx.await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "API server failed");
        }
    });
    Ok((stop_tx, handle))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for interrupt");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
