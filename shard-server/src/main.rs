//! Shard node process: parses CLI arguments, wires up an [`AppState`], and
//! serves the HTTP Dispatcher.

mod http;
mod peer_sync;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use shard_lib::repo::volume::LocalVolume;
use shard_lib::repo::volume::Volume;
use shard_lib::ShardSpec;
use tower_http::trace::TraceLayer;

use crate::http::AppState;

/// `shard <shard>-<modulos> <peer-discovery-url>`, per spec §6.
#[derive(Debug, Parser)]
#[command(name = "shard", about = "One node of a sharded, content-addressed store")]
struct Args {
    /// This node's partition, e.g. "0-2" for shard 0 of 2.
    shard_spec: ShardSpec,

    /// Opaque peer discovery source. Service discovery itself is out of
    /// scope here: the URL is read as a path to a file containing a
    /// comma-separated peer list (or, if it looks like a literal list
    /// itself, used directly).
    peer_discovery_url: String,

    /// Root directory for persisted repo state.
    #[arg(long, default_value = "./var/shard-data")]
    root: PathBuf,

    /// Port to bind. Defaults to 80, matching the production target;
    /// override for local development, where binding 80 unprivileged fails.
    #[arg(long, default_value_t = 80)]
    port: u16,

    /// Explicit peer list, overriding `peer_discovery_url` resolution.
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,
}

fn resolve_peers(args: &Args) -> Vec<String> {
    if !args.peers.is_empty() {
        return args.peers.clone();
    }
    if args.peer_discovery_url.contains(',') || !args.peer_discovery_url.contains('/') {
        return args
            .peer_discovery_url
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    match std::fs::read_to_string(&args.peer_discovery_url) {
        Ok(contents) => contents
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Err(error) => {
            tracing::warn!(%error, url = %args.peer_discovery_url, "failed to read peer discovery file, starting with no peers");
            vec![]
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let peers = resolve_peers(&args);
    tracing::info!(shard_spec = %args.shard_spec, root = %args.root.display(), peers = ?peers, "starting shard node");

    let volume: Arc<dyn Volume> = Arc::new(LocalVolume::new(&args.root));
    let state = AppState::new(args.shard_spec, volume, peers);
    state.data_store().ensure().await?;
    state.comp_store().ensure().await?;

    let app = http::router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
