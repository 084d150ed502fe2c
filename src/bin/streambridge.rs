use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use streambridge::broker::RestProxyClient;
use streambridge::cache::KvStoreClient;
use streambridge::{build_router, init_tracing, Bridge, BridgeConfig, DEFAULT_CACHE_KEY};

#[derive(Parser, Debug)]
#[command(
    name = "streambridge",
    about = "HTTP-to-stream bridge with a KV read-through cache"
)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "BRIDGE_LISTEN", default_value = "127.0.0.1:8080")]
    listen: String,

    /// Base URL of the broker REST proxy
    #[arg(long, env = "BRIDGE_BROKER_URL", default_value = "http://localhost:8082")]
    broker_url: String,

    /// Base URL of the key-value store
    #[arg(long, env = "BRIDGE_CACHE_URL", default_value = "http://localhost:7379")]
    cache_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    // Fail fast: refuse to serve if either external service is unreachable.
    let broker = RestProxyClient::new(&args.broker_url)?;
    broker
        .ping()
        .await
        .with_context(|| format!("broker at {} is unreachable", args.broker_url))?;

    let cache = KvStoreClient::new(&args.cache_url)?;
    cache
        .ping(DEFAULT_CACHE_KEY)
        .await
        .with_context(|| format!("cache at {} is unreachable", args.cache_url))?;

    info!(
        broker = %args.broker_url,
        cache = %args.cache_url,
        "connected to external services"
    );

    let broker = Arc::new(broker);
    let bridge = Arc::new(Bridge::new(
        broker.clone(),
        broker,
        Arc::new(cache),
        BridgeConfig::default(),
    ));

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!(listen = %args.listen, "server started");
    axum::serve(listener, build_router(bridge)).await?;

    Ok(())
}
