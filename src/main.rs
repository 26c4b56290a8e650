use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use semantic_bridge::{
    BridgeConfig, BridgeError, GenerationBackend, GenerationClient, RelayLink, RequestQueue,
    RequestRouter, ResponseCache, StatsReporter, WebSocketConnector, build_router,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = BridgeConfig::from_env()?;
    tracing::info!(
        relay = %config.relay_url(),
        backend = %config.backend_url,
        "starting semantic bridge"
    );

    let client = GenerationClient::from_config(&config);
    if client.is_available().await {
        let models = client.list_models().await;
        tracing::info!(?models, default_model = client.default_model(), "backend reachable");
    } else {
        tracing::warn!(
            backend = %config.backend_url,
            "backend unavailable, generation requests will fail until it comes up"
        );
    }
    let backend: Arc<dyn GenerationBackend> = Arc::new(client);

    let cache = Arc::new(ResponseCache::with_capacity(config.cache_capacity));
    let queue = RequestQueue::new();

    let (relay, inbox) = RelayLink::new(config.reconnect);
    relay
        .connect(WebSocketConnector::new(config.relay_url()))
        .await
        .map_err(|err| BridgeError::Startup(err.to_string()))?;

    let stats = StatsReporter::new(cache.clone(), queue.clone(), config.stats_interval)
        .with_relay(relay.clone());
    stats.clone().spawn();

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    let health = build_router(cache.clone(), stats, backend.clone());
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, health).await {
            tracing::error!(error = %err, "health server stopped");
        }
    });
    tracing::info!(%addr, "health server ready");

    let router = Arc::new(
        RequestRouter::new(backend, cache, queue, Arc::new(relay))
            .with_max_in_flight(config.max_in_flight),
    );
    router.run(inbox).await;

    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,tower_http=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
