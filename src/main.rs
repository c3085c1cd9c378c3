use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cache;
mod config;
mod proxy;
mod routes;
mod snapshot;
#[cfg(test)]
mod test_support;

use config::Config;
use proxy::WeatherProxy;
use routes::{create_router, AppState};
use snapshot::{FallbackFile, SnapshotResolver, UpstreamClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_snapshot_proxy=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize the shared cache
    let cache = cache::build_cache(&config)?;

    // Initialize snapshot sources
    let upstream = UpstreamClient::new(&config)?;
    let fallback = FallbackFile::new(&config.fallback_path);
    if tokio::fs::metadata(fallback.path()).await.is_err() {
        tracing::warn!(
            "Fallback snapshot {} is not readable yet; upstream outages will return 503",
            fallback.path().display()
        );
    }
    let resolver = SnapshotResolver::new(upstream, fallback);

    let mut proxy = WeatherProxy::new(cache, resolver, config.cache_key.clone(), config.cache_ttl());
    if config.cache_coalesce_misses {
        tracing::info!("Coalescing concurrent cache misses");
        proxy = proxy.with_coalesced_misses();
    }

    let bind_addr = config.bind_addr.clone();
    tracing::info!(
        "Proxying {} (fallback {}, ttl {}s)",
        config.upstream_url,
        config.fallback_path.display(),
        config.cache_ttl_secs
    );

    // Create application state
    let state = AppState {
        config: Arc::new(config),
        proxy: Arc::new(proxy),
    };

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server starting on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
