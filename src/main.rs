//! Entry point: load config, wire dependencies, and run the relay server.

use relay::config::Config;
use relay::repositories::RedisRepository;
use relay::services::ChannelService;
use relay::{create_app, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let repo = match &config.redis_url {
        Some(url) => {
            tracing::info!("using redis for channel fan-out");
            Some(Arc::new(RedisRepository::new(url)?))
        }
        None => {
            tracing::info!("REDIS_URL not set, channels are in-process only");
            None
        }
    };
    let channel_service = ChannelService::new(repo, config.channel_capacity);

    let state = AppState {
        channel_service,
        sse_keepalive: config.sse_keepalive,
    };

    let app = create_app(state);

    tracing::info!(addr = %config.server_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
