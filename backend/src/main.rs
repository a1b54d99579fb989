use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use cleanroute::{
    aqi::ThreadRandom, clock::SystemClock, config::ServerConfig, create_router, AppState,
};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Route exposure scoring and air-quality heatmap API"
)]
struct Args {
    /// Address to listen on (overrides BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Directions backend API key (overrides DIRECTIONS_API_KEY)
    #[arg(long)]
    directions_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cleanroute=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(key) = args.directions_api_key {
        config.directions_api_key = Some(key).filter(|key| !key.trim().is_empty());
    }

    if config.directions_api_key.is_none() {
        tracing::warn!("no directions API key configured, routes will use the fallback set");
    }

    let state = AppState::new(&config, Arc::new(ThreadRandom), Arc::new(SystemClock))?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = create_router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("starting cleanroute on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
