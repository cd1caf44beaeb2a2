use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

mod auth;
mod chat;
mod config;
mod documents;
mod error;
mod models;
mod offer;
mod push;
mod remote;
mod routes;
mod state;
mod unread;

use remote::HttpRemoteApi;
use state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::AppConfig::load()?;
    info!(remote = %config.remote_api_url, "loaded config");

    let api = Arc::new(HttpRemoteApi::new(&config.remote_api_url));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config, api);
    let app = routes::router(state);

    info!(%addr, "starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
