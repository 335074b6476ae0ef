mod auth;
mod config_api;
mod dispatch;
mod ingress;
mod problem;
mod router;
mod secret;
mod stats;
mod telemetry;

use std::net::SocketAddr;

use tracing::info;

use ht_hooks_delivery::DeliveryClient;
use ht_hooks_storage::Database;
use ht_hooks_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let http = reqwest::Client::builder().build()?;
    let delivery = DeliveryClient::new(http, config.delivery_timeout);

    let state = router::AppState::new(metrics, database, &config.token_secret, delivery);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
