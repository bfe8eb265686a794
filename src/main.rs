//! GrantFlow backend — entry point.
//!
//! Serves the grant-application REST API: applicants draft and submit
//! funding requests, admins review them, approved applications are routed
//! through the e-signature provider, and signed grantees submit payment
//! details for disbursement tracking.

mod api;
mod config;
mod db;
mod errors;
mod models;
mod pdf;
mod signing;

use std::sync::Arc;

use reqwest::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use signing::SigningClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client shared with the signing-provider client.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let signing = SigningClient::new(client, &config).map_err(|e| anyhow::anyhow!("{e}"))?;

    let state = Arc::new(api::ApiState { pool, signing });
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
