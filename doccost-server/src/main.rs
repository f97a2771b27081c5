//! DocCost Server - web calculator and JSON API

mod api;
mod config;
mod web;

use clap::Parser;
use config::{Args, ServerConfig};
use doccost_core::{Estimator, Settings};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let args = Args::parse();
    let config = ServerConfig::from(&args);

    info!("Starting DocCost server...");
    info!("Schemas directory: {:?}", config.schemas_dir);

    let settings = match &config.settings_file {
        Some(path) => {
            info!("Settings file: {:?}", path);
            Settings::from_json_file(path)?
        }
        None => Settings::default(),
    };

    let estimator = Arc::new(Estimator::open(&config.schemas_dir, settings)?);

    let app = api::create_router(estimator);

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!("DocCost server listening on http://{}", config.http_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
