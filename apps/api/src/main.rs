mod billing;
mod config;
mod db;
mod documents;
mod errors;
mod gateway;
mod insights;
mod llm_client;
mod maintenance;
mod models;
mod routes;
mod state;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::billing::stripe::StripeClient;
use crate::config::Config;
use crate::db::{create_lazy_pool, create_pool};
use crate::gateway::{postgres::PgGateway, DataGateway};
use crate::llm_client::LlmClient;
use crate::maintenance::backup::{export_backup, BackupConfig, BackupFrequency};
use crate::maintenance::health::DatabaseHealthCheck;
use crate::maintenance::DatabaseMaintenance;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::{build_s3_client, ObjectStorage, S3Storage};

const USAGE: &str = "Usage: jobfit-api [serve | maintenance | db-health | backup [daily|weekly|monthly]]";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = std::env::args().nth(1);
    match command.as_deref() {
        None | Some("serve") => serve(config).await,
        Some("maintenance") => run_maintenance(config).await,
        Some("db-health") => run_db_health(config).await,
        Some("backup") => run_backup(config).await,
        Some(other) => bail!("Unknown command: {other}\n{USAGE}"),
    }
}

/// PostgreSQL-backed gateway and the S3 bucket, shared by every command.
/// The server connects eagerly; one-shot commands connect lazily and report failures.
async fn connect(
    config: &Config,
    eager: bool,
) -> Result<(Arc<dyn DataGateway>, Arc<dyn ObjectStorage>)> {
    let pool = if eager {
        create_pool(&config.database_url, config.database_max_connections).await?
    } else {
        create_lazy_pool(&config.database_url, config.database_max_connections)?
    };
    let gateway: Arc<dyn DataGateway> = Arc::new(PgGateway::new(pool));

    let s3 = build_s3_client(config).await;
    let storage: Arc<dyn ObjectStorage> = Arc::new(S3Storage::new(s3, config.s3_bucket.clone()));
    info!(bucket = %config.s3_bucket, "S3 client initialized");

    Ok((gateway, storage))
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting jobfit API v{}", env!("CARGO_PKG_VERSION"));

    let (gateway, storage) = connect(&config, true).await?;

    // Initialize LLM client
    let llm = LlmClient::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
    )?;
    if llm.is_configured() {
        info!("LLM client initialized (model: {})", llm.model());
    } else {
        tracing::warn!("LLM_API_KEY not set; generation endpoints will fail");
    }

    // Initialize Stripe client
    let stripe = config.stripe_secret_key.clone().map(StripeClient::new);
    if stripe.is_none() {
        tracing::warn!("STRIPE_SECRET_KEY not set; billing endpoints will answer 503");
    }

    let state = AppState {
        gateway,
        storage,
        llm,
        stripe,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to the web app's domain

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_maintenance(config: Config) -> Result<()> {
    let (gateway, storage) = connect(&config, false).await?;
    let report = DatabaseMaintenance::new(gateway, storage, config.retention)
        .run_maintenance_tasks()
        .await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_db_health(config: Config) -> Result<()> {
    let (gateway, _) = connect(&config, false).await?;
    let report = DatabaseHealthCheck::new(gateway).run().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_backup(config: Config) -> Result<()> {
    let mut backup = BackupConfig::default();
    if let Some(word) = std::env::args().nth(2) {
        backup.frequency = word.parse::<BackupFrequency>()?;
    }

    let (gateway, storage) = connect(&config, false).await?;
    let summary = export_backup(gateway.as_ref(), storage.as_ref(), &backup, Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
