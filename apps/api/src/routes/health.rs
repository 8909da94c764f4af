use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::gateway::{Filter, Table};
use crate::maintenance::health::{DatabaseHealthCheck, HealthReport, HealthStatus};
use crate::state::AppState;

/// GET /health
/// Static liveness payload; never touches the database.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "environment": state.config.app_env,
        "version": env!("CARGO_PKG_VERSION"),
        "service": env!("CARGO_PKG_NAME"),
    }))
}

#[derive(Debug, Serialize)]
pub struct EnvironmentCheck {
    pub database_url: bool,
    pub s3_bucket: bool,
    pub s3_endpoint: bool,
    pub llm_api_key: bool,
    pub stripe_secret: bool,
    pub stripe_webhook: bool,
    pub stripe_premium_price: bool,
}

/// GET /api/test
/// Reports which integrations are configured plus one live database probe.
pub async fn diagnostics_handler(State(state): State<AppState>) -> Json<Value> {
    let config = &state.config;
    let environment = EnvironmentCheck {
        database_url: !config.database_url.is_empty(),
        s3_bucket: !config.s3_bucket.is_empty(),
        s3_endpoint: config.s3_endpoint.is_some(),
        llm_api_key: state.llm.is_configured(),
        stripe_secret: config.stripe_secret_key.is_some(),
        stripe_webhook: config.stripe_webhook_secret.is_some(),
        stripe_premium_price: config.stripe_premium_price_id.is_some(),
    };

    let database = match state
        .gateway
        .select(Table::Profiles, &Filter::new().limit(1))
        .await
    {
        Ok(_) => "connected".to_string(),
        Err(err) => format!("error: {err}"),
    };

    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "environment": config.app_env,
        "environment_variables": environment,
        "llm_model": state.llm.model(),
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/v1/admin/db-health
/// 200 while healthy or degraded, 503 once unhealthy.
pub async fn db_health_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthReport>) {
    let report = DatabaseHealthCheck::new(Arc::clone(&state.gateway)).run().await;
    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}
