use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::Duration;

use crate::llm_client::{DEFAULT_API_URL, DEFAULT_MODEL};
use crate::maintenance::RetentionPolicy;

const MAX_GUEST_SESSION_TTL_HOURS: u32 = 24 * 365;
const MAX_RETENTION_DAYS: u32 = 3650;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing; vendor keys are optional so the
/// maintenance commands can run without them.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub s3_bucket: String,
    pub s3_endpoint: Option<String>,
    pub aws_region: String,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub llm_api_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_premium_price_id: Option<String>,
    pub app_env: String,
    pub port: u16,
    pub rust_log: String,
    pub retention: RetentionPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("Required environment variable '{key}' is not set"))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let defaults = RetentionPolicy::default();
        let retention = RetentionPolicy {
            guest_session_ttl: Duration::hours(parse_retention(
                &lookup,
                "GUEST_SESSION_TTL_HOURS",
                defaults.guest_session_ttl.num_hours(),
                MAX_GUEST_SESSION_TTL_HOURS,
            )?),
            cv_document_ttl: Duration::days(parse_retention(
                &lookup,
                "CV_RETENTION_DAYS",
                defaults.cv_document_ttl.num_days(),
                MAX_RETENTION_DAYS,
            )?),
            analysis_ttl: Duration::days(parse_retention(
                &lookup,
                "ANALYSIS_RETENTION_DAYS",
                defaults.analysis_ttl.num_days(),
                MAX_RETENTION_DAYS,
            )?),
        };

        Ok(Config {
            database_url: require("DATABASE_URL")?,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            s3_bucket: require("S3_BUCKET")?,
            s3_endpoint: optional("S3_ENDPOINT"),
            aws_region: optional("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            aws_access_key_id: optional("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: optional("AWS_SECRET_ACCESS_KEY"),
            llm_api_url: optional("LLM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            llm_api_key: optional("LLM_API_KEY"),
            llm_model: optional("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            stripe_secret_key: optional("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: optional("STRIPE_WEBHOOK_SECRET"),
            stripe_premium_price_id: optional("STRIPE_PREMIUM_PRICE_ID"),
            app_env: optional("APP_ENV").unwrap_or_else(|| "development".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            rust_log: optional("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            retention,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

/// Retention periods are whole units in `1..=max`.
fn parse_retention(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: i64,
    max: u32,
) -> Result<i64> {
    let Some(raw) = lookup(key).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    let value: u32 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a positive whole number, got {raw:?}"))?;
    if value == 0 || value > max {
        bail!("{key} must be between 1 and {max}, got {value}");
    }
    Ok(i64::from(value))
}
