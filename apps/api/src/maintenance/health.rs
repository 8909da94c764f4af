//! Database health check: one timed connectivity probe, then one count per watched table.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::gateway::{DataGateway, Filter, Table};

pub const WATCHED_TABLES: [Table; 4] = [
    Table::Profiles,
    Table::CvDocuments,
    Table::CvAnalyses,
    Table::PaymentRecords,
];

/// Share of passing checks at or above which the database counts as degraded, not unhealthy.
const DEGRADED_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, bool>,
    pub metrics: BTreeMap<String, u64>,
    pub timestamp: DateTime<Utc>,
}

pub fn status_for(passed: usize, total: usize) -> HealthStatus {
    if passed == total {
        HealthStatus::Healthy
    } else if passed as f64 / total as f64 >= DEGRADED_THRESHOLD {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

pub struct DatabaseHealthCheck {
    gateway: Arc<dyn DataGateway>,
}

impl DatabaseHealthCheck {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self {
        Self { gateway }
    }

    pub async fn run(&self) -> HealthReport {
        let mut checks = BTreeMap::new();
        let mut metrics = BTreeMap::new();

        let started = Instant::now();
        let probe = self
            .gateway
            .select(Table::Profiles, &Filter::new().limit(1))
            .await;
        if let Err(err) = probe {
            warn!(error = %err, "Database connectivity probe failed");
            checks.insert("connection".to_string(), false);
            return HealthReport {
                status: HealthStatus::Unhealthy,
                checks,
                metrics: BTreeMap::new(),
                timestamp: Utc::now(),
            };
        }
        checks.insert("connection".to_string(), true);
        metrics.insert(
            "connection_time_ms".to_string(),
            started.elapsed().as_millis() as u64,
        );

        for table in WATCHED_TABLES {
            match self.gateway.count(table, &Filter::new()).await {
                Ok(count) => {
                    checks.insert(format!("{table}_accessible"), true);
                    metrics.insert(format!("{table}_count"), count);
                }
                Err(err) => {
                    warn!(%table, error = %err, "Table health probe failed");
                    checks.insert(format!("{table}_accessible"), false);
                }
            }
        }

        let passed = checks.values().filter(|ok| **ok).count();
        let status = status_for(passed, checks.len());
        info!(?status, passed, total = checks.len(), "Database health check finished");

        HealthReport {
            status,
            checks,
            metrics,
            timestamp: Utc::now(),
        }
    }
}
