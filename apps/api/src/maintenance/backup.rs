//! Backup export: a JSON snapshot of every included table, uploaded to object storage.
//! Payment-provider identifiers and request fingerprints are stripped before upload.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::gateway::{DataGateway, Filter, Row, Table};
use crate::storage::ObjectStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for BackupFrequency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => bail!("unknown backup frequency {other:?}, expected daily, weekly or monthly"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Enforced by the bucket's lifecycle rule; exports never prune.
    pub retention_days: u32,
    pub frequency: BackupFrequency,
    pub include_tables: Vec<Table>,
    pub exclude_columns: BTreeMap<Table, Vec<&'static str>>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            frequency: BackupFrequency::Daily,
            include_tables: Table::ALL.to_vec(),
            exclude_columns: BTreeMap::from([
                (
                    Table::Profiles,
                    vec!["stripe_customer_id", "stripe_subscription_id"],
                ),
                (
                    Table::PaymentRecords,
                    vec!["stripe_payment_intent_id", "metadata"],
                ),
                (Table::UserSessions, vec!["ip_address", "user_agent"]),
            ]),
        }
    }
}

impl BackupConfig {
    pub fn excluded(&self, table: Table) -> &[&'static str] {
        self.exclude_columns
            .get(&table)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub frequency: BackupFrequency,
    pub retention_days: u32,
    pub row_counts: BTreeMap<String, usize>,
}

#[derive(Serialize)]
struct BackupDocument<'a> {
    created_at: DateTime<Utc>,
    tables: &'a BTreeMap<String, Vec<Row>>,
}

pub fn backup_key(now: DateTime<Utc>) -> String {
    format!("backups/{}.json", now.format("%Y%m%dT%H%M%SZ"))
}

pub async fn export_backup(
    gateway: &dyn DataGateway,
    storage: &dyn ObjectStorage,
    config: &BackupConfig,
    now: DateTime<Utc>,
) -> Result<BackupSummary> {
    let mut tables = BTreeMap::new();
    for &table in &config.include_tables {
        let mut rows = gateway
            .select(table, &Filter::new())
            .await
            .with_context(|| format!("failed to read {table} for backup"))?;
        strip_columns(&mut rows, config.excluded(table));
        tables.insert(table.name().to_string(), rows);
    }

    let body = serde_json::to_vec(&BackupDocument {
        created_at: now,
        tables: &tables,
    })
    .context("failed to serialize backup")?;

    let key = backup_key(now);
    let size = body.len();
    storage
        .put_object(&key, body, "application/json")
        .await
        .with_context(|| format!("failed to upload backup {key}"))?;

    let row_counts: BTreeMap<String, usize> = tables
        .iter()
        .map(|(name, rows)| (name.clone(), rows.len()))
        .collect();
    info!(%key, bytes = size, tables = row_counts.len(), "Backup exported");

    Ok(BackupSummary {
        key,
        created_at: now,
        frequency: config.frequency,
        retention_days: config.retention_days,
        row_counts,
    })
}

fn strip_columns(rows: &mut [Row], columns: &[&str]) {
    if columns.is_empty() {
        return;
    }
    for row in rows {
        for column in columns {
            row.remove(*column);
        }
    }
}
